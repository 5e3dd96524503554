//! System-wide constants and default paths.

/// Default snapshot store: a btrfs mount holding one subvolume per image or container.
pub const DEFAULT_STORE_DIR: &str = "/mnt/btrfs";

/// Cgroup v1 hierarchy mount point.
pub const CGROUP_V1_PATH: &str = "/sys/fs/cgroup";

/// Name of the pre-existing host bridge container veths are enslaved to.
pub const DEFAULT_BRIDGE: &str = "bridge0";

/// Private block container addresses are drawn from.
pub const DEFAULT_SUBNET: &str = "10.0.0.0/24";

/// Nameserver appended to every container's `/etc/resolv.conf`.
pub const DEFAULT_DNS: &str = "8.8.8.8";

/// Default CPU weight (`cpu.shares`).
pub const DEFAULT_CPU_SHARES: u64 = 1024;

/// Default memory ceiling in bytes.
pub const DEFAULT_MEMORY_BYTES: u64 = 1024 * 1_000_000;

/// `PATH` exported to commands started inside a container.
pub const CONTAINER_PATH: &str = "/bin:/usr/bin:/sbin:/usr/sbin";

/// Sidecar recording the image name or directory a snapshot came from.
pub const SOURCE_FILE: &str = "source";

/// Sidecar recording the argument vector a container was started with.
pub const COMMAND_FILE: &str = "command";

/// Extension of the per-container log file (`<id>.log`).
pub const LOG_EXTENSION: &str = "log";

/// Placeholder rendered when a sidecar or size cannot be read.
pub const UNKNOWN: &str = "UNKNOWN";

/// Docker Hub token service.
pub const REGISTRY_AUTH_URL: &str = "https://auth.docker.io/token";

/// Docker Hub registry API base for official images.
pub const REGISTRY_LIBRARY_URL: &str = "https://registry-1.docker.io/v2/library";

/// Application name used in CLI output and cgroup paths.
pub const APP_NAME: &str = "bunker";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "bunker";
