//! PID namespace isolation.
//!
//! The first stage unshares a PID namespace and forks the container init into
//! it. A joining process attaches to the control group while still in the
//! host namespace, so a cgroup can hold members on both sides; joining the
//! container means finding one that is inside.

use std::path::Path;

use bunker_common::error::{BunkerError, Result};

/// Picks the first of `members` whose PID namespace differs from the caller's.
///
/// # Errors
///
/// Returns `BunkerError::Namespace` if every member shares the caller's PID
/// namespace or has already exited.
pub fn member_inside(members: &[u32]) -> Result<u32> {
    member_inside_at(Path::new("/proc"), members)
}

fn member_inside_at(proc_root: &Path, members: &[u32]) -> Result<u32> {
    let own_path = proc_root.join("self/ns/pid");
    let own = std::fs::read_link(&own_path).map_err(|e| {
        BunkerError::namespace(format!("cannot read {}: {e}", own_path.display()))
    })?;
    members
        .iter()
        .copied()
        .find(|pid| {
            // Members that exit between listing and lookup are skipped.
            std::fs::read_link(proc_root.join(format!("{pid}/ns/pid")))
                .is_ok_and(|ns| ns != own)
        })
        .ok_or_else(|| {
            BunkerError::namespace(format!(
                "none of the group members {members:?} runs inside the container"
            ))
        })
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    fn fake_proc(entries: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (pid, ns) in entries {
            let ns_dir = dir.path().join(pid).join("ns");
            std::fs::create_dir_all(&ns_dir).unwrap();
            symlink(ns, ns_dir.join("pid")).unwrap();
        }
        dir
    }

    #[test]
    fn skips_members_in_the_host_namespace() {
        let proc = fake_proc(&[
            ("self", "pid:[100]"),
            ("10", "pid:[100]"),
            ("11", "pid:[200]"),
        ]);
        assert_eq!(member_inside_at(proc.path(), &[10, 11]).unwrap(), 11);
    }

    #[test]
    fn skips_members_that_already_exited() {
        let proc = fake_proc(&[("self", "pid:[100]"), ("31", "pid:[300]")]);
        assert_eq!(member_inside_at(proc.path(), &[30, 31]).unwrap(), 31);
    }

    #[test]
    fn no_inside_member_is_an_error() {
        let proc = fake_proc(&[("self", "pid:[100]"), ("10", "pid:[100]")]);
        let err = member_inside_at(proc.path(), &[10]).unwrap_err();
        assert!(matches!(err, BunkerError::Namespace { .. }));
    }
}
