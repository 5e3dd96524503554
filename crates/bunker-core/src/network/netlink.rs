//! Minimal rtnetlink client.
//!
//! Speaks just enough of the `NETLINK_ROUTE` protocol to build a container's
//! link: create a veth pair, enslave one end to a bridge, move the other into
//! a namespace, and give it a MAC, an address, and a default route. Every
//! request asks for an acknowledgement and fails on a kernel error reply.

use std::ffi::CString;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use bunker_common::error::{BunkerError, Result};
use ipnetwork::Ipv4Network;

const NETLINK_ROUTE: i32 = 0;

const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_NEWROUTE: u16 = 24;

const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;

const NLMSG_ERROR: u16 = 2;
const NLA_F_NESTED: u16 = 1 << 15;

const IFF_UP: u32 = 0x1;

const IFLA_ADDRESS: u16 = 1;
const IFLA_IFNAME: u16 = 3;
const IFLA_MASTER: u16 = 10;
const IFLA_LINKINFO: u16 = 18;
const IFLA_NET_NS_FD: u16 = 28;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const VETH_INFO_PEER: u16 = 1;

const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;

const RT_TABLE_MAIN: u8 = 254;
const RTPROT_BOOT: u8 = 3;
const RT_SCOPE_UNIVERSE: u8 = 0;
const RTN_UNICAST: u8 = 1;

const HEADER_LEN: usize = 16;
const ATTR_HEADER_LEN: usize = 4;

const fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// Encodes an `ifinfomsg` for `AF_UNSPEC`.
fn ifinfo(index: u32, flags: u32, change: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0] = libc::AF_UNSPEC as u8;
    out[4..8].copy_from_slice(&index.to_ne_bytes());
    out[8..12].copy_from_slice(&flags.to_ne_bytes());
    out[12..16].copy_from_slice(&change.to_ne_bytes());
    out
}

/// A request under construction: header, fixed payload, then attributes.
#[derive(Debug)]
struct Message {
    kind: u16,
    flags: u16,
    buf: Vec<u8>,
    nests: Vec<usize>,
}

impl Message {
    fn new(kind: u16, flags: u16) -> Self {
        Self {
            kind,
            flags: NLM_F_REQUEST | NLM_F_ACK | flags,
            buf: vec![0; HEADER_LEN],
            nests: Vec::new(),
        }
    }

    fn payload(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self.buf.resize(align(self.buf.len()), 0);
        self
    }

    fn attr(&mut self, kind: u16, data: &[u8]) -> &mut Self {
        let len = ATTR_HEADER_LEN + data.len();
        self.buf
            .extend_from_slice(&u16::try_from(len).unwrap_or(u16::MAX).to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(data);
        self.buf.resize(align(self.buf.len()), 0);
        self
    }

    fn attr_str(&mut self, kind: u16, value: &str) -> &mut Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.attr(kind, &data)
    }

    fn attr_u32(&mut self, kind: u16, value: u32) -> &mut Self {
        self.attr(kind, &value.to_ne_bytes())
    }

    fn begin(&mut self, kind: u16) -> &mut Self {
        self.nests.push(self.buf.len());
        self.buf.extend_from_slice(&[0, 0]);
        self.buf.extend_from_slice(&(kind | NLA_F_NESTED).to_ne_bytes());
        self
    }

    fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self.buf.resize(align(self.buf.len()), 0);
        self
    }

    fn end(&mut self) -> &mut Self {
        if let Some(start) = self.nests.pop() {
            let len = u16::try_from(self.buf.len() - start).unwrap_or(u16::MAX);
            self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
        }
        self
    }

    fn finish(mut self, seq: u32) -> Vec<u8> {
        let len = u32::try_from(self.buf.len()).unwrap_or(u32::MAX);
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf[4..6].copy_from_slice(&self.kind.to_ne_bytes());
        self.buf[6..8].copy_from_slice(&self.flags.to_ne_bytes());
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
        self.buf
    }
}

/// Checks the kernel's reply to an acknowledged request.
///
/// # Errors
///
/// Returns `BunkerError::Network` if the reply is truncated or carries a
/// non-zero error code.
pub fn parse_ack(reply: &[u8]) -> Result<()> {
    if reply.len() < HEADER_LEN {
        return Err(BunkerError::network(format!(
            "short netlink reply ({} bytes)",
            reply.len()
        )));
    }
    let kind = u16::from_ne_bytes([reply[4], reply[5]]);
    if kind != NLMSG_ERROR {
        return Ok(());
    }
    let Some(code) = reply.get(HEADER_LEN..HEADER_LEN + 4) else {
        return Err(BunkerError::network("truncated netlink error reply"));
    };
    let code = i32::from_ne_bytes([code[0], code[1], code[2], code[3]]);
    if code == 0 {
        Ok(())
    } else {
        Err(BunkerError::network(format!(
            "netlink error: {}",
            io::Error::from_raw_os_error(-code)
        )))
    }
}

/// Looks up an interface index by name in the caller's network namespace.
///
/// Returns `None` if no such interface exists.
#[must_use]
pub fn try_index_of(name: &str) -> Option<u32> {
    let name = CString::new(name).ok()?;
    // SAFETY: `name` is a valid NUL-terminated string for the whole call.
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    (index != 0).then_some(index)
}

/// Looks up an interface index by name in the caller's network namespace.
///
/// # Errors
///
/// Returns `BunkerError::Network` if no such interface exists.
pub fn index_of(name: &str) -> Result<u32> {
    try_index_of(name).ok_or_else(|| BunkerError::network(format!("interface not found: {name}")))
}

/// A bound `NETLINK_ROUTE` socket.
///
/// The socket talks to the network namespace the caller was in when it was
/// opened, whatever namespace the caller moves to later.
#[derive(Debug)]
pub struct NetlinkHandle {
    fd: OwnedFd,
    seq: u32,
}

impl NetlinkHandle {
    /// Opens and binds a route netlink socket.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the socket cannot be created or bound.
    pub fn new() -> Result<Self> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(BunkerError::network(format!(
                "cannot create netlink socket: {}",
                io::Error::last_os_error()
            )));
        }
        // SAFETY: `raw` is a freshly created descriptor nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: `addr` outlives the call and the length matches its type.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(BunkerError::network(format!(
                "cannot bind netlink socket: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(Self { fd, seq: 0 })
    }

    fn request(&mut self, message: Message) -> Result<()> {
        self.seq = self.seq.wrapping_add(1);
        let bytes = message.finish(self.seq);
        // SAFETY: `bytes` is a live buffer of the given length.
        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                bytes.as_ptr().cast::<libc::c_void>(),
                bytes.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(BunkerError::network(format!(
                "cannot send netlink request: {}",
                io::Error::last_os_error()
            )));
        }

        let mut reply = [0u8; 4096];
        // SAFETY: `reply` is a live, writable buffer of the given length.
        let received = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                reply.as_mut_ptr().cast::<libc::c_void>(),
                reply.len(),
                0,
            )
        };
        let received = usize::try_from(received).map_err(|_| {
            BunkerError::network(format!(
                "cannot receive netlink reply: {}",
                io::Error::last_os_error()
            ))
        })?;
        parse_ack(&reply[..received])
    }

    /// Creates a veth pair with the given end names.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request,
    /// including when either name is taken.
    pub fn create_veth(&mut self, host: &str, peer: &str) -> Result<()> {
        let mut message =
            Message::new(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL).payload(&ifinfo(0, 0, 0));
        let _ = message
            .attr_str(IFLA_IFNAME, host)
            .begin(IFLA_LINKINFO)
            .attr_str(IFLA_INFO_KIND, "veth")
            .begin(IFLA_INFO_DATA)
            .begin(VETH_INFO_PEER)
            .raw(&ifinfo(0, 0, 0))
            .attr_str(IFLA_IFNAME, peer)
            .end()
            .end()
            .end();
        self.request(message)?;
        tracing::debug!(host, peer, "veth pair created");
        Ok(())
    }

    /// Brings the link up.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request.
    pub fn set_up(&mut self, index: u32) -> Result<()> {
        self.request(Message::new(RTM_NEWLINK, 0).payload(&ifinfo(index, IFF_UP, IFF_UP)))
    }

    /// Enslaves the link to the bridge with index `master`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request.
    pub fn set_master(&mut self, index: u32, master: u32) -> Result<()> {
        let mut message = Message::new(RTM_NEWLINK, 0).payload(&ifinfo(index, 0, 0));
        let _ = message.attr_u32(IFLA_MASTER, master);
        self.request(message)
    }

    /// Moves the link into the network namespace open on `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request.
    pub fn move_to_namespace(&mut self, index: u32, namespace: &impl AsRawFd) -> Result<()> {
        let fd: RawFd = namespace.as_raw_fd();
        let mut message = Message::new(RTM_NEWLINK, 0).payload(&ifinfo(index, 0, 0));
        let _ = message.attr_u32(IFLA_NET_NS_FD, fd.unsigned_abs());
        self.request(message)
    }

    /// Sets the link's hardware address.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request.
    pub fn set_mac(&mut self, index: u32, mac: [u8; 6]) -> Result<()> {
        let mut message = Message::new(RTM_NEWLINK, 0).payload(&ifinfo(index, 0, 0));
        let _ = message.attr(IFLA_ADDRESS, &mac);
        self.request(message)
    }

    /// Assigns `address` (with its prefix) to the link.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request.
    pub fn add_address(&mut self, index: u32, address: Ipv4Network) -> Result<()> {
        let mut header = [0u8; 8];
        header[0] = libc::AF_INET as u8;
        header[1] = address.prefix();
        header[3] = RT_SCOPE_UNIVERSE;
        header[4..8].copy_from_slice(&index.to_ne_bytes());
        let octets = address.ip().octets();
        let mut message = Message::new(RTM_NEWADDR, NLM_F_CREATE | NLM_F_EXCL).payload(&header);
        let _ = message.attr(IFA_LOCAL, &octets).attr(IFA_ADDRESS, &octets);
        self.request(message)
    }

    /// Installs a default route through `gateway` on the link.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request.
    pub fn add_default_route(&mut self, gateway: Ipv4Addr, index: u32) -> Result<()> {
        let header = [
            libc::AF_INET as u8,
            0,
            0,
            0,
            RT_TABLE_MAIN,
            RTPROT_BOOT,
            RT_SCOPE_UNIVERSE,
            RTN_UNICAST,
            0,
            0,
            0,
            0,
        ];
        let mut message = Message::new(RTM_NEWROUTE, NLM_F_CREATE | NLM_F_EXCL).payload(&header);
        let _ = message
            .attr(RTA_GATEWAY, &gateway.octets())
            .attr_u32(RTA_OIF, index);
        self.request(message)
    }

    /// Deletes the link; for a veth end this removes the whole pair.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Network` if the kernel rejects the request.
    pub fn delete_link(&mut self, index: u32) -> Result<()> {
        self.request(Message::new(RTM_DELLINK, 0).payload(&ifinfo(index, 0, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_root() -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn error_reply(code: i32) -> Vec<u8> {
        let mut reply = vec![0u8; 36];
        reply[0..4].copy_from_slice(&36u32.to_ne_bytes());
        reply[4..6].copy_from_slice(&NLMSG_ERROR.to_ne_bytes());
        reply[16..20].copy_from_slice(&code.to_ne_bytes());
        reply
    }

    #[test]
    fn zero_error_code_is_an_ack() {
        parse_ack(&error_reply(0)).unwrap();
    }

    #[test]
    fn negative_error_code_is_reported() {
        let err = parse_ack(&error_reply(-libc::EEXIST)).unwrap_err();
        assert!(matches!(err, BunkerError::Network { .. }));
        assert!(err.to_string().contains("exists"), "{err}");
    }

    #[test]
    fn truncated_replies_are_rejected() {
        assert!(parse_ack(&[0u8; 8]).is_err());
        assert!(parse_ack(&error_reply(0)[..18]).is_err());
    }

    #[test]
    fn header_and_attributes_are_aligned() {
        let mut message = Message::new(RTM_NEWLINK, NLM_F_CREATE).payload(&ifinfo(7, 0, 0));
        let _ = message.attr_str(IFLA_IFNAME, "veth0");
        let bytes = message.finish(9);

        // header + ifinfomsg + (4 + "veth0\0" padded to 8)
        assert_eq!(bytes.len(), 16 + 16 + 12);
        assert_eq!(u32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 44);
        assert_eq!(u16::from_ne_bytes([bytes[4], bytes[5]]), RTM_NEWLINK);
        let flags = u16::from_ne_bytes([bytes[6], bytes[7]]);
        assert_eq!(flags, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE);
        assert_eq!(u32::from_ne_bytes(bytes[8..12].try_into().unwrap()), 9);
        assert_eq!(u32::from_ne_bytes(bytes[20..24].try_into().unwrap()), 7);
        assert_eq!(u16::from_ne_bytes([bytes[32], bytes[33]]), 10);
        assert_eq!(&bytes[36..42], b"veth0\0");
    }

    #[test]
    fn nested_attributes_carry_their_full_length() {
        let mut message = Message::new(RTM_NEWLINK, 0);
        let _ = message
            .begin(IFLA_LINKINFO)
            .attr_str(IFLA_INFO_KIND, "veth")
            .end();
        let bytes = message.finish(1);

        let nest = &bytes[HEADER_LEN..];
        assert_eq!(u16::from_ne_bytes([nest[0], nest[1]]), 4 + 12);
        assert_eq!(
            u16::from_ne_bytes([nest[2], nest[3]]),
            IFLA_LINKINFO | NLA_F_NESTED
        );
    }

    #[test]
    fn unknown_interface_has_no_index() {
        assert_eq!(try_index_of("bunker-nope0"), None);
        assert!(index_of("bunker-nope0").is_err());
    }

    #[test]
    fn loopback_has_an_index() {
        assert!(index_of("lo").unwrap() > 0);
    }

    #[test]
    fn socket_opens_as_root() {
        if !is_root() {
            return;
        }
        assert!(NetlinkHandle::new().is_ok());
    }
}
