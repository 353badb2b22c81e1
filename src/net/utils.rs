use libc::{AF_INET, AF_INET6, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};
use socket2::SockAddr;

use std::mem;
use std::net::SocketAddr;

/// Text used wherever a peer address cannot be resolved.
pub const UNKNOWN_ADDR: &str = "unknown:unknown";

/// Converts a kernel-filled socket address into a [`SocketAddr`].
///
/// Returns `None` for families other than IPv4/IPv6 (Unix sockets, for
/// instance) and for lengths too short to hold the advertised family.
pub(crate) fn storage_to_socketaddr(
    storage: &sockaddr_storage,
    length: socklen_t,
) -> Option<SocketAddr> {
    let required = match storage.ss_family as i32 {
        AF_INET => mem::size_of::<sockaddr_in>(),
        AF_INET6 => mem::size_of::<sockaddr_in6>(),
        _ => return None,
    };
    if (length as usize) < required {
        return None;
    }

    // SAFETY: the kernel initialised `length` bytes of `storage`, enough for
    // the family checked above.
    let address = unsafe { SockAddr::new(*storage, length) };
    address.as_socket()
}

/// Formats an optional address as `host:port`, IPv6 hosts in brackets.
///
/// # Example
/// ```
/// use sockloop::net::format_addr;
///
/// let addr = "[::1]:8080".parse().ok();
/// assert_eq!(format_addr(addr.as_ref()), "[::1]:8080");
/// assert_eq!(format_addr(None), "unknown:unknown");
/// ```
pub fn format_addr(address: Option<&SocketAddr>) -> String {
    match address {
        Some(address) => address.to_string(),
        None => UNKNOWN_ADDR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_of(address: &SocketAddr) -> (sockaddr_storage, socklen_t) {
        let address = socket2::SockAddr::from(*address);
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        unsafe {
            std::ptr::copy_nonoverlapping(
                address.as_ptr() as *const u8,
                &mut storage as *mut sockaddr_storage as *mut u8,
                address.len() as usize,
            );
        }

        (storage, address.len())
    }

    #[test]
    fn ipv4_storage_converts() {
        let original: SocketAddr = "192.168.1.20:4242".parse().unwrap();
        let (storage, length) = storage_of(&original);

        assert_eq!(storage_to_socketaddr(&storage, length), Some(original));
    }

    #[test]
    fn ipv6_storage_converts() {
        let original: SocketAddr = "[fe80::1]:9000".parse().unwrap();
        let (storage, length) = storage_of(&original);

        assert_eq!(storage_to_socketaddr(&storage, length), Some(original));
    }

    #[test]
    fn truncated_storage_is_unknown() {
        let original: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let (storage, _) = storage_of(&original);

        assert_eq!(storage_to_socketaddr(&storage, 2), None);
    }

    #[test]
    fn unknown_family_is_unknown() {
        let storage: sockaddr_storage = unsafe { mem::zeroed() };
        let length = mem::size_of::<sockaddr_storage>() as socklen_t;

        assert_eq!(storage_to_socketaddr(&storage, length), None);
        assert_eq!(format_addr(None), "unknown:unknown");
    }

    #[test]
    fn format_matches_host_port() {
        let v4: SocketAddr = "127.0.0.1:7".parse().unwrap();
        let v6: SocketAddr = "[::1]:7".parse().unwrap();

        assert_eq!(format_addr(Some(&v4)), "127.0.0.1:7");
        assert_eq!(format_addr(Some(&v6)), "[::1]:7");
    }
}
