//! Thin wrappers over the socket syscalls the loop issues per readiness.
//!
//! `EINTR` is retried in place. `EAGAIN`/`EWOULDBLOCK` is reported as
//! `Ok(None)` so callers can tell "nothing yet" apart from a real failure.

use crate::net::utils::storage_to_socketaddr;

use libc::{F_GETFL, F_SETFL, O_NONBLOCK, c_int, fcntl, sockaddr, sockaddr_storage, socklen_t};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const SEND_FLAGS: c_int = 0;

pub(crate) fn set_nonblocking(file_descriptor: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(file_descriptor, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if flags & O_NONBLOCK != 0 {
        return Ok(());
    }

    if unsafe { fcntl(file_descriptor, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Accepts one pending connection from a non-blocking listener.
pub(crate) fn accept(
    listener_file_descriptor: RawFd,
) -> io::Result<Option<(OwnedFd, Option<SocketAddr>)>> {
    loop {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

        let client_file_descriptor = unsafe {
            libc::accept(
                listener_file_descriptor,
                &mut storage as *mut sockaddr_storage as *mut sockaddr,
                &mut length,
            )
        };

        if client_file_descriptor >= 0 {
            let socket = unsafe { OwnedFd::from_raw_fd(client_file_descriptor) };
            return Ok(Some((socket, storage_to_socketaddr(&storage, length))));
        }

        match retry_or_fail(io::Error::last_os_error())? {
            Retry::Again => continue,
            Retry::WouldBlock => return Ok(None),
        }
    }
}

/// Accept failures that concern only the connection being accepted; the
/// drain moves on to the next one.
pub(crate) fn is_aborted_connection(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ECONNABORTED | libc::EPROTO))
}

/// Accept failures caused by descriptor or memory exhaustion. The pending
/// connections stay queued until resources free up.
pub(crate) fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

pub(crate) fn recv(file_descriptor: RawFd, buffer: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        let res = unsafe { libc::recv(file_descriptor, buffer.as_mut_ptr().cast(), buffer.len(), 0) };

        if res >= 0 {
            return Ok(Some(res as usize));
        }

        match retry_or_fail(io::Error::last_os_error())? {
            Retry::Again => continue,
            Retry::WouldBlock => return Ok(None),
        }
    }
}

/// Reads exactly one datagram and the address it came from.
pub(crate) fn recv_from(
    file_descriptor: RawFd,
    buffer: &mut [u8],
) -> io::Result<Option<(usize, Option<SocketAddr>)>> {
    loop {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

        let res = unsafe {
            libc::recvfrom(
                file_descriptor,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
                0,
                &mut storage as *mut sockaddr_storage as *mut sockaddr,
                &mut length,
            )
        };

        if res >= 0 {
            return Ok(Some((res as usize, storage_to_socketaddr(&storage, length))));
        }

        match retry_or_fail(io::Error::last_os_error())? {
            Retry::Again => continue,
            Retry::WouldBlock => return Ok(None),
        }
    }
}

pub(crate) fn send(file_descriptor: RawFd, data: &[u8]) -> io::Result<usize> {
    loop {
        let res = unsafe { libc::send(file_descriptor, data.as_ptr().cast(), data.len(), SEND_FLAGS) };

        if res >= 0 {
            return Ok(res as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub(crate) fn send_to(file_descriptor: RawFd, data: &[u8], target: SocketAddr) -> io::Result<usize> {
    let target = socket2::SockAddr::from(target);

    loop {
        let res = unsafe {
            libc::sendto(
                file_descriptor,
                data.as_ptr().cast(),
                data.len(),
                SEND_FLAGS,
                target.as_ptr().cast(),
                target.len(),
            )
        };

        if res >= 0 {
            return Ok(res as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub(crate) fn local_addr(file_descriptor: RawFd) -> Option<SocketAddr> {
    socket_name(file_descriptor, libc::getsockname)
}

pub(crate) fn peer_addr(file_descriptor: RawFd) -> Option<SocketAddr> {
    socket_name(file_descriptor, libc::getpeername)
}

fn socket_name(
    file_descriptor: RawFd,
    query: unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int,
) -> Option<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

    let result = unsafe {
        query(
            file_descriptor,
            &mut storage as *mut sockaddr_storage as *mut sockaddr,
            &mut length,
        )
    };

    if result < 0 {
        return None;
    }

    storage_to_socketaddr(&storage, length)
}

enum Retry {
    Again,
    WouldBlock,
}

fn retry_or_fail(err: io::Error) -> io::Result<Retry> {
    match err.kind() {
        io::ErrorKind::Interrupted => Ok(Retry::Again),
        io::ErrorKind::WouldBlock => Ok(Retry::WouldBlock),
        _ => Err(err),
    }
}
