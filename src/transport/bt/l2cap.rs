//! Minimal L2CAP sequenced-packet socket bindings. No crate in our stack
//! wraps BTPROTO_L2CAP, so the socket plumbing is done against libc
//! directly and kept inside this module.

use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::state::BdAddr;
use crate::transport::TransportError;

const BTPROTO_L2CAP: libc::c_int = 0;

const SOL_L2CAP: libc::c_int = 6;
const L2CAP_OPTIONS: libc::c_int = 0x01;
const L2CAP_MODE_BASIC: u8 = 0x00;

const SOL_BLUETOOTH: libc::c_int = 274;
const BT_POWER: libc::c_int = 9;
const BT_FLUSHABLE: libc::c_int = 8;
const BT_FLUSHABLE_ON: u32 = 1;

/// One baseband slot; late packets are discarded by the radio instead of
/// queueing behind sniff-mode wakeups.
const FLUSH_TIMEOUT_SLOTS: u16 = 1;

/// Smallest buffers the kernel accepts. The wire sustains ~25 payloads a
/// second, so any queued backlog turns directly into input lag.
const MIN_SOCKET_BUFFER: libc::c_int = 1;

pub const OUTPUT_MTU: u16 = 50;
pub const INPUT_MTU: u16 = 64;

#[repr(C)]
#[allow(dead_code)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct L2capOptions {
    omtu: u16,
    imtu: u16,
    flush_to: u16,
    mode: u8,
    fcs: u8,
    max_tx: u8,
    txwin_size: u16,
}

#[repr(C)]
#[allow(dead_code)]
struct BtPower {
    force_active: u8,
}

pub struct L2capSocket {
    fd: OwnedFd,
}

impl L2capSocket {
    /// Open a non-blocking SOCK_SEQPACKET channel to `addr`:`psm`, with the
    /// latency-critical socket options applied before the connect, and wait
    /// up to `timeout` for the connection to complete.
    pub fn connect(addr: BdAddr, psm: u16, timeout: Duration) -> Result<Self, TransportError> {
        let raw = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_SEQPACKET | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                BTPROTO_L2CAP,
            )
        };
        if raw < 0 {
            return Err(TransportError::Setup(format!(
                "l2cap socket: {}",
                io::Error::last_os_error()
            )));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        let socket = Self { fd };

        socket.configure()?;

        let sockaddr = SockaddrL2 {
            l2_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: psm.to_le(),
            l2_bdaddr: wire_order(addr),
            l2_cid: 0,
            l2_bdaddr_type: 0, // BR/EDR
        };
        let rc = unsafe {
            libc::connect(
                socket.fd.as_raw_fd(),
                &sockaddr as *const SockaddrL2 as *const libc::sockaddr,
                mem::size_of::<SockaddrL2>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(classify_connect_error(err));
            }
            socket.await_connected(timeout)?;
        }

        log::debug!("L2CAP channel open to {addr} psm {psm:#06x}");
        Ok(socket)
    }

    fn configure(&self) -> Result<(), TransportError> {
        let fd = self.fd.as_raw_fd();

        set_option(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &MIN_SOCKET_BUFFER,
        )?;
        set_option(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &MIN_SOCKET_BUFFER,
        )?;

        let options = L2capOptions {
            omtu: OUTPUT_MTU,
            imtu: INPUT_MTU,
            flush_to: FLUSH_TIMEOUT_SLOTS,
            mode: L2CAP_MODE_BASIC,
            fcs: 0,
            max_tx: 3,
            txwin_size: 63,
        };
        set_option(fd, SOL_L2CAP, L2CAP_OPTIONS, &options)?;

        // Bound any blocking fallback path; steady state never blocks.
        let timeout = libc::timeval {
            tv_sec: 5,
            tv_usec: 0,
        };
        set_option(fd, libc::SOL_SOCKET, libc::SO_SNDTIMEO, &timeout)?;
        set_option(fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, &timeout)?;

        // Keep the ACL link out of sniff mode while we hold it.
        let power = BtPower { force_active: 1 };
        if let Err(e) = set_option(fd, SOL_BLUETOOTH, BT_POWER, &power) {
            log::warn!("BT_POWER not supported: {e}");
        }
        if let Err(e) = set_option(fd, SOL_BLUETOOTH, BT_FLUSHABLE, &BT_FLUSHABLE_ON) {
            log::warn!("BT_FLUSHABLE not supported: {e}");
        }
        Ok(())
    }

    /// Poll for writability, then read SO_ERROR for the connect verdict.
    fn await_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut pollfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout.as_millis() as libc::c_int) };
        if rc < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        if rc == 0 {
            return Err(TransportError::NotResponding);
        }

        let mut err: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        if err != 0 {
            return Err(classify_connect_error(io::Error::from_raw_os_error(err)));
        }
        Ok(())
    }

    /// Non-blocking send of one datagram.
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        let rc = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    /// Non-blocking receive of one datagram; call after a poll.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let rc = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    /// Bytes still queued in the kernel for this socket. Unsupported
    /// kernels report an error; the sender falls back to a fixed cadence.
    pub fn outstanding_bytes(&self) -> io::Result<usize> {
        let mut pending: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::TIOCOUTQ, &mut pending) };
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(pending.max(0) as usize)
        }
    }
}

impl AsFd for L2capSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// The kernel speaks bdaddr_t in reversed byte order.
fn wire_order(addr: BdAddr) -> [u8; 6] {
    let mut bytes = addr.0;
    bytes.reverse();
    bytes
}

fn set_option<T>(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: &T,
) -> Result<(), TransportError> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        Err(TransportError::Setup(format!(
            "setsockopt {level}/{name}: {}",
            io::Error::last_os_error()
        )))
    } else {
        Ok(())
    }
}

/// Map connect errno onto an actionable diagnostic.
fn classify_connect_error(err: io::Error) -> TransportError {
    match err.raw_os_error() {
        Some(libc::ETIMEDOUT) => TransportError::NotResponding,
        Some(libc::ECONNREFUSED) => TransportError::RepairRequired,
        Some(libc::EHOSTDOWN) | Some(libc::EBUSY) => TransportError::Busy,
        _ => TransportError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_reverses() {
        let addr = BdAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(wire_order(addr), [0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn connect_errors_classify() {
        assert!(matches!(
            classify_connect_error(io::Error::from_raw_os_error(libc::ETIMEDOUT)),
            TransportError::NotResponding
        ));
        assert!(matches!(
            classify_connect_error(io::Error::from_raw_os_error(libc::ECONNREFUSED)),
            TransportError::RepairRequired
        ));
        assert!(matches!(
            classify_connect_error(io::Error::from_raw_os_error(libc::EHOSTDOWN)),
            TransportError::Busy
        ));
        assert!(matches!(
            classify_connect_error(io::Error::from_raw_os_error(libc::EPIPE)),
            TransportError::Io(_)
        ));
    }
}
