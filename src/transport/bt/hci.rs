//! Just enough raw HCI access to read the local adapter address. Radio
//! provisioning (device class, name, page scan) is handled outside the
//! daemon; the address is needed at runtime for the 0xF2 feature report
//! and the pairing record.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use crate::state::BdAddr;

const BTPROTO_HCI: libc::c_int = 1;
/// _IOR('H', 211, int)
const HCIGETDEVINFO: libc::c_ulong = 0x8004_48D3;

#[repr(C)]
#[allow(dead_code)]
struct HciDevStats {
    err_rx: u32,
    err_tx: u32,
    cmd_tx: u32,
    evt_rx: u32,
    acl_tx: u32,
    acl_rx: u32,
    sco_tx: u32,
    sco_rx: u32,
    byte_rx: u32,
    byte_tx: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct HciDevInfo {
    dev_id: u16,
    name: [u8; 8],
    bdaddr: [u8; 6],
    flags: u32,
    dev_type: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: HciDevStats,
}

/// Read the BD_ADDR of the given adapter index.
pub fn local_address(dev_id: u16) -> io::Result<BdAddr> {
    let raw = unsafe {
        libc::socket(
            libc::AF_BLUETOOTH,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            BTPROTO_HCI,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut info: HciDevInfo = unsafe { mem::zeroed() };
    info.dev_id = dev_id;
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), HCIGETDEVINFO, &mut info) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // bdaddr_t arrives in reversed byte order.
    let mut bytes = info.bdaddr;
    bytes.reverse();
    Ok(BdAddr(bytes))
}
