//! TUN interface bring-up and packet bridging.
//!
//! Channel 3 carries raw IPv6 datagrams with no protocol preamble, so the
//! interface is created with `IFF_TUN | IFF_NO_PI` and a kernel-assigned
//! name. The host end of the /64 subnet gets `prefix::1`; the MCU is
//! reachable as `prefix::2` once it learns the prefix over channel 2.
//!
//! A dedicated reader thread bridges inbound packets to the dispatcher;
//! outbound packets are written directly by the dispatcher. Tunnel write
//! failures are logged and the packet discarded — they never affect the
//! serial link.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::Ipv6Addr;
use std::os::fd::AsRawFd;

use rethos_core::constants::MTU;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatcher::Event;
use crate::error::DaemonError;

const TUNSETIFF: libc::c_ulong = 0x4004_54CA;
const SIOCGIFINDEX: libc::c_ulong = 0x8933;
const SIOCSIFADDR: libc::c_ulong = 0x8916;
const SIOCSIFFLAGS: libc::c_ulong = 0x8914;

const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFF_UP: libc::c_short = 0x0001;
const IFF_RUNNING: libc::c_short = 0x0040;

// The kernel's struct ifreq is 16 name bytes plus a 24-byte union; only the
// union member in use is declared, the rest is padding.
#[repr(C)]
struct IfreqFlags {
    ifr_name: [u8; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
struct IfreqIndex {
    ifr_name: [u8; libc::IFNAMSIZ],
    ifr_ifindex: libc::c_int,
    _pad: [u8; 20],
}

#[repr(C)]
struct In6Ifreq {
    ifr6_addr: libc::in6_addr,
    ifr6_prefixlen: u32,
    ifr6_ifindex: libc::c_int,
}

/// This host's address on the tunnel subnet: `prefix::1`.
pub fn host_address(prefix: Ipv6Addr) -> Ipv6Addr {
    let mut octets = prefix.octets();
    octets[15] = 0x01;
    Ipv6Addr::from(octets)
}

/// The MCU's address on the tunnel subnet: `prefix::2`.
pub fn mcu_address(prefix: Ipv6Addr) -> Ipv6Addr {
    let mut octets = prefix.octets();
    octets[15] = 0x02;
    Ipv6Addr::from(octets)
}

/// An up-and-addressed point-to-point layer-3 interface.
#[derive(Debug)]
pub struct TunDevice {
    file: File,
    name: String,
}

impl TunDevice {
    /// Create the TUN interface, assign `prefix::1/64`, and bring it up.
    pub fn create(prefix: Ipv6Addr) -> Result<Self, DaemonError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")
            .map_err(DaemonError::Tun)?;

        let mut ifr = IfreqFlags {
            // Name left zeroed so the kernel assigns one.
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: IFF_TUN | IFF_NO_PI,
            _pad: [0; 22],
        };
        if unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut ifr as *mut IfreqFlags) } < 0 {
            return Err(DaemonError::Tun(std::io::Error::last_os_error()));
        }
        let name_len = ifr
            .ifr_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(libc::IFNAMSIZ);
        let name = String::from_utf8_lossy(&ifr.ifr_name[..name_len]).into_owned();
        info!(interface = %name, "created TUN interface");

        let host = host_address(prefix);
        info!("IPv6 subnet is {prefix}/64");
        info!("IPv6 address of this device is {host}");
        info!("IPv6 address of the MCU is {}", mcu_address(prefix));

        configure_address(&name, host).map_err(DaemonError::Tun)?;

        Ok(Self { file, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the blocking reader thread that forwards inbound packets to the
    /// dispatcher. The thread ends when the interface or the dispatcher goes
    /// away.
    pub fn spawn_reader(&self, event_tx: mpsc::Sender<Event>) -> Result<(), DaemonError> {
        let mut file = self.file.try_clone().map_err(DaemonError::Tun)?;
        std::thread::Builder::new()
            .name("tun-reader".into())
            .spawn(move || {
                let mut buf = vec![0u8; MTU];
                loop {
                    match file.read(&mut buf) {
                        Ok(0) => {
                            warn!("TUN interface closed");
                            break;
                        }
                        Ok(n) => {
                            if event_tx.blocking_send(Event::TunPacket(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            warn!(error = %e, "TUN read failed");
                            break;
                        }
                    }
                }
            })
            .map_err(DaemonError::Tun)?;
        Ok(())
    }

    /// Write one outbound packet. Failures are logged and the packet dropped.
    pub fn write_packet(&mut self, packet: &[u8]) {
        match (&self.file).write(packet) {
            Ok(n) if n != packet.len() => {
                warn!(size = packet.len(), written = n, "partial TUN write, packet dropped");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "TUN write failed, packet dropped"),
        }
    }
}

fn configure_address(name: &str, host: Ipv6Addr) -> std::io::Result<()> {
    let sock = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let result = (|| {
        let mut ifr = IfreqIndex {
            ifr_name: name_bytes(name),
            ifr_ifindex: 0,
            _pad: [0; 20],
        };
        if unsafe { libc::ioctl(sock, SIOCGIFINDEX, &mut ifr as *mut IfreqIndex) } < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let ifr6 = In6Ifreq {
            ifr6_addr: libc::in6_addr { s6_addr: host.octets() },
            ifr6_prefixlen: 64,
            ifr6_ifindex: ifr.ifr_ifindex,
        };
        if unsafe { libc::ioctl(sock, SIOCSIFADDR, &ifr6 as *const In6Ifreq) } < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let mut ifr = IfreqFlags {
            ifr_name: name_bytes(name),
            ifr_flags: IFF_UP | IFF_RUNNING,
            _pad: [0; 22],
        };
        if unsafe { libc::ioctl(sock, SIOCSIFFLAGS, &mut ifr as *mut IfreqFlags) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    })();

    unsafe { libc::close(sock) };
    result
}

fn name_bytes(name: &str) -> [u8; libc::IFNAMSIZ] {
    let mut out = [0u8; libc::IFNAMSIZ];
    let n = name.len().min(libc::IFNAMSIZ - 1);
    out[..n].copy_from_slice(&name.as_bytes()[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_addresses() {
        let prefix: Ipv6Addr = "2001:db8:42:7::".parse().unwrap();
        assert_eq!(host_address(prefix), "2001:db8:42:7::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(mcu_address(prefix), "2001:db8:42:7::2".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_name_bytes_truncates() {
        let bytes = name_bytes("a-very-long-interface-name");
        assert_eq!(bytes[libc::IFNAMSIZ - 1], 0);
    }
}
