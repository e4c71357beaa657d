//! Command-line interface.

use std::net::Ipv6Addr;

use clap::Parser;

/// Baud rates accepted by the serial layer. Rates above 115200 depend on
/// platform support; the serial driver reports failure at open time if the
/// hardware cannot do them.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000,
    1500000, 2000000, 2500000, 3000000, 3500000, 4000000,
];

#[derive(Debug, Parser)]
#[command(name = "rethos", about = "Reliable multi-channel bridge between a host and an MCU over serial")]
pub struct Cli {
    /// Serial device connected to the MCU (e.g. /dev/ttyUSB0)
    pub device: String,

    /// Serial baud rate
    #[arg(value_parser = parse_baudrate)]
    pub baudrate: u32,

    /// IPv6 /64 prefix for the tunnel subnet. PREFIX::1 is this host and
    /// PREFIX::2 the MCU. Without a prefix the daemon only forwards messages
    /// to local processes and creates no tunnel interface.
    #[arg(value_parser = parse_prefix)]
    pub prefix: Option<Ipv6Addr>,
}

fn parse_baudrate(s: &str) -> Result<u32, String> {
    let rate: u32 = s.parse().map_err(|_| format!("invalid baudrate: {s}"))?;
    if SUPPORTED_BAUD_RATES.contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("unsupported baudrate: {rate}"))
    }
}

/// Parse an IPv6 prefix, zeroing the interface-identifier half.
fn parse_prefix(s: &str) -> Result<Ipv6Addr, String> {
    let addr: Ipv6Addr = s.parse().map_err(|_| format!("invalid IPv6 address: {s}"))?;
    let mut octets = addr.octets();
    octets[8..].fill(0);
    Ok(Ipv6Addr::from(octets))
}
