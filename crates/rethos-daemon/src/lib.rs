//! Host-side bridge daemon for the rethos serial link.
//!
//! The daemon keeps a reliable, multi-channel duplex link to an MCU over a
//! single UART and exposes the 256 logical channels to local processes
//! through abstract-namespace Unix sockets. A single dispatcher task owns
//! all protocol state; endpoint and tunnel bridges feed it over a queue.

use std::net::Ipv6Addr;

use tokio::sync::mpsc;
use tracing::info;

pub mod cli;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod local;
pub mod logging;
pub mod serial;
pub mod tun;

pub use cli::Cli;
pub use dispatcher::{Dispatcher, Event};
pub use error::DaemonError;

/// Queue depth between the bridge tasks and the dispatcher.
const EVENT_QUEUE: usize = 1024;

/// Bring up every component and run the dispatcher until a fatal error.
pub async fn run(cli: Cli) -> Result<(), DaemonError> {
    let tun = match cli.prefix {
        Some(prefix) => Some(tun::TunDevice::create(prefix)?),
        None => {
            info!("no IPv6 prefix provided; will not forward packets");
            None
        }
    };
    let mcu_addr = cli.prefix.map(tun::mcu_address).unwrap_or(Ipv6Addr::UNSPECIFIED);

    let serial = serial::open(&cli.device, cli.baudrate)?;
    info!(device = %cli.device, baud = cli.baudrate, "serial link open");

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    local::spawn_endpoints(local::EndpointConfig::default(), event_tx.clone())?;
    if let Some(tun) = &tun {
        tun.spawn_reader(event_tx)?;
    }

    let command = command::CommandHandler::new(mcu_addr);
    Dispatcher::new(serial, event_rx, command, tun, true)
        .run()
        .await
}
