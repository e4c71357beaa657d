//! Serial port setup.
//!
//! The MCU side expects a raw 8N1 byte stream with no flow control. Reads
//! and writes go through the async [`SerialStream`]; the dispatcher drains
//! writes fully with `write_all`, which retries partial writes.

use std::time::Duration;

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::DaemonError;

/// Intercharacter timeout for the underlying device.
const TTY_TIMEOUT: Duration = Duration::from_millis(500);

/// Open and configure the serial device: raw, 8 data bits, no parity, one
/// stop bit, no flow control.
pub fn open(device: &str, baudrate: u32) -> Result<SerialStream, DaemonError> {
    let stream = tokio_serial::new(device, baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(TTY_TIMEOUT)
        .open_native_async()?;
    Ok(stream)
}
