//! In-band command subprotocol on channel 2.
//!
//! Requests from the MCU arrive as DATA frames whose first payload byte is
//! an opcode. The only defined request asks for the MCU's IPv6 address; the
//! reply payload is also broadcast unsolicited on the address-announce tick
//! so the MCU learns its prefix without asking.

use std::net::Ipv6Addr;

use tracing::{info, warn};

/// Request: get the MCU's IPv6 address.
pub const CMD_GET_MCU_IP_ADDR: u8 = 0x01;
/// Reply opcode, followed by the 16 address bytes.
pub const RSP_GET_MCU_IP_ADDR: u8 = 0x11;

/// Handler for channel-2 requests.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    mcu_addr: Ipv6Addr,
}

impl CommandHandler {
    /// `mcu_addr` is the address assigned to the MCU end of the tunnel
    /// subnet, or the unspecified address when no prefix is configured.
    pub fn new(mcu_addr: Ipv6Addr) -> Self {
        Self { mcu_addr }
    }

    /// The address reply payload: opcode byte followed by the 16-byte address.
    pub fn address_reply(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(17);
        payload.push(RSP_GET_MCU_IP_ADDR);
        payload.extend_from_slice(&self.mcu_addr.octets());
        payload
    }

    /// Handle a request payload, returning the reply payload to send back on
    /// channel 2, if any. Unknown opcodes are logged and ignored.
    pub fn handle(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let Some(&opcode) = payload.first() else {
            info!("got empty command");
            return None;
        };
        match opcode {
            CMD_GET_MCU_IP_ADDR => {
                info!("got command: get MCU IP address");
                Some(self.address_reply())
            }
            other => {
                warn!("unknown command opcode {other:#04x}");
                None
            }
        }
    }
}
