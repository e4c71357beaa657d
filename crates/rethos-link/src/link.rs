//! Stop-and-wait ARQ over the frame codec.
//!
//! One DATA frame may be outstanding at a time. Every DATA send fills the
//! retransmit slot and obliges the caller to arm the retransmit timer; a
//! matching ACK releases the slot and cancels the timer. Sequence numbers
//! come from an unbounded pre-incremented counter reduced mod 2^16 and are
//! compared by equality only — wraparound is legal.

use rethos_core::constants::MTU;
use rethos_core::{Frame, FrameType};

/// The one-frame retransmission buffer.
#[derive(Debug)]
struct RexmitSlot {
    seqno: u16,
    channel: u8,
    payload: Vec<u8>,
    /// The slot content is meaningful only while this is false.
    acked: bool,
}

/// What to do with an inbound control-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlDisposition {
    /// ACK matched the outstanding frame: cancel the retransmit timer.
    AckAccepted,
    /// ACK for a sequence number that is not outstanding: nothing to do.
    AckIgnored,
    /// NACK while a frame is outstanding: transmit this retransmission now.
    /// The timer keeps whatever deadline it already has.
    Retransmit(Frame),
    /// NACK while idle: the peer missed our ACK, so re-acknowledge the last
    /// DATA frame received. Never answer a NACK with a NACK.
    AckLastReceived(Frame),
    /// NACK while idle and no DATA has ever been received: nothing to do.
    NackIgnored,
    /// Some other frame type on the control channel: log and discard.
    UnknownType(u8),
}

/// Outcome classification for an inbound frame on channels 1..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// New payload; deliver it downstream. `lost` is the sequence gap since
    /// the previous delivery.
    Deliver { lost: u16 },
    /// Empty payload; acknowledged and counted but not delivered.
    Empty { lost: u16 },
    /// Same sequence number as the previous frame; acknowledged, not delivered.
    Duplicate,
}

/// Result of accepting an inbound non-control frame: the ACK to emit first,
/// then what to do with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDisposition {
    pub ack: Frame,
    pub outcome: DataOutcome,
}

/// Sequencing and retransmission state for the serial link.
#[derive(Debug)]
pub struct LinkState {
    /// Outbound counter; pre-incremented, so the first DATA frame is seqno 1.
    out_seqno: u16,
    /// Sequence number of the last delivered (or empty) DATA frame.
    last_rcvd_seqno: u16,
    /// Whether any DATA frame has ever been received.
    received_data_frame: bool,
    rexmit: RexmitSlot,
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            out_seqno: 0,
            last_rcvd_seqno: 0,
            received_data_frame: false,
            // The slot starts empty; marking it acked keeps it off the wire.
            rexmit: RexmitSlot {
                seqno: 0,
                channel: 0,
                payload: Vec::new(),
                acked: true,
            },
        }
    }

    /// Whether a DATA frame is outstanding (sent but not yet acknowledged).
    pub fn awaiting_ack(&self) -> bool {
        !self.rexmit.acked
    }

    /// Sequence number of the last received DATA frame, if any was received.
    pub fn last_received(&self) -> Option<u16> {
        self.received_data_frame.then_some(self.last_rcvd_seqno)
    }

    /// Build the next outbound DATA frame for `channel`, consuming one
    /// sequence number and filling the retransmit slot.
    ///
    /// The caller must transmit the returned frame and arm the retransmit
    /// timer, replacing any deadline already pending.
    pub fn send_data(&mut self, channel: u8, payload: &[u8]) -> Frame {
        debug_assert!(payload.len() <= MTU);
        self.out_seqno = self.out_seqno.wrapping_add(1);

        self.rexmit.seqno = self.out_seqno;
        self.rexmit.channel = channel;
        self.rexmit.payload.clear();
        self.rexmit.payload.extend_from_slice(payload);
        self.rexmit.acked = false;

        Frame::data(self.out_seqno, channel, payload.to_vec())
    }

    /// The frame to resend when the retransmit timer fires, unchanged from
    /// the original transmission. `None` once the frame has been acked.
    pub fn rexmit_frame(&self) -> Option<Frame> {
        if self.rexmit.acked {
            return None;
        }
        Some(Frame::data(
            self.rexmit.seqno,
            self.rexmit.channel,
            self.rexmit.payload.clone(),
        ))
    }

    /// Classify an inbound frame on the control channel.
    pub fn on_control(&mut self, frame: &Frame) -> ControlDisposition {
        match frame.frame_type() {
            Some(FrameType::Ack) => {
                if !self.rexmit.acked && frame.seqno == self.rexmit.seqno {
                    self.rexmit.acked = true;
                    ControlDisposition::AckAccepted
                } else {
                    ControlDisposition::AckIgnored
                }
            }
            Some(FrameType::Nack) => {
                if !self.rexmit.acked {
                    // rexmit_frame() is Some while unacked.
                    ControlDisposition::Retransmit(self.rexmit_frame().expect("slot unacked"))
                } else if self.received_data_frame {
                    // The peer probably saw a corrupted ACK or NACK from us.
                    // Answering with a NACK could start a NACK storm; ACK the
                    // last frame we received instead.
                    ControlDisposition::AckLastReceived(Frame::ack(self.last_rcvd_seqno))
                } else {
                    ControlDisposition::NackIgnored
                }
            }
            _ => ControlDisposition::UnknownType(frame.frame_type),
        }
    }

    /// Accept an inbound frame on channels 1..=255.
    ///
    /// The returned ACK is emitted unconditionally, before any delivery.
    /// Duplicate detection precedes loss accounting; the loss gap is
    /// informational and the frame is delivered regardless.
    pub fn on_data(&mut self, frame: &Frame) -> DataDisposition {
        let ack = Frame::ack(frame.seqno);

        if self.received_data_frame && frame.seqno == self.last_rcvd_seqno {
            return DataDisposition {
                ack,
                outcome: DataOutcome::Duplicate,
            };
        }

        self.received_data_frame = true;
        let lost = frame
            .seqno
            .wrapping_sub(self.last_rcvd_seqno)
            .wrapping_sub(1);
        self.last_rcvd_seqno = frame.seqno;

        let outcome = if frame.payload.is_empty() {
            DataOutcome::Empty { lost }
        } else {
            DataOutcome::Deliver { lost }
        };
        DataDisposition { ack, outcome }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(seqno: u16, channel: u8, payload: &[u8]) -> Frame {
        Frame::data(seqno, channel, payload.to_vec())
    }

    #[test]
    fn test_first_seqno_is_one() {
        let mut link = LinkState::new();
        let f = link.send_data(4, b"hi");
        assert_eq!(f.seqno, 1);
        assert_eq!(f.channel, 4);
        assert!(link.awaiting_ack());
    }

    #[test]
    fn test_seqno_increments_per_send() {
        let mut link = LinkState::new();
        for expected in 1..=5u16 {
            let f = link.send_data(9, &[0xAA]);
            assert_eq!(f.seqno, expected);
        }
    }

    #[test]
    fn test_seqno_wraparound() {
        let mut link = LinkState::new();
        link.out_seqno = u16::MAX;
        let f = link.send_data(4, &[1]);
        assert_eq!(f.seqno, 0);
        // An ACK for the wrapped seqno 0 is a normal acknowledgment.
        assert_eq!(link.on_control(&Frame::ack(0)), ControlDisposition::AckAccepted);
        assert!(!link.awaiting_ack());
    }

    #[test]
    fn test_matching_ack_releases_slot() {
        let mut link = LinkState::new();
        let f = link.send_data(4, &[1, 2, 3]);
        assert_eq!(link.on_control(&Frame::ack(f.seqno)), ControlDisposition::AckAccepted);
        assert!(!link.awaiting_ack());
        assert_eq!(link.rexmit_frame(), None);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let mut link = LinkState::new();
        let f = link.send_data(4, &[1]);
        assert_eq!(
            link.on_control(&Frame::ack(f.seqno.wrapping_add(7))),
            ControlDisposition::AckIgnored
        );
        assert!(link.awaiting_ack());
    }

    #[test]
    fn test_ack_when_idle_ignored() {
        let mut link = LinkState::new();
        assert_eq!(link.on_control(&Frame::ack(3)), ControlDisposition::AckIgnored);
    }

    #[test]
    fn test_rexmit_frame_is_bit_identical() {
        let mut link = LinkState::new();
        let sent = link.send_data(17, &[0xBE, 0x00, 0xFF]);
        let resent = link.rexmit_frame().unwrap();
        assert_eq!(sent, resent);
    }

    #[test]
    fn test_nack_while_unacked_retransmits() {
        let mut link = LinkState::new();
        let sent = link.send_data(4, &[9, 9]);
        match link.on_control(&Frame::nack()) {
            ControlDisposition::Retransmit(f) => assert_eq!(f, sent),
            other => panic!("expected Retransmit, got {other:?}"),
        }
        // Still unacked; the timer deadline is untouched.
        assert!(link.awaiting_ack());
    }

    #[test]
    fn test_nack_while_acked_acks_last_received() {
        let mut link = LinkState::new();
        // Receive a DATA frame so there is something to re-acknowledge.
        link.on_data(&data_frame(10, 4, &[1]));
        match link.on_control(&Frame::nack()) {
            ControlDisposition::AckLastReceived(f) => {
                assert_eq!(f.frame_type(), Some(FrameType::Ack));
                assert_eq!(f.seqno, 10);
            }
            other => panic!("expected AckLastReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_nack_before_any_data_ignored() {
        let mut link = LinkState::new();
        assert_eq!(link.on_control(&Frame::nack()), ControlDisposition::NackIgnored);
    }

    #[test]
    fn test_never_nack_a_nack() {
        let mut link = LinkState::new();
        link.on_data(&data_frame(3, 4, &[1]));
        for _ in 0..3 {
            match link.on_control(&Frame::nack()) {
                ControlDisposition::AckLastReceived(f) => {
                    assert_ne!(f.frame_type(), Some(FrameType::Nack));
                }
                ControlDisposition::NackIgnored => {}
                other => panic!("NACK reply must never be a NACK: {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_control_type() {
        let mut link = LinkState::new();
        let hb = Frame {
            frame_type: FrameType::Hb as u8,
            seqno: 0,
            channel: 0,
            payload: Vec::new(),
        };
        assert_eq!(link.on_control(&hb), ControlDisposition::UnknownType(0x2));
    }

    #[test]
    fn test_inbound_acked_and_delivered() {
        let mut link = LinkState::new();
        let d = link.on_data(&data_frame(1, 4, &[5, 6]));
        assert_eq!(d.ack, Frame::ack(1));
        assert_eq!(d.outcome, DataOutcome::Deliver { lost: 0 });
        assert_eq!(link.last_received(), Some(1));
    }

    #[test]
    fn test_duplicate_acked_not_delivered() {
        let mut link = LinkState::new();
        link.on_data(&data_frame(8, 4, &[1]));
        let d = link.on_data(&data_frame(8, 4, &[1]));
        assert_eq!(d.ack, Frame::ack(8));
        assert_eq!(d.outcome, DataOutcome::Duplicate);
    }

    #[test]
    fn test_loss_gap_counted() {
        let mut link = LinkState::new();
        let d = link.on_data(&data_frame(10, 4, &[1]));
        // First frame: 10 - 0 - 1 = 9 frames never seen.
        assert_eq!(d.outcome, DataOutcome::Deliver { lost: 9 });
        let d = link.on_data(&data_frame(12, 4, &[2]));
        assert_eq!(d.outcome, DataOutcome::Deliver { lost: 1 });
        let d = link.on_data(&data_frame(13, 4, &[3]));
        assert_eq!(d.outcome, DataOutcome::Deliver { lost: 0 });
    }

    #[test]
    fn test_loss_gap_across_wraparound() {
        let mut link = LinkState::new();
        link.on_data(&data_frame(u16::MAX, 4, &[1]));
        let d = link.on_data(&data_frame(1, 4, &[2]));
        // 1 - 65535 - 1 = 1 mod 2^16: seqno 0 went missing.
        assert_eq!(d.outcome, DataOutcome::Deliver { lost: 1 });
    }

    #[test]
    fn test_empty_payload_counted_not_delivered() {
        let mut link = LinkState::new();
        let d = link.on_data(&data_frame(2, 7, &[]));
        assert_eq!(d.ack, Frame::ack(2));
        assert_eq!(d.outcome, DataOutcome::Empty { lost: 1 });
        // The empty frame still advances duplicate tracking.
        let d = link.on_data(&data_frame(2, 7, &[0x11]));
        assert_eq!(d.outcome, DataOutcome::Duplicate);
    }

    #[test]
    fn test_send_after_ack_uses_next_seqno() {
        let mut link = LinkState::new();
        let a = link.send_data(4, &[1]);
        link.on_control(&Frame::ack(a.seqno));
        let b = link.send_data(4, &[2]);
        assert_eq!(b.seqno, a.seqno.wrapping_add(1));
    }
}
