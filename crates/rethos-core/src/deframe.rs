//! Streaming receive state machine.
//!
//! Consumes the serial byte stream one byte at a time and assembles frames,
//! validating the Fletcher-16 checksum. The decoder never fails outright:
//! corruption produces a [`DeframeEvent::FrameDropped`] (the link layer
//! answers with a NACK) and the machine resumes hunting for the next
//! start-of-frame sequence.

extern crate alloc;
use alloc::vec::Vec;
use core::mem;

use crate::constants::{ESC, FRAME_END, FRAME_START, LITERAL_ESC, MTU};
use crate::error::FramingError;
use crate::fletcher::Fletcher16;
use crate::frame::Frame;

/// Decoder states, one per header/payload/checksum position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitFrameStart,
    WaitFrameType,
    WaitSeqnoLo,
    WaitSeqnoHi,
    WaitChannel,
    InFrame,
    WaitChecksumLo,
    WaitChecksumHi,
}

/// What a fed byte produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeframeEvent {
    /// A complete frame with a valid checksum.
    FrameReady(Frame),
    /// The frame in progress was corrupt. The caller must send a NACK.
    FrameDropped(FramingError),
    /// A start-of-frame arrived mid-frame: the previous frame is abandoned
    /// (deliberately without a drop event, so no NACK) and a new one begins.
    Restarted,
}

/// Byte-at-a-time frame decoder.
#[derive(Debug)]
pub struct Deframer {
    state: State,
    in_escape: bool,
    cksum: Fletcher16,
    frame_type: u8,
    seqno: u16,
    channel: u8,
    payload: Vec<u8>,
    wire_checksum: u16,
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            state: State::WaitFrameStart,
            in_escape: false,
            cksum: Fletcher16::new(),
            frame_type: 0,
            seqno: 0,
            channel: 0,
            payload: Vec::new(),
            wire_checksum: 0,
        }
    }

    /// Feed one byte from the wire.
    pub fn push(&mut self, byte: u8) -> Option<DeframeEvent> {
        // A run of ESC bytes keeps us in the escape state; the first
        // non-ESC byte is then interpreted as the escape code.
        if byte == ESC {
            self.in_escape = true;
            return None;
        }

        let mut byte = byte;
        if mem::replace(&mut self.in_escape, false) {
            match byte {
                LITERAL_ESC => {
                    // A literal 0xBE, fed to the current state below.
                    byte = ESC;
                }
                FRAME_START => {
                    let restarted = self.state != State::WaitFrameStart;
                    self.cksum.reset();
                    self.payload.clear();
                    self.state = State::WaitFrameType;
                    return restarted.then_some(DeframeEvent::Restarted);
                }
                FRAME_END => {
                    if self.state != State::InFrame {
                        return Some(self.drop_frame(FramingError::UnexpectedFrameEnd));
                    }
                    self.state = State::WaitChecksumLo;
                    return None;
                }
                other => {
                    return Some(self.drop_frame(FramingError::UnexpectedEscape(other)));
                }
            }
        }

        match self.state {
            State::WaitFrameStart => {
                // Stray byte between frames.
                return None;
            }
            State::WaitFrameType => {
                self.frame_type = byte;
                self.state = State::WaitSeqnoLo;
            }
            State::WaitSeqnoLo => {
                self.seqno = u16::from(byte);
                self.state = State::WaitSeqnoHi;
            }
            State::WaitSeqnoHi => {
                self.seqno |= u16::from(byte) << 8;
                self.state = State::WaitChannel;
            }
            State::WaitChannel => {
                self.channel = byte;
                self.state = State::InFrame;
                self.payload.clear();
            }
            State::InFrame => {
                if self.payload.len() >= MTU {
                    return Some(self.drop_frame(FramingError::Overrun));
                }
                self.payload.push(byte);
            }
            State::WaitChecksumLo => {
                // Checksum bytes do not feed the accumulator.
                self.wire_checksum = u16::from(byte);
                self.state = State::WaitChecksumHi;
                return None;
            }
            State::WaitChecksumHi => {
                self.wire_checksum |= u16::from(byte) << 8;
                let computed = self.cksum.finish();
                self.state = State::WaitFrameStart;
                if self.wire_checksum != computed {
                    return Some(DeframeEvent::FrameDropped(FramingError::ChecksumMismatch {
                        expected: computed,
                        actual: self.wire_checksum,
                    }));
                }
                return Some(DeframeEvent::FrameReady(Frame {
                    frame_type: self.frame_type,
                    seqno: self.seqno,
                    channel: self.channel,
                    payload: mem::take(&mut self.payload),
                }));
            }
        }

        // Header and payload bytes all contribute to the checksum.
        self.cksum.update(&[byte]);
        None
    }

    /// Feed a whole buffer, collecting every event in order.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<DeframeEvent> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn drop_frame(&mut self, reason: FramingError) -> DeframeEvent {
        self.state = State::WaitFrameStart;
        DeframeEvent::FrameDropped(reason)
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::constants::FrameType;
    use crate::framing::encode_frame;

    fn decode_one(wire: &[u8]) -> Frame {
        let mut d = Deframer::new();
        let events = d.push_slice(wire);
        assert_eq!(events.len(), 1, "expected exactly one event, got {events:?}");
        match events.into_iter().next().unwrap() {
            DeframeEvent::FrameReady(f) => f,
            other => panic!("expected FrameReady, got {other:?}"),
        }
    }

    #[test]
    fn test_roundtrip_basic() {
        let frame = Frame::data(0x0102, 4, vec![0x01, 0xBE, 0x02]);
        let wire = encode_frame(&frame).unwrap();
        assert_eq!(decode_one(&wire), frame);
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let frame = Frame::ack(0xFFFF);
        let wire = encode_frame(&frame).unwrap();
        assert_eq!(decode_one(&wire), frame);
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let frame = Frame::data(9, 250, payload);
        let wire = encode_frame(&frame).unwrap();
        assert_eq!(decode_one(&wire), frame);
    }

    #[test]
    fn test_roundtrip_esc_runs() {
        let frame = Frame::data(1, 7, vec![0xBE; 64]);
        let wire = encode_frame(&frame).unwrap();
        assert_eq!(decode_one(&wire), frame);
    }

    #[test]
    fn test_roundtrip_mtu_payload() {
        let payload: Vec<u8> = (0..MTU).map(|i| (i % 251) as u8).collect();
        let frame = Frame::data(300, 42, payload);
        let wire = encode_frame(&frame).unwrap();
        assert_eq!(decode_one(&wire), frame);
    }

    #[test]
    fn test_back_to_back_frames() {
        let a = Frame::data(1, 4, vec![0xAA; 10]);
        let b = Frame::data(2, 5, vec![0xBB; 10]);
        let mut wire = encode_frame(&a).unwrap();
        wire.extend_from_slice(&encode_frame(&b).unwrap());

        let mut d = Deframer::new();
        let events = d.push_slice(&wire);
        assert_eq!(
            events,
            vec![DeframeEvent::FrameReady(a), DeframeEvent::FrameReady(b)]
        );
    }

    #[test]
    fn test_resynchronization_after_garbage() {
        // Garbage that avoids the ESC byte must be ignored entirely.
        let garbage: Vec<u8> = (0..64u8).filter(|&b| b != ESC).collect();
        let frame = Frame::data(77, 12, vec![1, 2, 3]);
        let mut wire = garbage;
        wire.extend_from_slice(&encode_frame(&frame).unwrap());
        assert_eq!(decode_one(&wire), frame);
    }

    #[test]
    fn test_checksum_low_byte_flip_rejected() {
        let frame = Frame::data(5, 4, vec![0x10, 0x20]);
        let mut wire = encode_frame(&frame).unwrap();
        let n = wire.len();
        // Flip a bit in the checksum low byte (second-to-last for an
        // unescaped checksum).
        wire[n - 2] ^= 0x01;
        let mut d = Deframer::new();
        let events = d.push_slice(&wire);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DeframeEvent::FrameDropped(FramingError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_every_single_bit_flip_is_rejected() {
        // Flipping any bit of the inter-delimiter bytes or the checksum must
        // not produce a FrameReady with the original contents. Skip flips
        // that turn a byte into ESC or collide with the escape discipline:
        // those corrupt the framing itself and surface as drops or restarts.
        let frame = Frame::data(0x1234, 9, vec![0x00, 0x7F, 0x80]);
        let wire = encode_frame(&frame).unwrap();
        for i in 2..wire.len() {
            for bit in 0..8 {
                let mut bad = wire.clone();
                bad[i] ^= 1 << bit;
                let mut d = Deframer::new();
                let events = d.push_slice(&bad);
                let delivered_original = events
                    .iter()
                    .any(|e| matches!(e, DeframeEvent::FrameReady(f) if *f == frame));
                assert!(
                    !delivered_original,
                    "bit {bit} of byte {i} flipped yet the frame decoded unchanged"
                );
            }
        }
    }

    #[test]
    fn test_payload_overrun_dropped() {
        let mut d = Deframer::new();
        let mut wire = vec![ESC, FRAME_START, FrameType::Data as u8, 0x01, 0x00, 0x04];
        wire.extend(core::iter::repeat(0x00u8).take(MTU + 1));
        let events = d.push_slice(&wire);
        assert_eq!(events, vec![DeframeEvent::FrameDropped(FramingError::Overrun)]);
    }

    #[test]
    fn test_unexpected_frame_end_dropped() {
        let mut d = Deframer::new();
        // End-of-frame while idle is corrupt.
        let events = d.push_slice(&[ESC, FRAME_END]);
        assert_eq!(
            events,
            vec![DeframeEvent::FrameDropped(FramingError::UnexpectedFrameEnd)]
        );
    }

    #[test]
    fn test_bad_escape_code_dropped() {
        let mut d = Deframer::new();
        let events = d.push_slice(&[ESC, 0x00]);
        assert_eq!(
            events,
            vec![DeframeEvent::FrameDropped(FramingError::UnexpectedEscape(0x00))]
        );
    }

    #[test]
    fn test_restart_mid_frame_keeps_second_frame() {
        let frame = Frame::data(3, 8, vec![0xAB]);
        let wire = encode_frame(&frame).unwrap();

        let mut d = Deframer::new();
        // Begin a frame, feed part of a header, then a fresh start.
        assert_eq!(d.push_slice(&[ESC, FRAME_START, 0x01, 0x05, 0x00]), vec![]);
        let mut events = d.push_slice(&[ESC, FRAME_START]);
        assert_eq!(events, vec![DeframeEvent::Restarted]);
        // The second frame's body still decodes; skip the delimiter already fed.
        events = d.push_slice(&wire[2..]);
        assert_eq!(events, vec![DeframeEvent::FrameReady(frame)]);
    }

    #[test]
    fn test_esc_run_stays_in_escape() {
        // ESC ESC ESC LITERAL_ESC yields exactly one literal 0xBE.
        let frame = Frame::data(21, 6, vec![0xBE]);
        let reference = encode_frame(&frame).unwrap();

        let mut d = Deframer::new();
        let mut wire = vec![ESC, FRAME_START, 0x01, 0x15, 0x00, 0x06];
        wire.extend_from_slice(&[ESC, ESC, ESC, LITERAL_ESC]);
        wire.extend_from_slice(&[ESC, FRAME_END]);
        wire.extend_from_slice(&reference[reference.len() - 2..]);
        let events = d.push_slice(&wire);
        assert_eq!(events, vec![DeframeEvent::FrameReady(frame)]);
    }

    #[test]
    fn test_stray_bytes_are_silent() {
        let mut d = Deframer::new();
        assert!(d.push_slice(&[0x00, 0x41, 0xFF, 0x13]).is_empty());
    }

    #[test]
    fn test_decoder_survives_unknown_frame_types() {
        let frame = Frame {
            frame_type: 0x2, // heartbeat, reserved
            seqno: 11,
            channel: 0,
            payload: Vec::new(),
        };
        let wire = encode_frame(&frame).unwrap();
        assert_eq!(decode_one(&wire), frame);
    }
}
