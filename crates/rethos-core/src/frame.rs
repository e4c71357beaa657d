//! The logical frame carried over the serial wire.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::{FrameType, CHANNEL_CONTROL};

/// A decoded (or to-be-encoded) frame: type, sequence number, channel, payload.
///
/// The frame type is kept as the raw wire byte. Unknown types flow through
/// the codec untouched; classification happens at the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u8,
    pub seqno: u16,
    pub channel: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A DATA frame carrying `payload` on `channel`.
    pub fn data(seqno: u16, channel: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Data as u8,
            seqno,
            channel,
            payload,
        }
    }

    /// An ACK for `seqno`, on the control channel, no payload.
    pub fn ack(seqno: u16) -> Self {
        Self {
            frame_type: FrameType::Ack as u8,
            seqno,
            channel: CHANNEL_CONTROL,
            payload: Vec::new(),
        }
    }

    /// A NACK on the control channel. The sequence number is the sentinel 0;
    /// a NACK refers to whatever is outstanding, not to a specific frame.
    pub fn nack() -> Self {
        Self {
            frame_type: FrameType::Nack as u8,
            seqno: 0,
            channel: CHANNEL_CONTROL,
            payload: Vec::new(),
        }
    }

    /// Classify the raw frame type, if it is one this implementation knows.
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use alloc::vec;

    use super::*;

    #[test]
    fn test_constructors() {
        let d = Frame::data(7, 4, vec![1, 2, 3]);
        assert_eq!(d.frame_type(), Some(FrameType::Data));
        assert_eq!(d.seqno, 7);
        assert_eq!(d.channel, 4);

        let a = Frame::ack(42);
        assert_eq!(a.frame_type(), Some(FrameType::Ack));
        assert_eq!(a.seqno, 42);
        assert_eq!(a.channel, CHANNEL_CONTROL);
        assert!(a.payload.is_empty());

        let n = Frame::nack();
        assert_eq!(n.frame_type(), Some(FrameType::Nack));
        assert_eq!(n.seqno, 0);
        assert_eq!(n.channel, CHANNEL_CONTROL);
        assert!(n.payload.is_empty());
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let f = Frame {
            frame_type: 0x7A,
            seqno: 1,
            channel: 9,
            payload: vec![],
        };
        assert_eq!(f.frame_type(), None);
        assert_eq!(f.frame_type, 0x7A);
    }
}
