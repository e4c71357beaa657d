//! Frame encoding and byte-stuffing.
//!
//! A frame on the wire is
//! `ESC FRAME_START  escaped(header + payload)  ESC FRAME_END  escaped(cksum)`.
//! Inside the escaped region only the literal ESC byte (0xBE) needs stuffing,
//! sent as ESC LITERAL_ESC. The delimiters sit outside the escaped region.
//! The Fletcher-16 checksum covers the header (type, seqno little-endian,
//! channel) and the payload; delimiters and the checksum bytes are excluded.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::{ESC, FRAME_END, FRAME_START, LITERAL_ESC, MTU};
use crate::error::FramingError;
use crate::fletcher::Fletcher16;
use crate::frame::Frame;

/// Escape `data` into `out`: every literal 0xBE becomes ESC LITERAL_ESC.
fn push_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        if b == ESC {
            out.push(ESC);
            out.push(LITERAL_ESC);
        } else {
            out.push(b);
        }
    }
}

/// Encode a frame into its on-wire byte sequence.
///
/// Fails only if the payload exceeds the MTU; oversized frames must never
/// reach the wire.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FramingError> {
    if frame.payload.len() > MTU {
        return Err(FramingError::PayloadTooLarge { len: frame.payload.len() });
    }

    let header = [
        frame.frame_type,
        (frame.seqno & 0xFF) as u8,
        (frame.seqno >> 8) as u8,
        frame.channel,
    ];

    let mut cksum = Fletcher16::new();
    cksum.update(&header);
    cksum.update(&frame.payload);
    let cksum = cksum.finish();

    // Worst case every byte is ESC: header+payload double, plus delimiters
    // and an escaped checksum.
    let mut out = Vec::with_capacity(2 * (header.len() + frame.payload.len()) + 8);
    out.push(ESC);
    out.push(FRAME_START);
    push_escaped(&mut out, &header);
    push_escaped(&mut out, &frame.payload);
    out.push(ESC);
    out.push(FRAME_END);
    push_escaped(&mut out, &[(cksum & 0xFF) as u8, (cksum >> 8) as u8]);

    Ok(out)
}
