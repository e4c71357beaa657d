//! Error types for the rethos-core crate.

use core::fmt;

/// Reasons a frame in progress was abandoned by the decoder.
///
/// These annotate drop logs; the decoder itself never fails, it emits a
/// dropped event and resumes hunting for the next start-of-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// ESC followed by a byte that is not LITERAL_ESC, FRAME_START, or FRAME_END.
    UnexpectedEscape(u8),
    /// ESC+FRAME_END seen outside the payload section.
    UnexpectedFrameEnd,
    /// Payload grew past the MTU.
    Overrun,
    /// Transmitted checksum did not match the computed one.
    ChecksumMismatch { expected: u16, actual: u16 },
    /// Payload handed to the encoder exceeds the MTU.
    PayloadTooLarge { len: usize },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::UnexpectedEscape(v) => {
                write!(f, "unexpected escape sequence 0xBE 0x{v:02X}")
            }
            FramingError::UnexpectedFrameEnd => write!(f, "unexpected end-of-frame sequence"),
            FramingError::Overrun => write!(f, "frame payload exceeds MTU"),
            FramingError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: computed 0x{expected:04X}, received 0x{actual:04X}")
            }
            FramingError::PayloadTooLarge { len } => {
                write!(f, "payload of {len} bytes exceeds MTU")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FramingError {}
