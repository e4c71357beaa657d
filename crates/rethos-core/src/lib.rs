//! Core types, constants, and wire format for the rethos serial link.
//!
//! This crate defines the frame wire format, the Fletcher-16 checksum, the
//! byte-stuffing escape discipline, and the streaming receive state machine
//! shared by the host daemon and tests. It carries no I/O: encoding produces
//! byte vectors and decoding consumes one byte at a time.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod deframe;
pub mod error;
pub mod fletcher;
pub mod frame;
pub mod framing;

pub use constants::{FrameType, CHANNEL_COMMAND, CHANNEL_CONTROL, CHANNEL_STDIN, CHANNEL_TUNNEL, MTU, NUM_CHANNELS};
pub use deframe::{DeframeEvent, Deframer};
pub use error::FramingError;
pub use fletcher::Fletcher16;
pub use frame::Frame;
pub use framing::encode_frame;
