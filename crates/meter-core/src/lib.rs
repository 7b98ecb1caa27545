//! meter-core: telegram framing and decoding for the meter gateway.
//!
//! This crate contains the serial-side pipeline pieces that are independent
//! of any transport: the raw byte ring the ingestion loop fills, the frame
//! detector that finds delimited telegrams inside it, and the decoders for
//! the three wire formats a diagnostic port can speak (ASCII P1, HDLC with
//! an embedded DLMS APDU, and M-Bus).
//!
//! # Zero-copy contract
//!
//! The detector never copies payload bytes. It hands out a [`FrameInfo`]
//! descriptor with absolute offsets into the ring; decoders read through a
//! [`FrameView`] borrowed from the ring. A descriptor is only valid until
//! the next batch of bytes is appended.

pub mod decode;
pub mod frame;
pub mod reading;
pub mod ring;

pub use frame::{DelimiterSpec, FrameDetector, FrameFormat, FrameInfo, FrameView};
pub use reading::Reading;
pub use ring::ByteRing;
