//! Telegram decoders.
//!
//! One module per wire format. The ingestion task selects the decoder with
//! a `match` on the detector's format tag — the set of formats is closed, so
//! there is no trait object in this path.

pub mod ascii;
pub mod dlms;
pub mod mbus;

use crate::frame::{FrameFormat, FrameView};
use crate::reading::Reading;

/// Why a frame failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Delimiters or length fields do not describe a valid frame.
    #[error("malformed frame: {0}")]
    BadFraming(&'static str),
    /// The frame is structurally valid but uses a variant this decoder
    /// does not handle (e.g. an encrypted M-Bus CI field).
    #[error("unsupported frame variant: {0}")]
    Unsupported(&'static str),
    /// The frame parsed but produced no usable values.
    #[error("no data records decoded")]
    NoData,
    /// The detector tagged the frame with an unknown format.
    #[error("unknown frame format")]
    UnknownFormat,
}

/// Decode `view` into `reading` using the decoder for `format`.
pub fn decode_frame(
    view: &FrameView<'_>,
    format: FrameFormat,
    reading: &mut Reading,
) -> Result<(), DecodeError> {
    match format {
        FrameFormat::Ascii => ascii::decode(view, reading),
        FrameFormat::Hdlc => dlms::decode(view, reading),
        FrameFormat::MBus => mbus::decode(view, reading),
        FrameFormat::Unknown => Err(DecodeError::UnknownFormat),
    }
}
