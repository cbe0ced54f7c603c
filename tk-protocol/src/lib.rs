pub mod coordinate;
pub mod decoder;
pub mod error;
pub mod framing;
pub mod record;
pub mod timestamp;

pub use coordinate::{Hemisphere, to_decimal_degrees, to_degree_minutes};
pub use decoder::{
    Decoded, DecodedFrame, Decoder, DecoderConfig, FrameShape, LocationAckPolicy, classify,
};
pub use error::{CoordinateParseError, ProtocolError, Result, TimeParseError};
pub use framing::{FrameBuffer, Framing};
pub use record::LocationRecord;
pub use timestamp::{CENTURY_BASE_RANGE, DEFAULT_CENTURY_BASE, to_utc_timestamp};
