//! Wire types for the doorlink device link.
//!
//! A single WebSocket carries two kinds of traffic:
//!
//! - **Text messages**: JSON commands sent to the lock and JSON events /
//!   query results pushed back by it ([`OutboundCommand`], [`InboundMessage`]).
//! - **Binary messages**: media frames with a fixed 16-byte big-endian header
//!   followed by raw audio or video bytes ([`BinaryFrame`]).
//!
//! # Binary frame layout
//!
//! ```text
//! +-------------+-------------+----------------+----------------+-----------------+---------+
//! | version u16 | type u16    | channel u32    | reserved u32   | payload_len u32 | payload |
//! +-------------+-------------+----------------+----------------+-----------------+---------+
//! ```
//!
//! # Correlation
//!
//! Requests that expect a reply carry a client-generated [`SeqId`]. Devices
//! answer with a `query_result` naming the `target` it answers; the `seq_id`
//! may be echoed back or omitted.
//!
//! # Example
//!
//! ```rust
//! use doorlink_protocol::{BinaryFrame, decode_frame, encode_frame, FRAME_VERSION};
//!
//! let bytes = encode_frame(FRAME_VERSION, 0, 0, &[1, 2, 3]).unwrap();
//! let frame: BinaryFrame = decode_frame(&bytes).unwrap();
//! assert!(frame.is_audio());
//! assert_eq!(frame.payload(), &[1, 2, 3]);
//! ```

mod error;
mod frame;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{BinaryFrame, MediaKind, decode_frame, encode_frame};
pub use types::{
    DeviceCommand, InboundMessage, OutboundCommand, Query, QueryResult, ResultStatus, SeqId,
    UserCategory, UserCommand, UserMgmtCommand, targets,
};

/// Binary frame protocol generation understood by this crate.
pub const FRAME_VERSION: u16 = 2;

/// Message type used by every media frame of the current generation.
pub const MEDIA_MESSAGE_TYPE: u16 = 0;

/// Channel tag designating an audio payload. Any other value is video.
pub const AUDIO_CHANNEL: u32 = 0;

/// Size of the fixed binary frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 16;
