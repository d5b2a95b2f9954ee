//! Binary media frame codec.
//!
//! Audio and video share the control socket as binary messages, each one a
//! 16-byte big-endian header followed by the payload:
//!
//! ```text
//! offset  size  field
//!      0     2  version        (always 2)
//!      2     2  message type   (always 0)
//!      4     4  channel tag    (0 = audio, anything else = video)
//!      8     4  reserved       (written as 0, ignored on read)
//!     12     4  payload length
//!     16     N  payload
//! ```
//!
//! Decoding never fails loudly: a short header or a payload shorter than the
//! declared length yields `None`, and the caller decides whether to wait for
//! more bytes or drop the message.

use crate::error::{ProtocolError, ProtocolResult};
use crate::{AUDIO_CHANNEL, FRAME_HEADER_LEN, FRAME_VERSION, MEDIA_MESSAGE_TYPE};

/// Kind of media carried by a frame, derived from its channel tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A parsed media frame.
///
/// Frames are immutable once built; renderers borrow the payload for the
/// duration of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    version: u16,
    message_type: u16,
    channel_tag: u32,
    reserved: u32,
    payload: Vec<u8>,
}

impl BinaryFrame {
    /// Creates a frame with the reserved field zeroed.
    pub fn new(version: u16, message_type: u16, channel_tag: u32, payload: Vec<u8>) -> Self {
        Self {
            version,
            message_type,
            channel_tag,
            reserved: 0,
            payload,
        }
    }

    /// Creates a current-generation audio frame.
    pub fn audio(payload: Vec<u8>) -> Self {
        Self::new(FRAME_VERSION, MEDIA_MESSAGE_TYPE, AUDIO_CHANNEL, payload)
    }

    /// Creates a current-generation video frame on the given nonzero channel.
    pub fn video(channel_tag: u32, payload: Vec<u8>) -> Self {
        debug_assert_ne!(channel_tag, AUDIO_CHANNEL, "video frames need a nonzero channel tag");
        Self::new(FRAME_VERSION, MEDIA_MESSAGE_TYPE, channel_tag, payload)
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn message_type(&self) -> u16 {
        self.message_type
    }

    pub fn channel_tag(&self) -> u32 {
        self.channel_tag
    }

    /// The reserved header word as read from the wire.
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Declared payload length; always equals `payload().len()`.
    pub fn payload_length(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is_audio(&self) -> bool {
        self.channel_tag == AUDIO_CHANNEL
    }

    pub fn is_video(&self) -> bool {
        self.channel_tag != AUDIO_CHANNEL
    }

    pub fn media_kind(&self) -> MediaKind {
        if self.is_audio() {
            MediaKind::Audio
        } else {
            MediaKind::Video
        }
    }

    /// Total encoded size: header plus payload.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Encodes this frame. The reserved field is always written as zero.
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        encode_frame(
            self.version,
            self.message_type,
            self.channel_tag,
            &self.payload,
        )
    }
}

/// Encodes a media frame: 16-byte big-endian header followed by `payload`.
///
/// The length field is taken from `payload.len()`; the only failure is a
/// payload that does not fit in 32 bits.
///
/// # Example
///
/// ```rust
/// use doorlink_protocol::encode_frame;
///
/// let bytes = encode_frame(2, 0, 7, b"jpeg").unwrap();
/// assert_eq!(bytes.len(), 16 + 4);
/// assert_eq!(&bytes[12..16], &4u32.to_be_bytes());
/// ```
pub fn encode_frame(
    version: u16,
    message_type: u16,
    channel_tag: u32,
    payload: &[u8],
) -> ProtocolResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX,
    })?;

    let mut buffer = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buffer.extend_from_slice(&version.to_be_bytes());
    buffer.extend_from_slice(&message_type.to_be_bytes());
    buffer.extend_from_slice(&channel_tag.to_be_bytes());
    buffer.extend_from_slice(&0u32.to_be_bytes());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Decodes a media frame.
///
/// Returns `None` when the header is incomplete or the buffer holds fewer
/// bytes than the declared payload length. Bytes past the declared payload
/// are not part of the frame and are ignored.
///
/// # Example
///
/// ```rust
/// use doorlink_protocol::decode_frame;
///
/// assert!(decode_frame(&[0u8; 15]).is_none());
/// ```
pub fn decode_frame(data: &[u8]) -> Option<BinaryFrame> {
    let header: &[u8; FRAME_HEADER_LEN] = data.get(..FRAME_HEADER_LEN)?.try_into().ok()?;

    let version = u16::from_be_bytes([header[0], header[1]]);
    let message_type = u16::from_be_bytes([header[2], header[3]]);
    let channel_tag = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let reserved = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    let payload_len = u32::from_be_bytes([header[12], header[13], header[14], header[15]]) as usize;

    let end = FRAME_HEADER_LEN.checked_add(payload_len)?;
    let payload = data.get(FRAME_HEADER_LEN..end)?.to_vec();

    Some(BinaryFrame {
        version,
        message_type,
        channel_tag,
        reserved,
        payload,
    })
}
