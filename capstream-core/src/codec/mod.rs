//! `tokio_util` codec for the banner + frame stream.
//!
//! The first item decoded from a connection is always the
//! [`Banner`]; everything after it is a sequence of length-prefixed
//! frames. Used by async readers such as
//! [`StreamClient`](crate::network::StreamClient).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::protocol::{BANNER_SIZE, Banner, FRAME_HEADER_SIZE};

/// Largest frame payload accepted by the decoder.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// One unit of the server's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Banner(Banner),
    Frame(Bytes),
}

/// Stateful decoder/encoder for [`StreamItem`]s.
#[derive(Debug, Default)]
pub struct StreamCodec {
    banner_seen: bool,
}

impl StreamCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec for a stream whose banner was already consumed.
    pub fn frames_only() -> Self {
        Self { banner_seen: true }
    }
}

impl Decoder for StreamCodec {
    type Item = StreamItem;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.banner_seen {
            if src.len() < BANNER_SIZE {
                return Ok(None);
            }
            let banner = Banner::decode(&src[..BANNER_SIZE])?;
            src.advance(BANNER_SIZE);
            self.banner_seen = true;
            return Ok(Some(StreamItem::Banner(banner)));
        }

        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if src.len() < FRAME_HEADER_SIZE + len {
            src.reserve(FRAME_HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        Ok(Some(StreamItem::Frame(src.split_to(len).freeze())))
    }
}

impl Encoder<StreamItem> for StreamCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: StreamItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StreamItem::Banner(banner) => dst.extend_from_slice(&banner.encode()),
            StreamItem::Frame(payload) => {
                if payload.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: payload.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                dst.reserve(FRAME_HEADER_SIZE + payload.len());
                dst.put_u32_le(payload.len() as u32);
                dst.extend_from_slice(&payload);
            }
        }
        Ok(())
    }
}
