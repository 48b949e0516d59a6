//! Async reader for a push-mode stream.
//!
//! The banner is read eagerly in [`StreamClient::from_stream`]; frames
//! are decoded by a background task and handed over through a bounded
//! channel, so a slow consumer applies backpressure to the socket.

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::codec::{StreamCodec, StreamItem};
use crate::error::ProtocolError;
use crate::protocol::Banner;

/// Frames buffered between the reader task and the consumer.
const FRAME_QUEUE: usize = 8;

#[derive(Debug)]
pub struct StreamClient {
    banner: Banner,
    rx: mpsc::Receiver<Result<Bytes, ProtocolError>>,
}

impl StreamClient {
    /// Connect over TCP and read the banner.
    pub async fn connect(addr: &str) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream).await
    }

    /// Read the banner from `stream` and start the frame reader task.
    pub async fn from_stream<S>(stream: S) -> Result<Self, ProtocolError>
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = FramedRead::new(stream, StreamCodec::new());
        let banner = match reader.next().await {
            Some(Ok(StreamItem::Banner(banner))) => banner,
            Some(Ok(StreamItem::Frame(_))) => {
                return Err(ProtocolError::InvalidRequest(
                    "frame received before banner".into(),
                ));
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ProtocolError::Truncated {
                    what: "banner",
                    expected: crate::protocol::BANNER_SIZE,
                    actual: 0,
                });
            }
        };
        debug!("banner: {:?}", banner);

        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        tokio::spawn(async move {
            while let Some(item) = reader.next().await {
                let forwarded = match item {
                    Ok(StreamItem::Frame(frame)) => Ok(frame),
                    Ok(StreamItem::Banner(_)) => continue,
                    Err(e) => {
                        warn!("stream read error: {}", e);
                        Err(e)
                    }
                };
                let failed = forwarded.is_err();
                if tx.send(forwarded).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Self { banner, rx })
    }

    pub fn banner(&self) -> &Banner {
        &self.banner
    }

    /// Next JPEG payload; `None` once the server closed the stream.
    pub async fn next_frame(&mut self) -> Option<Result<Bytes, ProtocolError>> {
        self.rx.recv().await
    }
}
