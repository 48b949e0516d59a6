//! Per-client session state machine.
//!
//! ```text
//! AwaitingClient ──accept──▶ Handshaking ──banner──▶ Streaming
//!       ▲                         │                      │
//!       └──────── Closing ◀───────┴── write failure ─────┘
//!                                     interrupted / cancelled
//! AwaitingClient ──stopped──▶ Shutdown
//! ```
//!
//! One client is served at a time. Write failures and provider
//! interruptions only end the current client; any other capture or
//! encode error ends the loop with that error.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::capture::CaptureProvider;
use crate::encoder::FrameCompressor;
use crate::error::{PipelineError, StreamError};
use crate::network::{ClientStream, ServerSocket};
use crate::notifier::FrameNotifier;
use crate::pipeline::FramePipeline;
use crate::protocol::{Banner, Command};

/// Longest request line accepted before the buffer is discarded.
const MAX_REQUEST_LINE: usize = 4096;

// ── Listener ─────────────────────────────────────────────────────

/// Source of client connections.
pub trait Listener {
    type Stream: Read + Write;

    /// Block for the next client; `Ok(None)` once `notifier` is stopped.
    fn accept(&mut self, notifier: &FrameNotifier) -> io::Result<Option<Self::Stream>>;
}

impl Listener for ServerSocket {
    type Stream = ClientStream;

    fn accept(&mut self, notifier: &FrameNotifier) -> io::Result<Option<ClientStream>> {
        ServerSocket::accept(self, notifier)
    }
}

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingClient,
    Handshaking,
    Streaming,
    Closing,
    Shutdown,
}

/// How frames are delivered to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Banner, then every frame the provider produces.
    #[default]
    Push,
    /// Banner, then one frame per `c <w> <h> <q>` line.
    Request,
}

// ── SessionLoop ──────────────────────────────────────────────────

pub struct SessionLoop<L: Listener, P: CaptureProvider, C: FrameCompressor> {
    listener: L,
    pipeline: FramePipeline<P, C>,
    banner: Banner,
    mode: SessionMode,
    notifier: Arc<FrameNotifier>,
    clients: u64,
}

impl<L, P, C> SessionLoop<L, P, C>
where
    L: Listener,
    P: CaptureProvider,
    C: FrameCompressor,
{
    pub fn new(listener: L, pipeline: FramePipeline<P, C>, banner: Banner, mode: SessionMode) -> Self {
        let notifier = Arc::clone(pipeline.notifier());
        Self {
            listener,
            pipeline,
            banner,
            mode,
            notifier,
            clients: 0,
        }
    }

    /// Serve clients until the notifier is stopped or a fatal error.
    pub fn run(&mut self) -> Result<(), StreamError> {
        let mut state = SessionState::AwaitingClient;
        let mut client: Option<L::Stream> = None;

        loop {
            debug!("session state: {:?}", state);
            state = match state {
                SessionState::AwaitingClient => match self.listener.accept(&self.notifier)? {
                    Some(stream) => {
                        self.clients += 1;
                        debug!("client connected, {} frame(s) pending", self.notifier.pending());
                        client = Some(stream);
                        SessionState::Handshaking
                    }
                    None => SessionState::Shutdown,
                },

                SessionState::Handshaking => match client.as_mut() {
                    Some(stream) => match stream.write_all(&self.banner.encode()) {
                        Ok(()) => SessionState::Streaming,
                        Err(e) => {
                            warn!("banner write failed: {}", e);
                            SessionState::Closing
                        }
                    },
                    None => SessionState::Closing,
                },

                SessionState::Streaming => match client.as_mut() {
                    Some(stream) => self.stream(stream)?,
                    None => SessionState::Closing,
                },

                SessionState::Closing => {
                    if client.take().is_some() {
                        info!("client disconnected");
                    }
                    SessionState::AwaitingClient
                }

                SessionState::Shutdown => {
                    info!("session loop stopped after {} client(s)", self.clients);
                    return Ok(());
                }
            };
        }
    }

    fn stream(&mut self, stream: &mut L::Stream) -> Result<SessionState, StreamError> {
        match self.mode {
            SessionMode::Push => self.push(stream),
            SessionMode::Request => self.serve_requests(stream),
        }
    }

    fn push(&mut self, stream: &mut L::Stream) -> Result<SessionState, StreamError> {
        loop {
            let frame = match self.pipeline.next_encoded_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(SessionState::Closing),
                Err(e) => return on_pipeline_error(e),
            };
            if let Err(e) = stream.write_all(frame) {
                warn!("frame write failed: {}", e);
                return Ok(SessionState::Closing);
            }
        }
    }

    fn serve_requests(&mut self, stream: &mut L::Stream) -> Result<SessionState, StreamError> {
        let mut line = Vec::with_capacity(64);
        loop {
            match read_line(stream, &mut line, &self.notifier) {
                Ok(true) => {}
                Ok(false) => return Ok(SessionState::Closing),
                Err(e) => {
                    warn!("request read failed: {}", e);
                    return Ok(SessionState::Closing);
                }
            }

            let text = String::from_utf8_lossy(&line);
            let request = match Command::parse(&text) {
                Ok(Command::Capture(request)) => request,
                Ok(Command::Empty) => continue,
                Ok(Command::Unknown(cmd)) => {
                    debug!("ignoring command {:?}", cmd);
                    continue;
                }
                Err(e) => {
                    warn!("ignoring request: {}", e);
                    continue;
                }
            };

            let frame = match self.pipeline.capture_request(&request) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(SessionState::Closing),
                Err(e) => return on_pipeline_error(e),
            };
            if let Err(e) = stream.write_all(frame) {
                warn!("frame write failed: {}", e);
                return Ok(SessionState::Closing);
            }
        }
    }

    pub fn pipeline(&self) -> &FramePipeline<P, C> {
        &self.pipeline
    }

    /// Clients accepted so far.
    pub fn clients(&self) -> u64 {
        self.clients
    }
}

fn on_pipeline_error(err: PipelineError) -> Result<SessionState, StreamError> {
    if err.is_transient() {
        warn!("capture interrupted, dropping client");
        Ok(SessionState::Closing)
    } else {
        error!("fatal pipeline error: {}", err);
        Err(err.into())
    }
}

/// Read one `\n`-terminated line into `line`, without the newline.
///
/// Returns `Ok(false)` on end of stream or once `notifier` is stopped.
/// Read timeouts are retried so the stop flag is observed.
fn read_line<R: Read + ?Sized>(
    reader: &mut R,
    line: &mut Vec<u8>,
    notifier: &FrameNotifier,
) -> io::Result<bool> {
    line.clear();
    let mut byte = [0u8; 1];
    loop {
        if notifier.is_stopped() {
            return Ok(false);
        }
        match reader.read(&mut byte) {
            Ok(0) => return Ok(false),
            Ok(_) if byte[0] == b'\n' => return Ok(true),
            Ok(_) => {
                if line.len() >= MAX_REQUEST_LINE {
                    line.clear();
                }
                line.push(byte[0]);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    use crate::capture::mock::{FailingCompressor, MockProvider};
    use crate::encoder::ImageJpegCompressor;
    use crate::error::CaptureError;
    use crate::pipeline::PipelineOptions;
    use crate::projection::Projection;
    use crate::protocol::{BANNER_SIZE, Quirks};

    /// In-memory client: scripted input, captured output, optional
    /// write failure after `fail_after` bytes.
    #[derive(Default)]
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(limit) = self.fail_after {
                if self.output.len() + buf.len() > limit {
                    return Err(io::Error::new(ErrorKind::BrokenPipe, "client gone"));
                }
            }
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hands out queued streams, stopping the notifier when empty.
    struct MockListener {
        streams: VecDeque<MockStream>,
        /// Output of each accepted stream, recorded on the next accept.
        finished: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
        /// Frames to signal before each stream is handed out.
        frames_per_client: u32,
    }

    impl Listener for MockListener {
        type Stream = Recorded;

        fn accept(&mut self, notifier: &FrameNotifier) -> io::Result<Option<Recorded>> {
            match self.streams.pop_front() {
                Some(stream) => {
                    for _ in 0..self.frames_per_client {
                        notifier.signal();
                    }
                    Ok(Some(Recorded {
                        inner: stream,
                        sink: Arc::clone(&self.finished),
                    }))
                }
                None => {
                    notifier.stop();
                    Ok(None)
                }
            }
        }
    }

    /// Publishes the captured output when dropped by the session loop.
    struct Recorded {
        inner: MockStream,
        sink: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
    }

    impl Read for Recorded {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Write for Recorded {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for Recorded {
        fn drop(&mut self) {
            self.sink.lock().push(std::mem::take(&mut self.inner.output));
        }
    }

    fn banner() -> Banner {
        let p: Projection = "16x16@16x16/0".parse().unwrap();
        Banner::new(&p, 1234, Quirks::empty())
    }

    fn session(
        provider: MockProvider,
        streams: Vec<MockStream>,
        frames_per_client: u32,
        mode: SessionMode,
        options: PipelineOptions,
    ) -> (
        SessionLoop<MockListener, MockProvider, ImageJpegCompressor>,
        Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
    ) {
        let finished = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let listener = MockListener {
            streams: streams.into(),
            finished: Arc::clone(&finished),
            frames_per_client,
        };
        let pipeline = FramePipeline::new(
            provider,
            ImageJpegCompressor::default(),
            Arc::new(FrameNotifier::new()),
            options,
        );
        (SessionLoop::new(listener, pipeline, banner(), mode), finished)
    }

    /// Split `bytes` after the banner into length-prefixed frames.
    fn frames(bytes: &[u8]) -> Vec<&[u8]> {
        let mut rest = &bytes[BANNER_SIZE..];
        let mut out = Vec::new();
        while rest.len() >= 4 {
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            out.push(&rest[4..4 + len]);
            rest = &rest[4 + len..];
        }
        assert!(rest.is_empty(), "trailing bytes after last frame");
        out
    }

    #[test]
    fn write_failure_closes_client_and_releases_frame() {
        let broken = MockStream {
            fail_after: Some(BANNER_SIZE),
            ..MockStream::default()
        };
        let (mut session, finished) = session(
            MockProvider::new(16, 16),
            vec![broken],
            1,
            SessionMode::Push,
            PipelineOptions::default(),
        );
        session.run().unwrap();

        let provider = session.pipeline().provider();
        assert_eq!(provider.consumed, 1);
        assert_eq!(provider.released, 1);
        assert!(!provider.is_held());
        assert_eq!(session.clients(), 1);
        assert_eq!(finished.lock()[0], banner().encode());
    }

    #[test]
    fn banner_failure_skips_streaming() {
        let broken = || MockStream {
            fail_after: Some(0),
            ..MockStream::default()
        };
        let (mut session, _) = session(
            MockProvider::new(16, 16),
            vec![broken(), broken()],
            0,
            SessionMode::Push,
            PipelineOptions::default(),
        );
        session.run().unwrap();
        assert_eq!(session.clients(), 2);
        assert_eq!(session.pipeline().provider().consumed, 0);
    }

    #[test]
    fn skip_policy_sends_one_of_five() {
        let (mut session, finished) = session(
            MockProvider::new(16, 16),
            vec![MockStream::default()],
            5,
            SessionMode::Push,
            PipelineOptions {
                skip_frames: true,
                ..PipelineOptions::default()
            },
        );

        let notifier = Arc::clone(session.pipeline().notifier());
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(150));
            notifier.stop();
        });
        session.run().unwrap();
        stopper.join().unwrap();

        let stats = session.pipeline().stats();
        assert_eq!(stats.skipped, 4);
        assert_eq!(stats.encoded, 1);
        let provider = session.pipeline().provider();
        assert_eq!(provider.consumed, 5);
        assert_eq!(provider.released, 5);

        let output = finished.lock();
        let sent = frames(&output[0]);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..2], &[0xff, 0xd8]);
    }

    #[test]
    fn interrupted_capture_drops_only_the_client() {
        let (mut session, finished) = session(
            MockProvider::new(16, 16).failing_on(2, || CaptureError::Interrupted),
            vec![MockStream::default(), MockStream::default()],
            2,
            SessionMode::Push,
            PipelineOptions::default(),
        );
        let notifier = Arc::clone(session.pipeline().notifier());
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(150));
            notifier.stop();
        });
        session.run().unwrap();
        stopper.join().unwrap();

        assert_eq!(session.clients(), 2);
        let output = finished.lock();
        assert_eq!(frames(&output[0]).len(), 1);
        let provider = session.pipeline().provider();
        assert_eq!(provider.consumed, provider.released);
    }

    #[test]
    fn fatal_capture_error_ends_the_loop() {
        let (mut session, _) = session(
            MockProvider::new(16, 16).failing_on(1, || CaptureError::NotConfigured),
            vec![MockStream::default()],
            1,
            SessionMode::Push,
            PipelineOptions::default(),
        );
        assert!(matches!(
            session.run(),
            Err(StreamError::Capture(CaptureError::NotConfigured))
        ));
    }

    #[test]
    fn fatal_encode_error_ends_the_loop_and_releases_frame() {
        let listener = MockListener {
            streams: vec![MockStream::default(), MockStream::default()].into(),
            finished: Arc::new(parking_lot::Mutex::new(Vec::new())),
            frames_per_client: 1,
        };
        let pipeline = FramePipeline::new(
            MockProvider::new(16, 16),
            FailingCompressor,
            Arc::new(FrameNotifier::new()),
            PipelineOptions::default(),
        );
        let mut session = SessionLoop::new(listener, pipeline, banner(), SessionMode::Push);

        assert!(matches!(session.run(), Err(StreamError::Encode(_))));
        // The second client was never accepted.
        assert_eq!(session.clients(), 1);
        let provider = session.pipeline().provider();
        assert_eq!(provider.consumed, 1);
        assert_eq!(provider.consumed, provider.released);
    }

    #[test]
    fn request_mode_answers_each_capture_line() {
        let client = MockStream {
            input: Cursor::new(b"c 8 8 50\n\nx ignored\nc 16 4 90\n".to_vec()),
            ..MockStream::default()
        };
        let (mut session, finished) = session(
            MockProvider::new(16, 16),
            vec![client],
            1,
            SessionMode::Request,
            PipelineOptions::default(),
        );

        // Each request drains the backlog, so keep frames coming.
        let notifier = Arc::clone(session.pipeline().notifier());
        let producer = std::thread::spawn(move || {
            while !notifier.is_stopped() {
                std::thread::sleep(std::time::Duration::from_millis(5));
                notifier.signal();
            }
        });
        session.run().unwrap();
        producer.join().unwrap();

        let output = finished.lock();
        assert_eq!(&output[0][..BANNER_SIZE], &banner().encode());
        let sent = frames(&output[0]);
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|f| f.starts_with(&[0xff, 0xd8])));
    }

    #[test]
    fn read_line_strips_newline_and_stops_at_eof() {
        let notifier = FrameNotifier::new();
        let mut input = Cursor::new(b"c 1 2 3\npartial".to_vec());
        let mut line = Vec::new();
        assert!(read_line(&mut input, &mut line, &notifier).unwrap());
        assert_eq!(line, b"c 1 2 3");
        assert!(!read_line(&mut input, &mut line, &notifier).unwrap());
    }
}
