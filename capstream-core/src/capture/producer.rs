//! Fixed-rate frame announcer shared by the polling providers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::capture::CaptureResult;
use crate::notifier::FrameNotifier;

/// Thread that signals one frame per interval until dropped or until
/// the notifier is stopped.
pub(crate) struct Producer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    pub(crate) fn spawn(
        name: &str,
        interval: Duration,
        notifier: Arc<FrameNotifier>,
    ) -> CaptureResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) && !notifier.is_stopped() {
                    thread::sleep(interval);
                    notifier.signal();
                }
                debug!("frame producer exiting");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
