//! Background thread that periodically saves the Diff hive.

use crate::hive::OfflineHive;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct FlushWorker {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl FlushWorker {
    /// Starts the `hive_flush` thread saving `hive` every `interval`.
    pub fn spawn(hive: Arc<OfflineHive>, interval: Duration) -> io::Result<Self> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let builder = thread::Builder::new().name("hive_flush".into());
        let thread = builder.spawn(move || {
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match hive.save() {
                        Ok(true) => debug!("Periodic save of {}", hive.path().display()),
                        Ok(false) => {}
                        // Retried on the next tick.
                        Err(e) => warn!("Periodic save of {} failed: {e}", hive.path().display()),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Flush worker for {} stopped", hive.path().display());
        })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Signals the thread and waits for it to finish its current save.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.stop.try_send(());
        if thread.join().is_err() {
            error!("Flush worker panicked");
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
