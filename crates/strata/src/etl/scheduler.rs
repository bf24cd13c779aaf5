//! Background thread triggering ETL passes at a fixed cadence.

use crate::error::{Result, StoreError};
use crate::etl::executor::EtlExecutor;
use crate::time::Timestamp;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs [`EtlExecutor::run_etl`] against the wall clock until stopped.
///
/// Dropping the scheduler stops it and waits for the current pass to finish.
pub struct EtlScheduler {
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EtlScheduler {
    /// Starts the scheduler thread. The first pass runs after one cadence.
    pub fn start(executor: Arc<EtlExecutor>, cadence: Duration) -> Result<Self> {
        if cadence.is_zero() {
            return Err(StoreError::ConfigError(
                "ETL cadence must be positive".to_string(),
            ));
        }
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread_running = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("strata-etl-scheduler".to_string())
            .spawn(move || {
                info!("ETL scheduler started with cadence {:?}", cadence);
                loop {
                    match stop_rx.recv_timeout(cadence) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let summary = executor.run_etl(Timestamp::now());
                    if !summary.is_clean() {
                        warn!(
                            "Scheduled ETL pass finished with {} failed jobs",
                            summary.failures.len()
                        );
                    } else {
                        debug!("Scheduled ETL pass completed");
                    }
                }
                thread_running.store(false, Ordering::Release);
                info!("ETL scheduler stopped");
            })?;

        Ok(Self {
            running,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the scheduler and joins its thread.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // A full channel or a gone receiver both mean the thread is stopping.
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("ETL scheduler thread panicked");
            }
        }
        self.running.store(false, Ordering::Release);
    }

    /// Returns true until the scheduler thread exits.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for EtlScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
