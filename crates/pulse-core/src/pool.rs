//! Fixed-size worker pool for flush callback dispatch
//!
//! Workers block on a channel receive until shutdown closes the sending
//! side; the channel keeps buffering submitted jobs, so everything
//! queued before shutdown still drains before the workers exit. A
//! panicking job is caught and logged, never a dead worker.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

use crate::error::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl WorkerPool {
    /// Zero threads falls back to the machine's available parallelism.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            threads
        };

        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads)
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("pulse-worker-{}", i))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                warn!("worker task panicked; worker continues");
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn execute<F>(&self, job: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopping.load(Ordering::Acquire) {
            return Err(Error::PoolStopped);
        }
        let guard = self.sender.lock().unwrap();
        match guard.as_ref() {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| Error::PoolStopped),
            None => Err(Error::PoolStopped),
        }
    }

    /// Idempotent. Closes the queue, lets workers drain what is already
    /// buffered, and joins them.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender disconnects the channel once workers have
        // drained the backlog.
        self.sender.lock().unwrap().take();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
