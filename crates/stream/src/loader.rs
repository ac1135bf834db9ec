//! The background loader: one thread that reads and parses chunk documents.
//!
//! The main thread keeps sole ownership of every space. It sends prepared
//! [`LoadTicket`]s over a channel and collects the [`LoadOutcome`]s, so no
//! chunk state is ever shared with the loader thread.

use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use chunkspace_kernel::{LoadOutcome, LoadTicket};

use crate::context::SpaceId;
use crate::error::StreamError;

struct LoadJob {
    space: SpaceId,
    ticket: LoadTicket,
    enqueued_at: Instant,
}

/// A finished load, tagged with the space that asked for it.
#[derive(Debug)]
pub struct LoadDone {
    pub space: SpaceId,
    pub outcome: LoadOutcome,
    pub queue_ms: f64,
    pub load_ms: f64,
}

pub struct Loader {
    tx_job: Option<Sender<LoadJob>>,
    rx_done: Receiver<LoadDone>,
    handle: Option<JoinHandle<()>>,
    in_flight: usize,
}

impl Loader {
    pub fn spawn() -> Result<Self, StreamError> {
        let (tx_job, rx_job) = unbounded::<LoadJob>();
        let (tx_done, rx_done) = unbounded::<LoadDone>();

        let handle = std::thread::Builder::new()
            .name("chunk-loader".into())
            .spawn(move || {
                while let Ok(job) = rx_job.recv() {
                    let started = Instant::now();
                    let queue_ms = (started - job.enqueued_at).as_secs_f64() * 1000.0;
                    let outcome = job.ticket.load();
                    let load_ms = started.elapsed().as_secs_f64() * 1000.0;
                    tracing::trace!(chunk = %outcome.identifier, queue_ms, load_ms, "chunk read");
                    let done = LoadDone {
                        space: job.space,
                        outcome,
                        queue_ms,
                        load_ms,
                    };
                    if tx_done.send(done).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            tx_job: Some(tx_job),
            rx_done,
            handle: Some(handle),
            in_flight: 0,
        })
    }

    /// Queue a load. The outcome arrives through [`Loader::try_recv`] or
    /// [`Loader::recv`].
    pub fn submit(&mut self, space: SpaceId, ticket: LoadTicket) -> Result<(), StreamError> {
        let tx = self.tx_job.as_ref().ok_or(StreamError::LoaderGone)?;
        tx.send(LoadJob {
            space,
            ticket,
            enqueued_at: Instant::now(),
        })
        .map_err(|_| StreamError::LoaderGone)?;
        self.in_flight += 1;
        Ok(())
    }

    pub fn try_recv(&mut self) -> Result<Option<LoadDone>, StreamError> {
        match self.rx_done.try_recv() {
            Ok(done) => {
                self.in_flight -= 1;
                Ok(Some(done))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StreamError::LoaderGone),
        }
    }

    /// Block until the next load finishes. `None` when nothing is in flight.
    pub fn recv(&mut self) -> Result<Option<LoadDone>, StreamError> {
        if self.in_flight == 0 {
            return Ok(None);
        }
        let done = self.rx_done.recv().map_err(|_| StreamError::LoaderGone)?;
        self.in_flight -= 1;
        Ok(Some(done))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        // closing the job channel ends the thread's loop
        drop(self.tx_job.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("chunk loader thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader").field("in_flight", &self.in_flight).finish()
    }
}
