//! Parallel, order-preserving block decoding.
//!
//! Blobs are handed to a pool of worker threads and their results are
//! re-sequenced so consumers observe file order. At most `window` blobs are
//! in flight at once, which bounds memory regardless of worker speed.
//!
//! The first error, whether from the input or a worker, ends the stream:
//! queued work is abandoned and no later result is yielded.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use log::debug;
use thiserror::Error;

use crate::pbf::{BlobReader, DecodedBlock, FormatError, RawBlob, decode_blob};

/// A worker thread terminated without producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("decode worker panicked")]
pub struct WorkerPanic;

/// Tuning for the decode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    window: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            window: num_cpus::get().max(1),
        }
    }
}

impl PipelineOptions {
    /// Set the number of blobs decoded concurrently; zero is treated as one.
    #[must_use]
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Number of blobs decoded concurrently.
    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }
}

type Job<T, U, E> = (T, Sender<Result<U, E>>);

/// Iterator returned by [`ordered_map`].
pub struct OrderedMap<I, T, U, E> {
    input: I,
    jobs: Option<Sender<Job<T, U, E>>>,
    pending: VecDeque<Receiver<Result<U, E>>>,
    workers: Vec<JoinHandle<()>>,
    window: usize,
    done: bool,
}

/// Apply `f` to every item of `input` on `window` worker threads, yielding
/// results in input order.
///
/// Input errors are yielded in sequence like any other result.
///
/// # Examples
/// ```
/// use mapsync_data::pipeline::{WorkerPanic, ordered_map};
///
/// let input = (1..=5).map(Ok::<u32, WorkerPanic>);
/// let squares: Result<Vec<_>, _> = ordered_map(input, 3, |n| Ok(n * n)).collect();
/// assert_eq!(squares, Ok(vec![1, 4, 9, 16, 25]));
/// ```
pub fn ordered_map<I, T, U, E, F>(input: I, window: usize, f: F) -> OrderedMap<I, T, U, E>
where
    I: Iterator<Item = Result<T, E>>,
    T: Send + 'static,
    U: Send + 'static,
    E: From<WorkerPanic> + Send + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    let window = window.max(1);
    let (jobs, queue) = bounded::<Job<T, U, E>>(window);
    let f = Arc::new(f);
    let workers = (0..window)
        .map(|_| {
            let queue = queue.clone();
            let f = Arc::clone(&f);
            thread::spawn(move || {
                for (item, reply) in queue {
                    if reply.send(f(item)).is_err() {
                        debug!("dropping decoded block; the consumer stopped reading");
                    }
                }
            })
        })
        .collect();
    OrderedMap {
        input,
        jobs: Some(jobs),
        pending: VecDeque::with_capacity(window),
        workers,
        window,
        done: false,
    }
}

impl<I, T, U, E> OrderedMap<I, T, U, E>
where
    I: Iterator<Item = Result<T, E>>,
    E: From<WorkerPanic>,
{
    /// Top up the in-flight queue from the input.
    fn fill(&mut self) {
        while self.pending.len() < self.window {
            let Some(jobs) = self.jobs.as_ref() else {
                return;
            };
            let Some(item) = self.input.next() else {
                self.jobs = None;
                return;
            };
            let (reply, result) = bounded(1);
            match item {
                Ok(item) => {
                    if jobs.send((item, reply)).is_err() {
                        // Every worker is gone; surface that in sequence.
                        let (ready, failed) = bounded(1);
                        if ready.send(Err(E::from(WorkerPanic))).is_ok() {
                            self.pending.push_back(failed);
                        }
                        self.jobs = None;
                        return;
                    }
                }
                Err(err) => {
                    if reply.send(Err(err)).is_ok() {
                        self.pending.push_back(result);
                    }
                    self.jobs = None;
                    return;
                }
            }
            self.pending.push_back(result);
        }
    }

    fn terminate(&mut self) {
        self.done = true;
        self.jobs = None;
        self.pending.clear();
    }
}

impl<I, T, U, E> Iterator for OrderedMap<I, T, U, E>
where
    I: Iterator<Item = Result<T, E>>,
    E: From<WorkerPanic>,
{
    type Item = Result<U, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.fill();
        let Some(result) = self.pending.pop_front() else {
            self.done = true;
            return None;
        };
        let outcome = result.recv().unwrap_or_else(|_| Err(E::from(WorkerPanic)));
        if outcome.is_err() {
            self.terminate();
        }
        Some(outcome)
    }
}

impl<I, T, U, E> Drop for OrderedMap<I, T, U, E> {
    fn drop(&mut self) {
        self.jobs = None;
        self.pending.clear();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                debug!("decode worker exited by panicking");
            }
        }
    }
}

/// Decode every blob of `reader` in parallel, yielding blocks in file order.
pub fn decode_blocks<R: Read>(
    reader: R,
    options: PipelineOptions,
) -> OrderedMap<BlobReader<R>, RawBlob, DecodedBlock, FormatError> {
    ordered_map(BlobReader::new(reader), options.window(), decode_blob)
}
