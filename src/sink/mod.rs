//! Buffered byte sink flushed by a background thread
//!
//! The writer hands over one chunk per framing operation. Chunks travel over an
//! unbounded channel to a dedicated flush thread, while a byte-counting
//! semaphore bounds how much data may be queued at once: `commit` only blocks
//! when the queue already holds `capacity` bytes.

pub mod pipe;

use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, trace, warn};

/// Size of the write buffer used between the queue and the descriptor.
const WRITE_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct SinkShared {
    /// Peer closed the pipe; everything still queued is discarded
    pipe_closed: AtomicBool,
    /// Caller asked to drop queued data instead of flushing it
    abandon: AtomicBool,
    /// First non-pipe write failure, reported on the next commit or close
    error: Mutex<Option<io::Error>>,
}

impl SinkShared {
    fn take_error(&self) -> Option<io::Error> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn discarding(&self) -> bool {
        self.pipe_closed.load(Ordering::Acquire) || self.abandon.load(Ordering::Acquire)
    }
}

/// Asynchronously flushed sink with bounded backpressure.
pub struct ThreadedSink {
    tx: Option<mpsc::UnboundedSender<(Vec<u8>, u32)>>,
    budget: Arc<Semaphore>,
    capacity: usize,
    shared: Arc<SinkShared>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadedSink {
    /// Start a flush thread writing to `target`, queueing at most `capacity` bytes.
    pub fn spawn<W>(target: W, capacity: usize) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        let budget = Arc::new(Semaphore::new(capacity));
        let shared = Arc::new(SinkShared::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let thread = {
            let budget = Arc::clone(&budget);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("packetstream-flush".to_string())
                .spawn(move || flush_loop(target, rx, budget, shared))?
        };

        Ok(Self { tx: Some(tx), budget, capacity, shared, thread: Some(thread) })
    }

    /// Queue `chunk` for writing, blocking while the queue is full.
    ///
    /// Chunks are written whole and in commit order. Returns a `BrokenPipe`
    /// error once the peer has gone, or the pending error of an earlier failed
    /// write.
    pub fn commit(&self, chunk: Vec<u8>) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(err) = self.shared.take_error() {
            return Err(err);
        }
        if self.is_pipe_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader disconnected"));
        }

        // A chunk larger than the whole queue waits for the queue to drain
        // completely, then goes through alone.
        let permits = chunk.len().min(self.capacity) as u32;
        let acquired =
            futures::executor::block_on(Arc::clone(&self.budget).acquire_many_owned(permits))
                .map_err(|_| io::Error::other("flush queue closed"))?;
        acquired.forget();

        let tx = self.tx.as_ref().ok_or_else(|| io::Error::other("sink already closed"))?;
        tx.send((chunk, permits)).map_err(|_| io::Error::other("flush thread exited"))
    }

    /// Whether the flush thread has observed a broken pipe.
    pub fn is_pipe_closed(&self) -> bool {
        self.shared.pipe_closed.load(Ordering::Acquire)
    }

    /// Flush everything queued and stop the flush thread.
    pub fn close(mut self) -> io::Result<()> {
        self.shutdown();
        match self.shared.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop the flush thread, discarding anything still queued.
    pub fn abandon(mut self) {
        self.shared.abandon.store(true, Ordering::Release);
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Flush thread panicked");
        }
    }
}

impl Drop for ThreadedSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flush_loop<W: Write>(
    target: W,
    mut rx: mpsc::UnboundedReceiver<(Vec<u8>, u32)>,
    budget: Arc<Semaphore>,
    shared: Arc<SinkShared>,
) {
    let mut out = BufWriter::with_capacity(WRITE_BUFFER_BYTES, target);
    let mut failed = false;
    let mut written = 0u64;

    while let Some((chunk, permits)) = rx.blocking_recv() {
        if !failed && !shared.discarding() {
            let mut result = out.write_all(&chunk);
            // Push buffered bytes out whenever the producer is idle
            if result.is_ok() && rx.is_empty() {
                result = out.flush();
            }
            match result {
                Ok(()) => written += chunk.len() as u64,
                Err(e) => failed = record_failure(&shared, e),
            }
        }
        budget.add_permits(permits as usize);
    }

    if !failed && !shared.discarding() {
        if let Err(e) = out.flush() {
            record_failure(&shared, e);
        }
    } else {
        // Drop whatever is still buffered without touching the descriptor
        let (_, _) = out.into_parts();
    }

    trace!("Flush thread finished after {} bytes", written);
}

/// Record a write failure; returns true when further writes must stop.
fn record_failure(shared: &SinkShared, err: io::Error) -> bool {
    if err.kind() == io::ErrorKind::BrokenPipe {
        debug!("Pipe reader disconnected, discarding queued data");
        shared.pipe_closed.store(true, Ordering::Release);
    } else {
        warn!("Background write failed: {}", err);
        let mut slot = shared.error.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(err);
    }
    true
}
