//! Worker pool that runs completion jobs off the network path.
//!
//! Everything that hands a result to user code goes through a [`Dispatcher`]:
//! the read path only enqueues, and one of the pool's workers runs the job.
//! Jobs are admitted in FIFO order into a single queue but may finish in any
//! order since several workers drain it concurrently.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        mpsc::{self, TrySendError},
    },
    thread,
};

use log::{debug, error, warn};

use crate::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum number of queued jobs; `None` for an unbounded queue.
    pub queue_capacity: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: None,
        }
    }
}

#[derive(Debug)]
enum Queue {
    Unbounded(mpsc::Sender<Job>),
    Bounded {
        sender: mpsc::SyncSender<Job>,
        capacity: usize,
    },
}

#[derive(Debug)]
pub struct Dispatcher {
    workers: Vec<Worker>,
    queue: Option<Queue>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, Error> {
        if config.workers == 0 {
            return Err(Error::InvalidConfig(
                "dispatcher needs at least one worker".into(),
            ));
        }
        if config.queue_capacity == Some(0) {
            return Err(Error::InvalidConfig(
                "bounded dispatcher queue needs a capacity above zero".into(),
            ));
        }

        let (queue, receiver) = match config.queue_capacity {
            None => {
                let (sender, receiver) = mpsc::channel();
                (Queue::Unbounded(sender), receiver)
            }
            Some(capacity) => {
                let (sender, receiver) = mpsc::sync_channel(capacity);
                (Queue::Bounded { sender, capacity }, receiver)
            }
        };

        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            workers.push(Worker::new(i, Arc::clone(&receiver))?);
        }

        debug!(
            "dispatcher started with {} workers, queue capacity {:?}",
            config.workers, config.queue_capacity
        );
        Ok(Self {
            workers,
            queue: Some(queue),
        })
    }

    /// Queue `f` to run on a worker. Never runs it on the calling thread and
    /// never blocks; a full bounded queue is reported as [`Error::QueueFull`].
    pub fn submit<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(f);
        match self.queue.as_ref() {
            Some(Queue::Unbounded(sender)) => {
                sender.send(job).map_err(|_| Error::DispatcherStopped)
            }
            Some(Queue::Bounded { sender, capacity }) => {
                sender.try_send(job).map_err(|e| match e {
                    TrySendError::Full(_) => Error::QueueFull {
                        capacity: *capacity,
                    },
                    TrySendError::Disconnected(_) => Error::DispatcherStopped,
                })
            }
            None => Err(Error::DispatcherStopped),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the queue lets workers drain what is left and exit.
        drop(self.queue.take());

        for worker in self.workers.drain(..) {
            debug!("shutting down dispatch worker {}", worker.id);
            if worker.thread.join().is_err() {
                warn!("dispatch worker {} exited abnormally", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Result<Self, Error> {
        let thread = thread::Builder::new()
            .name(format!("dispatch-{id}"))
            .spawn(move || {
                loop {
                    let msg = receiver
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .recv();
                    match msg {
                        Ok(job) => {
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!("worker {id}: completion job panicked");
                            }
                        }
                        Err(_) => {
                            debug!("worker {id} disconnected");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self { id, thread })
    }
}
