//! Completion units and the helpers that hand them to the dispatcher.
use std::sync::{Arc, Mutex, PoisonError};

use log::trace;

use crate::{Error, Status};

use super::{ChunkInfo, Dispatcher, Response};

/// Receiver of the final result of an asynchronous request.
///
/// Consuming `self` makes it impossible to deliver the same result twice.
pub trait ResponseHandler: Send {
    fn handle_response(self: Box<Self>, status: Status, response: Option<Response>);
}

impl<F> ResponseHandler for F
where
    F: FnOnce(Status, Option<Response>) + Send,
{
    fn handle_response(self: Box<Self>, status: Status, response: Option<Response>) {
        (*self)(status, response)
    }
}

/// A handler bundled with the result it is due.
pub struct ResponseJob {
    handler: Box<dyn ResponseHandler>,
    status: Status,
    response: Option<Response>,
}

impl ResponseJob {
    pub fn new(
        handler: Box<dyn ResponseHandler>,
        status: Status,
        response: Option<Response>,
    ) -> Self {
        Self {
            handler,
            status,
            response,
        }
    }

    pub fn run(self) {
        self.handler.handle_response(self.status, self.response);
    }

    /// Queue the job on `dispatcher`; `then` runs on the same worker once the
    /// handler has returned.
    ///
    /// A job the dispatcher refuses comes back untouched inside the error, so
    /// its handler is never silently lost.
    pub fn submit_then<F>(self, dispatcher: &Dispatcher, then: F) -> Result<(), Undelivered>
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(self)));
        let queued = Arc::clone(&slot);
        let res = dispatcher.submit(move || {
            let job = queued.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(job) = job {
                job.run();
            }
            then();
        });

        match res {
            Ok(()) => Ok(()),
            Err(error) => {
                let job = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                match job {
                    Some(job) => Err(Undelivered { error, job }),
                    None => Ok(()),
                }
            }
        }
    }

    /// Take the handler back out of a job that will not run.
    pub fn into_handler(self) -> Box<dyn ResponseHandler> {
        self.handler
    }
}

/// A completion the dispatcher did not accept, returned to its owner.
#[derive(Debug, thiserror::Error)]
#[error("completion not delivered: {error}")]
pub struct Undelivered {
    pub error: Error,
    pub job: ResponseJob,
}

impl From<Undelivered> for Error {
    fn from(undelivered: Undelivered) -> Self {
        undelivered.error
    }
}

impl std::fmt::Debug for ResponseJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseJob")
            .field("status", &self.status)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

/// Queue `handler` to receive `status` and `response` on a dispatcher worker.
///
/// Without a handler nothing is queued and the result is dropped here.
pub fn deliver(
    dispatcher: &Dispatcher,
    handler: Option<Box<dyn ResponseHandler>>,
    status: Status,
    response: Option<Response>,
) -> Result<(), Undelivered> {
    let Some(handler) = handler else {
        return Ok(());
    };

    trace!("queueing completion, ok: {}", status.is_ok());
    ResponseJob::new(handler, status, response).submit_then(dispatcher, || ())
}

/// Deliver a successful read of `buffer` at `offset`.
pub fn deliver_chunk(
    dispatcher: &Dispatcher,
    handler: Option<Box<dyn ResponseHandler>>,
    offset: u64,
    buffer: Vec<u8>,
) -> Result<(), Undelivered> {
    let chunk = ChunkInfo::new(offset, buffer);
    deliver(dispatcher, handler, Ok(()), Some(Response::Chunk(chunk)))
}

/// Deliver a bare success or failure with no payload.
pub fn deliver_status(
    dispatcher: &Dispatcher,
    handler: Option<Box<dyn ResponseHandler>>,
    status: Status,
) -> Result<(), Undelivered> {
    deliver(dispatcher, handler, status, None)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use super::*;
    use crate::protocol::DispatcherConfig;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(DispatcherConfig::default()).unwrap()
    }

    #[test]
    fn chunk_completion_reaches_handler_off_thread() {
        let pool = dispatcher();
        let (tx, rx) = mpsc::channel();

        let handler = move |status: Status, response: Option<Response>| {
            tx.send((thread::current().id(), status.is_ok(), response))
                .unwrap();
        };
        deliver_chunk(&pool, Some(Box::new(handler)), 512, vec![7; 16]).unwrap();

        let (ran_on, ok, response) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(ran_on, thread::current().id());
        assert!(ok);
        let chunk = response.and_then(Response::into_chunk).unwrap();
        assert_eq!(chunk.offset, 512);
        assert_eq!(chunk.buffer, vec![7; 16]);
    }

    #[test]
    fn status_only_completion_carries_error() {
        let pool = dispatcher();
        let (tx, rx) = mpsc::channel();

        let handler = move |status: Status, response: Option<Response>| {
            tx.send((status, response)).unwrap();
        };
        deliver_status(&pool, Some(Box::new(handler)), Err(Error::Cancelled)).unwrap();

        let (status, response) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(status, Err(Error::Cancelled)));
        assert!(response.is_none());
    }

    #[test]
    fn missing_handler_is_a_no_op() {
        let pool = dispatcher();
        deliver(&pool, None, Ok(()), Some(Response::Buffer(vec![1]))).unwrap();
    }

    #[test]
    fn each_handler_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let pool = dispatcher();
            for _ in 0..100 {
                let calls = Arc::clone(&calls);
                let handler = move |_: Status, _: Option<Response>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                };
                deliver_status(&pool, Some(Box::new(handler)), Ok(())).unwrap();
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn refused_completion_is_handed_back() {
        let pool = Dispatcher::new(DispatcherConfig {
            workers: 1,
            queue_capacity: Some(1),
        })
        .unwrap();
        let (block_tx, block_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(move || {
            started_tx.send(()).unwrap();
            block_rx.recv().unwrap();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.submit(|| ()).unwrap();

        let (tx, rx) = mpsc::channel();
        let handler = move |status: Status, _: Option<Response>| {
            tx.send(status.is_ok()).unwrap();
        };
        let undelivered = deliver_status(&pool, Some(Box::new(handler)), Ok(())).unwrap_err();
        assert!(matches!(undelivered.error, Error::QueueFull { capacity: 1 }));

        block_tx.send(()).unwrap();
        undelivered.job.run();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
