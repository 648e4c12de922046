//! Per-connection table of requests waiting for an answer.
//!
//! A [`Channel`] ties a connection's [`SidManager`] to the shared
//! [`Dispatcher`]. Senders register a handler and get the stream id to put on
//! the wire; the read path hands every decoded answer to
//! [`Channel::complete`], which routes it to the registered handler on a
//! dispatcher worker and recycles the id once the handler has returned.
//!
//! Every registered handler runs exactly once. When a bounded dispatcher
//! queue is full the channel holds on to the completion and retries, which
//! slows the read path down to the pace of the workers.
use std::{
    collections::HashMap,
    io::{Read, Write},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use log::{debug, error, warn};

use crate::{Error, Status};

use super::{
    Dispatcher, FrameTransport, Response, ResponseHandler, ResponseJob, SidManager, StreamId,
    Undelivered,
};

type InFlight = HashMap<StreamId, Box<dyn ResponseHandler>>;

/// Pause between attempts to queue a completion on a full dispatcher.
const QUEUE_RETRY: Duration = Duration::from_millis(1);

pub struct Channel {
    sids: Arc<SidManager>,
    dispatcher: Arc<Dispatcher>,
    in_flight: Mutex<InFlight>,
}

impl Channel {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sids: Arc::new(SidManager::new()),
            dispatcher,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a stream id for a request whose answer goes to `handler`.
    pub fn send(&self, handler: Box<dyn ResponseHandler>) -> Result<StreamId, Error> {
        let id = self.sids.allocate()?;
        self.lock().insert(id, handler);
        Ok(id)
    }

    /// Route the answer for `id` to its handler.
    ///
    /// Late answers to expired requests and answers on ids nobody is waiting
    /// for are dropped. If the dispatcher has stopped, the id is released and
    /// the completion is handed back to the caller.
    pub fn complete(
        &self,
        id: StreamId,
        status: Status,
        response: Option<Response>,
    ) -> Result<(), Undelivered> {
        if self.sids.is_timed_out(id) {
            debug!("dropping late response on timed out stream {id}");
            self.sids.release_timed_out(id);
            return Ok(());
        }

        let Some(handler) = self.lock().remove(&id) else {
            warn!("response on stream {id} has no pending request");
            return Ok(());
        };

        self.dispatch(id, ResponseJob::new(handler, status, response), true)
            .inspect_err(|_| self.sids.release(id))
    }

    /// Give up on `id` locally. The handler gets [`Error::OperationExpired`];
    /// the id stays reserved until the server's answer is seen.
    ///
    /// If the expiry cannot be delivered the request is left pending as it was.
    pub fn expire(&self, id: StreamId) -> Result<(), Error> {
        let Some(handler) = self.lock().remove(&id) else {
            return Ok(());
        };

        self.sids.time_out(id);
        let job = ResponseJob::new(handler, Err(Error::OperationExpired(id)), None);
        if let Err(Undelivered { error, job }) = self.dispatch(id, job, false) {
            self.sids.clear_time_out(id);
            self.lock().insert(id, job.into_handler());
            return Err(error);
        }
        Ok(())
    }

    /// Fail every pending request, e.g. after the connection dropped.
    pub fn fail_all(&self, reason: &str) {
        let pending: Vec<_> = self.lock().drain().collect();
        if !pending.is_empty() {
            warn!("failing {} pending requests: {reason}", pending.len());
        }

        for (id, handler) in pending {
            let status = Err(Error::ConnectionBroken(reason.to_string()));
            if let Err(e) = self.dispatch(id, ResponseJob::new(handler, status, None), true) {
                error!("failure for stream {id} could not be delivered: {e}");
                self.sids.release(id);
            }
        }
    }

    /// Feed answers from `transport` into the channel until the peer closes.
    ///
    /// Returns the number of frames processed. However the stream ends, every
    /// request still pending afterwards is failed with
    /// [`Error::ConnectionBroken`].
    pub fn pump<T: Read + Write>(&self, transport: &mut FrameTransport<T>) -> Result<usize, Error> {
        let mut frames = 0;
        loop {
            match transport.read_frame() {
                Ok(Some(frame)) => {
                    let (id, status, response) = frame.into_parts();
                    frames += 1;
                    if let Err(undelivered) = self.complete(id, status, response) {
                        error!("completion for stream {id} lost: {undelivered}");
                        self.fail_all("dispatcher stopped");
                        return Err(undelivered.into());
                    }
                }
                Ok(None) => {
                    debug!("stream closed after {frames} frames");
                    self.fail_all("connection closed by peer");
                    return Ok(frames);
                }
                Err(e) => {
                    self.fail_all(&e.to_string());
                    return Err(e);
                }
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    pub fn sids(&self) -> &Arc<SidManager> {
        &self.sids
    }

    /// Queue `job`, waiting out a full queue. With `release` set the id goes
    /// back to the pool on the worker after the handler ran.
    fn dispatch(
        &self,
        id: StreamId,
        mut job: ResponseJob,
        release: bool,
    ) -> Result<(), Undelivered> {
        let mut waiting = false;
        loop {
            let sids = release.then(|| Arc::clone(&self.sids));
            let res = job.submit_then(&self.dispatcher, move || {
                if let Some(sids) = sids {
                    sids.release(id);
                }
            });

            match res {
                Err(Undelivered {
                    error: Error::QueueFull { capacity },
                    job: returned,
                }) => {
                    if !waiting {
                        debug!(
                            "dispatch queue full ({capacity}), holding completion for stream {id}"
                        );
                        waiting = true;
                    }
                    job = returned;
                    thread::sleep(QUEUE_RETRY);
                }
                res => return res,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
