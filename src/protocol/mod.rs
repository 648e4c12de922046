//! Request correlation and completion delivery.
//!
//! Many requests share one physical connection. This module provides the
//! pieces that let each of them get its own answer back asynchronously:
//!
//! - [`SidManager`]: hands out and recycles the stream ids that tag requests
//!   on a connection.
//! - [`Dispatcher`]: a worker pool that runs completion handlers, so user code
//!   never executes on the thread reading from the network.
//! - [`deliver`], [`deliver_chunk`], [`deliver_status`]: wrap a result into a
//!   [`ResponseJob`] and queue it.
//! - [`Channel`]: the per-connection table of pending requests used by the
//!   read path, fed by [`FrameTransport`].
//!
//! # Lifecycle of a request
//!
//! 1. [`Channel::send`] allocates a stream id and parks the handler under it.
//! 2. The read path decodes an answer and calls [`Channel::complete`].
//! 3. The handler runs exactly once on a dispatcher worker, after which the
//!    stream id goes back to the free pool.
//!
//! Dispatcher and stream id manager are ordinary values owned by whoever owns
//! the connection; share them with `Arc` where several components need them.
mod channel;
mod dispatch;
mod job;
mod response;
mod sid;
mod transport;

pub use channel::Channel;
pub use dispatch::{Dispatcher, DispatcherConfig, Job};
pub use job::{ResponseHandler, ResponseJob, Undelivered, deliver, deliver_chunk, deliver_status};
pub use response::{ChunkInfo, MAX_CHUNK_SIZE, Response, StatInfo};
pub use sid::{STREAM_ID_SPACE, SidManager, StreamId};
pub use transport::{Frame, FrameBody, FrameTransport, MAX_FRAME_SIZE};
