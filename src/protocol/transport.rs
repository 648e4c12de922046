use std::io::{self, Read, Write};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint, Limit},
    decode_from_std_read, encode_into_std_write,
    error::DecodeError,
};

use crate::{Error, Status};

use super::{MAX_CHUNK_SIZE, Response, StreamId};

/// Upper bound on an encoded frame: a full chunk plus room for the header,
/// error messages and stat payloads.
pub const MAX_FRAME_SIZE: usize = MAX_CHUNK_SIZE + 64 * 1024;

/// Server answer to one request, tagged with the stream it belongs to.
#[derive(Debug, Encode, Decode, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub body: FrameBody,
}

#[derive(Debug, Encode, Decode, PartialEq, Eq)]
pub enum FrameBody {
    Ok(Option<Response>),
    Error { code: u16, message: String },
}

impl Frame {
    pub fn ok(stream_id: StreamId, response: Option<Response>) -> Self {
        Self {
            stream_id,
            body: FrameBody::Ok(response),
        }
    }

    pub fn error(stream_id: StreamId, code: u16, message: impl Into<String>) -> Self {
        Self {
            stream_id,
            body: FrameBody::Error {
                code,
                message: message.into(),
            },
        }
    }

    /// Split into what a completion handler receives.
    pub fn into_parts(self) -> (StreamId, Status, Option<Response>) {
        match self.body {
            FrameBody::Ok(response) => (self.stream_id, Ok(()), response),
            FrameBody::Error { code, message } => (
                self.stream_id,
                Err(Error::ErrorResponse { code, message }),
                None,
            ),
        }
    }
}

fn truncated() -> Error {
    Error::ConnectionBroken("stream ended in the middle of a frame".into())
}

pub struct FrameTransport<T: Read + Write> {
    stream: T,
    config: Configuration<BigEndian, Fixint, Limit<MAX_FRAME_SIZE>>,
}

impl<T: Read + Write> FrameTransport<T> {
    pub fn new(stream: T) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding()
            .with_limit::<MAX_FRAME_SIZE>();
        Self { stream, config }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        encode_into_std_write(frame, &mut self.stream, self.config)?;
        Ok(())
    }

    /// Read the next frame, or `None` once the peer has closed the stream
    /// between frames.
    ///
    /// A stream that ends inside a frame is a [`Error::ConnectionBroken`];
    /// a frame larger than [`MAX_FRAME_SIZE`] is rejected before anything is
    /// allocated for it.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
        let mut first = [0u8; 1];
        loop {
            match self.stream.read(&mut first) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut rest = (&first[..]).chain(&mut self.stream);
        match decode_from_std_read(&mut rest, self.config) {
            Ok(frame) => Ok(Some(frame)),
            Err(DecodeError::Io { inner, .. }) if inner.kind() == io::ErrorKind::UnexpectedEof => {
                Err(truncated())
            }
            Err(DecodeError::UnexpectedEnd { .. }) => Err(truncated()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}
