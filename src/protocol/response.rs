use bincode::{Decode, Encode};

/// Largest chunk a single frame may carry.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// A chunk of file data together with where it belongs.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct ChunkInfo {
    pub offset: u64,
    pub buffer: Vec<u8>,
}

impl ChunkInfo {
    pub fn new(offset: u64, buffer: Vec<u8>) -> Self {
        Self { offset, buffer }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub struct StatInfo {
    pub size: u64,
    pub flags: u32,
    pub mod_time: u64,
}

impl StatInfo {
    pub const IS_DIR: u32 = 0x2;
    pub const READABLE: u32 = 0x10;
    pub const WRITABLE: u32 = 0x20;

    pub fn is_dir(&self) -> bool {
        self.flags & Self::IS_DIR != 0
    }
}

/// Payload handed to a completion handler alongside the status.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum Response {
    Chunk(ChunkInfo),
    Buffer(Vec<u8>),
    Stat(StatInfo),
}

impl Response {
    pub fn into_chunk(self) -> Option<ChunkInfo> {
        match self {
            Response::Chunk(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            Response::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn into_stat(self) -> Option<StatInfo> {
        match self {
            Response::Stat(stat) => Some(stat),
            _ => None,
        }
    }
}
