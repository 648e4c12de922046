//! Chunked sources and sinks a classic copy moves data between.
//!
//! Local files are handled here. Anything else is reached through a
//! [`RemoteStorage`] implementation supplied by the caller, typically backed by
//! a [`Channel`](crate::protocol::Channel) to the server.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use log::{debug, warn};

use crate::{Error, protocol::ChunkInfo};

use super::Locator;

/// How a copy target is to be opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TargetFlags {
    /// Overwrite an existing target.
    pub force: bool,
    /// Persist on successful close: remove the target if the copy fails.
    pub posc: bool,
    /// Create missing parent directories.
    pub make_dirs: bool,
}

pub trait ChunkSource: Send {
    /// Total number of bytes the source will produce.
    fn size(&self) -> u64;

    /// Next chunk of at most `max_len` bytes, or `None` when exhausted.
    fn next_chunk(&mut self, max_len: usize) -> Result<Option<ChunkInfo>, Error>;
}

pub trait ChunkSink: Send {
    fn put_chunk(&mut self, chunk: &ChunkInfo) -> Result<(), Error>;

    /// Flush and close after the last chunk.
    fn finish(&mut self) -> Result<(), Error>;

    /// Close after a failure, discarding the target if it was opened with POSC.
    fn abort(&mut self);

    /// Digest of what the target holds now, if the sink can compute one.
    fn digest(&mut self) -> Result<Option<blake3::Hash>, Error> {
        Ok(None)
    }
}

pub trait RemoteStorage: Send + Sync {
    fn open_source(&self, locator: &Locator) -> Result<Box<dyn ChunkSource>, Error>;

    fn open_target(
        &self,
        locator: &Locator,
        flags: TargetFlags,
    ) -> Result<Box<dyn ChunkSink>, Error>;
}

pub struct LocalSource {
    locator: Locator,
    file: File,
    size: u64,
    offset: u64,
}

impl LocalSource {
    pub fn open(locator: &Locator) -> Result<Self, Error> {
        debug!("opening {locator} for reading");
        let file = File::open(locator.path()).map_err(|e| Error::open_failed(locator, e))?;
        let size = file
            .metadata()
            .map_err(|e| Error::open_failed(locator, e))?
            .len();

        Ok(Self {
            locator: locator.clone(),
            file,
            size,
            offset: 0,
        })
    }
}

impl ChunkSource for LocalSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn next_chunk(&mut self, max_len: usize) -> Result<Option<ChunkInfo>, Error> {
        let mut buffer = Vec::with_capacity(max_len);
        let read = (&mut self.file)
            .take(max_len as u64)
            .read_to_end(&mut buffer)
            .map_err(|e| Error::io_failed(&self.locator, e))?;

        if read == 0 {
            return Ok(None);
        }

        let chunk = ChunkInfo::new(self.offset, buffer);
        self.offset += read as u64;
        Ok(Some(chunk))
    }
}

pub struct LocalSink {
    locator: Locator,
    path: PathBuf,
    file: Option<File>,
    posc: bool,
}

impl LocalSink {
    pub fn create(locator: &Locator, flags: TargetFlags) -> Result<Self, Error> {
        debug!("opening {locator} for writing");
        let path = PathBuf::from(locator.path());

        if flags.make_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| Error::open_failed(locator, e))?;
            }
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if flags.force {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options
            .open(&path)
            .map_err(|e| Error::open_failed(locator, e))?;

        Ok(Self {
            locator: locator.clone(),
            path,
            file: Some(file),
            posc: flags.posc,
        })
    }

    fn file(&mut self) -> Result<&mut File, Error> {
        self.file.as_mut().ok_or_else(|| {
            Error::io_failed(
                &self.locator,
                io::Error::other("target already closed"),
            )
        })
    }
}

impl ChunkSink for LocalSink {
    fn put_chunk(&mut self, chunk: &ChunkInfo) -> Result<(), Error> {
        let locator = self.locator.clone();
        let file = self.file()?;
        file.seek(SeekFrom::Start(chunk.offset))
            .and_then(|_| file.write_all(&chunk.buffer))
            .map_err(|e| Error::io_failed(locator, e))
    }

    fn finish(&mut self) -> Result<(), Error> {
        let locator = self.locator.clone();
        let file = self.file()?;
        file.sync_all().map_err(|e| Error::io_failed(locator, e))?;
        self.file = None;
        Ok(())
    }

    fn abort(&mut self) {
        self.file = None;
        if self.posc {
            debug!("removing {} after failed copy", self.locator);
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("unable to remove {}: {e}", self.locator);
            }
        }
    }

    fn digest(&mut self) -> Result<Option<blake3::Hash>, Error> {
        let mut file = File::open(&self.path).map_err(|e| Error::io_failed(&self.locator, e))?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| Error::io_failed(&self.locator, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(Some(hasher.finalize()))
    }
}
