use std::sync::Arc;

use log::{debug, warn};

use crate::Error;

use super::{
    ChunkSink, ChunkSource, CopyJob, JobCore, JobDescriptor, JobState, JobSummary, LocalSink,
    LocalSource, Locator, ProgressHandler, RemoteStorage,
};

/// Copy that reads every chunk from the source and writes it to the target.
pub struct ClassicCopyJob {
    core: JobCore,
    remote: Option<Arc<dyn RemoteStorage>>,
}

impl ClassicCopyJob {
    pub fn new(descriptor: JobDescriptor, remote: Option<Arc<dyn RemoteStorage>>) -> Self {
        debug!(
            "creating a classic copy job, from {} to {}",
            descriptor.source, descriptor.target
        );
        Self {
            core: JobCore::new(descriptor),
            remote,
        }
    }

    fn remote_for(&self, locator: &Locator) -> Result<&dyn RemoteStorage, Error> {
        self.remote.as_deref().ok_or_else(|| {
            Error::NotSupported(format!("no storage backend for {}", locator.scheme()))
        })
    }

    fn open_source(&self) -> Result<Box<dyn ChunkSource>, Error> {
        let source = &self.core.descriptor.source;
        if source.is_local() {
            Ok(Box::new(LocalSource::open(source)?))
        } else {
            self.remote_for(source)?.open_source(source)
        }
    }

    fn open_target(&self) -> Result<Box<dyn ChunkSink>, Error> {
        let target = &self.core.descriptor.target;
        let flags = self.core.descriptor.flags;
        if target.is_local() {
            Ok(Box::new(LocalSink::create(target, flags)?))
        } else {
            self.remote_for(target)?.open_target(target, flags)
        }
    }

    fn transfer(&self, progress: &mut dyn ProgressHandler) -> Result<JobSummary, Error> {
        let mut source = self.open_source()?;
        let mut sink = self.open_target()?;

        let res = self.pump(source.as_mut(), sink.as_mut(), progress);
        if res.is_err() {
            sink.abort();
        }
        res
    }

    fn pump(
        &self,
        source: &mut dyn ChunkSource,
        sink: &mut dyn ChunkSink,
        progress: &mut dyn ProgressHandler,
    ) -> Result<JobSummary, Error> {
        let descriptor = &self.core.descriptor;
        let size = source.size();
        let mut hasher = descriptor.verify_checksum.then(blake3::Hasher::new);
        let mut processed = 0u64;

        while let Some(chunk) = source.next_chunk(descriptor.chunk_size)? {
            if progress.should_cancel() {
                return Err(Error::Cancelled);
            }
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk.buffer);
            }
            sink.put_chunk(&chunk)?;
            processed += chunk.len() as u64;
            progress.job_progress(processed, size);
        }
        sink.finish()?;

        if processed != size {
            return Err(Error::validation_failed(
                &descriptor.source,
                format!("expected {size} bytes, transferred {processed}"),
            ));
        }

        let checksum = match hasher {
            Some(hasher) => verify(&descriptor.target, hasher.finalize(), sink)?,
            None => None,
        };

        Ok(JobSummary {
            bytes: processed,
            checksum,
        })
    }
}

fn verify(
    target: &Locator,
    expected: blake3::Hash,
    sink: &mut dyn ChunkSink,
) -> Result<Option<String>, Error> {
    match sink.digest()? {
        Some(actual) if actual == expected => Ok(Some(expected.to_hex().to_string())),
        Some(actual) => Err(Error::validation_failed(
            target,
            format!(
                "checksum mismatch: source {}, target {}",
                expected.to_hex(),
                actual.to_hex()
            ),
        )),
        None => {
            warn!("{target} cannot report a checksum, skipping verification");
            Ok(None)
        }
    }
}

impl CopyJob for ClassicCopyJob {
    fn descriptor(&self) -> &JobDescriptor {
        &self.core.descriptor
    }

    fn state(&self) -> JobState {
        self.core.state
    }

    fn run(&mut self, progress: &mut dyn ProgressHandler) -> Result<JobSummary, Error> {
        self.core.start()?;
        let res = self.transfer(progress);
        self.core.finish(res)
    }
}
