//! Data-movement jobs and the process that runs them.
//!
//! A [`CopyProcess`] takes [`JobDescriptor`]s, picks a strategy for each one
//! when it is prepared and runs the resulting [`CopyJob`]s in order:
//!
//! - [`ClassicCopyJob`]: the data flows through this process, chunk by chunk,
//!   from a [`ChunkSource`] into a [`ChunkSink`].
//! - [`ThirdPartyCopyJob`]: a [`ThirdPartyService`] tells the target server to
//!   pull from the source server; this process only watches.
//!
//! Progress and per-job results are reported through a [`ProgressHandler`].
mod classic;
mod locator;
mod process;
mod progress;
mod storage;
mod third_party;

use log::debug;

use crate::Error;

pub use classic::ClassicCopyJob;
pub use locator::{Locator, LocatorKind};
pub use process::{CopyProcess, CopyReport, FailurePolicy, JobOutcome};
pub use progress::{NoProgress, ProgressHandler};
pub use storage::{ChunkSink, ChunkSource, LocalSink, LocalSource, RemoteStorage, TargetFlags};
pub use third_party::{ThirdPartyCopyJob, ThirdPartyService, TpcInfo, TpcRequest, generate_key};

/// Chunk size used by classic copies unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Whether a job may be done as a server to server transfer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TpcMode {
    /// Always copy through this process.
    #[default]
    Off,
    /// Try a third party copy, fall back to a classic one if it can't be done.
    First,
    /// Third party copy or nothing.
    Only,
}

/// Everything needed to build a copy job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub source: Locator,
    pub target: Locator,
    pub flags: TargetFlags,
    pub third_party: TpcMode,
    pub verify_checksum: bool,
    pub chunk_size: usize,
}

impl JobDescriptor {
    pub fn new(source: Locator, target: Locator) -> Self {
        Self {
            source,
            target,
            flags: TargetFlags::default(),
            third_party: TpcMode::default(),
            verify_checksum: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// What a successful job reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub bytes: u64,
    /// Hex digest both ends agreed on, when verification was requested.
    pub checksum: Option<String>,
}

/// One source to target transfer.
///
/// `run` may be called once. Later calls fail with [`Error::AlreadyRun`]
/// without touching either end.
pub trait CopyJob {
    fn descriptor(&self) -> &JobDescriptor;

    fn state(&self) -> JobState;

    fn run(&mut self, progress: &mut dyn ProgressHandler) -> Result<JobSummary, Error>;
}

/// State machine shared by the job strategies.
#[derive(Debug)]
struct JobCore {
    descriptor: JobDescriptor,
    state: JobState,
}

impl JobCore {
    fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            state: JobState::Created,
        }
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.state != JobState::Created {
            return Err(Error::AlreadyRun);
        }
        self.state = JobState::Running;
        Ok(())
    }

    fn finish(&mut self, result: Result<JobSummary, Error>) -> Result<JobSummary, Error> {
        self.state = match &result {
            Ok(_) => JobState::Succeeded,
            Err(_) => JobState::Failed,
        };
        debug!(
            "copy from {} to {} finished: {:?}",
            self.descriptor.source, self.descriptor.target, self.state
        );
        result
    }
}
