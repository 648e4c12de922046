use std::{
    process,
    sync::{Arc, mpsc},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, error, warn};

use crate::{
    Error, Status,
    protocol::{Response, ResponseHandler},
};

use super::{CopyJob, JobCore, JobDescriptor, JobState, JobSummary, Locator, ProgressHandler};

/// What the source server told us while checking a third party copy is possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpcInfo {
    /// Where the source actually lives, after redirections.
    pub source: Locator,
    pub source_size: u64,
}

/// Instructions for the target server to pull `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpcRequest {
    /// Rendezvous key shared by both servers.
    pub key: String,
    pub source: Locator,
    pub target: Locator,
    pub source_size: u64,
    pub force: bool,
}

/// The server side of a third party copy.
///
/// Implementations talk to the servers; this crate only sequences the calls.
pub trait ThirdPartyService: Send + Sync {
    /// Check that `source` can be pulled directly into `target`.
    fn prepare(&self, source: &Locator, target: &Locator) -> Result<TpcInfo, Error>;

    /// Kick off the transfer. The final status goes to `handler`, from a
    /// dispatcher worker, once the servers are done.
    fn start(&self, request: TpcRequest, handler: Box<dyn ResponseHandler>) -> Result<(), Error>;

    /// Bytes the target holds so far.
    fn target_size(&self, target: &Locator) -> Result<u64, Error>;

    /// Server side checksum of `locator`, if the server can compute one.
    fn checksum(&self, _locator: &Locator) -> Result<Option<String>, Error> {
        Ok(None)
    }
}

/// Copy performed directly between two servers.
pub struct ThirdPartyCopyJob {
    core: JobCore,
    info: TpcInfo,
    service: Arc<dyn ThirdPartyService>,
    poll_interval: Duration,
}

impl ThirdPartyCopyJob {
    pub fn new(
        descriptor: JobDescriptor,
        info: TpcInfo,
        service: Arc<dyn ThirdPartyService>,
        poll_interval: Duration,
    ) -> Self {
        debug!(
            "creating a third party copy job, from {} to {}",
            descriptor.source, descriptor.target
        );
        Self {
            core: JobCore::new(descriptor),
            info,
            service,
            poll_interval,
        }
    }

    fn transfer(&self, progress: &mut dyn ProgressHandler) -> Result<JobSummary, Error> {
        let descriptor = &self.core.descriptor;
        let size = self.info.source_size;
        let request = TpcRequest {
            key: generate_key(),
            source: self.info.source.clone(),
            target: descriptor.target.clone(),
            source_size: size,
            force: descriptor.flags.force,
        };

        let (tx, rx) = mpsc::channel();
        let handler = move |status: Status, _: Option<Response>| {
            // The job may have given up waiting already.
            let _ = tx.send(status);
        };
        self.service.start(request, Box::new(handler))?;

        let status = loop {
            match rx.recv_timeout(self.poll_interval) {
                Ok(status) => break status,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if progress.should_cancel() {
                        warn!(
                            "abandoning third party copy to {}, the servers may still finish it",
                            descriptor.target
                        );
                        return Err(Error::Cancelled);
                    }
                    match self.service.target_size(&descriptor.target) {
                        Ok(copied) => progress.job_progress(copied, size),
                        Err(e) => debug!("unable to stat {}: {e}", descriptor.target),
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break Err(Error::ConnectionBroken(
                        "third party copy completion was dropped".into(),
                    ));
                }
            }
        };

        if let Err(e) = status {
            error!(
                "third party copy from {} to {} failed: {e}",
                descriptor.source, descriptor.target
            );
            return Err(e);
        }
        progress.job_progress(size, size);

        let checksum = if descriptor.verify_checksum {
            self.verify()?
        } else {
            None
        };

        Ok(JobSummary {
            bytes: size,
            checksum,
        })
    }

    fn verify(&self) -> Result<Option<String>, Error> {
        let target = &self.core.descriptor.target;
        let source_sum = self.service.checksum(&self.info.source)?;
        let target_sum = self.service.checksum(target)?;

        match (source_sum, target_sum) {
            (Some(src), Some(dst)) if src == dst => Ok(Some(src)),
            (Some(src), Some(dst)) => Err(Error::validation_failed(
                target,
                format!("checksum mismatch: source {src}, target {dst}"),
            )),
            _ => {
                warn!("no server side checksum for {target}, skipping verification");
                Ok(None)
            }
        }
    }
}

impl CopyJob for ThirdPartyCopyJob {
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

/// Rendezvous key for a third party copy: 24 hex digits derived from the
/// current time and the process id.
pub fn generate_key() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{:08x}{:08x}{:08x}",
        now.subsec_micros(),
        process::id(),
        now.as_secs() as u32
    )
}
