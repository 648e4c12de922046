use std::{mem, sync::Arc, time::Duration};

use log::{debug, error, info};

use crate::{Config, Error};

use super::{
    ClassicCopyJob, CopyJob, JobDescriptor, JobSummary, LocatorKind, ProgressHandler,
    RemoteStorage, ThirdPartyCopyJob, ThirdPartyService, TpcMode,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Skip every job after the first failed one.
    #[default]
    StopOnFirstFailure,
    /// Run every job regardless of earlier failures.
    ContinueOnFailure,
}

#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(JobSummary),
    Failed(Error),
    NotRun,
}

/// Per-job results of a [`CopyProcess::run`], in job order.
#[derive(Debug, Default)]
pub struct CopyReport {
    outcomes: Vec<JobOutcome>,
}

impl CopyReport {
    pub fn outcomes(&self) -> &[JobOutcome] {
        &self.outcomes
    }

    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o, JobOutcome::Succeeded(_)))
    }

    pub fn first_error(&self) -> Option<&Error> {
        self.outcomes.iter().find_map(|o| match o {
            JobOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    pub fn bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o {
                JobOutcome::Succeeded(summary) => summary.bytes,
                _ => 0,
            })
            .sum()
    }

    /// Aggregate status: success iff every job succeeded, otherwise the first
    /// job error.
    pub fn into_status(self) -> Result<u64, Error> {
        let bytes = self.bytes();
        for outcome in self.outcomes {
            // Skipped jobs always follow a failed one.
            if let JobOutcome::Failed(e) = outcome {
                return Err(e);
            }
        }
        Ok(bytes)
    }
}

/// Runs a batch of copy jobs in order.
pub struct CopyProcess {
    pending: Vec<JobDescriptor>,
    jobs: Vec<Box<dyn CopyJob>>,
    policy: FailurePolicy,
    poll_interval: Duration,
    remote: Option<Arc<dyn RemoteStorage>>,
    third_party: Option<Arc<dyn ThirdPartyService>>,
}

impl CopyProcess {
    pub fn new(config: &Config) -> Self {
        Self {
            pending: Vec::new(),
            jobs: Vec::new(),
            policy: config.failure_policy,
            poll_interval: config.tpc_poll_interval,
            remote: None,
            third_party: None,
        }
    }

    pub fn with_remote_storage(mut self, remote: Arc<dyn RemoteStorage>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_third_party(mut self, service: Arc<dyn ThirdPartyService>) -> Self {
        self.third_party = Some(service);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn add_job(&mut self, descriptor: JobDescriptor) {
        self.pending.push(descriptor);
    }

    /// Queue an already built job, bypassing strategy selection.
    pub fn push_job(&mut self, job: Box<dyn CopyJob>) {
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick a strategy for every added descriptor.
    pub fn prepare(&mut self) -> Result<(), Error> {
        for descriptor in mem::take(&mut self.pending) {
            let job = self.select(descriptor)?;
            self.jobs.push(job);
        }
        Ok(())
    }

    fn select(&self, descriptor: JobDescriptor) -> Result<Box<dyn CopyJob>, Error> {
        if descriptor.third_party == TpcMode::Off {
            return Ok(Box::new(ClassicCopyJob::new(descriptor, self.remote.clone())));
        }

        let both_servers = descriptor.source.kind() == LocatorKind::ServerPair
            && descriptor.target.kind() == LocatorKind::ServerPair;

        let attempt = match (&self.third_party, both_servers) {
            (Some(service), true) => service
                .prepare(&descriptor.source, &descriptor.target)
                .map(|info| (Arc::clone(service), info)),
            (None, _) => Err(Error::NotSupported(
                "no third party copy service available".into(),
            )),
            (_, false) => Err(Error::NotSupported(format!(
                "third party copy between {} and {} is not possible",
                descriptor.source.scheme(),
                descriptor.target.scheme()
            ))),
        };

        match (attempt, descriptor.third_party) {
            (Ok((service, info)), _) => Ok(Box::new(ThirdPartyCopyJob::new(
                descriptor,
                info,
                service,
                self.poll_interval,
            ))),
            (Err(e), TpcMode::First) => {
                debug!("falling back to a classic copy: {e}");
                Ok(Box::new(ClassicCopyJob::new(descriptor, self.remote.clone())))
            }
            (Err(e), _) => Err(e),
        }
    }

    /// Run every job once, in order, reporting to `progress`.
    ///
    /// Descriptors added since the last [`prepare`](Self::prepare) are prepared
    /// first; a job that cannot be prepared fails the whole call before
    /// anything is copied. Jobs are consumed by the run.
    pub fn run(&mut self, progress: &mut dyn ProgressHandler) -> Result<CopyReport, Error> {
        self.prepare()?;

        let jobs = mem::take(&mut self.jobs);
        let total = jobs.len();
        let mut report = CopyReport::default();
        let mut stopped = false;

        for (i, mut job) in jobs.into_iter().enumerate() {
            if stopped {
                report.outcomes.push(JobOutcome::NotRun);
                continue;
            }

            let num = i + 1;
            let descriptor = job.descriptor().clone();
            progress.begin_job(num, total, &descriptor.source, &descriptor.target);
            let res = job.run(progress);
            progress.end_job(num, &res);

            report.outcomes.push(match res {
                Ok(summary) => {
                    info!(
                        "job {num}/{total}: copied {} bytes from {} to {}",
                        summary.bytes, descriptor.source, descriptor.target
                    );
                    JobOutcome::Succeeded(summary)
                }
                Err(e) => {
                    error!("job {num}/{total}: {e}");
                    if self.policy == FailurePolicy::StopOnFirstFailure {
                        stopped = true;
                    }
                    JobOutcome::Failed(e)
                }
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use tempdir::TempDir;

    use super::*;
    use crate::{
        copy::{JobState, Locator, NoProgress, TpcInfo, TpcRequest},
        protocol::ResponseHandler,
    };

    /// Job that counts its runs and returns a canned result.
    struct ScriptedJob {
        descriptor: JobDescriptor,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    impl CopyJob for ScriptedJob {
        fn descriptor(&self) -> &JobDescriptor {
            &self.descriptor
        }

        fn state(&self) -> JobState {
            JobState::Created
        }

        fn run(&mut self, _: &mut dyn ProgressHandler) -> Result<JobSummary, Error> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Cancelled)
            } else {
                Ok(JobSummary {
                    bytes: 10,
                    checksum: None,
                })
            }
        }
    }

    fn scripted(fail: bool) -> (Box<dyn CopyJob>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let descriptor = JobDescriptor::new(Locator::local("/a"), Locator::local("/b"));
        let job = ScriptedJob {
            descriptor,
            runs: Arc::clone(&runs),
            fail,
        };
        (Box::new(job), runs)
    }

    #[derive(Default)]
    struct Events {
        begun: Vec<(usize, usize)>,
        ended: Vec<(usize, bool)>,
    }

    impl ProgressHandler for Events {
        fn begin_job(&mut self, num: usize, total: usize, _: &Locator, _: &Locator) {
            self.begun.push((num, total));
        }

        fn end_job(&mut self, num: usize, result: &Result<JobSummary, Error>) {
            self.ended.push((num, result.is_ok()));
        }
    }

    #[test]
    fn empty_process_succeeds() {
        let mut process = CopyProcess::new(&Config::default());
        let report = process.run(&mut NoProgress).unwrap();
        assert!(report.is_success());
        assert_eq!(report.into_status().unwrap(), 0);
    }

    #[test]
    fn every_job_runs_once_in_order() {
        let mut process = CopyProcess::new(&Config::default());
        let counters: Vec<_> = (0..3)
            .map(|_| {
                let (job, runs) = scripted(false);
                process.push_job(job);
                runs
            })
            .collect();

        let mut events = Events::default();
        let report = process.run(&mut events).unwrap();

        assert!(report.is_success());
        assert_eq!(report.bytes(), 30);
        assert_eq!(events.begun, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(events.ended, vec![(1, true), (2, true), (3, true)]);
        for runs in counters {
            assert_eq!(runs.load(Ordering::SeqCst), 1);
        }

        // Jobs are consumed; a second run has nothing to do.
        assert!(process.is_empty());
    }

    #[test]
    fn continue_policy_runs_past_failures() {
        let mut process =
            CopyProcess::new(&Config::default()).with_policy(FailurePolicy::ContinueOnFailure);
        let (failing, _) = scripted(true);
        let (ok, ok_runs) = scripted(false);
        process.push_job(failing);
        process.push_job(ok);

        let report = process.run(&mut NoProgress).unwrap();

        assert_eq!(ok_runs.load(Ordering::SeqCst), 1);
        assert!(!report.is_success());
        assert!(matches!(report.first_error(), Some(Error::Cancelled)));
        assert!(matches!(report.outcomes()[1], JobOutcome::Succeeded(_)));
    }

    #[test]
    fn classic_is_selected_for_local_files() {
        let temp = TempDir::new("process").unwrap();
        let src = temp.path().join("in");
        fs::write(&src, b"data").unwrap();

        let mut descriptor = JobDescriptor::new(
            Locator::local(src.to_string_lossy().into_owned()),
            Locator::local(temp.path().join("out").to_string_lossy().into_owned()),
        );
        descriptor.third_party = TpcMode::First;

        let mut process = CopyProcess::new(&Config::default());
        process.add_job(descriptor);
        let bytes = process.run(&mut NoProgress).unwrap().into_status().unwrap();

        assert_eq!(bytes, 4);
        assert_eq!(fs::read(temp.path().join("out")).unwrap(), b"data");
    }

    struct Unwilling;

    impl ThirdPartyService for Unwilling {
        fn prepare(&self, _: &Locator, _: &Locator) -> Result<TpcInfo, Error> {
            Err(Error::NotSupported("tpc disabled on server".into()))
        }

        fn start(&self, _: TpcRequest, _: Box<dyn ResponseHandler>) -> Result<(), Error> {
            unreachable!("prepare always fails")
        }

        fn target_size(&self, _: &Locator) -> Result<u64, Error> {
            Ok(0)
        }
    }

    fn server_pair(mode: TpcMode) -> JobDescriptor {
        let mut descriptor = JobDescriptor::new(
            Locator::parse("root://a//f").unwrap(),
            Locator::parse("root://b//f").unwrap(),
        );
        descriptor.third_party = mode;
        descriptor
    }

    #[test]
    fn tpc_only_fails_to_prepare_when_impossible() {
        let mut process = CopyProcess::new(&Config::default()).with_third_party(Arc::new(Unwilling));
        process.add_job(server_pair(TpcMode::Only));

        assert!(matches!(process.prepare(), Err(Error::NotSupported(_))));
    }

    #[test]
    fn tpc_first_falls_back_to_classic() {
        let mut process = CopyProcess::new(&Config::default()).with_third_party(Arc::new(Unwilling));
        process.add_job(server_pair(TpcMode::First));
        process.prepare().unwrap();

        // The classic job has no remote backend, which is how we know it was picked.
        let report = process.run(&mut NoProgress).unwrap();
        assert!(matches!(report.first_error(), Some(Error::NotSupported(msg)) if msg.contains("backend")));
    }
}
