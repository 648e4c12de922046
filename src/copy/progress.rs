use crate::Error;

use super::{JobSummary, Locator};

/// Observer of a running copy process.
///
/// Every method has an empty default so implementors pick what they need.
/// Jobs are numbered from 1.
pub trait ProgressHandler {
    fn begin_job(&mut self, _job_num: usize, _job_total: usize, _source: &Locator, _target: &Locator) {}

    fn job_progress(&mut self, _processed: u64, _total: u64) {}

    fn end_job(&mut self, _job_num: usize, _result: &Result<JobSummary, Error>) {}

    /// Polled by running jobs; returning `true` makes them stop with
    /// [`Error::Cancelled`].
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressHandler for NoProgress {}
