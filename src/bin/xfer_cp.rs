use std::{
    path::Path,
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, warn};
use xfer::{
    Config, Error,
    copy::{CopyProcess, FailurePolicy, JobDescriptor, JobSummary, Locator, ProgressHandler},
};

/// Copies run through this process. Remote locators and third party copies
/// need a storage backend, which only library users can plug in.
#[derive(Debug, Parser)]
#[command(version, about = "Copy local files", long_about = None)]
struct Cli {
    /// Files to copy
    #[arg(required = true, num_args = 1..)]
    sources: Vec<String>,
    /// Destination file, or directory when copying several files
    target: String,
    /// Overwrite the target if it exists
    #[arg(short, long)]
    force: bool,
    /// Remove the target if the copy does not complete
    #[arg(long)]
    posc: bool,
    /// Create missing parent directories of the target
    #[arg(long)]
    make_dirs: bool,
    /// Verify the target checksum after the copy
    #[arg(long)]
    cksum: bool,
    /// Do not display the progress bar
    #[arg(long)]
    no_pbar: bool,
    /// Keep copying after a failed job
    #[arg(long)]
    continue_on_error: bool,
    /// Chunk size in bytes for classic copies
    #[arg(long)]
    chunk_size: Option<usize>,
}

/// One progress bar per job, drawn on stderr.
struct ProgressDisplay {
    enabled: bool,
    cancelled: Arc<AtomicBool>,
    bar: ProgressBar,
}

impl ProgressDisplay {
    fn new(enabled: bool, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            enabled,
            cancelled,
            bar: ProgressBar::hidden(),
        }
    }
}

impl ProgressHandler for ProgressDisplay {
    fn begin_job(&mut self, job_num: usize, job_total: usize, source: &Locator, target: &Locator) {
        if !self.enabled {
            return;
        }
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{bar:40}] {bytes}/{total_bytes} {bytes_per_sec} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(format!("[{job_num}/{job_total}]"));
        bar.println(format!("[{job_num}/{job_total}] {source} -> {target}"));
        self.bar = bar;
    }

    fn job_progress(&mut self, processed: u64, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(processed);
    }

    fn end_job(&mut self, _job_num: usize, result: &Result<JobSummary, Error>) {
        match result {
            Ok(summary) => match &summary.checksum {
                Some(sum) => self.bar.finish_with_message(format!("done, checksum {sum}")),
                None => self.bar.finish_with_message("done"),
            },
            Err(e) => self.bar.abandon_with_message(format!("failed: {e}")),
        }
    }

    fn should_cancel(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn config(cli: &Cli) -> Result<Config, Error> {
    let mut config = Config::from_env()?;
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if cli.continue_on_error {
        config.failure_policy = FailurePolicy::ContinueOnFailure;
    }
    config.validate()?;
    Ok(config)
}

fn descriptors(cli: &Cli, config: &Config) -> Result<Vec<JobDescriptor>, Error> {
    let target = Locator::parse(&cli.target)?;
    let target_is_dir = target.is_local() && Path::new(target.path()).is_dir();

    if cli.sources.len() > 1 && !target_is_dir {
        return Err(Error::InvalidLocator(format!(
            "{target} must be a directory when copying several files"
        )));
    }

    cli.sources
        .iter()
        .map(|raw| -> Result<JobDescriptor, Error> {
            let source = Locator::parse(raw)?;
            let target = if target_is_dir {
                let name = source.file_name().ok_or_else(|| {
                    Error::InvalidLocator(format!("{source} does not name a file"))
                })?;
                target.join(name)
            } else {
                target.clone()
            };

            let mut descriptor = JobDescriptor::new(source, target);
            descriptor.flags.force = cli.force;
            descriptor.flags.posc = cli.posc;
            descriptor.flags.make_dirs = cli.make_dirs;
            descriptor.verify_checksum = cli.cksum;
            descriptor.chunk_size = config.chunk_size;
            Ok(descriptor)
        })
        .collect()
}

fn run(cli: Cli) -> Result<u64, Error> {
    let config = config(&cli)?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!("unable to install the interrupt handler: {e}");
    }

    let mut copy = CopyProcess::new(&config);
    for descriptor in descriptors(&cli, &config)? {
        copy.add_job(descriptor);
    }

    let mut progress = ProgressDisplay::new(!cli.no_pbar, cancelled);
    copy.run(&mut progress)?.into_status()
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        eprintln!("xfer-cp: {e}");
        process::exit(e.shell_code());
    }
}
