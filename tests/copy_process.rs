use std::fs;

use tempdir::TempDir;
use xfer::{
    Config, Error,
    copy::{CopyProcess, FailurePolicy, JobDescriptor, JobOutcome, Locator, NoProgress},
};

fn local(dir: &TempDir, name: &str) -> Locator {
    Locator::local(dir.path().join(name).to_string_lossy().into_owned())
}

#[test]
fn first_failure_stops_the_batch() {
    let temp = TempDir::new("xfer").unwrap();
    fs::write(temp.path().join("present"), b"data").unwrap();

    let mut process = CopyProcess::new(&Config::default());
    process.add_job(JobDescriptor::new(local(&temp, "missing"), local(&temp, "out1")));
    process.add_job(JobDescriptor::new(local(&temp, "present"), local(&temp, "out2")));

    let report = process.run(&mut NoProgress).unwrap();

    assert!(!report.is_success());
    assert!(matches!(
        report.outcomes(),
        [JobOutcome::Failed(Error::TransferOpenFailed { .. }), JobOutcome::NotRun]
    ));
    assert!(!temp.path().join("out2").exists());

    let err = report.into_status().unwrap_err();
    assert!(matches!(err, Error::TransferOpenFailed { .. }));
    assert_eq!(err.shell_code(), 51);
}

#[test]
fn continue_on_failure_runs_every_job() {
    let temp = TempDir::new("xfer").unwrap();
    fs::write(temp.path().join("present"), b"data").unwrap();

    let mut process =
        CopyProcess::new(&Config::default()).with_policy(FailurePolicy::ContinueOnFailure);
    process.add_job(JobDescriptor::new(local(&temp, "missing"), local(&temp, "out1")));
    process.add_job(JobDescriptor::new(local(&temp, "present"), local(&temp, "out2")));

    let report = process.run(&mut NoProgress).unwrap();

    assert!(matches!(
        report.outcomes(),
        [JobOutcome::Failed(_), JobOutcome::Succeeded(_)]
    ));
    assert_eq!(report.bytes(), 4);
    assert_eq!(fs::read(temp.path().join("out2")).unwrap(), b"data");
    assert!(report.into_status().is_err());
}

#[test]
fn batch_of_local_copies_succeeds() {
    let temp = TempDir::new("xfer").unwrap();
    let mut process = CopyProcess::new(&Config::default());
    for i in 0..3 {
        let name = format!("in{i}");
        fs::write(temp.path().join(&name), vec![i as u8; 100 * (i + 1)]).unwrap();
        let mut descriptor =
            JobDescriptor::new(local(&temp, &name), local(&temp, &format!("out{i}")));
        descriptor.verify_checksum = true;
        process.add_job(descriptor);
    }
    assert_eq!(process.len(), 3);

    let bytes = process.run(&mut NoProgress).unwrap().into_status().unwrap();

    assert_eq!(bytes, 600);
    assert!(process.is_empty());
    for i in 0..3 {
        assert_eq!(
            fs::read(temp.path().join(format!("out{i}"))).unwrap(),
            vec![i as u8; 100 * (i + 1)]
        );
    }
}
