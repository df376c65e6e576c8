//! End-to-end batch runs against real files in temporary directories.

use crossbeam_channel::unbounded;
use file_cipher::container::{self, EXTENSION};
use file_cipher::dirname;
use file_cipher::staging::{SpaceProbe, STAGING_DIR_NAME};
use file_cipher::{
    run_batch, BatchEvent, BatchHandle, BatchJob, BatchReport, BatchRunner, CipherError, Engine,
    Key, LogLevel, LogSink, Mode, OutputPolicy, SharedControl, StagingOptions,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingSink {
    fn at_level(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, message: &str, level: LogLevel) {
        self.lines.lock().push((level, message.to_string()));
    }
}

struct FixedSpace(u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

fn write_file(path: &Path, content: &[u8]) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn run(job: &BatchJob, control: &SharedControl, sink: &RecordingSink) -> (BatchReport, Vec<BatchEvent>) {
    let (tx, rx) = unbounded();
    let report = run_batch(job, control, sink, &tx).expect("batch should run");
    drop(tx);
    (report, rx.iter().collect())
}

/// Wait for a spawned batch, giving up after `limit`.
fn wait_within(handle: BatchHandle, limit: Duration) -> Option<BatchReport> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(handle.wait());
    });
    rx.recv_timeout(limit).ok().map(|result| result.unwrap())
}

fn many_files(dir: &Path, count: usize, len: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| write_file(&dir.join(format!("f{i:03}.bin")), &vec![i as u8; len]))
        .collect()
}

#[test]
fn round_trip_with_structure_and_obfuscation() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let big: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let inputs = vec![
        write_file(&src.join("docs/a.txt"), b"alpha"),
        write_file(&src.join("docs/deep/b.bin"), &big),
        write_file(&src.join("c.txt"), b""),
    ];

    let mut job = BatchJob::new(inputs, "correct horse", Mode::Encrypt);
    job.output = OutputPolicy::Directory(tmp.path().join("enc"));
    job.structure.preserve = true;
    job.structure.obfuscate_dirs = true;
    job.structure.obfuscate_names = true;
    job.chunk_size = Some(512);

    let sink = RecordingSink::default();
    let (report, _) = run(&job, &SharedControl::new(), &sink);
    assert_eq!(report.success.len(), 3, "failures: {:?}", report.fail);
    assert!(report.fail.is_empty());

    let enc_root = tmp.path().join("enc/src");
    assert!(enc_root.join(dirname::encode("docs")).is_dir());
    assert!(enc_root.join(dirname::encode("docs")).join(dirname::encode("deep")).is_dir());
    for (_, output) in &report.success {
        assert!(output.starts_with(&enc_root));
        let name = output.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".enc"));
        assert_eq!(name.len(), 12 + 1 + EXTENSION.len());
    }

    let containers = files_under(&tmp.path().join("enc"));
    assert_eq!(containers.len(), 3);
    let mut job = BatchJob::new(containers, "correct horse", Mode::Decrypt);
    job.output = OutputPolicy::Directory(tmp.path().join("dec"));
    job.structure.preserve = true;

    let (report, _) = run(&job, &SharedControl::new(), &sink);
    assert_eq!(report.success.len(), 3, "failures: {:?}", report.fail);

    let dec = tmp.path().join("dec/src");
    assert_eq!(fs::read(dec.join("docs/a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(dec.join("docs/deep/b.bin")).unwrap(), big);
    assert_eq!(fs::read(dec.join("c.txt")).unwrap(), b"");
}

#[test]
fn events_end_with_single_finished_and_bounded_percent() {
    let tmp = TempDir::new().unwrap();
    let inputs: Vec<PathBuf> = (0..5)
        .map(|i| write_file(&tmp.path().join(format!("in/f{i}.dat")), &vec![i as u8; 10_000 * (i + 1)]))
        .collect();

    let mut job = BatchJob::new(inputs, "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(tmp.path().join("out"));
    job.chunk_size = Some(1024);

    let sink = RecordingSink::default();
    let (report, events) = run(&job, &SharedControl::new(), &sink);
    assert_eq!(report.success.len(), 5);

    let finished = events
        .iter()
        .filter(|e| matches!(e, BatchEvent::Finished(_)))
        .count();
    assert_eq!(finished, 1);
    assert!(matches!(events.last(), Some(BatchEvent::Finished(_))));

    let mut last_ok = None;
    let mut first_full = None;
    for (i, event) in events.iter().enumerate() {
        match event {
            BatchEvent::Progress { percent, .. } => {
                assert!(*percent <= 100);
                if *percent == 100 && first_full.is_none() {
                    first_full = Some(i);
                }
            }
            BatchEvent::Log { text, .. } if text.starts_with("[Encrypt ok]") => last_ok = Some(i),
            _ => {}
        }
    }
    assert!(last_ok.unwrap() < first_full.unwrap());
    assert_eq!(sink.at_level(LogLevel::Info).iter().filter(|l| l.starts_with("[Encrypt ok]")).count(), 5);
}

#[test]
fn staging_shortfall_falls_back_to_direct_writes() {
    let tmp = TempDir::new().unwrap();
    let input = write_file(&tmp.path().join("in/report.pdf"), &[9u8; 4096]);
    let scratch = tmp.path().join("scratch");
    let out = tmp.path().join("out");

    let mut job = BatchJob::new(vec![input], "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());
    job.staging = StagingOptions::at(&scratch).with_probe(Arc::new(FixedSpace(4096)));

    let sink = RecordingSink::default();
    let (report, _) = run(&job, &SharedControl::new(), &sink);

    assert_eq!(report.success.len(), 1);
    assert!(report.write_back.is_none());
    assert_eq!(report.success[0].1, out.join("report.pdf.enc"));
    assert!(report.success[0].1.is_file());

    let warnings = sink.at_level(LogLevel::Warning);
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("insufficient staging space"));
    assert!(files_under(&scratch).is_empty());
}

#[test]
fn staged_outputs_are_written_back() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("photos");
    let inputs = vec![
        write_file(&src.join("2023/a.jpg"), &[1u8; 2000]),
        write_file(&src.join("2024/b.jpg"), &[2u8; 3000]),
    ];
    let scratch = tmp.path().join("scratch");
    let out = tmp.path().join("out");

    let mut job = BatchJob::new(inputs, "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());
    job.structure.preserve = true;
    job.staging = StagingOptions::at(&scratch).with_probe(Arc::new(FixedSpace(u64::MAX)));

    let sink = RecordingSink::default();
    let (report, events) = run(&job, &SharedControl::new(), &sink);

    assert_eq!(report.success.len(), 2, "failures: {:?}", report.fail);
    let write_back = report.write_back.as_ref().unwrap();
    assert!(write_back.is_complete());
    assert!(!write_back.retained);
    assert!(!scratch.join(STAGING_DIR_NAME).exists());

    assert_eq!(report.success[0].1, out.join("photos/2023/a.jpg.enc"));
    assert_eq!(report.success[1].1, out.join("photos/2024/b.jpg.enc"));
    for (_, output) in &report.success {
        assert!(output.is_file());
    }

    let write_back_percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::Progress { status, percent } if status.starts_with("Writing back") => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(!write_back_percents.is_empty());
    assert!(write_back_percents.iter().all(|p| (60..100).contains(p)));
}

#[test]
fn stop_before_start_skips_everything() {
    let tmp = TempDir::new().unwrap();
    let inputs = vec![
        write_file(&tmp.path().join("a.txt"), b"a"),
        write_file(&tmp.path().join("b.txt"), b"b"),
    ];
    let out = tmp.path().join("out");
    let mut job = BatchJob::new(inputs, "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());

    let control = SharedControl::new();
    control.stop();
    let (report, _) = run(&job, &control, &RecordingSink::default());

    assert!(report.stopped);
    assert!(report.success.is_empty());
    assert!(report.fail.is_empty());
    assert_eq!(report.skipped, 2);
    assert!(files_under(&out).is_empty());
}

#[test]
fn pause_holds_work_until_resume() {
    let tmp = TempDir::new().unwrap();
    let input = write_file(&tmp.path().join("large.bin"), &vec![5u8; 8 * 1024 * 1024]);
    let out = tmp.path().join("out");
    let mut job = BatchJob::new(vec![input], "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());
    job.chunk_size = Some(4096);

    let handle = BatchRunner::spawn(job, Arc::new(RecordingSink::default())).unwrap();
    handle.pause();
    assert!(handle.is_paused());

    thread::sleep(Duration::from_millis(300));
    assert!(!out.join("large.bin.enc").exists());

    handle.resume();
    let report = handle.wait().unwrap();
    assert_eq!(report.success.len(), 1);
    assert_eq!(report.success[0].1, out.join("large.bin.enc"));
    assert_eq!(files_under(&out), vec![out.join("large.bin.enc")]);
}

#[test]
fn stop_while_paused_leaves_no_output() {
    let tmp = TempDir::new().unwrap();
    let input = write_file(&tmp.path().join("large.bin"), &vec![6u8; 8 * 1024 * 1024]);
    let out = tmp.path().join("out");
    let mut job = BatchJob::new(vec![input], "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());
    job.chunk_size = Some(4096);

    let handle = BatchRunner::spawn(job, Arc::new(RecordingSink::default())).unwrap();
    handle.pause();
    thread::sleep(Duration::from_millis(200));
    handle.stop();
    assert!(!handle.is_paused());

    let report = handle.wait().unwrap();
    assert!(report.stopped);
    assert!(report.success.is_empty());
    assert_eq!(report.skipped + report.fail.len(), 1);
    for (_, reason) in &report.fail {
        assert_eq!(reason, &CipherError::UserStopped.to_string());
    }
    assert!(files_under(&out).is_empty());
}

#[test]
fn missing_source_is_reported() {
    let tmp = TempDir::new().unwrap();
    let present = write_file(&tmp.path().join("here.txt"), b"here");
    let missing = tmp.path().join("gone.txt");
    let mut job = BatchJob::new(vec![present.clone(), missing.clone()], "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(tmp.path().join("out"));

    let (report, _) = run(&job, &SharedControl::new(), &RecordingSink::default());
    assert_eq!(report.success.len(), 1);
    assert_eq!(report.success[0].0, present);
    assert_eq!(report.fail.len(), 1);
    assert_eq!(report.fail[0].0, missing);
    assert_eq!(report.fail[0].1, CipherError::SourceNotFound(missing.clone()).to_string());
}

#[test]
fn wrong_password_fails_without_output() {
    let tmp = TempDir::new().unwrap();
    let input = write_file(&tmp.path().join("plain/notes.md"), b"# notes");
    let sink = RecordingSink::default();

    let job = BatchJob::new(vec![input], "right", Mode::Encrypt);
    let (report, _) = run(&job, &SharedControl::new(), &sink);
    let container = report.success[0].1.clone();
    assert_eq!(container, tmp.path().join("plain/notes.md.enc"));

    let out = tmp.path().join("dec");
    let mut job = BatchJob::new(vec![container.clone()], "wrong", Mode::Decrypt);
    job.output = OutputPolicy::Directory(out.clone());
    let (report, _) = run(&job, &SharedControl::new(), &sink);

    assert!(report.success.is_empty());
    assert_eq!(report.fail, vec![(container, CipherError::WrongKey.to_string())]);
    assert!(files_under(&out).is_empty());
    assert!(sink
        .at_level(LogLevel::Error)
        .iter()
        .any(|l| l.starts_with("[Decrypt failed] notes.md.enc | reason:")));
}

#[test]
fn invalid_job_is_rejected_before_running() {
    let tmp = TempDir::new().unwrap();
    let input = write_file(&tmp.path().join("a.txt"), b"a");
    let job = BatchJob::new(vec![input], "", Mode::Encrypt);

    let (tx, rx) = unbounded();
    let result = run_batch(&job, &SharedControl::new(), &RecordingSink::default(), &tx);
    drop(tx);
    assert!(matches!(result, Err(CipherError::InvalidInput(_))));
    assert!(!rx.iter().any(|e| matches!(e, BatchEvent::Finished(_))));
    assert!(!tmp.path().join("a.txt.enc").exists());
}

#[test]
fn in_place_round_trip_and_delete_originals() {
    let tmp = TempDir::new().unwrap();
    let input = write_file(&tmp.path().join("dir/secret.txt"), b"top secret");
    let sink = RecordingSink::default();

    let job = BatchJob::new(vec![input.clone()], "pw", Mode::Encrypt);
    let (report, _) = run(&job, &SharedControl::new(), &sink);
    let container = tmp.path().join("dir/secret.txt.enc");
    assert_eq!(report.success, vec![(input.clone(), container.clone())]);

    let key = Key::derive("pw");
    assert_eq!(
        container::read_header(&container, &key).unwrap(),
        ("secret.txt".to_string(), 10)
    );

    assert_eq!(report.delete_sources(&sink), 1);
    assert!(!input.exists());

    let job = BatchJob::new(vec![container.clone()], "pw", Mode::Decrypt);
    let (report, _) = run(&job, &SharedControl::new(), &sink);
    assert_eq!(report.success, vec![(container, input.clone())]);
    assert_eq!(fs::read(&input).unwrap(), b"top secret");
}

#[test]
fn same_file_names_into_one_directory_stay_distinct() {
    let tmp = TempDir::new().unwrap();
    let inputs: Vec<PathBuf> = (0..4u8)
        .map(|i| {
            let content: Vec<u8> = (0..5000 + i as usize).map(|b| (b as u8) ^ i).collect();
            write_file(&tmp.path().join(format!("d{i}/same.bin")), &content)
        })
        .collect();
    let out = tmp.path().join("out");

    let mut job = BatchJob::new(inputs.clone(), "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());
    job.chunk_size = Some(4096);
    let (report, _) = run(&job, &SharedControl::new(), &RecordingSink::default());

    assert_eq!(report.success.len(), 4, "failures: {:?}", report.fail);
    let outputs: HashSet<&PathBuf> = report.success.iter().map(|(_, output)| output).collect();
    assert_eq!(outputs.len(), 4);
    assert_eq!(files_under(&out).len(), 4);

    let key = Key::derive("pw");
    let control = SharedControl::new();
    for (i, (source, container)) in report.success.iter().enumerate() {
        let dec = tmp.path().join(format!("check{i}"));
        fs::create_dir(&dec).unwrap();
        let restored = Engine::new(&key, &control)
            .process(container, &dec, Mode::Decrypt, false, &mut |_, _| {})
            .unwrap();
        assert_eq!(restored, dec.join("same.bin"));
        assert_eq!(fs::read(&restored).unwrap(), fs::read(source).unwrap());
    }

    let containers: Vec<PathBuf> = report.success.iter().map(|(_, c)| c.clone()).collect();
    let mut job = BatchJob::new(containers, "pw", Mode::Decrypt);
    job.output = OutputPolicy::Directory(tmp.path().join("dec"));
    let (report, _) = run(&job, &SharedControl::new(), &RecordingSink::default());
    assert_eq!(report.success.len(), 4, "failures: {:?}", report.fail);

    let mut restored: Vec<Vec<u8>> = files_under(&tmp.path().join("dec"))
        .iter()
        .map(|p| fs::read(p).unwrap())
        .collect();
    let mut originals: Vec<Vec<u8>> = inputs.iter().map(|p| fs::read(p).unwrap()).collect();
    restored.sort();
    originals.sort();
    assert_eq!(restored, originals);
}

#[test]
fn pause_after_stop_still_finishes() {
    let tmp = TempDir::new().unwrap();
    let inputs = many_files(&tmp.path().join("in"), 64, 64 * 1024);
    let out = tmp.path().join("out");
    let mut job = BatchJob::new(inputs, "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());
    job.chunk_size = Some(4096);

    let handle = BatchRunner::spawn(job, Arc::new(RecordingSink::default())).unwrap();
    handle.stop();
    handle.pause();
    assert!(!handle.is_paused());

    let report = wait_within(handle, Duration::from_secs(30)).expect("batch should finish after stop");
    assert!(report.stopped);
    assert_eq!(report.success.len() + report.fail.len() + report.skipped, 64);
    assert!(files_under(&out).iter().all(|p| p.extension().unwrap() == "enc"));
}

#[test]
fn stop_while_paused_with_queued_tasks_finishes() {
    let tmp = TempDir::new().unwrap();
    let inputs = many_files(&tmp.path().join("in"), 64, 64 * 1024);
    let out = tmp.path().join("out");
    let mut job = BatchJob::new(inputs, "pw", Mode::Encrypt);
    job.output = OutputPolicy::Directory(out.clone());
    job.chunk_size = Some(4096);

    let handle = BatchRunner::spawn(job, Arc::new(RecordingSink::default())).unwrap();
    handle.pause();
    thread::sleep(Duration::from_millis(100));
    handle.stop();
    handle.pause();

    let report = wait_within(handle, Duration::from_secs(30)).expect("batch should finish after stop");
    assert!(report.stopped);
    assert_eq!(report.success.len() + report.fail.len() + report.skipped, 64);
    for (_, reason) in &report.fail {
        assert_eq!(reason, &CipherError::UserStopped.to_string());
    }
    assert!(files_under(&out).iter().all(|p| p.extension().unwrap() == "enc"));
}
