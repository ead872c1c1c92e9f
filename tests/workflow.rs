use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mediad::adapters::{SimulatedController, SimulatedEnumerator};
use mediad::core::{
    BatchConfig, BatchJob, ChannelSink, EventKind, Stage, VolumeRegistry, WorkflowEvent,
    WorkflowOutcome, WorkflowRunner,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const MB: usize = 1024 * 1024;

struct Harness {
    registry: VolumeRegistry,
    controller: SimulatedController,
    runner: WorkflowRunner,
    events: UnboundedReceiver<WorkflowEvent>,
}

impl Harness {
    fn new() -> Self {
        let (enumerator, controller) = SimulatedEnumerator::new();
        let (sink, events) = ChannelSink::new();
        let registry = VolumeRegistry::new();
        let runner = WorkflowRunner::new(registry.clone(), Arc::new(enumerator), Arc::new(sink));
        Self {
            registry,
            controller,
            runner,
            events,
        }
    }

    /// Arm batch mode with `source` and claim `id` the way the watcher does.
    fn claim(&self, id: &str, source: &Path) -> BatchJob {
        self.registry.set_batch(BatchConfig::armed(source));
        self.registry
            .claim_for_batch(id)
            .expect("volume should be claimable")
    }

    fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn write_source(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, vec![0x5a; len]).unwrap();
    path
}

#[tokio::test]
async fn test_empty_volume_happy_path_event_sequence() {
    let mut h = Harness::new();
    let source_dir = TempDir::new().unwrap();
    let mount = TempDir::new().unwrap();
    let source = write_source(source_dir.path(), "track.wav", MB);

    h.controller.insert("/dev/sdb1", mount.path());
    let job = h.claim("/dev/sdb1", &source);

    let outcome = h.runner.run("/dev/sdb1".to_string(), job).await;
    assert_eq!(outcome, WorkflowOutcome::Completed);

    let events = h.drain();
    assert!(events.iter().all(|e| e.volume_id == "/dev/sdb1"));
    assert!(
        events
            .iter()
            .any(|e| e.kind == EventKind::Info && e.message.contains("already empty"))
    );

    let sequence: Vec<(EventKind, &str)> = events
        .iter()
        .filter(|e| e.kind != EventKind::Info)
        .map(|e| (e.kind, e.message.as_str()))
        .collect();
    assert_eq!(
        sequence,
        vec![
            (EventKind::Start, "processing started"),
            (EventKind::Progress, "scanning volume contents"),
            (EventKind::Progress, "clean, ready to copy"),
            (EventKind::Progress, "copying track.wav (1.0 MB)"),
            (EventKind::Progress, "copy complete: track.wav"),
            (EventKind::Progress, "verifying file integrity"),
            (
                EventKind::Complete,
                "processing complete, please safely eject /dev/sdb1 manually"
            ),
        ]
    );

    let verified = events
        .iter()
        .filter(|e| e.kind == EventKind::Info)
        .last()
        .unwrap();
    assert_eq!(verified.message, "verified: file size 1.0 MB, integrity confirmed");

    assert_eq!(fs::read(mount.path().join("track.wav")).unwrap().len(), MB);
    assert!(h.registry.is_completed("/dev/sdb1"));
    assert!(!h.registry.is_processing("/dev/sdb1"));
}

#[tokio::test]
async fn test_existing_content_is_wiped_before_copy() {
    let mut h = Harness::new();
    let source_dir = TempDir::new().unwrap();
    let mount = TempDir::new().unwrap();
    let source = write_source(source_dir.path(), "track.wav", 4096);

    fs::write(mount.path().join("old.wav"), b"stale").unwrap();
    fs::create_dir_all(mount.path().join("DCIM/100CANON")).unwrap();
    fs::write(mount.path().join("DCIM/100CANON/IMG_0001.JPG"), b"jpeg").unwrap();

    h.controller.insert("/dev/sdc1", mount.path());
    let job = h.claim("/dev/sdc1", &source);

    assert!(h.runner.run("/dev/sdc1".to_string(), job).await.is_completed());

    let names: Vec<String> = fs::read_dir(mount.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["track.wav".to_string()]);

    let events = h.drain();
    assert!(events.iter().all(|e| e.kind != EventKind::Warning));
    assert!(
        events
            .iter()
            .any(|e| e.message == "scan complete: found 1 files, 1 directories (2 items)")
    );
    assert!(events.iter().any(|e| e.message == "deleted directory: DCIM"));
}

#[tokio::test]
async fn test_dest_filename_override() {
    let mut h = Harness::new();
    let source_dir = TempDir::new().unwrap();
    let mount = TempDir::new().unwrap();
    let source = write_source(source_dir.path(), "master_v3.wav", 2048);

    h.controller.insert("/dev/sdd1", mount.path());
    h.registry.set_batch(BatchConfig {
        enabled: true,
        source_file: Some(source),
        dest_filename: Some("PLAYBACK.WAV".to_string()),
    });
    let job = h.registry.claim_for_batch("/dev/sdd1").unwrap();

    assert!(h.runner.run("/dev/sdd1".to_string(), job).await.is_completed());
    assert!(mount.path().join("PLAYBACK.WAV").is_file());
    assert!(!mount.path().join("master_v3.wav").exists());

    let events = h.drain();
    assert!(events.iter().any(|e| e.message == "copy complete: PLAYBACK.WAV"));
}

#[tokio::test]
async fn test_missing_source_fails_in_copy_and_skips_verify() {
    let mut h = Harness::new();
    let mount = TempDir::new().unwrap();
    fs::write(mount.path().join("keep-me.txt"), b"data").unwrap();

    h.controller.insert("/dev/sdb1", mount.path());
    let claim = h.registry.add_if_absent_from_both("/dev/sdb1").unwrap();
    let job = BatchJob {
        source_file: PathBuf::from("/nonexistent/track.wav"),
        dest_filename: None,
        claim,
    };

    let outcome = h.runner.run("/dev/sdb1".to_string(), job).await;
    assert!(matches!(outcome, WorkflowOutcome::Failed { stage: Stage::Copy, .. }));

    let events = h.drain();
    let errors: Vec<&WorkflowEvent> = events.iter().filter(|e| e.kind == EventKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.starts_with("copy failed:"));
    assert_eq!(events.last().unwrap().kind, EventKind::Error);
    assert!(events.iter().all(|e| e.message != "verifying file integrity"));
    assert!(events.iter().all(|e| e.kind != EventKind::Complete));

    assert!(!h.registry.is_processing("/dev/sdb1"));
    assert!(!h.registry.is_completed("/dev/sdb1"));
}

#[tokio::test]
async fn test_ejected_volume_fails_path_resolution() {
    let mut h = Harness::new();
    let source_dir = TempDir::new().unwrap();
    let mount = TempDir::new().unwrap();
    let source = write_source(source_dir.path(), "track.wav", 512);

    h.controller.insert("/dev/sde1", mount.path());
    let job = h.claim("/dev/sde1", &source);
    assert!(h.controller.eject("/dev/sde1"));

    let outcome = h.runner.run("/dev/sde1".to_string(), job).await;
    assert!(matches!(outcome, WorkflowOutcome::Failed { stage: Stage::Wipe, .. }));

    let events = h.drain();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Start, EventKind::Error]);
    assert!(events[1].message.starts_with("wipe failed:"));
    assert!(!h.registry.is_processing("/dev/sde1"));
}
