use super::*;
use crate::camera::SyntheticCamera;
use crate::capture::IMAGES_DIR;
use crate::config::{CameraSource, DoorcamConfig};
use crate::events::{DoorcamEvent, EventFilter};
use std::path::Path;
use std::time::{Duration, SystemTime};

fn test_config(capture_root: &Path) -> DoorcamConfig {
    let mut config = DoorcamConfig::default();
    config.camera.source = CameraSource::Synthetic;
    config.camera.resolution = (64, 48);
    config.camera.max_fps = 20;
    config.event.preroll_seconds = 1;
    config.event.postroll_seconds = 1;
    config.capture.path = capture_root.display().to_string();
    config.capture.timestamp_overlay = false;
    config.capture.video_encoding = false;
    config.stream.ip = "127.0.0.1".to_string();
    config.stream.port = 0;
    config.display.enabled = false;
    config
}

fn build(config: DoorcamConfig) -> DoorcamOrchestrator {
    let device = Box::new(SyntheticCamera::new(&config.camera));
    DoorcamOrchestrator::with_device(config, device).unwrap()
}

#[tokio::test]
async fn test_components_follow_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.enabled = false;
    config.stream.enabled = false;

    let orchestrator = build(config);
    assert!(orchestrator.analyzer.is_some());
    assert!(orchestrator.post_processor.is_none());
    assert!(orchestrator.retention.is_none());
    assert!(orchestrator.display.is_none());
    assert!(orchestrator.keyboard.is_none());
    assert!(orchestrator.component_states().is_empty());

    let mut config = test_config(dir.path());
    config.system.trim_old = true;
    let orchestrator = build(config);
    assert!(orchestrator.post_processor.is_some());
    assert!(orchestrator.retention.is_some());
}

#[tokio::test]
async fn test_start_record_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = build(test_config(dir.path()));
    let bus = orchestrator.event_bus().clone();
    let mut lifecycle = bus.subscribe_filtered(
        EventFilter::EventTypes(vec!["capture_started", "capture_completed"]),
        "test",
    );

    orchestrator.start().await.unwrap();
    assert_eq!(
        orchestrator.component_state("camera"),
        Some(ComponentState::Running)
    );
    assert_eq!(
        orchestrator.component_state("capture"),
        Some(ComponentState::Running)
    );
    assert_eq!(
        orchestrator.component_state("postprocess"),
        Some(ComponentState::Running)
    );

    // Let the preroll fill, then trigger by hand
    tokio::time::sleep(Duration::from_millis(300)).await;
    bus.publish(DoorcamEvent::ManualTrigger {
        source: "test".to_string(),
        timestamp: SystemTime::now(),
    });

    let started = tokio::time::timeout(Duration::from_secs(5), lifecycle.recv())
        .await
        .unwrap()
        .unwrap();
    let event_id = match started {
        DoorcamEvent::CaptureStarted { event_id, .. } => event_id,
        other => panic!("unexpected event {:?}", other),
    };

    // Shutdown seals the open event before the postroll runs out
    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);

    let completed = tokio::time::timeout(Duration::from_secs(5), lifecycle.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        completed,
        DoorcamEvent::CaptureCompleted { event_id: ref id, file_count } if *id == event_id && file_count > 0
    ));

    let images = dir.path().join(&event_id).join(IMAGES_DIR);
    assert!(std::fs::read_dir(images).unwrap().count() > 0);

    for (component, state) in orchestrator.component_states() {
        assert_eq!(state, ComponentState::Stopped, "{} did not stop", component);
    }
    assert!(!orchestrator.frame_source().is_running());
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_lifecycle_futures_are_send() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = build(test_config(dir.path()));
    let bus = orchestrator.event_bus().clone();
    assert_send(&super::runtime::wait_for_shutdown(bus));
    assert_send(&orchestrator.run());
}

#[tokio::test]
async fn test_run_returns_on_shutdown_request() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.enabled = false;
    let mut orchestrator = build(config);
    orchestrator.start().await.unwrap();
    let bus = orchestrator.event_bus().clone();

    let run = tokio::spawn(async move { orchestrator.run().await });

    // Repeat until the run loop has subscribed
    let exit_code = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            bus.publish(DoorcamEvent::ShutdownRequested {
                timestamp: SystemTime::now(),
                reason: "test".to_string(),
            });
            if run.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        run.await.unwrap().unwrap()
    })
    .await
    .unwrap();

    assert_eq!(exit_code, 0);
}

#[cfg(feature = "streaming")]
#[tokio::test]
async fn test_bind_failure_marks_streaming_failed() {
    let dir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config(dir.path());
    config.capture.enabled = false;
    config.stream.port = taken.local_addr().unwrap().port();

    let mut orchestrator = build(config);
    assert!(orchestrator.start().await.is_err());
    assert_eq!(
        orchestrator.component_state("streaming"),
        Some(ComponentState::Failed)
    );
    assert_eq!(orchestrator.component_state("analyzer"), None);

    orchestrator.shutdown().await.unwrap();
    assert_eq!(
        orchestrator.component_state("camera"),
        Some(ComponentState::Stopped)
    );
}
