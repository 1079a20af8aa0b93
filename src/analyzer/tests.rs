use super::*;
use crate::camera::FrameSource;
use crate::config::AnalyzerConfig;
use crate::events::{DoorcamEvent, EventBus};
use crate::frame::test_support::jpeg_with_box;
use std::sync::Arc;
use std::time::Duration;

fn config() -> AnalyzerConfig {
    AnalyzerConfig {
        max_fps: 50,
        delta_threshold: 5,
        contour_min_area: 5000.0,
        decode_scale: 4,
        blur_sigma: 2.0,
        background_alpha: 0.5,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[test]
fn test_builder_requires_all_parts() {
    assert!(MotionAnalyzerOrchestratorBuilder::new().build().is_err());
    assert!(MotionAnalyzerOrchestratorBuilder::new()
        .config(config())
        .event_bus(EventBus::new(8))
        .build()
        .is_err());
}

#[tokio::test]
async fn test_publishes_motion_for_bright_region() {
    let bus = EventBus::new(32);
    let mut events = bus.subscribe();
    let source = Arc::new(FrameSource::new(30, 8, None));

    let mut orchestrator = MotionAnalyzerOrchestratorBuilder::new()
        .config(config())
        .frame_source(Arc::clone(&source))
        .event_bus(bus.clone())
        .build()
        .unwrap();
    orchestrator.start().unwrap();

    source.publish(jpeg_with_box(640, 480, None), 640, 480);
    wait_for(|| orchestrator.metrics().background_initialized).await;

    source.publish(jpeg_with_box(640, 480, Some((200, 120, 200, 200))), 640, 480);

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(event @ DoorcamEvent::MotionDetected { .. }) = events.recv().await {
                return event;
            }
        }
    })
    .await
    .unwrap();

    match event {
        DoorcamEvent::MotionDetected { contour_area, .. } => assert!(contour_area > 5000.0),
        _ => unreachable!(),
    }
    assert_eq!(orchestrator.metrics().activations, 1);

    orchestrator.stop().await.unwrap();
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_each_frame_analysed_once() {
    let bus = EventBus::new(8);
    let source = Arc::new(FrameSource::new(30, 8, None));
    let mut orchestrator = MotionAnalyzerOrchestrator::new(config(), Arc::clone(&source), bus);
    orchestrator.start().unwrap();

    source.publish(jpeg_with_box(640, 480, None), 640, 480);
    wait_for(|| orchestrator.metrics().frames_analyzed == 1).await;

    // Several ticks pass with the same current frame
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(orchestrator.metrics().frames_analyzed, 1);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_decode_failure_is_skipped() {
    let bus = EventBus::new(8);
    let source = Arc::new(FrameSource::new(30, 8, None));
    let mut orchestrator = MotionAnalyzerOrchestrator::new(config(), Arc::clone(&source), bus);
    orchestrator.start().unwrap();

    source.publish(vec![0x00, 0x11, 0x22], 640, 480);
    wait_for(|| orchestrator.metrics().failures == 1).await;

    source.publish(jpeg_with_box(640, 480, None), 640, 480);
    wait_for(|| orchestrator.metrics().background_initialized).await;
    assert!(orchestrator.is_running());

    orchestrator.stop().await.unwrap();
}
