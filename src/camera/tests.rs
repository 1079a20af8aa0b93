use super::*;
use crate::error::{CameraError, DoorcamError};
use crate::events::{DoorcamEvent, EventBus};
use crate::frame::test_support::jpeg_with_box;
use std::time::Duration;

fn raw(tag: u8) -> RawFrame {
    RawFrame {
        data: vec![0xFF, 0xD8, tag, 0xFF, 0xD9],
        width: 4,
        height: 4,
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
fn test_builder_requires_config() {
    assert!(FrameSourceBuilder::new().build().is_err());
}

#[test]
fn test_preroll_capacity() {
    assert_eq!(calculate_preroll_capacity(30, 5), 300);
    assert_eq!(calculate_preroll_capacity(0, 5), 1);
}

#[tokio::test]
async fn test_current_frame_before_and_after_publish() {
    let source = FrameSource::new(30, 8, None);
    assert!(source.current_frame().is_none());

    let frame = source.publish(jpeg_with_box(8, 8, None), 8, 8);
    let current = source.current_frame().unwrap();
    assert_eq!(current.seq, frame.seq);
    assert_eq!(source.stats().frames_produced, 1);
}

#[tokio::test]
async fn test_subscribers_receive_in_capture_order() {
    let source = FrameSource::new(30, 64, None);
    let mut a = source.subscribe("a");
    let mut b = source.subscribe("b");

    for i in 0..20u8 {
        source.publish(vec![i], 1, 1);
    }

    for sub in [&mut a, &mut b] {
        let mut last = None;
        for _ in 0..20 {
            let frame = sub.recv().await.unwrap();
            if let Some(prev) = last {
                assert!(frame.seq > prev, "sequence must strictly increase");
            }
            last = Some(frame.seq);
        }
        assert!(sub.try_recv().is_none(), "no frame is delivered twice");
    }
}

#[tokio::test]
async fn test_late_subscriber_gets_only_new_frames() {
    let source = FrameSource::new(30, 8, None);
    source.publish(vec![1], 1, 1);
    source.publish(vec![2], 1, 1);

    let mut late = source.subscribe("late");
    assert!(late.try_recv().is_none());

    let third = source.publish(vec![3], 1, 1);
    assert_eq!(late.recv().await.unwrap().seq, third.seq);
}

#[tokio::test]
async fn test_slow_subscriber_drops_without_blocking_others() {
    let source = FrameSource::new(30, 2, None);
    let _slow = source.subscribe("slow");
    let mut fast = source.subscribe("fast");

    for i in 0..5u8 {
        source.publish(vec![i], 1, 1);
        assert_eq!(fast.recv().await.unwrap().data[0], i);
    }

    // slow never reads: 2 queued, 3 dropped
    assert_eq!(source.stats().frames_dropped, 3);
}

#[tokio::test]
async fn test_unsubscribe_and_drop() {
    let source = FrameSource::new(30, 8, None);
    let kept = source.subscribe("kept");
    let dropped = source.subscribe("dropped");
    assert_eq!(source.subscriber_count(), 2);

    drop(dropped);
    assert_eq!(source.subscriber_count(), 1);

    assert!(source.unsubscribe(kept.id()));
    assert!(!source.unsubscribe(kept.id()));
    assert_eq!(source.subscriber_count(), 0);

    // Dropping after an explicit unsubscribe is harmless
    drop(kept);
    source.publish(vec![0], 1, 1);
}

#[tokio::test]
async fn test_subscribe_during_delivery() {
    let source = std::sync::Arc::new(FrameSource::new(1000, 256, None));
    let mut first = source.subscribe("first");

    let producer = {
        let source = std::sync::Arc::clone(&source);
        tokio::task::spawn_blocking(move || {
            for i in 0..200u32 {
                source.publish(i.to_le_bytes().to_vec(), 1, 1);
            }
        })
    };

    let mut churn = Vec::new();
    for i in 0..50 {
        churn.push(source.subscribe(&format!("churn-{}", i)));
        if i % 2 == 0 {
            churn.pop();
        }
    }

    producer.await.unwrap();

    let mut count = 0;
    let mut last = None;
    while let Some(frame) = first.try_recv() {
        if let Some(prev) = last {
            assert!(frame.seq > prev);
        }
        last = Some(frame.seq);
        count += 1;
    }
    assert_eq!(count, 200);
}

#[tokio::test]
async fn test_subscriber_never_receives_frame_already_current() {
    let source = std::sync::Arc::new(FrameSource::new(1000, 1024, None));

    let producer = {
        let source = std::sync::Arc::clone(&source);
        tokio::task::spawn_blocking(move || {
            for i in 0..2000u32 {
                source.publish(i.to_le_bytes().to_vec(), 1, 1);
            }
        })
    };

    let mut joined = Vec::new();
    while !producer.is_finished() && joined.len() < 200 {
        let seen = source.current_frame().map(|f| f.seq);
        joined.push((seen, source.subscribe("joiner")));
        tokio::task::yield_now().await;
    }
    producer.await.unwrap();

    for (seen, mut subscriber) in joined {
        if let (Some(seen), Some(first)) = (seen, subscriber.try_recv()) {
            assert!(
                first.seq > seen,
                "received frame {} that was current ({}) before subscribing",
                first.seq,
                seen
            );
        }
    }
}

#[tokio::test]
async fn test_worker_publishes_device_frames() {
    let source = FrameSource::new(1000, 16, None);
    let mut sub = source.subscribe("test");
    let camera = ScriptedCamera::new(vec![Ok(raw(1)), Ok(raw(2)), Ok(raw(3))]);

    source.start(Box::new(camera)).unwrap();
    assert!(source.is_running());

    let mut tags = Vec::new();
    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        tags.push(frame.data[2]);
    }
    assert_eq!(tags, vec![1, 2, 3]);

    source.close().await.unwrap();
    assert!(!source.is_running());
}

#[tokio::test]
async fn test_worker_retries_and_reports_outage() {
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let source = FrameSource::new(1000, 16, Some(bus.clone()));

    let mut reads: Vec<crate::error::Result<RawFrame>> = Vec::new();
    for _ in 0..5 {
        reads.push(Err(DoorcamError::Camera(CameraError::CaptureStream {
            details: "glitch".to_string(),
        })));
    }
    reads.push(Ok(raw(9)));
    let camera = ScriptedCamera::new(reads);

    source.start(Box::new(camera)).unwrap();

    let stats_source = &source;
    // 5 failures with 100/200/400/800/1600ms backoff, then a good frame
    wait_for(|| stats_source.stats().frames_produced == 1).await;
    assert!(source.stats().read_errors >= 5);
    assert_eq!(source.current_frame().unwrap().data[2], 9);

    let mut saw_down = false;
    let mut saw_error = false;
    let mut saw_up_after_down = false;
    while let Ok(event) = events.try_recv() {
        match event {
            DoorcamEvent::CameraStatusChanged { connected: false, .. } => saw_down = true,
            DoorcamEvent::SystemError { component, .. } if component == "camera" => {
                saw_error = true
            }
            DoorcamEvent::CameraStatusChanged { connected: true, .. } if saw_down => {
                saw_up_after_down = true
            }
            _ => {}
        }
    }
    assert!(saw_down && saw_error && saw_up_after_down);

    source.close().await.unwrap();
}
