//! Stream client lifecycle: the disconnect-keeps-armed policy.
//!
//! A client disconnect clears the attachment but leaves streaming armed, so
//! a replacement client can attach without another start. Only an explicit
//! stop disarms the mode and closes the client.

use edgecap::capture::CaptureController;
use edgecap::config::AudioSettings;
use edgecap::error::CapError;
use edgecap::source::MockMicrophone;
use edgecap::storage::CaptureStore;
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn audio() -> AudioSettings {
    AudioSettings {
        sample_rate: 44100,
        bit_depth: 16,
        channels: 1,
        chunk_bytes: 128,
    }
}

fn controller(dir: &std::path::Path) -> CaptureController<MockMicrophone> {
    let store = CaptureStore::open(dir).unwrap();
    let mic = MockMicrophone::new(audio()).unwrap();
    CaptureController::new(mic, store, audio(), Duration::from_millis(100))
}

#[tokio::test]
async fn disconnect_keeps_streaming_armed_and_allows_reattach() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = controller(dir.path());
    ctl.start_streaming().unwrap();

    // First client attaches and then disappears.
    let (first, first_observer) = tokio::io::duplex(256);
    ctl.attach_client(Box::new(first), "first".into()).await.unwrap();
    drop(first_observer);

    // The pump discovers the disconnect on a failed forward.
    for _ in 0..8 {
        ctl.tick().await;
        if !ctl.client_attached() {
            break;
        }
    }
    assert!(!ctl.client_attached());
    assert!(ctl.is_streaming(), "disconnect must not disarm streaming");

    // A new client attaches without a new start and receives data.
    let (second, mut observer) = tokio::io::duplex(64 * 1024);
    ctl.attach_client(Box::new(second), "second".into()).await.unwrap();
    ctl.tick().await;
    ctl.stop_streaming().await.unwrap();

    let mut received = Vec::new();
    observer.read_to_end(&mut received).await.unwrap();
    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(received.len() > 128, "no chunk was forwarded after reattach");
}

#[tokio::test]
async fn explicit_stop_closes_client_and_disarms() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = controller(dir.path());
    ctl.start_streaming().unwrap();

    let (client, mut observer) = tokio::io::duplex(64 * 1024);
    ctl.attach_client(Box::new(client), "c1".into()).await.unwrap();
    ctl.stop_streaming().await.unwrap();

    assert!(!ctl.is_streaming());
    assert!(!ctl.client_attached());

    // The client end sees EOF.
    let mut received = Vec::new();
    observer.read_to_end(&mut received).await.unwrap();

    // After stop, attaching requires arming again first.
    let (late, _keep) = tokio::io::duplex(256);
    let err = ctl.attach_client(Box::new(late), "late".into()).await.unwrap_err();
    assert!(matches!(err, CapError::NotStreaming));

    // Re-arming is allowed after an explicit stop.
    ctl.start_streaming().unwrap();
    let (again, _keep2) = tokio::io::duplex(256);
    ctl.attach_client(Box::new(again), "again".into()).await.unwrap();
    assert!(ctl.client_attached());
}

#[tokio::test]
async fn stop_streaming_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = controller(dir.path());
    ctl.stop_streaming().await.unwrap();
    ctl.start_streaming().unwrap();
    ctl.stop_streaming().await.unwrap();
    ctl.stop_streaming().await.unwrap();
    assert!(!ctl.is_streaming());
}
