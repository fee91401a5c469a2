//! Publisher integration against an in-process broker.

use chrono::Utc;
use edgecap::broker::wire::{read_frame, write_frame, Frame};
use edgecap::config::BrokerSettings;
use edgecap::publisher::{CommandHandler, ConnectionState, Publisher};
use edgecap::slot::SharedSlot;
use edgecap::source::Reading;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

fn broker_settings(port: u16) -> BrokerSettings {
    BrokerSettings {
        host: "127.0.0.1".into(),
        port,
        client_id: "edgecap-it".into(),
        tx_topic: "edgecap/it/tx".into(),
        rx_topic: "edgecap/it/rx".into(),
        username: "admin".into(),
        password: "admin".into(),
        publish_interval: Duration::from_millis(20),
        reconnect_backoff: Duration::from_millis(50),
    }
}

fn sample_reading() -> Reading {
    Reading {
        ax: 1.5,
        ay: -2.5,
        az: 9.8,
        gx: 0.0,
        gy: 0.0,
        gz: 0.0,
        temp_c: 25.0,
        timestamp: Utc::now(),
    }
}

#[derive(Clone, Default)]
struct RecordingHandler {
    commands: Arc<Mutex<Vec<(String, String)>>>,
}

impl CommandHandler for RecordingHandler {
    fn on_command(&mut self, topic: &str, payload: &[u8]) {
        self.commands
            .lock()
            .unwrap()
            .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
    }
}

#[tokio::test]
async fn connects_publishes_and_dispatches_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let broker = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let connect = read_frame(&mut socket).await.unwrap().unwrap();
        match connect {
            Frame::Connect {
                client_id,
                username,
                password,
            } => {
                assert!(client_id.starts_with("edgecap-it-"));
                assert_eq!(username, "admin");
                assert_eq!(password, "admin");
            }
            other => panic!("expected Connect, got {other:?}"),
        }
        write_frame(&mut socket, &Frame::ConnAck { ok: true })
            .await
            .unwrap();

        let subscribe = read_frame(&mut socket).await.unwrap().unwrap();
        assert_eq!(
            subscribe,
            Frame::Subscribe {
                topic: "edgecap/it/rx".into()
            }
        );

        // Push one command down, then collect two publishes.
        write_frame(
            &mut socket,
            &Frame::Message {
                topic: "edgecap/it/rx".into(),
                payload: b"ping".to_vec(),
            },
        )
        .await
        .unwrap();

        let mut publishes = Vec::new();
        while publishes.len() < 2 {
            match read_frame(&mut socket).await.unwrap() {
                Some(Frame::Publish { topic, payload }) => {
                    assert_eq!(topic, "edgecap/it/tx");
                    publishes.push(payload);
                }
                Some(other) => panic!("unexpected frame {other:?}"),
                None => panic!("broker connection closed early"),
            }
        }
        publishes
    });

    let slot = Arc::new(SharedSlot::new(Duration::from_millis(100)));
    slot.write(sample_reading()).await.unwrap();

    let handler = RecordingHandler::default();
    let commands = Arc::clone(&handler.commands);
    let mut publisher = Publisher::new(broker_settings(port), Arc::clone(&slot), handler);

    assert_eq!(publisher.state(), ConnectionState::Disconnected);

    // First tick performs the connect handshake only.
    publisher.tick().await;
    assert_eq!(publisher.state(), ConnectionState::Connected);
    assert_eq!(publisher.publish_count(), 0);

    // Subsequent ticks publish on the interval and drain the command.
    for _ in 0..20 {
        publisher.tick().await;
        if publisher.publish_count() >= 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(publisher.publish_count() >= 2);

    // The inbound command races the publish collection; keep servicing
    // until it lands.
    for _ in 0..50 {
        if !commands.lock().unwrap().is_empty() {
            break;
        }
        publisher.tick().await;
        sleep(Duration::from_millis(5)).await;
    }

    let publishes = broker.await.unwrap();
    for payload in publishes {
        let record: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(record["ax"], 1.5);
        assert_eq!(record["temp_c"], 25.0);
        assert!(record.get("timestamp").is_some());
    }

    let seen = commands.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "edgecap/it/rx");
    assert_eq!(seen[0].1, "ping");
}

#[tokio::test]
async fn broker_drop_returns_publisher_to_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_frame(&mut socket).await;
        write_frame(&mut socket, &Frame::ConnAck { ok: true })
            .await
            .unwrap();
        let _ = read_frame(&mut socket).await;
        // Hang up immediately after the handshake.
        drop(socket);
    });

    let slot = Arc::new(SharedSlot::new(Duration::from_millis(100)));
    slot.write(sample_reading()).await.unwrap();
    let mut publisher = Publisher::new(broker_settings(port), slot, RecordingHandler::default());

    publisher.tick().await;
    assert_eq!(publisher.state(), ConnectionState::Connected);

    // Once the peer is gone the next publish or inbound poll drops the
    // connection; no publish count is accrued while disconnected.
    let mut disconnected = false;
    for _ in 0..50 {
        publisher.tick().await;
        if publisher.state() == ConnectionState::Disconnected {
            disconnected = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(disconnected);
}

#[tokio::test]
async fn rejected_credentials_fail_the_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_frame(&mut socket).await;
        write_frame(&mut socket, &Frame::ConnAck { ok: false })
            .await
            .unwrap();
    });

    let slot = Arc::new(SharedSlot::new(Duration::from_millis(100)));
    let mut publisher = Publisher::new(broker_settings(port), slot, RecordingHandler::default());
    publisher.tick().await;
    assert_eq!(publisher.state(), ConnectionState::Disconnected);
    assert_eq!(publisher.publish_count(), 0);
}
