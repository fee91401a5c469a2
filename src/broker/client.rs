//! Broker connection.
//!
//! One TCP connection per client: a bounded-time connect and handshake
//! (`Connect`/`ConnAck` with credentials, then `Subscribe` to the command
//! topic), after which the write half stays with [`BrokerClient`] for
//! publishing while a spawned reader task forwards inbound `Message` frames
//! into an mpsc channel. The reader task ends on any read error or EOF,
//! which the owner observes as a closed channel.

use crate::broker::wire::{read_frame, write_frame, Frame};
use crate::config::BrokerSettings;
use crate::error::{AppResult, CapError};
use log::{debug, warn};
use rand::Rng;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const INBOUND_CHANNEL_CAPACITY: usize = 32;

/// An inbound command message: topic plus raw payload.
pub type InboundMessage = (String, Vec<u8>);

pub struct BrokerClient {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<InboundMessage>,
    client_id: String,
}

impl BrokerClient {
    /// Connect, authenticate and subscribe to the command topic.
    pub async fn connect(cfg: &BrokerSettings) -> AppResult<Self> {
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| CapError::Broker(format!("connect to {addr} timed out")))?
            .map_err(|e| CapError::Broker(format!("connect to {addr} failed: {e}")))?;

        let suffix: u16 = rand::thread_rng().gen();
        let client_id = format!("{}-{suffix:04x}", cfg.client_id);

        let connect = Frame::Connect {
            client_id: client_id.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        };
        write_frame(&mut stream, &connect)
            .await
            .map_err(|e| CapError::Broker(format!("handshake write failed: {e}")))?;

        let ack = timeout(HANDSHAKE_TIMEOUT, read_frame(&mut stream))
            .await
            .map_err(|_| CapError::Broker("handshake timed out".into()))?
            .map_err(|e| CapError::Broker(format!("handshake read failed: {e}")))?;
        match ack {
            Some(Frame::ConnAck { ok: true }) => {}
            Some(Frame::ConnAck { ok: false }) => {
                return Err(CapError::Broker("broker rejected credentials".into()))
            }
            other => {
                return Err(CapError::Protocol(format!(
                    "expected ConnAck, got {other:?}"
                )))
            }
        }

        write_frame(
            &mut stream,
            &Frame::Subscribe {
                topic: cfg.rx_topic.clone(),
            },
        )
        .await
        .map_err(|e| CapError::Broker(format!("subscribe failed: {e}")))?;

        let (read_half, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        tokio::spawn(run_reader(read_half, tx));

        debug!("Broker handshake complete as '{client_id}'");
        Ok(Self {
            writer,
            inbound,
            client_id,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Publish one record. Any write failure means the connection is dead.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> AppResult<()> {
        let frame = Frame::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        write_frame(&mut self.writer, &frame)
            .await
            .map_err(|e| CapError::Broker(format!("publish failed: {e}")))
    }

    /// Non-blocking poll for the next inbound command.
    ///
    /// `Err(NotConnected)` once the reader task has ended; the owner should
    /// drop this client and reconnect.
    pub fn try_recv(&mut self) -> AppResult<Option<InboundMessage>> {
        match self.inbound.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(CapError::NotConnected),
        }
    }
}

async fn run_reader(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    tx: mpsc::Sender<InboundMessage>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(Frame::Message { topic, payload })) => {
                // Channel full means the service loop is behind; drop the
                // new command rather than block the reader.
                if tx.try_send((topic, payload)).is_err() {
                    warn!("Inbound command dropped (channel full or closed)");
                }
            }
            Ok(Some(other)) => {
                warn!("Unexpected frame from broker: {other:?}");
            }
            Ok(None) => {
                debug!("Broker closed the connection");
                break;
            }
            Err(e) => {
                warn!("Broker read error: {e}");
                break;
            }
        }
    }
    // Dropping tx closes the channel; the owner sees NotConnected.
}
