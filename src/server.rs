//! Control-plane request server.
//!
//! A minimal HTTP/1.x surface over a raw TCP accept loop: status and capture
//! listing, record/stream start/stop, live stream attach, download and
//! delete. Each client is served by its own task with a bounded read
//! timeout. `/stream` is special: on success the socket itself is handed to
//! the stream sink, which answers with the format header and keeps the
//! connection for chunk forwarding.

use crate::capture::CaptureController;
use crate::error::{AppResult, CapError};
use crate::source::ChunkSource;
use crate::storage::wav_header;
use log::{debug, error, info, warn};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_HEAD: usize = 4096;

pub struct RequestServer {
    listener: TcpListener,
}

impl RequestServer {
    /// Bind the control-plane listener. Failure is fatal at boot.
    pub async fn bind(addr: &str) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Control server listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; never returns under normal operation.
    pub async fn run<S>(self, controller: Arc<Mutex<CaptureController<S>>>)
    where
        S: ChunkSource + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, addr, controller).await {
                            warn!("Client {addr} error: {e}");
                        }
                    });
                }
                Err(e) => error!("Accept error: {e}"),
            }
        }
    }
}

async fn handle_client<S>(
    mut socket: TcpStream,
    addr: SocketAddr,
    controller: Arc<Mutex<CaptureController<S>>>,
) -> AppResult<()>
where
    S: ChunkSource + 'static,
{
    let head = match read_request_head(&mut socket).await? {
        Some(head) => head,
        None => return Ok(()),
    };
    let Some((path, query)) = parse_request_line(&head) else {
        write_response(&mut socket, "400 Bad Request", "text/plain", b"Bad Request").await?;
        return Ok(());
    };
    debug!("{addr} requested {path}");

    match path.as_str() {
        "/" => {
            let body = {
                let ctl = controller.lock().await;
                let captures: Vec<_> = ctl
                    .store()
                    .list()?
                    .into_iter()
                    .map(|c| json!({ "name": c.name, "bytes": c.len }))
                    .collect();
                json!({
                    "recording": ctl.is_recording(),
                    "streaming": ctl.is_streaming(),
                    "stream_client": ctl.stream_peer(),
                    "captures": captures,
                })
            };
            write_json(&mut socket, "200 OK", &body).await
        }
        "/record/start" => {
            let result = controller.lock().await.start_recording();
            match result {
                Ok(name) => write_json(&mut socket, "200 OK", &json!({ "recording": name })).await,
                Err(e) => write_error(&mut socket, &e).await,
            }
        }
        "/record/stop" => {
            let result = controller.lock().await.stop_recording();
            match result {
                Ok(Some(capture)) => {
                    write_json(
                        &mut socket,
                        "200 OK",
                        &json!({ "closed": capture.name, "bytes": capture.len }),
                    )
                    .await
                }
                Ok(None) => write_json(&mut socket, "200 OK", &json!({ "closed": null })).await,
                Err(e) => write_error(&mut socket, &e).await,
            }
        }
        "/stream/start" => {
            let result = controller.lock().await.start_streaming();
            match result {
                Ok(()) => write_json(&mut socket, "200 OK", &json!({ "streaming": true })).await,
                Err(e) => write_error(&mut socket, &e).await,
            }
        }
        "/stream/stop" => {
            controller.lock().await.stop_streaming().await?;
            write_json(&mut socket, "200 OK", &json!({ "streaming": false })).await
        }
        "/stream" => {
            let mut ctl = controller.lock().await;
            if !ctl.is_streaming() {
                drop(ctl);
                return write_response(
                    &mut socket,
                    "404 Not Found",
                    "text/plain",
                    b"Streaming is not currently enabled.",
                )
                .await;
            }
            if ctl.client_attached() {
                drop(ctl);
                return write_response(
                    &mut socket,
                    "409 Conflict",
                    "text/plain",
                    b"A stream client is already attached.",
                )
                .await;
            }
            // The socket is owned by the stream sink from here on; the
            // attach path writes the response header itself.
            if let Err(e) = ctl.attach_client(Box::new(socket), addr.to_string()).await {
                warn!("{addr} stream attach failed: {e}");
            }
            Ok(())
        }
        "/download" => {
            let Some(name) = query_param(query.as_deref(), "id") else {
                write_response(&mut socket, "400 Bad Request", "text/plain", b"Missing id").await?;
                return Ok(());
            };
            let payload = {
                let ctl = controller.lock().await;
                match ctl.store().stat(&name) {
                    Ok(capture) => {
                        let body = ctl.store().read(&name)?;
                        let audio = ctl.audio();
                        let header = wav_header(
                            capture.len as u32,
                            audio.sample_rate,
                            audio.bit_depth,
                            audio.channels,
                        );
                        Some((capture.download_name(), header, body))
                    }
                    Err(_) => None,
                }
            };
            match payload {
                Some((download_name, header, body)) => {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: audio/wav\r\nContent-Disposition: attachment; filename={download_name}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        header.len() + body.len()
                    );
                    socket.write_all(head.as_bytes()).await?;
                    socket.write_all(&header).await?;
                    socket.write_all(&body).await?;
                    socket.flush().await?;
                    Ok(())
                }
                None => {
                    write_response(&mut socket, "404 Not Found", "text/plain", b"File Not Found")
                        .await
                }
            }
        }
        "/delete" => {
            let Some(name) = query_param(query.as_deref(), "id") else {
                write_response(&mut socket, "400 Bad Request", "text/plain", b"Missing id").await?;
                return Ok(());
            };
            let result = controller.lock().await.store().delete(&name);
            match result {
                Ok(()) => write_json(&mut socket, "200 OK", &json!({ "deleted": name })).await,
                Err(e) => write_error(&mut socket, &e).await,
            }
        }
        _ => write_response(&mut socket, "404 Not Found", "text/plain", b"Not Found").await,
    }
}

/// Read until the end of the request head, bounded in time and size.
/// `None` means the client went away before sending a full request.
async fn read_request_head(socket: &mut TcpStream) -> AppResult<Option<String>> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = timeout(READ_TIMEOUT, socket.read(&mut chunk))
            .await
            .map_err(|_| {
                CapError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "request read timed out",
                ))
            })??;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Ok(None);
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Extract `(path, query)` from the request line; `None` if malformed.
fn parse_request_line(head: &str) -> Option<(String, Option<String>)> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    let _version = parts.next()?;
    match target.split_once('?') {
        Some((path, query)) => Some((path.to_string(), Some(query.to_string()))),
        None => Some((target.to_string(), None)),
    }
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

async fn write_response(
    socket: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> AppResult<()> {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.flush().await?;
    Ok(())
}

async fn write_json(
    socket: &mut TcpStream,
    status: &str,
    body: &serde_json::Value,
) -> AppResult<()> {
    write_response(socket, status, "application/json", body.to_string().as_bytes()).await
}

async fn write_error(socket: &mut TcpStream, error: &CapError) -> AppResult<()> {
    let (status, body) = if error.is_conflict() {
        ("409 Conflict", error.to_string())
    } else if error.is_not_found() {
        ("404 Not Found", error.to_string())
    } else {
        ("500 Internal Server Error", error.to_string())
    };
    write_response(socket, status, "text/plain", body.as_bytes()).await
}
