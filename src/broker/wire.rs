//! Broker wire format.
//!
//! Length-delimited frames: a `u32` little-endian body length followed by a
//! type byte and little-endian length-prefixed fields. Five frame types cover
//! the whole exchange: the client sends `Connect`, the broker answers
//! `ConnAck`, the client registers interest with `Subscribe` and pushes
//! records with `Publish`; inbound commands arrive as `Message`.

use std::io::{Error, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a frame body. Publish payloads are small JSON records;
/// anything larger indicates a desynchronized or hostile peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const TYPE_CONNECT: u8 = 0;
const TYPE_CONNACK: u8 = 1;
const TYPE_SUBSCRIBE: u8 = 2;
const TYPE_PUBLISH: u8 = 3;
const TYPE_MESSAGE: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connect {
        client_id: String,
        username: String,
        password: String,
    },
    ConnAck {
        ok: bool,
    },
    Subscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
    },
    Message {
        topic: String,
        payload: Vec<u8>,
    },
}

fn put_bytes(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_le_bytes());
    buf.extend_from_slice(field);
}

fn take_bytes<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a [u8], String> {
    if data.len() < *offset + 4 {
        return Err("Truncated length prefix".to_string());
    }
    let len = u32::from_le_bytes([
        data[*offset],
        data[*offset + 1],
        data[*offset + 2],
        data[*offset + 3],
    ]) as usize;
    *offset += 4;
    if data.len() < *offset + len {
        return Err("Field size mismatch".to_string());
    }
    let field = &data[*offset..*offset + len];
    *offset += len;
    Ok(field)
}

fn take_string(data: &[u8], offset: &mut usize) -> Result<String, String> {
    let bytes = take_bytes(data, offset)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Frame::Connect {
                client_id,
                username,
                password,
            } => {
                buf.push(TYPE_CONNECT);
                put_bytes(&mut buf, client_id.as_bytes());
                put_bytes(&mut buf, username.as_bytes());
                put_bytes(&mut buf, password.as_bytes());
            }
            Frame::ConnAck { ok } => {
                buf.push(TYPE_CONNACK);
                buf.push(u8::from(*ok));
            }
            Frame::Subscribe { topic } => {
                buf.push(TYPE_SUBSCRIBE);
                put_bytes(&mut buf, topic.as_bytes());
            }
            Frame::Publish { topic, payload } => {
                buf.push(TYPE_PUBLISH);
                put_bytes(&mut buf, topic.as_bytes());
                put_bytes(&mut buf, payload);
            }
            Frame::Message { topic, payload } => {
                buf.push(TYPE_MESSAGE);
                put_bytes(&mut buf, topic.as_bytes());
                put_bytes(&mut buf, payload);
            }
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, String> {
        if data.is_empty() {
            return Err("Empty frame".to_string());
        }
        let mut offset = 1;
        match data[0] {
            TYPE_CONNECT => {
                let client_id = take_string(data, &mut offset)?;
                let username = take_string(data, &mut offset)?;
                let password = take_string(data, &mut offset)?;
                Ok(Frame::Connect {
                    client_id,
                    username,
                    password,
                })
            }
            TYPE_CONNACK => {
                if data.len() < 2 {
                    return Err("Truncated ConnAck".to_string());
                }
                Ok(Frame::ConnAck { ok: data[1] != 0 })
            }
            TYPE_SUBSCRIBE => {
                let topic = take_string(data, &mut offset)?;
                Ok(Frame::Subscribe { topic })
            }
            TYPE_PUBLISH => {
                let topic = take_string(data, &mut offset)?;
                let payload = take_bytes(data, &mut offset)?.to_vec();
                Ok(Frame::Publish { topic, payload })
            }
            TYPE_MESSAGE => {
                let topic = take_string(data, &mut offset)?;
                let payload = take_bytes(data, &mut offset)?.to_vec();
                Ok(Frame::Message { topic, payload })
            }
            other => Err(format!("Unknown frame type {other}")),
        }
    }
}

/// Write one length-delimited frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> std::io::Result<()> {
    let body = frame.encode();
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one length-delimited frame. Returns `None` on clean EOF before a
/// length prefix; any mid-frame EOF or malformed body is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Frame length {len} out of bounds"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Frame::decode(&body)
        .map(Some)
        .map_err(|e| Error::new(ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_roundtrip() {
        let frame = Frame::Connect {
            client_id: "edgecap-ab12".into(),
            username: "admin".into(),
            password: "admin".into(),
        };
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn publish_roundtrip() {
        let frame = Frame::Publish {
            topic: "edgecap/0ad3/tx".into(),
            payload: vec![1, 2, 3, 4],
        };
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn truncated_field_is_rejected() {
        let frame = Frame::Subscribe {
            topic: "edgecap/0ad3/rx".into(),
        };
        let mut body = frame.encode();
        body.truncate(body.len() - 3);
        assert!(Frame::decode(&body).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Frame::decode(&[42, 0, 0, 0, 0]).is_err());
    }

    #[tokio::test]
    async fn framed_stream_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let sent = Frame::Message {
            topic: "edgecap/0ad3/rx".into(),
            payload: b"ping".to_vec(),
        };
        write_frame(&mut a, &sent).await.unwrap();
        drop(a);
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, Some(sent));
        // Clean EOF after the last frame.
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &len).await.unwrap();
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }
}
