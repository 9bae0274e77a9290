//! Fallback path for names the registry does not own: relay the raw query to
//! the configured backend DNS server over a short-lived UDP socket.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::warn;

use crate::error::UpstreamError;
use crate::message::{encode_response, AnswerData, Message};

pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct UpstreamResolver {
    backend: String,
    buffer_size: usize,
    recv_timeout: Duration,
}

impl UpstreamResolver {
    pub fn new(backend: String, buffer_size: usize, recv_timeout: Duration) -> Self {
        UpstreamResolver {
            backend,
            buffer_size,
            recv_timeout,
        }
    }

    /// Forwards `raw_query` verbatim and relays the backend's response. On
    /// any failure the reply degrades to the original header/question with a
    /// NULL answer record, so the client never waits for a dead backend.
    pub async fn forward(&self, raw_query: &[u8], query: &Message, out: &mut Vec<u8>) {
        match self.exchange(raw_query).await {
            Ok(response) => {
                out.clear();
                out.extend_from_slice(&response);
            }
            Err(err) => {
                warn!(
                    "resolution for '{}' through backend {} failed: {}",
                    query.question.name, self.backend, err
                );
                encode_response(query, &AnswerData::Null, out);
            }
        }
    }

    async fn exchange(&self, raw_query: &[u8]) -> Result<Vec<u8>, UpstreamError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.backend).await?;
        socket.send(raw_query).await?;

        let mut buf = vec![0u8; self.buffer_size];
        let len = timeout(self.recv_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| UpstreamError::Timeout(self.recv_timeout))??;
        buf.truncate(len);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn query_fixture() -> Vec<u8> {
        let mut data = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[0x03, b'f', b'o', b'o', 0x03, b'c', b'o', b'm', 0x00]);
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        data
    }

    #[tokio::test]
    async fn relays_backend_response_verbatim() {
        let backend = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = backend.local_addr().unwrap();

        let echo = backend.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (len, peer) = echo.recv_from(&mut buf).await.unwrap();
            // flip the qr bit and send the query back as the "answer"
            buf[2] |= 0x80;
            echo.send_to(&buf[..len], peer).await.unwrap();
        });

        let raw = query_fixture();
        let query = Message::decode(&raw).unwrap();
        let upstream =
            UpstreamResolver::new(addr.to_string(), 512, Duration::from_secs(1));

        let mut out = Vec::new();
        upstream.forward(&raw, &query, &mut out).await;

        assert_eq!(out[2] & 0x80, 0x80);
        assert_eq!(&out[..2], &raw[..2]);
        assert_eq!(&out[12..], &raw[12..]);
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_null_answer() {
        // nothing listens here; recv runs into the timeout
        let upstream = UpstreamResolver::new(
            "127.0.0.1:39999".to_string(),
            512,
            Duration::from_millis(50),
        );

        let raw = query_fixture();
        let query = Message::decode(&raw).unwrap();
        let mut out = Vec::new();
        upstream.forward(&raw, &query, &mut out).await;

        let response = Message::decode(&out).unwrap();
        assert_eq!(response.header.id, query.header.id);
        assert_eq!(response.header.an_count, 1);
        assert_eq!(response.question, query.question);
        // the appended answer carries empty rdata
        assert_eq!(&out[out.len() - 2..], &[0x00, 0x00]);
    }
}
