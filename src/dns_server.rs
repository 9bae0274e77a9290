use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ServerError;
use crate::message::{encode_response, AnswerData, Message};
use crate::registry::Registry;
use crate::resolver::ResolutionCache;
use crate::upstream::{UpstreamResolver, DEFAULT_RECV_TIMEOUT};

pub struct DnsServer {
    socket: Arc<UdpSocket>,
    resolver: Arc<ResolutionCache>,
    upstream: Arc<UpstreamResolver>,
    buffer_size: usize,
    prefer_ipv6: bool,
    shutdown: watch::Sender<bool>,
}

impl DnsServer {
    /// Binds the DNS socket and wires the per-packet pipeline. A failing
    /// bind is the only fatal startup error and is surfaced to the caller.
    pub async fn create(config: &Config, registry: Arc<dyn Registry>) -> Result<Self> {
        let socket = UdpSocket::bind(&config.listen).await?;
        let resolver = ResolutionCache::new(&config.load_balancer, &config.resolver, registry)?;
        let upstream = UpstreamResolver::new(
            config.backend_addr(),
            config.buffer_size,
            DEFAULT_RECV_TIMEOUT,
        );
        let (shutdown, _) = watch::channel(false);

        Ok(DnsServer {
            socket: Arc::new(socket),
            resolver: Arc::new(resolver),
            upstream: Arc::new(upstream),
            buffer_size: config.buffer_size,
            prefer_ipv6: config.prefer_ipv6,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop. Blocks until [`DnsServer::shutdown`] flips the stop
    /// flag; every datagram is handed to its own task on the runtime's
    /// worker pool.
    pub async fn run(&self) -> Result<()> {
        let mut stop = self.shutdown.subscribe();
        let mut buf = vec![0u8; self.buffer_size];
        info!("dns server listening on {}", self.socket.local_addr()?);

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => break,
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            let data = buf[..len].to_vec();
                            let socket = self.socket.clone();
                            let resolver = self.resolver.clone();
                            let upstream = self.upstream.clone();
                            let prefer_ipv6 = self.prefer_ipv6;
                            tokio::spawn(async move {
                                if let Err(err) =
                                    handle_datagram(socket, resolver, upstream, prefer_ipv6, data, peer).await
                                {
                                    warn!("failed to serve datagram from {}: {}", peer, err);
                                }
                            });
                        }
                        Err(err) => error!("receiving datagram failed: {}", err),
                    }
                }
            }
        }

        info!("dns server loop stopped");
        Ok(())
    }

    /// Idempotent. In-flight datagram tasks are left to finish naturally.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        self.resolver.shutdown();
    }
}

/// One datagram's pipeline: decode, resolve against the registry cache,
/// answer or fall through to the backend, reply to the sender. A malformed
/// query or failed encode drops the packet without a response.
async fn handle_datagram(
    socket: Arc<UdpSocket>,
    resolver: Arc<ResolutionCache>,
    upstream: Arc<UpstreamResolver>,
    prefer_ipv6: bool,
    data: Vec<u8>,
    peer: SocketAddr,
) -> Result<(), ServerError> {
    let query = Message::decode(&data)?;

    let mut out = buffer_pool::take();
    match resolver.resolve(&query.question.name).await {
        Some(instance) => match AnswerData::from_instance(&instance, prefer_ipv6) {
            Ok(answer) => encode_response(&query, &answer, &mut out),
            Err(err) => {
                buffer_pool::put(out);
                return Err(err.into());
            }
        },
        None => upstream.forward(&data, &query, &mut out).await,
    }

    let sent = socket.send_to(&out, peer).await;
    buffer_pool::put(out);
    sent?;
    Ok(())
}

/// Reusable encode buffers, one small pool per worker thread. Buffers are
/// cleared on the way back in so no response bytes survive across requests.
mod buffer_pool {
    use std::cell::RefCell;

    const MAX_POOLED: usize = 32;

    thread_local! {
        static POOL: RefCell<Vec<Vec<u8>>> = const { RefCell::new(Vec::new()) };
    }

    pub fn take() -> Vec<u8> {
        POOL.with(|pool| pool.borrow_mut().pop()).unwrap_or_default()
    }

    pub fn put(mut buf: Vec<u8>) {
        buf.clear();
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < MAX_POOLED {
                pool.push(buf);
            }
        });
    }
}
