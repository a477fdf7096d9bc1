//! Syslog over UDP.
//!
//! The receive loop only copies datagrams into a bounded queue; a single
//! blocking worker drains it into the ingest pipeline. When storage falls
//! behind and the queue fills up, datagrams are dropped and counted rather
//! than stalling the socket.

use crate::models::config::Config;
use crate::models::error::{LogHubError, Result};
use crate::service::pipeline::IngestPipeline;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

const PROGRESS_LOG_INTERVAL: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Receive buffer size; longer datagrams are truncated by the OS.
    pub max_datagram_size: usize,
    pub ingest_queue_size: usize,
}

impl From<&Config> for ListenerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_datagram_size: config.max_datagram_size,
            ingest_queue_size: config.ingest_queue_size,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestMetrics {
    received: AtomicU64,
    stored: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    recv_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestMetricsSnapshot {
    pub received: u64,
    pub stored: u64,
    /// Dropped because the ingest queue was full
    pub dropped: u64,
    /// Rejected by storage
    pub failed: u64,
    pub recv_errors: u64,
}

impl IngestMetrics {
    #[inline]
    fn datagram_received(&self) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn entry_stored(&self) -> u64 {
        self.stored.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn datagram_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn entry_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}

struct Datagram {
    payload: Vec<u8>,
    source: SocketAddr,
}

pub struct SyslogUdpListener {
    socket: UdpSocket,
    pipeline: IngestPipeline,
    settings: ListenerSettings,
    metrics: Arc<IngestMetrics>,
}

impl SyslogUdpListener {
    pub async fn bind(
        address: &str,
        pipeline: IngestPipeline,
        settings: ListenerSettings,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|cause| LogHubError::Bind {
                address: address.to_string(),
                cause,
            })?;

        info!("Syslog UDP listener bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            pipeline,
            settings,
            metrics: Arc::new(IngestMetrics::default()),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Receives until `cancel` fires, then lets the worker finish what is
    /// already queued.
    pub async fn run(self, cancel: CancellationToken) -> Result<IngestMetricsSnapshot> {
        let queue_size = self.settings.ingest_queue_size.max(1);
        let (queue, pending) = mpsc::channel::<Datagram>(queue_size);

        let pipeline = self.pipeline.clone();
        let metrics = Arc::clone(&self.metrics);
        let worker = tokio::task::spawn_blocking(move || drain_queue(pending, pipeline, metrics));

        let mut buffer = vec![0u8; self.settings.max_datagram_size.max(1)];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Syslog UDP listener stopping");
                    break;
                }
                result = self.socket.recv_from(&mut buffer) => match result {
                    Ok((len, source)) => {
                        self.metrics.datagram_received();
                        let datagram = Datagram {
                            payload: buffer[..len].to_vec(),
                            source,
                        };
                        match queue.try_send(datagram) {
                            Ok(()) => {}
                            Err(TrySendError::Full(datagram)) => {
                                let dropped = self.metrics.datagram_dropped();
                                if dropped == 1 || dropped % PROGRESS_LOG_INTERVAL == 0 {
                                    warn!(
                                        "Ingest queue full, dropped datagram from {} ({} dropped so far)",
                                        datagram.source, dropped
                                    );
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                error!("Ingest worker stopped unexpectedly");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        self.metrics.recv_error();
                        warn!("UDP receive error: {}", e);
                    }
                }
            }
        }

        drop(queue);
        if let Err(e) = worker.await {
            error!("Ingest worker panicked: {}", e);
        }

        let snapshot = self.metrics.snapshot();
        info!(
            "Syslog UDP listener stopped: received={} stored={} dropped={} failed={} recv_errors={}",
            snapshot.received, snapshot.stored, snapshot.dropped, snapshot.failed, snapshot.recv_errors
        );
        Ok(snapshot)
    }
}

fn drain_queue(
    mut pending: mpsc::Receiver<Datagram>,
    pipeline: IngestPipeline,
    metrics: Arc<IngestMetrics>,
) {
    while let Some(datagram) = pending.blocking_recv() {
        match pipeline.ingest(&datagram.payload, datagram.source) {
            Ok(entry) => {
                let stored = metrics.entry_stored();
                debug!("Ingested entry {} from {}", entry.id, datagram.source);
                if stored % PROGRESS_LOG_INTERVAL == 0 {
                    info!("Ingested {} log entries", stored);
                }
            }
            Err(e) => {
                metrics.entry_failed();
                warn!("Failed to store datagram from {}: {}", datagram.source, e);
            }
        }
    }
}
