use crate::models::error::Result;
use crate::models::log_entry::{LogEntry, NewLogEntry};
use crate::repo::sqlite::LogStore;
use crate::service::broadcast::BroadcastHub;
use crate::service::syslog_parser;
use std::net::SocketAddr;
use std::sync::Arc;

/// The single path by which entries become durable and visible: every
/// entry is committed first and published second, in id order.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<LogStore>,
    hub: BroadcastHub,
}

impl IngestPipeline {
    pub fn new(store: Arc<LogStore>, hub: BroadcastHub) -> Self {
        Self { store, hub }
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Parses one datagram from `source`, stores it and notifies live
    /// subscribers. Blocks on the storage writer.
    pub fn ingest(&self, datagram: &[u8], source: SocketAddr) -> Result<LogEntry> {
        let entry = syslog_parser::parse(datagram).into_new_entry(source);
        self.submit(entry)
    }

    pub fn submit(&self, entry: NewLogEntry) -> Result<LogEntry> {
        self.store.record(entry, |stored| self.hub.publish(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::marker_style::MarkerStyle;
    use crate::repo::sqlite::StoreOptions;
    use crate::service::broadcast::Delivery;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> IngestPipeline {
        let path = dir.path().join("logs.db");
        let store = LogStore::open(path.to_str().unwrap(), StoreOptions::default()).unwrap();
        IngestPipeline::new(Arc::new(store), BroadcastHub::new(64, 8))
    }

    #[test]
    fn test_ingest_stores_registers_and_publishes() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let mut subscription = pipeline.hub().subscribe();

        let source: SocketAddr = "192.168.1.50:40000".parse().unwrap();
        let stored = pipeline
            .ingest(b"<14>myapp[1234]: started ok", source)
            .unwrap();

        assert_eq!(stored.source_ip, "192.168.1.50");
        assert_eq!(stored.facility, Some(1));
        assert_eq!(stored.severity, Some(6));
        assert_eq!(stored.app_name.as_deref(), Some("myapp"));
        assert_eq!(stored.proc_id.as_deref(), Some("1234"));
        assert_eq!(stored.message, "started ok");

        match subscription.try_recv() {
            Some(Delivery::Entry(published)) => assert_eq!(*published, stored),
            other => panic!("expected published entry, got {:?}", other),
        }

        let hosts = pipeline.store().list_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].ip, "192.168.1.50");
        assert_eq!(hosts[0].message_count, 1);
    }

    #[test]
    fn test_live_entries_match_history() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let mut subscription = pipeline.hub().subscribe();

        pipeline
            .ingest(b"<14>app: x", "10.0.0.9:514".parse().unwrap())
            .unwrap();
        pipeline
            .submit(NewLogEntry::marker("Deploy", None, MarkerStyle::Success))
            .unwrap();

        let mut live = Vec::new();
        while let Some(Delivery::Entry(entry)) = subscription.try_recv() {
            live.push((*entry).clone());
        }
        let history = pipeline.store().entries_after(0, 10).unwrap();
        assert_eq!(live, history);
    }

    #[test]
    fn test_raw_datagram_is_kept() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        let stored = pipeline
            .ingest(b"hello world", "10.0.0.1:5000".parse().unwrap())
            .unwrap();
        assert!(!stored.is_syslog);
        assert_eq!(stored.message, "hello world");
        assert_eq!(stored.raw_message, "hello world");
        assert_eq!(stored.severity, None);
    }

    #[test]
    fn test_publish_order_matches_id_order() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let mut subscription = pipeline.hub().subscribe();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let pipeline = pipeline.clone();
                std::thread::spawn(move || {
                    for i in 0..5 {
                        let text = format!("<13>worker {} message {}", worker, i);
                        if i % 2 == 0 {
                            pipeline
                                .ingest(text.as_bytes(), "10.0.0.1:514".parse().unwrap())
                                .unwrap();
                        } else {
                            pipeline
                                .submit(NewLogEntry::marker(&text, None, MarkerStyle::Info))
                                .unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut ids = Vec::new();
        while let Some(Delivery::Entry(entry)) = subscription.try_recv() {
            ids.push(entry.id);
        }
        assert_eq!(ids.len(), 20);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
