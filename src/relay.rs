use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dispatch::{panic_message, DeliveryResult, Destination, Dispatcher};
use crate::filter::{FilterRules, Verdict};
use crate::format::{format_message, RenderedMessage};
use crate::media::MediaAcquirer;
use crate::platform::{InboundMessage, Sender};

/// Terminal state of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Skipped(Verdict),
    Relayed,
    PartiallyRelayed { failed: Vec<Destination> },
    Failed(String),
}

impl RelayOutcome {
    fn from_results(results: &[DeliveryResult]) -> Self {
        let failed: Vec<Destination> = results
            .iter()
            .filter(|r| !r.is_delivered())
            .map(|r| r.destination)
            .collect();

        if failed.is_empty() {
            RelayOutcome::Relayed
        } else if failed.len() == results.len() {
            RelayOutcome::Failed(format!("all {} destinations failed", results.len()))
        } else {
            RelayOutcome::PartiallyRelayed { failed }
        }
    }
}

impl std::fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayOutcome::Skipped(verdict) => write!(f, "skipped: {}", verdict),
            RelayOutcome::Relayed => write!(f, "relayed"),
            RelayOutcome::PartiallyRelayed { failed } => {
                let names: Vec<String> = failed.iter().map(|d| d.to_string()).collect();
                write!(f, "relayed, failed for {}", names.join(", "))
            }
            RelayOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Lock-free outcome counters, reported by the heartbeat
#[derive(Debug)]
pub struct RelayStats {
    started_at: DateTime<Utc>,
    seen: AtomicU64,
    skipped: AtomicU64,
    relayed: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub seen: u64,
    pub skipped: u64,
    pub relayed: u64,
    pub partial: u64,
    pub failed: u64,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            seen: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            relayed: AtomicU64::new(0),
            partial: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

impl RelayStats {
    fn record(&self, outcome: &RelayOutcome) {
        self.seen.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            RelayOutcome::Skipped(_) => &self.skipped,
            RelayOutcome::Relayed => &self.relayed,
            RelayOutcome::PartiallyRelayed { .. } => &self.partial,
            RelayOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            seen: self.seen.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seen={} skipped={} relayed={} partial={} failed={} since {}",
            self.seen,
            self.skipped,
            self.relayed,
            self.partial,
            self.failed,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// The relay pipeline: classify, format, fetch media, dispatch, clean up.
/// Platform-agnostic; the listener hands it one `InboundMessage` per event.
pub struct Relay {
    rules: FilterRules,
    media: MediaAcquirer,
    dispatcher: Dispatcher,
    stats: Arc<RelayStats>,
}

impl Relay {
    pub fn new(rules: FilterRules, media: MediaAcquirer, dispatcher: Dispatcher) -> Self {
        Self {
            rules,
            media,
            dispatcher,
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Process one inbound message. Never panics and never returns an error;
    /// anything unexpected ends the run as [`RelayOutcome::Failed`].
    pub async fn handle(&self, inbound: InboundMessage) -> RelayOutcome {
        info!("Message logged: {}", inbound.text);

        let outcome = match AssertUnwindSafe(self.process(&inbound))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(&*panic);
                error!(
                    "Relay of message {} from chat {} panicked: {}",
                    inbound.message_id, inbound.chat.id, reason
                );
                RelayOutcome::Failed(reason)
            }
        };

        self.stats.record(&outcome);
        info!(
            "Message {} from chat {} ({}): {}",
            inbound.message_id, inbound.chat.id, inbound.chat.title, outcome
        );
        outcome
    }

    async fn process(&self, inbound: &InboundMessage) -> RelayOutcome {
        let verdict = self.rules.classify(&inbound.text);
        if !verdict.is_relay() {
            debug!("Not relaying message {}: {}", inbound.message_id, verdict);
            return RelayOutcome::Skipped(verdict);
        }

        let sender = Sender::resolve(inbound.sender.as_ref());
        debug!(
            "Message sent by: {}, ID: {}, handle: {:?}",
            sender.name, sender.id, sender.handle
        );

        let highlighted = self.rules.highlight(&inbound.text);
        let text = format_message(inbound, &sender, &highlighted);
        debug!("Styled message text: {}", text);

        // Released below; `Drop` deletes the file on any path that skips the release
        let media = self.media.acquire(inbound).await;
        let rendered = RenderedMessage { text, media };

        let results = self.dispatcher.dispatch(&rendered).await;

        if let Some(handle) = rendered.media {
            if let Err(e) = handle.release().await {
                warn!("{:#}", e);
            }
        }

        RelayOutcome::from_results(&results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{FakeClient, PanickingClient};
    use crate::dispatch::{DestinationSet, PostTemplate, RetryPolicy};
    use crate::media::MediaFetcher;
    use crate::platform::{ChatInfo, MediaRef, PrimaryClient};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingFetcher {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl MediaFetcher for CountingFetcher {
        async fn fetch(&self, media: &MediaRef, dest: &Path) -> Result<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"bytes").await?;
            if media.extension == ".bad" {
                panic!("fetcher bug");
            }
            Ok(())
        }
    }

    struct Harness {
        relay: Relay,
        fetcher: Arc<CountingFetcher>,
        media_dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(primary: Arc<dyn PrimaryClient>, secondary: Arc<FakeClient>, ids: &[u64]) -> Self {
            let media_dir = tempfile::tempdir().unwrap();
            let fetcher = Arc::new(CountingFetcher {
                fetches: AtomicUsize::new(0),
            });
            let rules = FilterRules::new(
                vec!["hiring".to_string()],
                vec!["scam".to_string()],
                700,
                8,
            )
            .unwrap();
            let dispatcher = Dispatcher::new(
                primary,
                Some(secondary),
                DestinationSet {
                    primary: 100,
                    secondary: ids.to_vec(),
                },
                RetryPolicy::new(2, Duration::from_millis(1)),
                PostTemplate::default(),
            );
            let acquirer = MediaAcquirer::new(media_dir.path().to_path_buf(), fetcher.clone());
            Self {
                relay: Relay::new(rules, acquirer, dispatcher),
                fetcher,
                media_dir,
            }
        }

        fn media_files(&self) -> Vec<PathBuf> {
            std::fs::read_dir(self.media_dir.path())
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect()
        }

        fn fetches(&self) -> usize {
            self.fetcher.fetches.load(Ordering::SeqCst)
        }
    }

    fn message(text: &str, media: Option<&str>) -> InboundMessage {
        InboundMessage {
            message_id: 42,
            text: text.to_string(),
            sender: Some(Sender {
                name: "Alex".to_string(),
                id: 12345,
                handle: None,
            }),
            chat: ChatInfo {
                id: -1001234567890,
                title: "Jobs".to_string(),
                handle: Some("jobsfeed".to_string()),
            },
            media: media.map(|ext| MediaRef {
                file_id: "f1".to_string(),
                extension: ext.to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_skipped_message_does_no_work() {
        let primary = Arc::new(FakeClient::new(&[]));
        let h = Harness::new(primary.clone(), Arc::new(FakeClient::new(&[])), &[]);

        let outcome = h.relay.handle(message("hiring scam", Some(".jpg"))).await;

        assert!(matches!(outcome, RelayOutcome::Skipped(Verdict::Blocked { .. })));
        assert_eq!(h.fetches(), 0);
        assert!(primary.calls.lock().unwrap().is_empty());
        assert_eq!(h.relay.stats().snapshot().skipped, 1);
    }

    #[tokio::test]
    async fn test_relayed_text_reaches_all_destinations() {
        let primary = Arc::new(FakeClient::new(&[]));
        let secondary = Arc::new(FakeClient::new(&[]));
        let h = Harness::new(primary.clone(), secondary.clone(), &[1, 2]);

        let outcome = h
            .relay
            .handle(message("We are hiring a backend engineer", None))
            .await;

        assert_eq!(outcome, RelayOutcome::Relayed);
        let calls = primary.calls_for(100);
        assert_eq!(calls.len(), 1);
        match &calls[0].0 {
            crate::dispatch::tests::Call::Text(text) => {
                assert!(text.contains("We are **hiring** a backend engineer"));
                assert!(text.contains("Alex (ID: 12345)"));
                assert!(text.contains("https://t.me/jobsfeed/42"));
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert_eq!(secondary.calls_for(1).len(), 1);
        assert_eq!(secondary.calls_for(2).len(), 1);
    }

    #[tokio::test]
    async fn test_media_released_after_success() {
        let h = Harness::new(
            Arc::new(FakeClient::new(&[])),
            Arc::new(FakeClient::new(&[])),
            &[1],
        );

        let outcome = h.relay.handle(message("hiring", Some(".jpg"))).await;

        assert_eq!(outcome, RelayOutcome::Relayed);
        assert_eq!(h.fetches(), 1);
        assert!(h.media_files().is_empty());
    }

    #[tokio::test]
    async fn test_media_released_after_total_failure() {
        let h = Harness::new(
            Arc::new(FakeClient::new(&[100])),
            Arc::new(FakeClient::new(&[1])),
            &[1],
        );

        let outcome = h.relay.handle(message("hiring", Some(".pdf"))).await;

        assert!(matches!(outcome, RelayOutcome::Failed(_)));
        assert!(h.media_files().is_empty());
        assert_eq!(h.relay.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_reported() {
        let h = Harness::new(
            Arc::new(FakeClient::new(&[])),
            Arc::new(FakeClient::new(&[2])),
            &[1, 2, 3],
        );

        let outcome = h.relay.handle(message("hiring", None)).await;

        assert_eq!(
            outcome,
            RelayOutcome::PartiallyRelayed {
                failed: vec![Destination::Secondary(2)]
            }
        );
        assert_eq!(h.relay.stats().snapshot().partial, 1);
    }

    #[tokio::test]
    async fn test_panicking_primary_still_reaches_secondaries() {
        let secondary = Arc::new(FakeClient::new(&[]));
        let h = Harness::new(Arc::new(PanickingClient), secondary.clone(), &[1, 2]);

        let outcome = h.relay.handle(message("hiring", Some(".png"))).await;

        assert_eq!(
            outcome,
            RelayOutcome::PartiallyRelayed {
                failed: vec![Destination::Primary(100)]
            }
        );
        assert_eq!(secondary.calls_for(1).len(), 1);
        assert_eq!(secondary.calls_for(2).len(), 1);
        assert!(h.media_files().is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_media_cleaned() {
        let h = Harness::new(Arc::new(FakeClient::new(&[])), Arc::new(FakeClient::new(&[])), &[]);

        let outcome = h.relay.handle(message("hiring", Some(".bad"))).await;

        assert_eq!(outcome, RelayOutcome::Failed("fetcher bug".to_string()));
        assert_eq!(h.fetches(), 1);
        assert!(h.media_files().is_empty());

        // The next event is still processed
        let outcome = h.relay.handle(message("nothing relevant", None)).await;
        assert_eq!(outcome, RelayOutcome::Skipped(Verdict::NoMatch));
        assert_eq!(h.relay.stats().snapshot().seen, 2);
        assert_eq!(h.relay.stats().snapshot().failed, 1);
    }

    #[test]
    fn test_stats_display() {
        let stats = RelayStats::default();
        stats.record(&RelayOutcome::Relayed);
        stats.record(&RelayOutcome::Skipped(Verdict::NoMatch));
        let line = stats.snapshot().to_string();
        assert!(line.starts_with("seen=2 skipped=1 relayed=1 partial=0 failed=0 since "));
    }

    #[test]
    fn test_outcome_from_results() {
        let ok = DeliveryResult {
            destination: Destination::Primary(1),
            outcome: crate::dispatch::DeliveryOutcome::Delivered,
        };
        let bad = DeliveryResult {
            destination: Destination::Secondary(2),
            outcome: crate::dispatch::DeliveryOutcome::Failed("x".to_string()),
        };
        assert_eq!(
            RelayOutcome::from_results(&[ok.clone()]),
            RelayOutcome::Relayed
        );
        assert!(matches!(
            RelayOutcome::from_results(&[bad.clone()]),
            RelayOutcome::Failed(_)
        ));
        assert_eq!(
            RelayOutcome::from_results(&[ok, bad]),
            RelayOutcome::PartiallyRelayed {
                failed: vec![Destination::Secondary(2)]
            }
        );
    }
}
