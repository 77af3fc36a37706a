//! One full sync pass: source fetch, destination fetch, set difference by
//! event URL, then dry-run reporting or live inserts.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::cockpit::{AddOutcome, StoredEvent};
use crate::config::ConfigError;
use crate::models::CanonicalEvent;

/// Seam to the source service, so runs can be exercised against in-memory
/// doubles.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self, promoter_id: &str) -> anyhow::Result<Vec<CanonicalEvent>>;
}

/// Seam to the destination service.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn fetch_all(&self) -> anyhow::Result<Vec<StoredEvent>>;
    async fn add_all(&self, events: &[CanonicalEvent]) -> Vec<AddOutcome>;
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("source fetch failed: {0}")]
    Source(anyhow::Error),
    #[error("destination fetch failed: {0}")]
    Store(anyhow::Error),
}

/// What a failed single-shot list fetch does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and continue with an empty list. A real outage then
    /// looks like "no data", which only the logs can tell apart.
    TreatAsEmpty,
    /// Fail the whole run.
    Abort,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub promoter_id: String,
    pub dry_run: bool,
    pub on_fetch_failure: FailurePolicy,
}

/// Title and date of an event that is (or would be) inserted.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub date: Option<String>,
}

#[derive(Debug)]
pub struct SyncReport {
    pub source_count: usize,
    pub dest_count: usize,
    pub new_count: usize,
    pub new_events: Vec<NewEvent>,
    pub added: usize,
    pub failed: usize,
    pub dry_run: bool,
}

/// Source events whose URL is absent from the destination. Membership is
/// exact string equality; no case or whitespace normalization is applied.
pub fn new_events<'a>(
    source: &'a [CanonicalEvent],
    stored: &[StoredEvent],
) -> Vec<&'a CanonicalEvent> {
    let existing: HashSet<&str> = stored
        .iter()
        .filter_map(|event| event.event_url.as_deref())
        .collect();
    source
        .iter()
        .filter(|event| !existing.contains(event.event_url.as_str()))
        .collect()
}

pub async fn run_sync(
    source: &dyn EventSource,
    store: &dyn EventStore,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    if options.promoter_id.trim().is_empty() {
        return Err(SyncError::Config(ConfigError::Missing("promoter id")));
    }

    let source_events = match source.fetch_events(&options.promoter_id).await {
        Ok(events) => events,
        Err(err) => match options.on_fetch_failure {
            FailurePolicy::Abort => return Err(SyncError::Source(err)),
            FailurePolicy::TreatAsEmpty => {
                error!("source fetch failed, continuing with no events: {err:#}");
                Vec::new()
            }
        },
    };

    if source_events.is_empty() {
        info!("no events received from the source, nothing to do");
        return Ok(SyncReport {
            source_count: 0,
            dest_count: 0,
            new_count: 0,
            new_events: Vec::new(),
            added: 0,
            failed: 0,
            dry_run: options.dry_run,
        });
    }

    let stored = match store.fetch_all().await {
        Ok(stored) => stored,
        Err(err) => match options.on_fetch_failure {
            FailurePolicy::Abort => return Err(SyncError::Store(err)),
            FailurePolicy::TreatAsEmpty => {
                error!("destination fetch failed, treating every source event as new: {err:#}");
                Vec::new()
            }
        },
    };

    let picked = new_events(&source_events, &stored);
    info!(
        "comparison: {} from source, {} in destination, {} new",
        source_events.len(),
        stored.len(),
        picked.len()
    );

    let summaries: Vec<NewEvent> = picked
        .iter()
        .map(|event| NewEvent {
            title: event.event_title.clone(),
            date: event.event_date.clone(),
        })
        .collect();

    let (added, failed) = if options.dry_run {
        info!("dry run enabled, nothing will be written");
        (0, 0)
    } else if picked.is_empty() {
        (0, 0)
    } else {
        let batch: Vec<CanonicalEvent> = picked.into_iter().cloned().collect();
        let outcomes = store.add_all(&batch).await;
        let added = outcomes
            .iter()
            .filter(|outcome| outcome.result.is_ok())
            .count();
        (added, batch.len() - added)
    };

    Ok(SyncReport {
        source_count: source_events.len(),
        dest_count: stored.len(),
        new_count: summaries.len(),
        new_events: summaries,
        added,
        failed,
        dry_run: options.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use reqwest::StatusCode;

    use super::*;
    use crate::cockpit::CockpitError;

    fn event(url: &str) -> CanonicalEvent {
        CanonicalEvent {
            event_title: format!("event at {url}"),
            event_url: url.to_string(),
            event_date: Some("2024-05-01".to_string()),
            guest_count: 0,
            artists: Vec::new(),
            event_image: None,
            venue_name: "TBA".to_string(),
            venue_address: "TBA".to_string(),
            city: None,
            country: None,
            description: String::new(),
            start_time: None,
            end_time: None,
            event_tags: Vec::new(),
            ticket_price: None,
            is_sold_out: false,
        }
    }

    fn options(dry_run: bool, policy: FailurePolicy) -> SyncOptions {
        SyncOptions {
            promoter_id: "109400".to_string(),
            dry_run,
            on_fetch_failure: policy,
        }
    }

    struct FakeSource {
        events: Vec<CanonicalEvent>,
        fail: bool,
    }

    impl FakeSource {
        fn with(events: Vec<CanonicalEvent>) -> Self {
            Self {
                events,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                events: Vec::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn fetch_events(&self, _promoter_id: &str) -> anyhow::Result<Vec<CanonicalEvent>> {
            if self.fail {
                anyhow::bail!("list query refused");
            }
            Ok(self.events.clone())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        stored: Mutex<Vec<StoredEvent>>,
        add_calls: Mutex<Vec<String>>,
        fail_urls: Vec<String>,
        fail_fetch: bool,
    }

    impl FakeStore {
        fn with_urls(urls: &[&str]) -> Self {
            Self {
                stored: Mutex::new(
                    urls.iter()
                        .map(|url| StoredEvent {
                            event_url: Some(url.to_string()),
                        })
                        .collect(),
                ),
                ..Self::default()
            }
        }

        fn add_calls(&self) -> Vec<String> {
            self.add_calls.lock().expect("add_calls mutex").clone()
        }
    }

    #[async_trait]
    impl EventStore for FakeStore {
        async fn fetch_all(&self) -> anyhow::Result<Vec<StoredEvent>> {
            if self.fail_fetch {
                anyhow::bail!("collection read refused");
            }
            Ok(self.stored.lock().expect("stored mutex").clone())
        }

        async fn add_all(&self, events: &[CanonicalEvent]) -> Vec<AddOutcome> {
            events
                .iter()
                .map(|event| {
                    self.add_calls
                        .lock()
                        .expect("add_calls mutex")
                        .push(event.event_url.clone());
                    let result = if self.fail_urls.contains(&event.event_url) {
                        Err(CockpitError::Api {
                            status: StatusCode::BAD_GATEWAY,
                            body: "upstream error".to_string(),
                        })
                    } else {
                        self.stored.lock().expect("stored mutex").push(StoredEvent {
                            event_url: Some(event.event_url.clone()),
                        });
                        Ok(())
                    };
                    AddOutcome {
                        event_title: event.event_title.clone(),
                        event_url: event.event_url.clone(),
                        result,
                    }
                })
                .collect()
        }
    }

    #[test]
    fn set_difference_is_by_exact_url() {
        let source = vec![
            event("https://ra.co/events/1"),
            event("https://ra.co/events/2"),
            event("https://ra.co/events/2/"),
        ];
        let stored = vec![
            StoredEvent {
                event_url: Some("https://ra.co/events/2".to_string()),
            },
            StoredEvent { event_url: None },
        ];

        let picked = new_events(&source, &stored);
        let urls: Vec<&str> = picked.iter().map(|e| e.event_url.as_str()).collect();
        // Trailing slash is a different key on purpose.
        assert_eq!(urls, vec!["https://ra.co/events/1", "https://ra.co/events/2/"]);
    }

    #[tokio::test]
    async fn blank_promoter_id_fails_before_any_call() {
        let source = FakeSource::failing();
        let store = FakeStore::default();
        let mut opts = options(false, FailurePolicy::Abort);
        opts.promoter_id = "  ".to_string();

        let err = run_sync(&source, &store, &opts).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn inserts_only_missing_events() {
        let source = FakeSource::with(vec![
            event("https://ra.co/events/1"),
            event("https://ra.co/events/2"),
        ]);
        let store = FakeStore::with_urls(&["https://ra.co/events/2"]);

        let report = run_sync(&source, &store, &options(false, FailurePolicy::Abort))
            .await
            .expect("run");
        assert_eq!(report.source_count, 2);
        assert_eq!(report.dest_count, 1);
        assert_eq!(report.new_count, 1);
        assert_eq!(report.added, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(store.add_calls(), vec!["https://ra.co/events/1"]);
    }

    #[tokio::test]
    async fn already_known_events_trigger_no_writes() {
        let source = FakeSource::with(vec![event("https://ra.co/events/1")]);
        let store = FakeStore::with_urls(&["https://ra.co/events/1"]);

        let report = run_sync(&source, &store, &options(false, FailurePolicy::Abort))
            .await
            .expect("run");
        assert_eq!(report.new_count, 0);
        assert!(store.add_calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_never_writes() {
        let source = FakeSource::with(vec![event("https://ra.co/events/1")]);
        let store = FakeStore::default();

        let report = run_sync(&source, &store, &options(true, FailurePolicy::Abort))
            .await
            .expect("run");
        assert_eq!(report.new_count, 1);
        assert_eq!(report.new_events[0].date.as_deref(), Some("2024-05-01"));
        assert_eq!(report.added, 0);
        assert!(store.add_calls().is_empty());
    }

    #[tokio::test]
    async fn one_write_failure_does_not_stop_the_batch() {
        let source = FakeSource::with(vec![
            event("https://ra.co/events/1"),
            event("https://ra.co/events/2"),
            event("https://ra.co/events/3"),
        ]);
        let store = FakeStore {
            fail_urls: vec!["https://ra.co/events/1".to_string()],
            ..FakeStore::default()
        };

        let report = run_sync(&source, &store, &options(false, FailurePolicy::Abort))
            .await
            .expect("run");
        assert_eq!(report.new_count, 3);
        assert_eq!(report.added, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.add_calls().len(), 3);
    }

    #[tokio::test]
    async fn second_run_finds_nothing_new() {
        let source = FakeSource::with(vec![
            event("https://ra.co/events/1"),
            event("https://ra.co/events/2"),
        ]);
        let store = FakeStore::default();
        let opts = options(false, FailurePolicy::Abort);

        let first = run_sync(&source, &store, &opts).await.expect("first run");
        assert_eq!(first.new_count, 2);
        assert_eq!(first.added, 2);

        let second = run_sync(&source, &store, &opts).await.expect("second run");
        assert_eq!(second.new_count, 0);
        assert_eq!(second.added, 0);
        assert_eq!(store.add_calls().len(), 2);
    }

    #[tokio::test]
    async fn source_failure_degrades_to_empty_by_default() {
        let source = FakeSource::failing();
        let store = FakeStore::with_urls(&["https://ra.co/events/1"]);

        let report = run_sync(&source, &store, &options(false, FailurePolicy::TreatAsEmpty))
            .await
            .expect("run");
        assert_eq!(report.source_count, 0);
        assert_eq!(report.new_count, 0);
        assert!(store.add_calls().is_empty());
    }

    #[tokio::test]
    async fn strict_mode_surfaces_source_failure() {
        let source = FakeSource::failing();
        let store = FakeStore::default();

        let err = run_sync(&source, &store, &options(false, FailurePolicy::Abort))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Source(_)));
    }

    #[tokio::test]
    async fn destination_read_failure_treats_all_as_new() {
        let source = FakeSource::with(vec![event("https://ra.co/events/1")]);
        let store = FakeStore {
            fail_fetch: true,
            ..FakeStore::default()
        };

        let report = run_sync(&source, &store, &options(true, FailurePolicy::TreatAsEmpty))
            .await
            .expect("run");
        assert_eq!(report.dest_count, 0);
        assert_eq!(report.new_count, 1);

        let strict = run_sync(&source, &store, &options(true, FailurePolicy::Abort))
            .await
            .unwrap_err();
        assert!(matches!(strict, SyncError::Store(_)));
    }
}
