//! Cockpit CMS destination.
//!
//! Reads the whole collection in one call and inserts new records one at a
//! time. Writes are best effort per record, never a batch transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::models::CanonicalEvent;
use crate::sync::EventStore;

const COLLECTION_NAME: &str = "raevents";
const API_KEY_HEADER: &str = "api-key";

#[derive(Debug, Error)]
pub enum CockpitError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("cockpit api error ({status}): {body}")]
    Api { status: StatusCode, body: String },
    #[error("parse error: {0}")]
    Parse(String),
}

/// Existing destination record. Only the dedup key matters here; the rest of
/// the collection schema is Cockpit's business.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredEvent {
    #[serde(rename = "eventURL", default)]
    pub event_url: Option<String>,
}

/// Outcome of one attempted insert.
#[derive(Debug)]
pub struct AddOutcome {
    pub event_title: String,
    pub event_url: String,
    pub result: Result<(), CockpitError>,
}

#[derive(Clone)]
pub struct CockpitClient {
    client: Client,
    base_url: String,
    api_key: String,
    concurrency: usize,
}

impl CockpitClient {
    pub fn new(base_url: &str, api_key: &str, concurrency: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("failed to build cockpit client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn fetch_all_events(&self) -> Result<Vec<StoredEvent>, CockpitError> {
        info!("loading existing events from cockpit");
        let url = format!("{}/content/items/{COLLECTION_NAME}", self.base_url);
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CockpitError::Api { status, body });
        }

        let events: Vec<StoredEvent> =
            serde_json::from_str(&body).map_err(|err| CockpitError::Parse(err.to_string()))?;
        info!("{} events loaded from cockpit", events.len());
        Ok(events)
    }

    pub async fn add_event(&self, event: &CanonicalEvent) -> Result<(), CockpitError> {
        let url = format!("{}/content/item/{COLLECTION_NAME}", self.base_url);
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            // Cockpit expects the record wrapped as {"data": ...}.
            .json(&json!({ "data": event }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CockpitError::Api { status, body });
        }
        Ok(())
    }

    /// Inserts each record independently under a bounded number of in-flight
    /// requests. One failure never stops the rest; the outcome list keeps the
    /// input order.
    pub async fn add_events(&self, events: &[CanonicalEvent]) -> Vec<AddOutcome> {
        if events.is_empty() {
            info!("no new events to add");
            return Vec::new();
        }
        info!("adding {} new events to cockpit", events.len());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(events.len());
        for event in events {
            let client = self.clone();
            let permits = Arc::clone(&semaphore);
            let event = event.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("write semaphore closed");
                let result = client.add_event(&event).await;
                match &result {
                    Ok(()) => info!("added \"{}\"", event.event_title),
                    Err(err) => error!("failed to add \"{}\": {err}", event.event_title),
                }
                AddOutcome {
                    event_title: event.event_title,
                    event_url: event.event_url,
                    result,
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!("write worker failed: {err}"),
            }
        }
        outcomes
    }
}

#[async_trait]
impl EventStore for CockpitClient {
    async fn fetch_all(&self) -> anyhow::Result<Vec<StoredEvent>> {
        Ok(self.fetch_all_events().await?)
    }

    async fn add_all(&self, events: &[CanonicalEvent]) -> Vec<AddOutcome> {
        self.add_events(events).await
    }
}
