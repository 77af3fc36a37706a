//! Resident Advisor GraphQL source.
//!
//! Two-stage retrieval: one promoter list query, then one detail query per
//! event. A failed detail query degrades that event to its summary fields.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::models::{CanonicalEvent, SOURCE_ORIGIN};
use crate::sync::EventSource;

const RA_GRAPHQL_URL: &str = "https://ra.co/graphql";
const VENUE_PLACEHOLDER: &str = "TBA";

// The endpoint rejects requests that do not identify as a browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .expect("failed to build ra client")
});

const LIST_QUERY: &str = r#"
query GET_PROMOTER_EVENTS_LIST($id: ID!, $limit: Int!) {
  promoter(id: $id) {
    events(limit: $limit, type: POPULAR) {
      id
      title
      contentUrl
      date
      interestedCount
      images { filename }
      venue {
        name
        area { name, country { name } }
      }
      artists { name }
    }
  }
}
"#;

const DETAIL_QUERY: &str = r#"
query GET_EVENT_DETAILS($id: ID!) {
  event(id: $id) {
    id
    startTime
    endTime
    content
    genres { name }
  }
}
"#;

#[derive(Debug, Error)]
pub enum RaError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("graphql error response for {operation}: {errors}")]
    Query {
        operation: &'static str,
        errors: Value,
    },
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<Value>>,
}

/// The endpoint reports failures inside a 200 response. An `errors` array
/// always wins over whatever partial `data` came with it.
fn unwrap_envelope<T>(operation: &'static str, envelope: GraphQlEnvelope<T>) -> Result<T, RaError> {
    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        return Err(RaError::Query {
            operation,
            errors: Value::Array(errors),
        });
    }
    envelope.data.ok_or_else(|| RaError::Query {
        operation,
        errors: Value::String("response carried no data".to_string()),
    })
}

#[derive(Debug, Deserialize)]
struct PromoterData {
    promoter: Option<PromoterEvents>,
}

#[derive(Debug, Deserialize)]
struct PromoterEvents {
    events: Option<Vec<EventSummary>>,
}

#[derive(Debug, Clone, Deserialize)]
struct EventSummary {
    id: String,
    title: String,
    #[serde(rename = "contentUrl")]
    content_url: String,
    date: Option<String>,
    #[serde(rename = "interestedCount")]
    interested_count: Option<u64>,
    #[serde(default)]
    artists: Vec<NameDoc>,
    #[serde(default)]
    images: Vec<ImageDoc>,
    venue: Option<VenueDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct NameDoc {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageDoc {
    filename: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VenueDoc {
    name: Option<String>,
    area: Option<AreaDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct AreaDoc {
    name: Option<String>,
    country: Option<CountryDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct CountryDoc {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailData {
    event: Option<EventDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EventDetail {
    #[serde(rename = "startTime")]
    start_time: Option<String>,
    #[serde(rename = "endTime")]
    end_time: Option<String>,
    content: Option<String>,
    #[serde(default)]
    genres: Vec<NameDoc>,
}

#[derive(Clone)]
pub struct RaClient {
    list_limit: u32,
    concurrency: usize,
}

impl RaClient {
    pub fn new(list_limit: u32, concurrency: usize) -> Self {
        Self {
            list_limit,
            concurrency: concurrency.max(1),
        }
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        operation: &'static str,
    ) -> Result<T, RaError> {
        let response = CLIENT
            .post(RA_GRAPHQL_URL)
            .json(&json!({
                "query": query,
                "variables": variables,
                "operationName": operation,
            }))
            .send()
            .await?
            .error_for_status()?;

        let envelope: GraphQlEnvelope<T> = response.json().await?;
        unwrap_envelope(operation, envelope)
    }

    async fn fetch_event_detail(&self, event_id: &str) -> Option<EventDetail> {
        let result = self
            .graphql::<DetailData>(DETAIL_QUERY, json!({ "id": event_id }), "GET_EVENT_DETAILS")
            .await;
        match result {
            Ok(data) => data.event,
            Err(err) => {
                warn!("could not load details for event {event_id}: {err}");
                None
            }
        }
    }

    /// Full retrieval for one promoter: list query, then detail queries under
    /// a bounded number of in-flight requests. The returned order is the list
    /// query's order regardless of detail completion order.
    pub async fn fetch_events_for_promoter(
        &self,
        promoter_id: &str,
    ) -> Result<Vec<CanonicalEvent>, RaError> {
        info!("loading event list for promoter {promoter_id}");
        let data: PromoterData = self
            .graphql(
                LIST_QUERY,
                json!({ "id": promoter_id, "limit": self.list_limit }),
                "GET_PROMOTER_EVENTS_LIST",
            )
            .await?;

        let summaries = data
            .promoter
            .and_then(|promoter| promoter.events)
            .unwrap_or_default();
        info!("{} events found, loading details", summaries.len());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let client = self.clone();
            let permits = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("detail semaphore closed");
                debug!("loading details for \"{}\" (id {})", summary.title, summary.id);
                let detail = client.fetch_event_detail(&summary.id).await;
                canonical_event(summary, detail)
            }));
        }

        let mut events = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(event) => events.push(event),
                Err(err) => error!("detail worker failed: {err}"),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl EventSource for RaClient {
    async fn fetch_events(&self, promoter_id: &str) -> anyhow::Result<Vec<CanonicalEvent>> {
        Ok(self.fetch_events_for_promoter(promoter_id).await?)
    }
}

fn canonical_event(summary: EventSummary, detail: Option<EventDetail>) -> CanonicalEvent {
    let detail = detail.unwrap_or_default();

    let venue_name = summary
        .venue
        .as_ref()
        .and_then(|venue| venue.name.clone())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| VENUE_PLACEHOLDER.to_string());
    let city = summary
        .venue
        .as_ref()
        .and_then(|venue| venue.area.as_ref())
        .and_then(|area| area.name.clone())
        .filter(|name| !name.trim().is_empty());
    let country = summary
        .venue
        .as_ref()
        .and_then(|venue| venue.area.as_ref())
        .and_then(|area| area.country.as_ref())
        .and_then(|country| country.name.clone())
        .filter(|name| !name.trim().is_empty());
    let venue_address = match &city {
        Some(city) => format!("{venue_name}, {city}"),
        None => venue_name.clone(),
    };

    CanonicalEvent {
        event_title: summary.title,
        event_url: format!("{SOURCE_ORIGIN}{}", summary.content_url),
        event_date: summary.date.as_deref().and_then(date_part),
        guest_count: summary.interested_count.unwrap_or(0),
        artists: summary.artists.into_iter().map(|artist| artist.name).collect(),
        event_image: summary.images.first().map(|image| image.filename.clone()),
        venue_name,
        venue_address,
        city,
        country,
        description: detail
            .content
            .as_deref()
            .map(render_description)
            .unwrap_or_default(),
        start_time: detail.start_time.as_deref().and_then(time_part),
        end_time: detail.end_time.as_deref().and_then(time_part),
        event_tags: detail.genres.into_iter().map(|genre| genre.name).collect(),
        ticket_price: None,
        is_sold_out: false,
    }
}

/// Rich-text body for the destination: escaped, wrapped in a paragraph, with
/// newlines turned into `<br />`.
fn render_description(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let escaped = escape_html(&content.replace("\r\n", "\n"));
    format!("<p>{}</p>", escaped.replace('\n', "<br />"))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn parse_source_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        // Keep the wall-clock time as written by the source.
        return Some(parsed.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    None
}

fn date_part(raw: &str) -> Option<String> {
    if let Some(timestamp) = parse_source_timestamp(raw) {
        return Some(timestamp.format("%Y-%m-%d").to_string());
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn time_part(raw: &str) -> Option<String> {
    parse_source_timestamp(raw).map(|timestamp| timestamp.format("%H:%M:%S").to_string())
}
