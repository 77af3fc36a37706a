use serde::{Deserialize, Serialize};

/// Web origin prepended to the source's relative content paths.
pub const SOURCE_ORIGIN: &str = "https://ra.co";

/// One event in the shape the Cockpit collection stores. `event_url` is the
/// dedup key: two records with the same URL are the same event.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub event_title: String,
    #[serde(rename = "eventURL")]
    pub event_url: String,
    pub event_date: Option<String>,
    pub guest_count: u64,
    pub artists: Vec<String>,
    pub event_image: Option<String>,
    pub venue_name: String,
    pub venue_address: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub description: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub event_tags: Vec<String>,
    pub ticket_price: Option<f64>,
    pub is_sold_out: bool,
}
