use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Batch of requests keyed by the caller-supplied request id.
pub type RequestBatch = BTreeMap<String, MarkdownRequest>;

/// One club x item markdown request, exactly as received on the wire.
///
/// Never mutated after deserialization: every later stage derives its own values and the
/// output record echoes this struct back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkdownRequest {
    pub club_nbr: String,
    pub customer_item_nbr: String,
    pub oos_date: String,
    #[serde(default)]
    pub md_start_date: Option<String>,
    #[serde(default)]
    pub sell_through_threshold: Option<f64>,
    pub current_inventory: i64,
    pub current_retail_price: f64,
    pub liquidation_price: f64,
}

impl MarkdownRequest {
    pub fn key(&self) -> ItemClubKey {
        ItemClubKey::new(&self.club_nbr, &self.customer_item_nbr)
    }
}

/// Feature store entity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemClubKey {
    pub club_nbr: String,
    pub item_nbr: String,
}

impl ItemClubKey {
    pub fn new(club_nbr: &str, item_nbr: &str) -> Self {
        Self {
            club_nbr: club_nbr.trim().to_string(),
            item_nbr: item_nbr.trim().to_string(),
        }
    }
}

impl std::fmt::Display for ItemClubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "club={} item={}", self.club_nbr, self.item_nbr)
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}
