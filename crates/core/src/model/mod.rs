pub mod elasticity;
pub mod error;
pub mod http;

use crate::domain::request::ItemClubKey;
use crate::pipeline::features::FeatureRow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything the demand model needs to price one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInput {
    pub key: ItemClubKey,
    pub today: NaiveDate,
    pub oos_date: NaiveDate,
    pub md_start_date: Option<NaiveDate>,
    pub current_inventory: u64,
    pub current_retail_price: f64,
    pub candidate_prices: Vec<f64>,
    pub candidate_start_dates: Vec<NaiveDate>,
    pub features: FeatureRow,
}

/// One candidate price path.
///
/// An immediate markdown has a single price and no dividing date. A delayed markdown keeps the
/// retail price until its dividing date and switches to the markdown price after it, so
/// `session_prices.len() == session_dividing_dates.len() + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSession {
    pub session_prices: Vec<f64>,
    #[serde(default)]
    pub session_dividing_dates: Vec<NaiveDate>,
    pub session_level_units_sold: Vec<f64>,
    #[serde(default)]
    pub week_level_units_sold: Vec<f64>,
}

impl PriceSession {
    pub fn markdown_price(&self) -> Option<f64> {
        self.session_prices.last().copied()
    }

    pub fn expected_sale_units(&self) -> f64 {
        self.session_level_units_sold.iter().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElasticityCurve {
    pub sessions: Vec<PriceSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub curve: ElasticityCurve,
    #[serde(default)]
    pub model_features: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    Http,
    ConstantElasticity,
}

/// Opaque demand model: features in, predicted demand curve out. Must be safe to call
/// concurrently for independent items.
#[async_trait::async_trait]
pub trait DemandModel: Send + Sync {
    fn provider(&self) -> ModelProvider;

    async fn predict(&self, input: &ModelInput) -> anyhow::Result<ModelPrediction>;
}
