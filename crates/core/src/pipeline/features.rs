use crate::domain::recommendation::ReasonCode;
use crate::domain::request::ItemClubKey;
use crate::pipeline::StageFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Flat mapping of historical sale/price signals for one club x item.
pub type FeatureRow = BTreeMap<String, Value>;

pub const CLUB_NBR: &str = "club_nbr";
pub const ITEM_NBR: &str = "item_nbr";
pub const SUBCLASS_NBR: &str = "subclass_nbr";
pub const DEPARTMENT_NBR: &str = "department_nbr";
pub const MEDIAN_PRICE: &str = "median_price_6_month_last_amt";

pub const PRICE_WEEKS_BACK: [&str; 4] = [
    "price_1_week_back_median_price_6_month_last_nbr",
    "price_2_week_back_median_price_6_month_last_nbr",
    "price_3_week_back_median_price_6_month_last_nbr",
    "price_4_week_back_median_price_6_month_last_nbr",
];

pub const UNITS_WEEKS_BACK: [&str; 4] = [
    "unit_sold_1_week_back_cnt",
    "unit_sold_2_week_back_cnt",
    "unit_sold_3_week_back_cnt",
    "unit_sold_4_week_back_cnt",
];

/// Batched lookup of feature rows. Keys without data are simply absent from the result.
#[async_trait::async_trait]
pub trait FeatureStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, keys: &[ItemClubKey]) -> anyhow::Result<HashMap<ItemClubKey, FeatureRow>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub club_nbr: String,
    pub item_nbr: String,
    pub features: FeatureRow,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryFeatureStore {
    rows: HashMap<ItemClubKey, FeatureRow>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<FeatureRecord>) -> Self {
        let mut out = Self::new();
        for r in records {
            out.insert(ItemClubKey::new(&r.club_nbr, &r.item_nbr), r.features);
        }
        out
    }

    pub fn insert(&mut self, key: ItemClubKey, row: FeatureRow) {
        self.rows.insert(key, row);
    }
}

#[async_trait::async_trait]
impl FeatureStore for InMemoryFeatureStore {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn lookup(&self, keys: &[ItemClubKey]) -> anyhow::Result<HashMap<ItemClubKey, FeatureRow>> {
        Ok(keys
            .iter()
            .filter_map(|k| self.rows.get(k).map(|row| (k.clone(), row.clone())))
            .collect())
    }
}

/// Typed view of the features the pipeline depends on. `raw` keeps the full row for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFeatures {
    pub club_nbr: i64,
    pub item_nbr: i64,
    pub subclass_nbr: i64,
    pub department_nbr: i64,
    pub price_weeks_back: [f64; 4],
    pub units_weeks_back: [f64; 4],
    pub raw: FeatureRow,
}

/// Checks that every required feature is present with the expected numeric kind.
///
/// Problems are accumulated so the caller sees all of them at once.
pub fn parse_item_features(row: &FeatureRow) -> Result<ItemFeatures, StageFailure> {
    if row.is_empty() {
        return Err(StageFailure::new(
            ReasonCode::IncompleteInfo,
            "Item-club combination does not have enough sales data.",
        ));
    }

    let mut problems = Vec::new();

    let mut int_feature = |name: &str, label: &str| -> i64 {
        match row.get(name).and_then(Value::as_i64) {
            Some(v) => v,
            None => {
                problems.push(format!("Missing or malformed {label} feature '{name}'."));
                0
            }
        }
    };
    let club_nbr = int_feature(CLUB_NBR, "club number");
    let item_nbr = int_feature(ITEM_NBR, "item number");
    let subclass_nbr = int_feature(SUBCLASS_NBR, "subcategory");
    let department_nbr = int_feature(DEPARTMENT_NBR, "category");

    let mut price_weeks_back = [0.0; 4];
    for (slot, name) in price_weeks_back.iter_mut().zip(PRICE_WEEKS_BACK) {
        match finite_f64(row, name) {
            Some(v) => *slot = v,
            None => problems.push(format!("Missing or malformed price feature '{name}'.")),
        }
    }

    let mut units_weeks_back = [0.0; 4];
    for (slot, name) in units_weeks_back.iter_mut().zip(UNITS_WEEKS_BACK) {
        match finite_f64(row, name) {
            Some(v) if v >= 0.0 => *slot = v,
            _ => problems.push(format!(
                "Missing, malformed or negative week sale units feature '{name}'."
            )),
        }
    }

    if !problems.is_empty() {
        return Err(StageFailure::from_remarks(
            ReasonCode::IncompleteInfo,
            &problems,
        ));
    }

    Ok(ItemFeatures {
        club_nbr,
        item_nbr,
        subclass_nbr,
        department_nbr,
        price_weeks_back,
        units_weeks_back,
        raw: row.clone(),
    })
}

pub fn finite_f64(row: &FeatureRow, name: &str) -> Option<f64> {
    row.get(name)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
}
