use crate::domain::request::MarkdownRequest;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Liquidation,
    InvalidInput,
    IncompleteInfo,
    PriceOutlier,
    CurveOutlier,
    RecommendationSuccessful,
    UnexpectedError,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 7] = [
        ReasonCode::Liquidation,
        ReasonCode::InvalidInput,
        ReasonCode::IncompleteInfo,
        ReasonCode::PriceOutlier,
        ReasonCode::CurveOutlier,
        ReasonCode::RecommendationSuccessful,
        ReasonCode::UnexpectedError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Liquidation => "liquidation",
            ReasonCode::InvalidInput => "invalid_input",
            ReasonCode::IncompleteInfo => "incomplete_info",
            ReasonCode::PriceOutlier => "price_outlier",
            ReasonCode::CurveOutlier => "curve_outlier",
            ReasonCode::RecommendationSuccessful => "recommendation_successful",
            ReasonCode::UnexpectedError => "unexpected_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReasonCode::RecommendationSuccessful)
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkdownRecommendation {
    pub markdown_session_start_date: NaiveDate,
    pub recommended_markdown_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekLevelSale {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub expected_sale_units: f64,
}

/// Response row for one request id.
///
/// The input fields are echoed through `input`; every other field is derived by the pipeline.
/// Success-only fields are `None` unless `no_reco_reason_code` is `recommendation_successful`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    #[serde(flatten)]
    pub input: MarkdownRequest,
    pub markdown_recommendation: Option<Vec<MarkdownRecommendation>>,
    pub expected_sale_units: Option<i64>,
    pub week_level_expected_sale_units: Option<Vec<WeekLevelSale>>,
    pub expected_revenue: Option<f64>,
    #[serde(default)]
    pub model_features: BTreeMap<String, Value>,
    pub no_reco_reason_code: ReasonCode,
    pub remark: Option<String>,
}

impl OutputRecord {
    /// Row that carries only the input-derived fields plus a reason code.
    pub fn passthrough(input: &MarkdownRequest, code: ReasonCode, remark: impl Into<String>) -> Self {
        Self {
            input: input.clone(),
            markdown_recommendation: None,
            expected_sale_units: None,
            week_level_expected_sale_units: None,
            expected_revenue: None,
            model_features: BTreeMap::new(),
            no_reco_reason_code: code,
            remark: Some(remark.into()),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.no_reco_reason_code.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> MarkdownRequest {
        MarkdownRequest {
            club_nbr: "6279".to_string(),
            customer_item_nbr: "980407953".to_string(),
            oos_date: "2024-07-30".to_string(),
            md_start_date: None,
            sell_through_threshold: None,
            current_inventory: 50,
            current_retail_price: 12.8,
            liquidation_price: 3.0,
        }
    }

    #[test]
    fn reason_codes_serialize_as_snake_case() {
        for code in ReasonCode::ALL {
            assert_eq!(serde_json::to_value(code).unwrap(), json!(code.as_str()));
        }
    }

    #[test]
    fn passthrough_echoes_input_at_top_level() {
        let rec = OutputRecord::passthrough(
            &sample_request(),
            ReasonCode::IncompleteInfo,
            "no history",
        );
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["club_nbr"], json!("6279"));
        assert_eq!(v["current_inventory"], json!(50));
        assert_eq!(v["md_start_date"], Value::Null);
        assert_eq!(v["markdown_recommendation"], Value::Null);
        assert_eq!(v["no_reco_reason_code"], json!("incomplete_info"));
        assert_eq!(v["remark"], json!("no history"));

        let back: OutputRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, rec);
    }
}
