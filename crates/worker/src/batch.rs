use anyhow::Context;
use markdown_core::domain::recommendation::{OutputRecord, ReasonCode};
use markdown_core::domain::request::RequestBatch;
use markdown_core::pipeline::features::FeatureRecord;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Upper bound on requests per run.
    pub max_requests: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_requests: 50_000,
        }
    }
}

impl BatchOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("MARKDOWN_MAX_BATCH_SIZE") {
            if let Ok(n) = s.parse::<usize>() {
                out.max_requests = n;
            }
        }

        out
    }

    pub fn check(&self, batch: &RequestBatch) -> anyhow::Result<()> {
        anyhow::ensure!(!batch.is_empty(), "request batch is empty");
        anyhow::ensure!(
            batch.len() <= self.max_requests,
            "request batch has {} requests, more than MARKDOWN_MAX_BATCH_SIZE={}",
            batch.len(),
            self.max_requests
        );
        Ok(())
    }
}

pub fn load_requests(path: &Path) -> anyhow::Result<RequestBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read requests file failed ({})", path.display()))?;
    parse_requests(&text).with_context(|| format!("parse requests file failed ({})", path.display()))
}

pub fn load_feature_records(path: &Path) -> anyhow::Result<Vec<FeatureRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read features file failed ({})", path.display()))?;
    parse_feature_records(&text)
        .with_context(|| format!("parse features file failed ({})", path.display()))
}

fn parse_requests(text: &str) -> anyhow::Result<RequestBatch> {
    Ok(serde_json::from_str(text)?)
}

fn parse_feature_records(text: &str) -> anyhow::Result<Vec<FeatureRecord>> {
    Ok(serde_json::from_str(text)?)
}

/// Row count per reason code, every code included.
pub fn summarize(results: &BTreeMap<String, OutputRecord>) -> BTreeMap<ReasonCode, usize> {
    let mut out: BTreeMap<ReasonCode, usize> = ReasonCode::ALL.iter().map(|c| (*c, 0)).collect();
    for r in results.values() {
        *out.entry(r.no_reco_reason_code).or_default() += 1;
    }
    out
}

/// Pretty JSON to `path`, or to stdout when no path is given.
pub fn write_results(
    path: Option<&Path>,
    results: &BTreeMap<String, OutputRecord>,
) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(results).context("serialize results failed")?;
    match path {
        Some(p) => std::fs::write(p, text)
            .with_context(|| format!("write results file failed ({})", p.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{text}").context("write results to stdout failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn requests_json() -> String {
        json!({
            "a": {
                "club_nbr": "6279",
                "customer_item_nbr": "980407953",
                "oos_date": "2026-03-12",
                "current_inventory": 50,
                "current_retail_price": 12.8,
                "liquidation_price": 3.0
            },
            "b": {
                "club_nbr": "6279",
                "customer_item_nbr": "980407954",
                "oos_date": "2026-03-20",
                "md_start_date": "2026-03-05",
                "sell_through_threshold": 0.5,
                "current_inventory": 10,
                "current_retail_price": 4.5,
                "liquidation_price": 1.0
            }
        })
        .to_string()
    }

    #[test]
    fn parses_request_map() {
        let batch = parse_requests(&requests_json()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch["a"].md_start_date, None);
        assert_eq!(batch["b"].sell_through_threshold, Some(0.5));
    }

    #[test]
    fn rejects_request_without_oos_date() {
        let text = json!({"a": {"club_nbr": "1", "customer_item_nbr": "2"}}).to_string();
        assert!(parse_requests(&text).is_err());
    }

    #[test]
    fn parses_feature_records() {
        let text = json!([
            {"club_nbr": "6279", "item_nbr": "980407953", "features": {"department_nbr": 4}}
        ])
        .to_string();
        let records = parse_feature_records(&text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].features["department_nbr"], json!(4));
    }

    #[test]
    fn enforces_batch_bounds() {
        let batch = parse_requests(&requests_json()).unwrap();
        assert!(BatchOptions::default().check(&batch).is_ok());
        assert!(BatchOptions { max_requests: 1 }.check(&batch).is_err());
        assert!(BatchOptions::default().check(&RequestBatch::new()).is_err());
    }

    #[test]
    fn summary_lists_every_code() {
        let batch = parse_requests(&requests_json()).unwrap();
        let mut results = BTreeMap::new();
        for (id, req) in &batch {
            results.insert(
                id.clone(),
                OutputRecord::passthrough(req, ReasonCode::IncompleteInfo, "no data"),
            );
        }

        let summary = summarize(&results);
        assert_eq!(summary.len(), ReasonCode::ALL.len());
        assert_eq!(summary[&ReasonCode::IncompleteInfo], 2);
        assert_eq!(summary[&ReasonCode::RecommendationSuccessful], 0);
    }
}
