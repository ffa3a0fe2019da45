use crate::domain::recommendation::{OutputRecord, ReasonCode};
use crate::domain::request::{parse_date, MarkdownRequest, RequestBatch};
use crate::time::weeks::week_windows;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Tolerance when comparing echoed float inputs.
pub const PASSTHROUGH_TOLERANCE: f64 = 0.001;
const REVENUE_SLACK: f64 = 0.01;
const UNITS_EPSILON: f64 = 1e-6;

/// Final whole-batch check. Re-derives the output contract from the inputs alone and demotes
/// any row that breaks it, so no inconsistent row leaves the pipeline.
#[derive(Debug, Clone, Default)]
pub struct OutputValidator;

impl OutputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        inputs: &RequestBatch,
        mut outputs: BTreeMap<String, OutputRecord>,
        today: NaiveDate,
    ) -> BTreeMap<String, OutputRecord> {
        for extra in outputs.keys().filter(|id| !inputs.contains_key(*id)) {
            tracing::warn!(request_id = %extra, "dropping output row with no matching request");
        }

        let mut out = BTreeMap::new();
        for (id, input) in inputs {
            let Some(record) = outputs.remove(id) else {
                tracing::warn!(request_id = %id, "request missing from pipeline output");
                out.insert(
                    id.clone(),
                    OutputRecord::passthrough(
                        input,
                        ReasonCode::UnexpectedError,
                        "Request is missing from the pipeline output.",
                    ),
                );
                continue;
            };

            let violations = guarded(|| check_record(input, &record, today));
            if violations.is_empty() {
                out.insert(id.clone(), record);
            } else {
                let remark = violations.join("; ");
                tracing::warn!(
                    request_id = %id,
                    previous_code = %record.no_reco_reason_code,
                    remark = %remark,
                    "output validation failed"
                );
                out.insert(
                    id.clone(),
                    OutputRecord::passthrough(input, ReasonCode::UnexpectedError, remark),
                );
            }
        }
        out
    }
}

/// Runs a check and turns a panic into a violation.
fn guarded<F: FnOnce() -> Vec<String>>(check: F) -> Vec<String> {
    match catch_unwind(AssertUnwindSafe(check)) {
        Ok(v) => v,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            vec![format!("Output validation panicked: {detail}")]
        }
    }
}

fn check_record(input: &MarkdownRequest, record: &OutputRecord, today: NaiveDate) -> Vec<String> {
    let mut v = check_passthrough(input, &record.input);
    if record.is_successful() {
        v.extend(check_success(input, record, today));
    } else {
        v.extend(check_failure(record));
    }
    v
}

fn floats_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= PASSTHROUGH_TOLERANCE || (a.is_nan() && b.is_nan())
}

fn check_passthrough(input: &MarkdownRequest, echoed: &MarkdownRequest) -> Vec<String> {
    let mut v = Vec::new();
    let mut mismatch = |field: &str| v.push(format!("Field '{field}' does not match the request."));

    if input.club_nbr != echoed.club_nbr {
        mismatch("club_nbr");
    }
    if input.customer_item_nbr != echoed.customer_item_nbr {
        mismatch("customer_item_nbr");
    }
    if input.oos_date != echoed.oos_date {
        mismatch("oos_date");
    }
    if input.md_start_date != echoed.md_start_date {
        mismatch("md_start_date");
    }
    let threshold_matches = match (input.sell_through_threshold, echoed.sell_through_threshold) {
        (Some(a), Some(b)) => floats_match(a, b),
        (None, None) => true,
        _ => false,
    };
    if !threshold_matches {
        mismatch("sell_through_threshold");
    }
    if input.current_inventory != echoed.current_inventory {
        mismatch("current_inventory");
    }
    if !floats_match(input.current_retail_price, echoed.current_retail_price) {
        mismatch("current_retail_price");
    }
    if !floats_match(input.liquidation_price, echoed.liquidation_price) {
        mismatch("liquidation_price");
    }
    v
}

fn check_success(input: &MarkdownRequest, record: &OutputRecord, today: NaiveDate) -> Vec<String> {
    let mut v = Vec::new();
    let inventory = input.current_inventory;
    let retail = input.current_retail_price;
    let oos_date = parse_date(&input.oos_date);

    match record.markdown_recommendation.as_deref() {
        None | Some([]) => v.push("Successful row has no markdown recommendation.".to_string()),
        Some(recs) => {
            for r in recs {
                let in_range = oos_date
                    .map(|oos| (today..=oos).contains(&r.markdown_session_start_date))
                    .unwrap_or(false);
                if !in_range {
                    v.push(format!(
                        "Markdown start date {} is outside [{today}, {}].",
                        r.markdown_session_start_date, input.oos_date
                    ));
                }
                let price = r.recommended_markdown_price;
                if !(price > 0.0 && price <= retail) {
                    v.push(format!(
                        "Recommended price {price} is outside (0, {retail}]."
                    ));
                }
            }
        }
    }

    match record.expected_sale_units {
        Some(units) if (0..=inventory).contains(&units) => {}
        Some(units) => v.push(format!(
            "Expected sale units {units} is outside [0, {inventory}]."
        )),
        None => v.push("Successful row has no expected sale units.".to_string()),
    }

    let max_revenue = retail * inventory as f64 + REVENUE_SLACK;
    match record.expected_revenue {
        Some(revenue) if revenue >= 0.0 && revenue <= max_revenue => {}
        Some(revenue) => v.push(format!(
            "Expected revenue {revenue} is outside [0, {max_revenue:.2}]."
        )),
        None => v.push("Successful row has no expected revenue.".to_string()),
    }

    if record.model_features.is_empty() {
        v.push("Successful row has no model features.".to_string());
    }

    match (record.week_level_expected_sale_units.as_deref(), oos_date) {
        (None, _) | (Some([]), _) => {
            v.push("Successful row has no weekly sale breakdown.".to_string())
        }
        (Some(weeks), Some(oos)) => {
            let windows = week_windows(today, oos);
            if weeks.len() != windows.len() {
                v.push(format!(
                    "Weekly sale breakdown has {} weeks but {today}..{oos} spans {}.",
                    weeks.len(),
                    windows.len()
                ));
            }
            for (i, (w, (start, end))) in weeks.iter().zip(windows).enumerate() {
                if w.start_date != start || w.end_date != end {
                    v.push(format!(
                        "Week {i} window {}..{} should be {start}..{end}.",
                        w.start_date, w.end_date
                    ));
                }
            }
            let mut total = 0.0;
            for (i, w) in weeks.iter().enumerate() {
                if !w.expected_sale_units.is_finite() || w.expected_sale_units < 0.0 {
                    v.push(format!("Week {i} has invalid expected sale units."));
                }
                total += w.expected_sale_units;
            }
            if total > inventory as f64 + UNITS_EPSILON {
                v.push(format!(
                    "Weekly sale units sum to {total:.2}, above inventory {inventory}."
                ));
            }
        }
        (Some(_), None) => v.push("Out-of-stock date does not parse.".to_string()),
    }

    v
}

fn check_failure(record: &OutputRecord) -> Vec<String> {
    let mut present = Vec::new();
    if record.markdown_recommendation.is_some() {
        present.push("markdown_recommendation");
    }
    if record.expected_sale_units.is_some() {
        present.push("expected_sale_units");
    }
    if record.week_level_expected_sale_units.is_some() {
        present.push("week_level_expected_sale_units");
    }
    if record.expected_revenue.is_some() {
        present.push("expected_revenue");
    }
    if !record.model_features.is_empty() {
        present.push("model_features");
    }

    if present.is_empty() {
        Vec::new()
    } else {
        vec![format!(
            "Row with reason code {} carries success-only fields: {}.",
            record.no_reco_reason_code,
            present.join(", ")
        )]
    }
}
