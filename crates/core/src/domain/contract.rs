use crate::domain::recommendation::ReasonCode;
use crate::domain::request::{parse_date, ItemClubKey, MarkdownRequest};
use crate::pipeline::config::MarkdownConfig;
use crate::pipeline::StageFailure;
use chrono::NaiveDate;
use std::sync::Arc;

/// A request that passed every input check, with dates parsed and the sell-through threshold
/// resolved against the configured default.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub key: ItemClubKey,
    pub oos_date: NaiveDate,
    pub md_start_date: Option<NaiveDate>,
    pub sell_through_threshold: f64,
    pub current_inventory: u64,
    pub current_retail_price: f64,
    pub liquidation_price: f64,
}

#[derive(Debug, Clone)]
pub struct InputValidator {
    config: Arc<MarkdownConfig>,
}

impl InputValidator {
    pub fn new(config: Arc<MarkdownConfig>) -> Self {
        Self { config }
    }

    /// Every failed check, in a stable order. Checks never short-circuit each other.
    pub fn violations(&self, req: &MarkdownRequest, today: NaiveDate) -> Vec<String> {
        let checks = [
            check_identifier(&req.club_nbr, "club number", "8299"),
            check_identifier(&req.customer_item_nbr, "item number", "980254364"),
            self.check_oos_date(req, today),
            self.check_md_start_date(req, today),
            check_sell_through_threshold(req),
            check_current_inventory(req),
            check_current_retail_price(req),
            check_liquidation_price(req),
            self.check_cross_fields(req),
        ];

        checks.into_iter().flatten().collect()
    }

    pub fn validate(
        &self,
        req: &MarkdownRequest,
        today: NaiveDate,
    ) -> Result<ValidatedRequest, StageFailure> {
        let violations = self.violations(req, today);
        if !violations.is_empty() {
            return Err(StageFailure::from_remarks(
                ReasonCode::InvalidInput,
                &violations,
            ));
        }

        // Checks above guarantee the date parses and inventory is positive.
        let oos_date = parse_date(&req.oos_date).ok_or_else(|| {
            StageFailure::new(ReasonCode::InvalidInput, "Out-of-stock date is not a valid date.")
        })?;
        let md_start_date = req.md_start_date.as_deref().and_then(parse_date);

        Ok(ValidatedRequest {
            key: req.key(),
            oos_date,
            md_start_date,
            sell_through_threshold: req
                .sell_through_threshold
                .unwrap_or(self.config.default_sell_through_threshold),
            current_inventory: req.current_inventory as u64,
            current_retail_price: req.current_retail_price,
            liquidation_price: req.liquidation_price,
        })
    }

    fn check_oos_date(&self, req: &MarkdownRequest, today: NaiveDate) -> Option<String> {
        let Some(oos_date) = parse_date(&req.oos_date) else {
            return Some(format!(
                "Out-of-stock date '{}' is not a valid YYYY-MM-DD date.",
                req.oos_date
            ));
        };

        let days_ahead = (oos_date - today).num_days();
        if days_ahead >= self.config.max_forecast_weeks * 7 {
            return Some(format!(
                "Out-of-stock date cannot be more than {} weeks from today.",
                self.config.max_forecast_weeks
            ));
        }
        if !self.config.enable_historic_requests && days_ahead < 0 {
            return Some("Out-of-stock date is in the past.".to_string());
        }
        None
    }

    fn check_md_start_date(&self, req: &MarkdownRequest, today: NaiveDate) -> Option<String> {
        let raw = req.md_start_date.as_deref()?;
        let Some(md_start_date) = parse_date(raw) else {
            return Some(format!(
                "Markdown start date '{raw}' is not a valid YYYY-MM-DD date."
            ));
        };

        let days_ahead = (md_start_date - today).num_days();
        if !self.config.enable_historic_requests && days_ahead < 0 {
            return Some("Markdown start date is in the past.".to_string());
        }
        if days_ahead >= self.config.max_forecast_weeks * 7 {
            return Some(format!(
                "Markdown start date cannot be more than {} weeks from today.",
                self.config.max_forecast_weeks
            ));
        }
        None
    }

    fn check_cross_fields(&self, req: &MarkdownRequest) -> Option<String> {
        let mut out = Vec::new();

        let oos_date = parse_date(&req.oos_date);
        let md_start_date = req.md_start_date.as_deref().and_then(parse_date);
        if let (Some(oos), Some(md)) = (oos_date, md_start_date) {
            if (oos - md).num_days() < self.config.min_markdown_gap_days {
                out.push(format!(
                    "Out-of-stock date must be at least {} days after markdown start date.",
                    self.config.min_markdown_gap_days
                ));
            }
        }

        if req.liquidation_price > req.current_retail_price {
            out.push("Liquidation price is greater than current retail price.".to_string());
        }

        if out.is_empty() {
            None
        } else {
            Some(out.join("; "))
        }
    }
}

fn check_identifier(value: &str, label: &str, example: &str) -> Option<String> {
    if value.trim().is_empty() {
        Some(format!(
            "The {label} must be a non-empty string, e.g. '{example}'."
        ))
    } else {
        None
    }
}

fn check_sell_through_threshold(req: &MarkdownRequest) -> Option<String> {
    let stt = req.sell_through_threshold?;
    if (0.0..=1.0).contains(&stt) {
        None
    } else {
        Some(format!("Sell-through threshold must be between 0 and 1 (got {stt})."))
    }
}

fn check_current_inventory(req: &MarkdownRequest) -> Option<String> {
    if req.current_inventory > 0 {
        None
    } else {
        Some("Current on hands must be positive to recommend a price.".to_string())
    }
}

fn check_current_retail_price(req: &MarkdownRequest) -> Option<String> {
    if req.current_retail_price.is_finite() && req.current_retail_price > 0.0 {
        None
    } else {
        Some("Current retail price must be greater than zero.".to_string())
    }
}

fn check_liquidation_price(req: &MarkdownRequest) -> Option<String> {
    if req.liquidation_price.is_finite() && req.liquidation_price >= 0.0 {
        None
    } else {
        Some("Liquidation price must not be negative.".to_string())
    }
}
