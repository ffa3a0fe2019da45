use crate::domain::recommendation::ReasonCode;
use crate::pipeline::config::{CriticalPricePoints, MarkdownConfig};
use crate::pipeline::optimizer::OptimizedItem;
use crate::pipeline::StageFailure;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rounding slack for price comparisons against policy limits.
pub const PRICE_SLACK: f64 = 0.01;
const ENDING_TOLERANCE: f64 = 1e-6;

/// Allowable markdown price range for one item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBand {
    /// Lowest allowed price (liquidation buffer, department minimum).
    pub floor: f64,
    /// Highest allowed price (minimum percent and dollar discount).
    pub ceiling: f64,
}

impl PriceBand {
    pub fn for_item(
        config: &MarkdownConfig,
        current_retail_price: f64,
        liquidation_price: f64,
        department_nbr: i64,
    ) -> Self {
        Self {
            floor: min_price(config, liquidation_price, department_nbr),
            ceiling: max_price(config, current_retail_price, department_nbr),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.floor > self.ceiling
    }
}

fn max_price(config: &MarkdownConfig, current_retail_price: f64, department_nbr: i64) -> f64 {
    let pct = config.min_percent_discount_for(department_nbr);
    (current_retail_price * (1.0 - pct / 100.0))
        .min(current_retail_price - config.min_dollar_discount)
}

fn min_price(config: &MarkdownConfig, liquidation_price: f64, department_nbr: i64) -> f64 {
    (liquidation_price * (1.0 + config.buffer_percent_over_liquidation / 100.0))
        .max(config.min_markdown_price_for(department_nbr))
}

/// Candidate markdown prices, highest first.
///
/// Walks down from the band ceiling in steps of `retail * discount_spacing` (in whole cents),
/// moving each step onto an allowed price ending and dropping anything that leaves the band.
pub fn candidate_prices(
    config: &MarkdownConfig,
    band: &PriceBand,
    current_retail_price: f64,
    department_nbr: i64,
) -> Vec<f64> {
    if band.is_empty() {
        return Vec::new();
    }

    let ceiling = (band.ceiling * 100.0 + ENDING_TOLERANCE).floor() as i64;
    let floor = ((band.floor * 100.0 - ENDING_TOLERANCE).ceil() as i64).max(1);
    let step = ((current_retail_price * config.discount_spacing * 100.0).round() as i64).max(1);
    let critical = config.critical_price_points_for(department_nbr);

    let mut out = Vec::new();
    let mut cents = ceiling;
    while cents >= floor {
        if let Some(adjusted) = adjust_price_ending(cents, critical) {
            if (floor..=ceiling).contains(&adjusted) {
                out.push(adjusted);
            }
        }
        cents -= step;
    }

    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    out.into_iter().map(|c| c as f64 / 100.0).collect()
}

fn adjust_price_ending(cents: i64, critical: Option<&CriticalPricePoints>) -> Option<i64> {
    let Some(group) = critical else {
        return Some(if cents % 100 == 99 { cents - 1 } else { cents });
    };

    let mut endings: Vec<i64> = group
        .endings
        .iter()
        .map(|e| (e * 100.0).round() as i64)
        .collect();
    endings.sort_unstable();

    let dollars = cents / 100;
    let frac = cents % 100;
    if let Some(e) = endings.iter().rev().find(|e| **e <= frac) {
        return Some(dollars * 100 + e);
    }
    if dollars >= 1 {
        return endings.last().map(|e| (dollars - 1) * 100 + e);
    }
    None
}

fn fractional_part(price: f64) -> f64 {
    price - price.trunc()
}

/// Re-checks every successful recommendation against the pricing policies.
#[derive(Debug, Clone)]
pub struct BusinessPolicyEnforcer {
    config: Arc<MarkdownConfig>,
}

impl BusinessPolicyEnforcer {
    pub fn new(config: Arc<MarkdownConfig>) -> Self {
        Self { config }
    }

    pub fn violations(&self, item: &OptimizedItem) -> Vec<String> {
        [
            self.check_minimum_discount(item),
            self.check_price_floor(item),
            check_ninety_nine_cents(item),
            self.check_critical_price_point(item),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Demotes every successful row that breaks a policy. Violations are collected over the
    /// whole batch first, then merged back in one pass.
    pub fn enforce(&self, rows: &mut BTreeMap<String, Result<OptimizedItem, StageFailure>>) {
        let demoted: Vec<(String, StageFailure)> = rows
            .iter()
            .filter_map(|(id, row)| {
                let item = row.as_ref().ok()?;
                let violations = self.violations(item);
                if violations.is_empty() {
                    None
                } else {
                    Some((
                        id.clone(),
                        StageFailure::from_remarks(ReasonCode::UnexpectedError, &violations),
                    ))
                }
            })
            .collect();

        for (id, failure) in demoted {
            tracing::warn!(request_id = %id, remark = %failure.remark, "business policy violation");
            rows.insert(id, Err(failure));
        }
    }

    fn check_minimum_discount(&self, item: &OptimizedItem) -> Option<String> {
        let price = item.recommendation.recommended_markdown_price;
        let retail = item.request.current_retail_price;
        let pct = self.config.min_percent_discount_for(item.department_nbr);

        let above_percent = price > retail * (1.0 - pct / 100.0) + PRICE_SLACK;
        let above_dollar = price > retail - self.config.min_dollar_discount + PRICE_SLACK;
        if above_percent || above_dollar {
            Some(format!(
                "No price recommendation within allowable range: {price:.2} does not meet the minimum discount of {pct}% and ${:.2}.",
                self.config.min_dollar_discount
            ))
        } else {
            None
        }
    }

    fn check_price_floor(&self, item: &OptimizedItem) -> Option<String> {
        let price = item.recommendation.recommended_markdown_price;
        let liquidation_floor = item.request.liquidation_price
            * (1.0 + self.config.buffer_percent_over_liquidation / 100.0);
        let department_floor = self.config.min_markdown_price_for(item.department_nbr);

        if price < liquidation_floor - PRICE_SLACK {
            return Some(format!(
                "No price recommendation within allowable range: {price:.2} is below the liquidation buffer floor {liquidation_floor:.2}."
            ));
        }
        if price < department_floor - PRICE_SLACK {
            return Some(format!(
                "No price recommendation within allowable range: {price:.2} is below the department minimum {department_floor:.2}."
            ));
        }
        None
    }

    fn check_critical_price_point(&self, item: &OptimizedItem) -> Option<String> {
        let group = self.config.critical_price_points_for(item.department_nbr)?;
        let price = item.recommendation.recommended_markdown_price;
        let frac = fractional_part(price);
        if group
            .endings
            .iter()
            .any(|e| (frac - e).abs() < ENDING_TOLERANCE)
        {
            None
        } else {
            Some(format!(
                "Price point ending check failed: {price:.2} must end in one of {:?} for {} departments.",
                group.endings, group.name
            ))
        }
    }
}

fn check_ninety_nine_cents(item: &OptimizedItem) -> Option<String> {
    let price = item.recommendation.recommended_markdown_price;
    if (fractional_part(price) - 0.99).abs() < ENDING_TOLERANCE {
        Some(format!(
            "Price point ending check failed: markdown price {price:.2} must not end in .99."
        ))
    } else {
        None
    }
}
