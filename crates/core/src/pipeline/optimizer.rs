use crate::domain::contract::ValidatedRequest;
use crate::domain::recommendation::{MarkdownRecommendation, ReasonCode};
use crate::model::PriceSession;
use crate::pipeline::predictor::PredictedItem;
use crate::pipeline::StageFailure;
use chrono::NaiveDate;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// The chosen price path for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedItem {
    pub request: ValidatedRequest,
    pub department_nbr: i64,
    pub recommendation: MarkdownRecommendation,
    /// Unrounded sum of the selected session's units.
    pub expected_sale_units: f64,
    pub expected_revenue: f64,
    pub week_level_units_sold: Vec<f64>,
    pub model_features: BTreeMap<String, Value>,
}

#[derive(Debug)]
struct ScoredSession<'a> {
    session: &'a PriceSession,
    sell_through: f64,
    revenue: f64,
}

/// Picks the revenue-maximizing session among those that clear the sell-through floor.
#[derive(Debug, Clone, Default)]
pub struct PriceGridOptimizer;

impl PriceGridOptimizer {
    pub fn new() -> Self {
        Self
    }

    pub fn optimize(
        &self,
        item: PredictedItem,
        today: NaiveDate,
    ) -> Result<OptimizedItem, StageFailure> {
        let request = &item.request;
        let inventory = request.current_inventory as f64;

        let scored: Vec<ScoredSession<'_>> = item
            .prediction
            .curve
            .sessions
            .iter()
            .map(|session| {
                let units = session.expected_sale_units();
                let sold_revenue: f64 = session
                    .session_level_units_sold
                    .iter()
                    .zip(&session.session_prices)
                    .map(|(u, p)| u * p)
                    .sum();
                ScoredSession {
                    session,
                    sell_through: units / inventory,
                    revenue: sold_revenue + (inventory - units) * request.liquidation_price,
                }
            })
            .collect();

        let best_sell_through = scored
            .iter()
            .map(|s| s.sell_through)
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = best_sell_through.min(request.sell_through_threshold);

        let survivors: Vec<&ScoredSession<'_>> =
            scored.iter().filter(|s| s.sell_through >= floor).collect();
        let best_revenue = survivors
            .iter()
            .map(|s| s.revenue)
            .fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<&ScoredSession<'_>> = survivors
            .iter()
            .copied()
            .filter(|s| s.revenue == best_revenue)
            .collect();

        tracing::debug!(
            key = %request.key,
            sessions = scored.len(),
            survivors = survivors.len(),
            tied = tied.len(),
            sell_through_floor = floor,
            best_revenue,
            "optimized price grid"
        );

        let Some(chosen) = break_ties(tied) else {
            return Err(StageFailure::new(
                ReasonCode::CurveOutlier,
                "No price session survived optimization.",
            ));
        };
        let Some(price) = chosen.session.markdown_price() else {
            return Err(StageFailure::new(
                ReasonCode::CurveOutlier,
                "Selected price session has no price.",
            ));
        };

        Ok(OptimizedItem {
            request: item.request.clone(),
            department_nbr: item.features.department_nbr,
            recommendation: MarkdownRecommendation {
                markdown_session_start_date: chosen
                    .session
                    .session_dividing_dates
                    .first()
                    .copied()
                    .unwrap_or(today),
                recommended_markdown_price: price,
            },
            expected_sale_units: chosen.session.expected_sale_units(),
            expected_revenue: chosen.revenue,
            week_level_units_sold: chosen.session.week_level_units_sold.clone(),
            model_features: item.prediction.model_features,
        })
    }
}

/// Highest price path first, then earliest start dates, then original order.
fn break_ties<'a, 'b>(tied: Vec<&'b ScoredSession<'a>>) -> Option<&'b ScoredSession<'a>> {
    let highest = tied
        .iter()
        .map(|s| s.session.session_prices.as_slice())
        .max_by(|a, b| cmp_prices(a, b))?;
    let by_price: Vec<&ScoredSession<'a>> = tied
        .iter()
        .copied()
        .filter(|s| cmp_prices(&s.session.session_prices, highest) == Ordering::Equal)
        .collect();

    let earliest = by_price
        .iter()
        .map(|s| &s.session.session_dividing_dates)
        .min()?;
    by_price
        .iter()
        .copied()
        .find(|s| &s.session.session_dividing_dates == earliest)
}

fn cmp_prices(a: &[f64], b: &[f64]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}
