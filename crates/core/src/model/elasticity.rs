use crate::model::{
    DemandModel, ElasticityCurve, ModelInput, ModelPrediction, ModelProvider, PriceSession,
};
use crate::pipeline::features::{finite_f64, MEDIAN_PRICE, UNITS_WEEKS_BACK};
use crate::time::weeks::week_windows;
use chrono::Duration;
use serde_json::json;

const DEFAULT_ELASTICITY: f64 = 2.0;

/// In-process constant-elasticity demand model.
///
/// Daily demand at price `p` is `base * (p / reference)^-elasticity`, where `base` is the mean
/// of the last four weekly unit counts spread over seven days and `reference` is the six-month
/// median price (falling back to the current retail price). Sales are simulated day by day up
/// to the out-of-stock date and never exceed the remaining inventory.
#[derive(Debug, Clone)]
pub struct ConstantElasticityModel {
    pub elasticity: f64,
}

impl Default for ConstantElasticityModel {
    fn default() -> Self {
        Self {
            elasticity: DEFAULT_ELASTICITY,
        }
    }
}

impl ConstantElasticityModel {
    pub fn new(elasticity: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            elasticity.is_finite() && elasticity > 0.0,
            "elasticity must be positive (got {elasticity})"
        );
        Ok(Self { elasticity })
    }

    fn base_daily_units(input: &ModelInput) -> f64 {
        let total: f64 = UNITS_WEEKS_BACK
            .iter()
            .map(|name| finite_f64(&input.features, name).unwrap_or(0.0).max(0.0))
            .sum();
        total / UNITS_WEEKS_BACK.len() as f64 / 7.0
    }

    fn reference_price(input: &ModelInput) -> f64 {
        finite_f64(&input.features, MEDIAN_PRICE)
            .filter(|p| *p > 0.0)
            .unwrap_or(input.current_retail_price)
    }

    fn simulate(
        &self,
        input: &ModelInput,
        base: f64,
        reference: f64,
        start: chrono::NaiveDate,
        markdown_price: f64,
    ) -> PriceSession {
        let delayed = start > input.today;
        let weeks = week_windows(input.today, input.oos_date).len();

        let mut remaining = input.current_inventory as f64;
        let mut before = 0.0;
        let mut after = 0.0;
        let mut weekly = vec![0.0; weeks];

        let mut day = input.today;
        while day <= input.oos_date {
            let price = if delayed && day < start {
                input.current_retail_price
            } else {
                markdown_price
            };
            let demand = base * (price / reference).powf(-self.elasticity);
            let sold = demand.min(remaining);
            remaining -= sold;

            if delayed && day < start {
                before += sold;
            } else {
                after += sold;
            }
            let week = ((day - input.today).num_days() / 7) as usize;
            if let Some(slot) = weekly.get_mut(week) {
                *slot += sold;
            }
            day = day + Duration::days(1);
        }

        if delayed {
            PriceSession {
                session_prices: vec![input.current_retail_price, markdown_price],
                session_dividing_dates: vec![start],
                session_level_units_sold: vec![before, after],
                week_level_units_sold: weekly,
            }
        } else {
            PriceSession {
                session_prices: vec![markdown_price],
                session_dividing_dates: Vec::new(),
                session_level_units_sold: vec![after],
                week_level_units_sold: weekly,
            }
        }
    }
}

#[async_trait::async_trait]
impl DemandModel for ConstantElasticityModel {
    fn provider(&self) -> ModelProvider {
        ModelProvider::ConstantElasticity
    }

    async fn predict(&self, input: &ModelInput) -> anyhow::Result<ModelPrediction> {
        anyhow::ensure!(
            !input.candidate_prices.is_empty(),
            "no candidate prices for {}",
            input.key
        );
        anyhow::ensure!(
            input.candidate_prices.iter().all(|p| p.is_finite() && *p > 0.0),
            "candidate prices must be positive for {}",
            input.key
        );

        let base = Self::base_daily_units(input);
        let reference = Self::reference_price(input);

        let mut sessions =
            Vec::with_capacity(input.candidate_prices.len() * input.candidate_start_dates.len());
        for &start in &input.candidate_start_dates {
            for &price in &input.candidate_prices {
                sessions.push(self.simulate(input, base, reference, start, price));
            }
        }

        let mut model_features = input.features.clone();
        model_features.insert("elasticity".to_string(), json!(self.elasticity));
        model_features.insert("reference_price".to_string(), json!(reference));
        model_features.insert("base_daily_units".to_string(), json!(base));

        Ok(ModelPrediction {
            curve: ElasticityCurve { sessions },
            model_features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing;

    fn input(prices: Vec<f64>, starts: Vec<chrono::NaiveDate>) -> ModelInput {
        ModelInput {
            key: testing::key("6279", "1"),
            today: testing::today(),
            oos_date: testing::today() + Duration::days(10),
            md_start_date: None,
            current_inventory: 50,
            current_retail_price: 12.8,
            candidate_prices: prices,
            candidate_start_dates: starts,
            features: testing::feature_row(6279, 1, 4),
        }
    }

    #[tokio::test]
    async fn lower_prices_sell_more() {
        let model = ConstantElasticityModel::default();
        let p = model
            .predict(&input(vec![11.52, 6.4], vec![testing::today()]))
            .await
            .unwrap();

        let s = &p.curve.sessions;
        assert_eq!(s.len(), 2);
        assert!(s[1].expected_sale_units() > s[0].expected_sale_units());
        assert!(s[0].session_dividing_dates.is_empty());
        assert_eq!(s[0].week_level_units_sold.len(), 2);
        assert!(p.model_features.contains_key("elasticity"));
    }

    #[tokio::test]
    async fn never_sells_more_than_inventory() {
        let model = ConstantElasticityModel::new(3.0).unwrap();
        let p = model
            .predict(&input(vec![1.0], vec![testing::today()]))
            .await
            .unwrap();

        let session = &p.curve.sessions[0];
        assert!((session.expected_sale_units() - 50.0).abs() < 1e-9);
        let weekly: f64 = session.week_level_units_sold.iter().sum();
        assert!((weekly - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn delayed_start_splits_session() {
        let start = testing::today() + Duration::days(3);
        let model = ConstantElasticityModel::default();
        let p = model.predict(&input(vec![8.0], vec![start])).await.unwrap();

        let s = &p.curve.sessions[0];
        assert_eq!(s.session_prices, vec![12.8, 8.0]);
        assert_eq!(s.session_dividing_dates, vec![start]);
        assert_eq!(s.session_level_units_sold.len(), 2);
        // 3 days at retail: 10 units/week base at reference price 12.8.
        assert!((s.session_level_units_sold[0] - 30.0 / 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejects_empty_price_grid() {
        let model = ConstantElasticityModel::default();
        assert!(model
            .predict(&input(Vec::new(), vec![testing::today()]))
            .await
            .is_err());
    }
}
