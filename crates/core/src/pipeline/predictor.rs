use crate::domain::contract::ValidatedRequest;
use crate::domain::recommendation::ReasonCode;
use crate::model::{DemandModel, ElasticityCurve, ModelInput, ModelPrediction};
use crate::pipeline::config::MarkdownConfig;
use crate::pipeline::features::{parse_item_features, FeatureRow, ItemFeatures};
use crate::pipeline::policy::{candidate_prices, PriceBand};
use crate::pipeline::StageFailure;
use chrono::{Duration, NaiveDate};
use std::sync::Arc;

/// Output of a successful prediction, handed to the optimizer.
#[derive(Debug, Clone)]
pub struct PredictedItem {
    pub request: ValidatedRequest,
    pub features: ItemFeatures,
    pub prediction: ModelPrediction,
}

/// Wraps the demand model: checks the feature row, builds the candidate grid, calls the model
/// and checks the returned curve. Never lets a model error escape as anything but a row failure.
#[derive(Clone)]
pub struct ElasticityPredictor {
    config: Arc<MarkdownConfig>,
    model: Arc<dyn DemandModel>,
}

impl ElasticityPredictor {
    pub fn new(config: Arc<MarkdownConfig>, model: Arc<dyn DemandModel>) -> Self {
        Self { config, model }
    }

    pub async fn predict(
        &self,
        request: &ValidatedRequest,
        row: &FeatureRow,
        today: NaiveDate,
    ) -> Result<PredictedItem, StageFailure> {
        let features = parse_item_features(row)?;

        let band = PriceBand::for_item(
            &self.config,
            request.current_retail_price,
            request.liquidation_price,
            features.department_nbr,
        );
        if band.is_empty() {
            return Err(StageFailure::new(
                ReasonCode::Liquidation,
                format!(
                    "Liquidation buffer floor {:.2} is above the maximum markdown price {:.2}; item should be liquidated.",
                    band.floor, band.ceiling
                ),
            ));
        }

        let prices = candidate_prices(
            &self.config,
            &band,
            request.current_retail_price,
            features.department_nbr,
        );
        if prices.is_empty() {
            return Err(StageFailure::new(
                ReasonCode::PriceOutlier,
                format!(
                    "No candidate markdown price with an allowed ending lies within [{:.2}, {:.2}].",
                    band.floor, band.ceiling
                ),
            ));
        }

        let input = ModelInput {
            key: request.key.clone(),
            today,
            oos_date: request.oos_date,
            md_start_date: request.md_start_date,
            current_inventory: request.current_inventory,
            current_retail_price: request.current_retail_price,
            candidate_prices: prices,
            candidate_start_dates: candidate_start_dates(&self.config, request, today),
            features: features.raw.clone(),
        };

        let prediction = self.model.predict(&input).await.map_err(|e| {
            let detail = format!("{e:#}");
            tracing::warn!(
                key = %request.key,
                provider = ?self.model.provider(),
                error = %detail,
                "demand model call failed"
            );
            StageFailure::unexpected(format!("Demand model failed: {detail}"))
        })?;

        check_curve(&prediction.curve, request.current_retail_price)?;

        Ok(PredictedItem {
            request: request.clone(),
            features,
            prediction,
        })
    }
}

/// The requested start date, or today plus every following week that still leaves the minimum
/// gap before the out-of-stock date.
pub fn candidate_start_dates(
    config: &MarkdownConfig,
    request: &ValidatedRequest,
    today: NaiveDate,
) -> Vec<NaiveDate> {
    if let Some(start) = request.md_start_date {
        return vec![start];
    }

    let mut out = vec![today];
    let mut start = today + Duration::days(7);
    while (request.oos_date - start).num_days() >= config.min_markdown_gap_days {
        out.push(start);
        start = start + Duration::days(7);
    }
    out
}

fn check_curve(curve: &ElasticityCurve, current_retail_price: f64) -> Result<(), StageFailure> {
    if curve.sessions.is_empty() {
        return Err(StageFailure::new(
            ReasonCode::CurveOutlier,
            "Demand model returned an empty elasticity curve.",
        ));
    }

    let mut curve_problems = Vec::new();
    let mut price_problems = Vec::new();

    for (i, s) in curve.sessions.iter().enumerate() {
        if s.session_prices.is_empty()
            || s.session_prices.len() != s.session_dividing_dates.len() + 1
            || s.session_level_units_sold.len() != s.session_prices.len()
        {
            curve_problems.push(format!("Session {i} has inconsistent price/date/unit lengths."));
        }
        if s
            .session_level_units_sold
            .iter()
            .chain(&s.week_level_units_sold)
            .any(|u| !u.is_finite() || *u < 0.0)
        {
            curve_problems.push(format!("Session {i} predicts non-finite or negative units."));
        }
        if s
            .session_prices
            .iter()
            .any(|p| !p.is_finite() || *p <= 0.0 || *p > current_retail_price)
        {
            price_problems.push(format!(
                "Session {i} has a price outside (0, {current_retail_price:.2}]."
            ));
        }
    }

    if !curve_problems.is_empty() {
        return Err(StageFailure::from_remarks(
            ReasonCode::CurveOutlier,
            &curve_problems,
        ));
    }
    if !price_problems.is_empty() {
        return Err(StageFailure::from_remarks(
            ReasonCode::PriceOutlier,
            &price_problems,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::elasticity::ConstantElasticityModel;
    use crate::model::PriceSession;
    use crate::pipeline::testing::{self, FailingModel, FixedCurveModel};

    fn predictor(model: Arc<dyn DemandModel>) -> ElasticityPredictor {
        ElasticityPredictor::new(Arc::new(MarkdownConfig::default()), model)
    }

    fn fixed(sessions: Vec<PriceSession>) -> ElasticityPredictor {
        predictor(Arc::new(FixedCurveModel { sessions }))
    }

    #[tokio::test]
    async fn predicts_with_constant_elasticity() {
        let p = predictor(Arc::new(ConstantElasticityModel::default()));
        let item = p
            .predict(
                &testing::validated(),
                &testing::feature_row(6279, 1, 4),
                testing::today(),
            )
            .await
            .unwrap();

        assert_eq!(item.features.department_nbr, 4);
        assert_eq!(item.prediction.curve.sessions.len(), 13);
        assert_eq!(item.prediction.curve.sessions[0].session_prices, vec![11.52]);
    }

    #[tokio::test]
    async fn model_error_becomes_unexpected_error() {
        let err = predictor(Arc::new(FailingModel))
            .predict(
                &testing::validated(),
                &testing::feature_row(6279, 1, 4),
                testing::today(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::UnexpectedError);
        assert!(err.remark.contains("model endpoint unreachable"));
    }

    #[tokio::test]
    async fn missing_features_are_incomplete_info() {
        let err = predictor(Arc::new(FailingModel))
            .predict(&testing::validated(), &FeatureRow::new(), testing::today())
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::IncompleteInfo);
    }

    #[tokio::test]
    async fn high_liquidation_price_is_liquidation() {
        let mut req = testing::validated();
        req.liquidation_price = 10.0;
        let err = fixed(Vec::new())
            .predict(&req, &testing::feature_row(6279, 1, 4), testing::today())
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::Liquidation);
    }

    #[tokio::test]
    async fn no_allowed_ending_in_band_is_price_outlier() {
        // Apparel band [9.90, 10.24] holds no price ending in .81.
        let mut req = testing::validated();
        req.liquidation_price = 8.25;
        let err = fixed(Vec::new())
            .predict(&req, &testing::feature_row(6279, 1, 22), testing::today())
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::PriceOutlier);
    }

    #[tokio::test]
    async fn empty_curve_is_curve_outlier() {
        let err = fixed(Vec::new())
            .predict(
                &testing::validated(),
                &testing::feature_row(6279, 1, 4),
                testing::today(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::CurveOutlier);
    }

    #[tokio::test]
    async fn negative_units_are_curve_outlier() {
        let err = fixed(vec![testing::immediate_session(8.0, -1.0, vec![-1.0])])
            .predict(
                &testing::validated(),
                &testing::feature_row(6279, 1, 4),
                testing::today(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::CurveOutlier);
    }

    #[tokio::test]
    async fn price_above_retail_is_price_outlier() {
        let err = fixed(vec![testing::immediate_session(15.0, 5.0, vec![5.0])])
            .predict(
                &testing::validated(),
                &testing::feature_row(6279, 1, 4),
                testing::today(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::PriceOutlier);
    }

    #[test]
    fn start_dates_keep_the_markdown_gap() {
        let cfg = MarkdownConfig::default();
        let today = testing::today();

        let mut req = testing::validated();
        assert_eq!(candidate_start_dates(&cfg, &req, today), vec![today]);

        req.oos_date = today + Duration::days(20);
        assert_eq!(
            candidate_start_dates(&cfg, &req, today),
            vec![
                today,
                today + Duration::days(7),
                today + Duration::days(14)
            ]
        );

        req.md_start_date = Some(today + Duration::days(3));
        assert_eq!(
            candidate_start_dates(&cfg, &req, today),
            vec![today + Duration::days(3)]
        );
    }
}
