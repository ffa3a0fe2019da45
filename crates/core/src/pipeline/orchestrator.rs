use crate::domain::contract::{InputValidator, ValidatedRequest};
use crate::domain::recommendation::{OutputRecord, ReasonCode};
use crate::domain::request::{ItemClubKey, MarkdownRequest, RequestBatch};
use crate::model::DemandModel;
use crate::pipeline::config::MarkdownConfig;
use crate::pipeline::features::{FeatureRow, FeatureStore};
use crate::pipeline::optimizer::{OptimizedItem, PriceGridOptimizer};
use crate::pipeline::output::OutputValidator;
use crate::pipeline::policy::BusinessPolicyEnforcer;
use crate::pipeline::predictor::ElasticityPredictor;
use crate::pipeline::StageFailure;
use crate::time::weeks::week_level_sales;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

type FeatureLookup = Result<HashMap<ItemClubKey, FeatureRow>, String>;

/// Runs a batch of requests through every stage. Always returns exactly one record per request
/// id, whatever fails along the way.
#[derive(Clone)]
pub struct MarkdownPipeline {
    validator: InputValidator,
    feature_store: Arc<dyn FeatureStore>,
    predictor: ElasticityPredictor,
    optimizer: PriceGridOptimizer,
    policy: BusinessPolicyEnforcer,
    output: OutputValidator,
}

impl MarkdownPipeline {
    pub fn new(
        config: Arc<MarkdownConfig>,
        feature_store: Arc<dyn FeatureStore>,
        model: Arc<dyn DemandModel>,
    ) -> Self {
        Self {
            validator: InputValidator::new(config.clone()),
            predictor: ElasticityPredictor::new(config.clone(), model),
            optimizer: PriceGridOptimizer::new(),
            policy: BusinessPolicyEnforcer::new(config),
            output: OutputValidator::new(),
            feature_store,
        }
    }

    pub async fn run(&self, batch: &RequestBatch, today: NaiveDate) -> BTreeMap<String, OutputRecord> {
        let started = Instant::now();

        let validated: BTreeMap<String, Result<ValidatedRequest, StageFailure>> = batch
            .iter()
            .map(|(id, req)| (id.clone(), self.validator.validate(req, today)))
            .collect();

        let features = self.lookup_features(&validated).await;

        let mut rows: BTreeMap<String, Result<OptimizedItem, StageFailure>> = BTreeMap::new();
        for (id, result) in validated {
            let row = match result {
                Ok(req) => self.predict_and_optimize(&req, &features, today).await,
                Err(failure) => Err(failure),
            };
            rows.insert(id, row);
        }

        self.policy.enforce(&mut rows);

        let assembled: BTreeMap<String, OutputRecord> = rows
            .into_iter()
            .filter_map(|(id, row)| {
                let input = batch.get(&id)?;
                let record = assemble_record(input, row, today);
                Some((id, record))
            })
            .collect();

        let out = self.output.validate(batch, assembled, today);

        let mut by_code: BTreeMap<ReasonCode, usize> = BTreeMap::new();
        for record in out.values() {
            *by_code.entry(record.no_reco_reason_code).or_default() += 1;
        }
        tracing::info!(
            requests = batch.len(),
            successful = by_code
                .get(&ReasonCode::RecommendationSuccessful)
                .copied()
                .unwrap_or(0),
            reason_codes = ?by_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            %today,
            "markdown batch complete"
        );

        out
    }

    async fn lookup_features(
        &self,
        validated: &BTreeMap<String, Result<ValidatedRequest, StageFailure>>,
    ) -> FeatureLookup {
        let keys: Vec<ItemClubKey> = validated
            .values()
            .filter_map(|r| r.as_ref().ok())
            .map(|r| r.key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        match self.feature_store.lookup(&keys).await {
            Ok(found) => {
                tracing::debug!(
                    store = self.feature_store.name(),
                    keys = keys.len(),
                    found = found.len(),
                    "feature lookup complete"
                );
                Ok(found)
            }
            Err(e) => {
                let detail = format!("{e:#}");
                tracing::error!(
                    store = self.feature_store.name(),
                    keys = keys.len(),
                    error = %detail,
                    "feature lookup failed"
                );
                Err(detail)
            }
        }
    }

    async fn predict_and_optimize(
        &self,
        request: &ValidatedRequest,
        features: &FeatureLookup,
        today: NaiveDate,
    ) -> Result<OptimizedItem, StageFailure> {
        let found = features.as_ref().map_err(|detail| {
            StageFailure::new(
                ReasonCode::IncompleteInfo,
                format!("Feature lookup failed: {detail}"),
            )
        })?;

        let empty = FeatureRow::new();
        let row = found.get(&request.key).unwrap_or(&empty);

        let predicted = self.predictor.predict(request, row, today).await?;
        self.optimizer.optimize(predicted, today)
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn assemble_record(
    input: &MarkdownRequest,
    row: Result<OptimizedItem, StageFailure>,
    today: NaiveDate,
) -> OutputRecord {
    match row {
        Err(failure) => OutputRecord::passthrough(input, failure.code, failure.remark),
        Ok(item) => OutputRecord {
            input: input.clone(),
            markdown_recommendation: Some(vec![item.recommendation]),
            expected_sale_units: Some(item.expected_sale_units.floor() as i64),
            week_level_expected_sale_units: Some(week_level_sales(
                today,
                item.request.oos_date,
                &item.week_level_units_sold,
            )),
            expected_revenue: Some(round_cents(item.expected_revenue)),
            model_features: item.model_features,
            no_reco_reason_code: ReasonCode::RecommendationSuccessful,
            remark: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::elasticity::ConstantElasticityModel;
    use crate::pipeline::features::InMemoryFeatureStore;
    use crate::pipeline::testing::{self, FailingModel, FixedCurveModel};
    use chrono::Duration;

    struct UnavailableStore;

    #[async_trait::async_trait]
    impl FeatureStore for UnavailableStore {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        async fn lookup(
            &self,
            _keys: &[ItemClubKey],
        ) -> anyhow::Result<HashMap<ItemClubKey, FeatureRow>> {
            anyhow::bail!("connection refused")
        }
    }

    fn store() -> Arc<dyn FeatureStore> {
        let mut s = InMemoryFeatureStore::new();
        s.insert(testing::key("6279", "1"), testing::feature_row(6279, 1, 4));
        s.insert(testing::key("6279", "2"), testing::feature_row(6279, 2, 4));
        Arc::new(s)
    }

    fn pipeline(model: Arc<dyn DemandModel>) -> MarkdownPipeline {
        MarkdownPipeline::new(Arc::new(MarkdownConfig::default()), store(), model)
    }

    fn elasticity_pipeline() -> MarkdownPipeline {
        pipeline(Arc::new(ConstantElasticityModel::default()))
    }

    fn single(req: MarkdownRequest) -> RequestBatch {
        let mut b = RequestBatch::new();
        b.insert("r1".to_string(), req);
        b
    }

    #[tokio::test]
    async fn recommends_price_inside_band() {
        let out = elasticity_pipeline()
            .run(&single(testing::request("6279", "1")), testing::today())
            .await;
        let r = &out["r1"];

        assert_eq!(r.no_reco_reason_code, ReasonCode::RecommendationSuccessful, "{:?}", r.remark);
        let reco = &r.markdown_recommendation.as_ref().unwrap()[0];
        assert!(reco.recommended_markdown_price > 3.6);
        assert!(reco.recommended_markdown_price < 11.52);
        assert_eq!(reco.recommended_markdown_price, 7.68);
        assert_eq!(reco.markdown_session_start_date, testing::today());

        let units = r.expected_sale_units.unwrap();
        assert!((0..=50).contains(&units));
        let revenue = r.expected_revenue.unwrap();
        assert!(revenue >= 0.0 && revenue <= 12.8 * 50.0 + 0.01);

        let weeks = r.week_level_expected_sale_units.as_ref().unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[1].end_date, testing::today() + Duration::days(10));
        assert!(r.model_features.contains_key("elasticity"));
        assert_eq!(r.input, testing::request("6279", "1"));
    }

    #[tokio::test]
    async fn past_oos_date_is_invalid_input() {
        let mut req = testing::request("6279", "1");
        req.oos_date = (testing::today() - Duration::days(2)).to_string();
        let out = elasticity_pipeline().run(&single(req), testing::today()).await;

        assert_eq!(out["r1"].no_reco_reason_code, ReasonCode::InvalidInput);
        assert!(out["r1"].remark.as_deref().unwrap().contains("past"));
        assert!(out["r1"].markdown_recommendation.is_none());
    }

    #[tokio::test]
    async fn liquidation_above_retail_is_invalid_input() {
        let mut req = testing::request("6279", "1");
        req.liquidation_price = 20.0;
        let out = elasticity_pipeline().run(&single(req), testing::today()).await;
        assert_eq!(out["r1"].no_reco_reason_code, ReasonCode::InvalidInput);
    }

    #[tokio::test]
    async fn unknown_item_is_incomplete_info() {
        let out = elasticity_pipeline()
            .run(&single(testing::request("6279", "999")), testing::today())
            .await;
        assert_eq!(out["r1"].no_reco_reason_code, ReasonCode::IncompleteInfo);
        assert!(out["r1"].model_features.is_empty());
    }

    #[tokio::test]
    async fn ninety_nine_cent_pick_is_demoted() {
        let model = FixedCurveModel {
            sessions: vec![testing::immediate_session(9.99, 20.0, vec![12.0, 8.0])],
        };
        let out = pipeline(Arc::new(model))
            .run(&single(testing::request("6279", "1")), testing::today())
            .await;

        let r = &out["r1"];
        assert_eq!(r.no_reco_reason_code, ReasonCode::UnexpectedError);
        assert!(r.remark.as_deref().unwrap().contains(".99"));
        assert!(r.markdown_recommendation.is_none());
        assert!(r.model_features.is_empty());
    }

    #[tokio::test]
    async fn fixed_curve_assembles_rounded_totals() {
        let model = FixedCurveModel {
            sessions: vec![testing::immediate_session(7.04, 20.6, vec![12.6, 8.0])],
        };
        let out = pipeline(Arc::new(model))
            .run(&single(testing::request("6279", "1")), testing::today())
            .await;

        let r = &out["r1"];
        assert!(r.is_successful(), "{:?}", r.remark);
        assert_eq!(r.expected_sale_units, Some(20));
        // 7.04 x 20.6 + 29.4 x 3 = 233.224
        assert_eq!(r.expected_revenue, Some(233.22));
    }

    #[tokio::test]
    async fn model_failure_is_unexpected_error() {
        let out = pipeline(Arc::new(FailingModel))
            .run(&single(testing::request("6279", "1")), testing::today())
            .await;
        assert_eq!(out["r1"].no_reco_reason_code, ReasonCode::UnexpectedError);
        assert!(out["r1"]
            .remark
            .as_deref()
            .unwrap()
            .contains("model endpoint unreachable"));
    }

    #[tokio::test]
    async fn feature_store_outage_degrades_rows() {
        let p = MarkdownPipeline::new(
            Arc::new(MarkdownConfig::default()),
            Arc::new(UnavailableStore),
            Arc::new(ConstantElasticityModel::default()),
        );
        let mut batch = single(testing::request("6279", "1"));
        let mut bad = testing::request("6279", "2");
        bad.current_inventory = 0;
        batch.insert("r2".to_string(), bad);

        let out = p.run(&batch, testing::today()).await;
        assert_eq!(out["r1"].no_reco_reason_code, ReasonCode::IncompleteInfo);
        assert!(out["r1"]
            .remark
            .as_deref()
            .unwrap()
            .contains("connection refused"));
        assert_eq!(out["r2"].no_reco_reason_code, ReasonCode::InvalidInput);
    }

    #[tokio::test]
    async fn every_request_gets_one_record() {
        let mut batch = RequestBatch::new();
        batch.insert("ok".to_string(), testing::request("6279", "1"));
        batch.insert("ok-2".to_string(), testing::request("6279", "2"));
        batch.insert("missing".to_string(), testing::request("1", "1"));
        let mut invalid = testing::request("6279", "1");
        invalid.current_retail_price = 0.0;
        batch.insert("invalid".to_string(), invalid);

        let out = elasticity_pipeline().run(&batch, testing::today()).await;
        assert_eq!(
            out.keys().collect::<Vec<_>>(),
            batch.keys().collect::<Vec<_>>()
        );
        for (id, r) in &out {
            assert_eq!(&r.input, &batch[id]);
            assert_eq!(
                r.is_successful(),
                r.markdown_recommendation
                    .as_ref()
                    .is_some_and(|v| !v.is_empty())
            );
        }
    }

    #[tokio::test]
    async fn same_batch_gives_same_output() {
        let mut batch = RequestBatch::new();
        batch.insert("a".to_string(), testing::request("6279", "1"));
        batch.insert("b".to_string(), testing::request("6279", "2"));
        let p = elasticity_pipeline();

        let first = p.run(&batch, testing::today()).await;
        let second = p.run(&batch, testing::today()).await;
        assert_eq!(first, second);
    }
}
