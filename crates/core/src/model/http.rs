use crate::config::Settings;
use crate::model::error::ModelDiagnosticsError;
use crate::model::{DemandModel, ModelInput, ModelPrediction, ModelProvider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PREDICT_PATH: &str = "/v1/predict";

/// Remote demand model served over HTTP. One POST per item, no retries: a failed call becomes
/// a row-level error in the predictor.
#[derive(Debug, Clone)]
pub struct HttpDemandModel {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDemandModel {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_demand_model_url()?.to_string();
        let timeout_secs = std::env::var("DEMAND_MODEL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build demand model http client")?;

        Ok(Self {
            http,
            base_url,
            api_key: settings.demand_model_api_key.clone(),
        })
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = self.api_key.as_deref() {
            headers.insert(
                "authorization",
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .context("DEMAND_MODEL_API_KEY is not a valid header value")?,
            );
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl DemandModel for HttpDemandModel {
    fn provider(&self) -> ModelProvider {
        ModelProvider::Http
    }

    async fn predict(&self, input: &ModelInput) -> anyhow::Result<ModelPrediction> {
        let url = format!("{}{PREDICT_PATH}", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(self.headers()?)
            .json(input)
            .send()
            .await
            .with_context(|| format!("demand model request failed ({})", input.key))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read demand model response body")?;
        if !status.is_success() {
            return Err(ModelDiagnosticsError {
                provider: ModelProvider::Http,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
            }
            .into());
        }

        decode_prediction(&text)
    }
}

fn decode_prediction(text: &str) -> anyhow::Result<ModelPrediction> {
    serde_json::from_str::<ModelPrediction>(text).map_err(|err| {
        ModelDiagnosticsError {
            provider: ModelProvider::Http,
            stage: "decode",
            detail: err.to_string(),
            raw_output: Some(text.to_string()),
        }
        .into()
    })
}
