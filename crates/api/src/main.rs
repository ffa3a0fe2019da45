use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use markdown_core::config::Settings;
use markdown_core::domain::recommendation::OutputRecord;
use markdown_core::domain::request::RequestBatch;
use markdown_core::model::elasticity::ConstantElasticityModel;
use markdown_core::model::http::HttpDemandModel;
use markdown_core::model::DemandModel;
use markdown_core::pipeline::config::MarkdownConfig;
use markdown_core::pipeline::MarkdownPipeline;
use markdown_core::storage::features::PgFeatureStore;
use markdown_core::storage::runs::{persist_run, MarkdownRun};
use markdown_core::time::business_date::resolve_business_date;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let config = Arc::new(MarkdownConfig::from_env()?);
    let model = demand_model(&settings)?;
    tracing::info!(provider = ?model.provider(), "demand model configured");

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match markdown_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let pipeline = match &pool {
        Some(pool) => Some(Arc::new(MarkdownPipeline::new(
            config,
            Arc::new(PgFeatureStore::new(pool.clone())?),
            model,
        ))),
        None => None,
    };

    let app = router(AppState { pipeline, pool });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn demand_model(settings: &Settings) -> anyhow::Result<Arc<dyn DemandModel>> {
    if settings.demand_model_url.is_some() {
        Ok(Arc::new(HttpDemandModel::from_settings(settings)?))
    } else {
        Ok(Arc::new(ConstantElasticityModel::default()))
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/markdown/recommendations", post(post_recommendations))
        .route("/markdown/runs/:run_id", get(get_run))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pipeline: Option<Arc<MarkdownPipeline>>,
    pool: Option<PgPool>,
}

#[derive(Debug, Default, Deserialize)]
struct RunParams {
    as_of_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecommendationResponse {
    status: &'static str,
    run_id: Uuid,
    business_date: NaiveDate,
    data: BTreeMap<String, OutputRecord>,
}

async fn post_recommendations(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
    Json(batch): Json<RequestBatch>,
) -> Result<Json<RecommendationResponse>, StatusCode> {
    let Some(pipeline) = &state.pipeline else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let business_date = resolve_business_date(params.as_of_date.as_deref(), Utc::now())
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let data = pipeline.run(&batch, business_date).await;
    let run_id = Uuid::new_v4();

    if let Some(pool) = &state.pool {
        let run = MarkdownRun {
            id: run_id,
            business_date,
            generated_at: Utc::now(),
            source: "api",
            results: &data,
        };
        if let Err(e) = persist_run(pool, &run).await {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(%run_id, error = %e, "failed to persist markdown run");
        }
    }

    Ok(Json(RecommendationResponse {
        status: "SUCCESS",
        run_id,
        business_date,
        data,
    }))
}

#[derive(Debug, Serialize)]
struct ApiRun {
    run_id: Uuid,
    business_date: NaiveDate,
    generated_at: DateTime<Utc>,
    source: String,
    data: BTreeMap<String, OutputRecord>,
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<ApiRun>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let run_id = Uuid::parse_str(&run_id).map_err(|_| StatusCode::BAD_REQUEST)?;

    let run = fetch_run(pool, run_id)
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(run))
}

async fn fetch_run(pool: &PgPool, run_id: Uuid) -> anyhow::Result<Option<ApiRun>> {
    let row = sqlx::query_as::<_, (NaiveDate, DateTime<Utc>, String)>(
        "SELECT business_date, generated_at, source \
         FROM markdown_runs \
         WHERE id = $1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    let Some((business_date, generated_at, source)) = row else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, (String, Value)>(
        "SELECT request_id, record \
         FROM markdown_results \
         WHERE run_id = $1 \
         ORDER BY request_id ASC",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    let mut data = BTreeMap::new();
    for (request_id, record) in rows {
        let record: OutputRecord = serde_json::from_value(record).map_err(|e| {
            anyhow::anyhow!("invalid stored record for run_id={run_id}, request_id={request_id}: {e}")
        })?;
        data.insert(request_id, record);
    }

    Ok(Some(ApiRun {
        run_id,
        business_date,
        generated_at,
        source,
        data,
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use markdown_core::domain::request::ItemClubKey;
    use markdown_core::pipeline::features::{FeatureRow, InMemoryFeatureStore};
    use serde_json::json;
    use tower::ServiceExt;

    fn feature_row() -> FeatureRow {
        let mut row = FeatureRow::new();
        row.insert("club_nbr".to_string(), json!(6279));
        row.insert("item_nbr".to_string(), json!(980407953));
        row.insert("subclass_nbr".to_string(), json!(410));
        row.insert("department_nbr".to_string(), json!(4));
        row.insert("median_price_6_month_last_amt".to_string(), json!(12.8));
        for week in 1..=4 {
            row.insert(
                format!("price_{week}_week_back_median_price_6_month_last_nbr"),
                json!(1.0),
            );
            row.insert(format!("unit_sold_{week}_week_back_cnt"), json!(10.0));
        }
        row
    }

    fn serving_state() -> AppState {
        let mut store = InMemoryFeatureStore::new();
        store.insert(ItemClubKey::new("6279", "980407953"), feature_row());
        let pipeline = MarkdownPipeline::new(
            Arc::new(MarkdownConfig::default()),
            Arc::new(store),
            Arc::new(ConstantElasticityModel::default()),
        );
        AppState {
            pipeline: Some(Arc::new(pipeline)),
            pool: None,
        }
    }

    fn degraded_state() -> AppState {
        AppState {
            pipeline: None,
            pool: None,
        }
    }

    fn batch_body() -> Body {
        Body::from(
            json!({
                "r1": {
                    "club_nbr": "6279",
                    "customer_item_nbr": "980407953",
                    "oos_date": "2026-03-12",
                    "md_start_date": null,
                    "sell_through_threshold": null,
                    "current_inventory": 50,
                    "current_retail_price": 12.8,
                    "liquidation_price": 3.0
                },
                "r2": {
                    "club_nbr": "6279",
                    "customer_item_nbr": "980407953",
                    "oos_date": "2026-02-20",
                    "current_inventory": 50,
                    "current_retail_price": 12.8,
                    "liquidation_price": 3.0
                }
            })
            .to_string(),
        )
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(batch_body())
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let res = router(degraded_state())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn batch_endpoint_is_unavailable_without_pipeline() {
        let res = router(degraded_state())
            .oneshot(post("/markdown/recommendations"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn runs_are_unavailable_without_database() {
        let res = router(serving_state())
            .oneshot(
                Request::builder()
                    .uri(format!("/markdown/runs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn returns_one_record_per_request_id() {
        let res = router(serving_state())
            .oneshot(post("/markdown/recommendations?as_of_date=2026-03-02"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["status"], "SUCCESS");
        assert_eq!(v["business_date"], "2026-03-02");
        assert_eq!(v["data"].as_object().unwrap().len(), 2);

        let ok = &v["data"]["r1"];
        assert_eq!(ok["no_reco_reason_code"], "recommendation_successful");
        assert_eq!(ok["club_nbr"], "6279");
        assert_eq!(ok["markdown_recommendation"].as_array().unwrap().len(), 1);

        let past = &v["data"]["r2"];
        assert_eq!(past["no_reco_reason_code"], "invalid_input");
        assert!(past["remark"].as_str().unwrap().contains("past"));
        assert!(past["markdown_recommendation"].is_null());
    }

    #[tokio::test]
    async fn rejects_malformed_business_date() {
        let res = router(serving_state())
            .oneshot(post("/markdown/recommendations?as_of_date=03-02-2026"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
