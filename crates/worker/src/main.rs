use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use markdown_core::config::Settings;
use markdown_core::model::elasticity::ConstantElasticityModel;
use markdown_core::model::http::HttpDemandModel;
use markdown_core::model::DemandModel;
use markdown_core::pipeline::config::MarkdownConfig;
use markdown_core::pipeline::features::{FeatureStore, InMemoryFeatureStore};
use markdown_core::pipeline::MarkdownPipeline;
use markdown_core::storage::features::{upsert_features, PgFeatureStore};
use markdown_core::storage::runs::{persist_run, MarkdownRun};
use markdown_core::time::business_date::resolve_business_date;

mod batch;

#[derive(Debug, Parser)]
#[command(name = "markdown_worker")]
struct Args {
    /// JSON file mapping request id to markdown request.
    #[arg(long)]
    requests: PathBuf,

    /// JSON file of `{club_nbr, item_nbr, features}` rows. Read from Postgres when omitted.
    #[arg(long)]
    features: Option<PathBuf>,

    /// Business date (YYYY-MM-DD). Defaults to today in the business time zone.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Write results here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Also upsert the `--features` rows into Postgres for the business date.
    #[arg(long)]
    store_features: bool,

    /// Do everything except writing to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        !args.store_features || args.features.is_some(),
        "--store-features requires --features"
    );

    let business_date = resolve_business_date(args.as_of_date.as_deref(), chrono::Utc::now())?;

    let requests = batch::load_requests(&args.requests)?;
    batch::BatchOptions::from_env().check(&requests)?;

    let config = Arc::new(MarkdownConfig::from_env()?);
    let model = demand_model(&settings)?;

    let needs_db = !args.dry_run || args.features.is_none();
    let pool = if needs_db {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        markdown_core::storage::migrate(&pool).await?;
        Some(pool)
    } else {
        None
    };

    let feature_store: Arc<dyn FeatureStore> = match (&args.features, &pool) {
        (Some(path), _) => {
            let records = batch::load_feature_records(path)?;
            if args.store_features && !args.dry_run {
                if let Some(pool) = &pool {
                    let affected = upsert_features(pool, business_date, &records).await?;
                    tracing::info!(%business_date, affected, "stored feature rows");
                }
            }
            Arc::new(InMemoryFeatureStore::from_records(records))
        }
        (None, Some(pool)) => Arc::new(PgFeatureStore::new(pool.clone())?),
        (None, None) => anyhow::bail!("no feature source: pass --features or set DATABASE_URL"),
    };

    tracing::info!(
        %business_date,
        requests = requests.len(),
        feature_store = feature_store.name(),
        provider = ?model.provider(),
        dry_run = args.dry_run,
        "markdown run starting"
    );

    let pipeline = MarkdownPipeline::new(config, feature_store, model);
    let results = pipeline.run(&requests, business_date).await;

    for (code, count) in batch::summarize(&results) {
        tracing::info!(reason_code = %code, count, "markdown run summary");
    }

    batch::write_results(args.output.as_deref(), &results)?;

    if args.dry_run {
        tracing::info!(%business_date, dry_run = true, "skipping persistence");
        return Ok(());
    }

    if let Some(pool) = &pool {
        let run = MarkdownRun {
            id: uuid::Uuid::new_v4(),
            business_date,
            generated_at: chrono::Utc::now(),
            source: "worker",
            results: &results,
        };
        if let Err(err) = persist_run(pool, &run).await {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%business_date, run_id = %run.id, error = %err, "failed to persist markdown run");
            return Err(err);
        }
    }

    Ok(())
}

fn demand_model(settings: &Settings) -> anyhow::Result<Arc<dyn DemandModel>> {
    if settings.demand_model_url.is_some() {
        Ok(Arc::new(HttpDemandModel::from_settings(settings)?))
    } else {
        Ok(Arc::new(ConstantElasticityModel::default()))
    }
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
