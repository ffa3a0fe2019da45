use crate::domain::request::ItemClubKey;
use crate::pipeline::features::{FeatureRecord, FeatureRow, FeatureStore};
use anyhow::Context;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_LOOKUP_BATCH: usize = 500;
const DEFAULT_UPSERT_BATCH: usize = 200;

/// Feature store backed by `item_club_features`. Returns the most recent row per key.
#[derive(Debug, Clone)]
pub struct PgFeatureStore {
    pool: sqlx::PgPool,
    batch_size: usize,
}

impl PgFeatureStore {
    pub fn new(pool: sqlx::PgPool) -> anyhow::Result<Self> {
        let batch_size = env_usize("FEATURE_LOOKUP_BATCH").unwrap_or(DEFAULT_LOOKUP_BATCH);
        anyhow::ensure!(batch_size >= 1, "FEATURE_LOOKUP_BATCH must be >= 1");
        Ok(Self { pool, batch_size })
    }
}

#[async_trait::async_trait]
impl FeatureStore for PgFeatureStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn lookup(&self, keys: &[ItemClubKey]) -> anyhow::Result<HashMap<ItemClubKey, FeatureRow>> {
        let mut out = HashMap::with_capacity(keys.len());

        for (batch_idx, chunk) in keys.chunks(self.batch_size).enumerate() {
            let t0 = std::time::Instant::now();
            let clubs: Vec<String> = chunk.iter().map(|k| k.club_nbr.clone()).collect();
            let items: Vec<String> = chunk.iter().map(|k| k.item_nbr.clone()).collect();

            let rows: Vec<(String, String, Value)> = sqlx::query_as(
                "SELECT DISTINCT ON (f.club_nbr, f.item_nbr) f.club_nbr, f.item_nbr, f.features \
                 FROM item_club_features f \
                 JOIN UNNEST($1::text[], $2::text[]) AS k(club_nbr, item_nbr) \
                   ON f.club_nbr = k.club_nbr AND f.item_nbr = k.item_nbr \
                 ORDER BY f.club_nbr, f.item_nbr, f.as_of_date DESC",
            )
            .persistent(false)
            .bind(&clubs)
            .bind(&items)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("select item_club_features failed (batch {batch_idx})"))?;

            let found = rows.len();
            for (club_nbr, item_nbr, features) in rows {
                let key = ItemClubKey::new(&club_nbr, &item_nbr);
                match features {
                    Value::Object(map) => {
                        out.insert(key, map.into_iter().collect());
                    }
                    other => {
                        tracing::warn!(%key, kind = json_kind(&other), "feature row is not a JSON object");
                    }
                }
            }

            tracing::debug!(
                batch_idx,
                batch_size = chunk.len(),
                found,
                elapsed_ms = t0.elapsed().as_millis(),
                "item_club_features batch lookup"
            );
        }

        Ok(out)
    }
}

/// Writes feature rows for one snapshot date, replacing rows already stored for that date.
pub async fn upsert_features(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    records: &[FeatureRecord],
) -> anyhow::Result<u64> {
    anyhow::ensure!(!records.is_empty(), "records must be non-empty");

    let chunk_size = env_usize("FEATURE_UPSERT_BATCH").unwrap_or(DEFAULT_UPSERT_BATCH);
    anyhow::ensure!(chunk_size >= 1, "FEATURE_UPSERT_BATCH must be >= 1");

    let rows: Vec<(String, String, Value)> = records
        .iter()
        .map(|r| {
            let features = serde_json::to_value(&r.features).with_context(|| {
                format!("serialize features failed ({}/{})", r.club_nbr, r.item_nbr)
            })?;
            Ok((r.club_nbr.trim().to_string(), r.item_nbr.trim().to_string(), features))
        })
        .collect::<anyhow::Result<_>>()?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    for (batch_idx, chunk) in rows.chunks(chunk_size).enumerate() {
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO item_club_features (club_nbr, item_nbr, as_of_date, features) ",
        );
        qb.push_values(chunk, |mut b, (club_nbr, item_nbr, features)| {
            b.push_bind(club_nbr)
                .push_bind(item_nbr)
                .push_bind(as_of_date)
                .push_bind(features);
        });
        qb.push(
            " ON CONFLICT (club_nbr, item_nbr, as_of_date) DO UPDATE \
               SET features = EXCLUDED.features, updated_at = now()",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert item_club_features failed")?;
        affected += res.rows_affected();

        tracing::debug!(
            %as_of_date,
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "item_club_features batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<usize>().ok())
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
