use crate::domain::recommendation::OutputRecord;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

const RESULT_INSERT_BATCH: usize = 200;

/// One finished pipeline batch, as written to `markdown_runs` / `markdown_results`.
#[derive(Debug, Clone)]
pub struct MarkdownRun<'a> {
    pub id: Uuid,
    pub business_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    /// Where the batch came from, e.g. `api` or `worker`.
    pub source: &'a str,
    pub results: &'a BTreeMap<String, OutputRecord>,
}

impl MarkdownRun<'_> {
    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.is_successful()).count()
    }
}

pub async fn persist_run(pool: &sqlx::PgPool, run: &MarkdownRun<'_>) -> anyhow::Result<Uuid> {
    let rows: Vec<(&str, &str, &str, &'static str, Value)> = run
        .results
        .iter()
        .map(|(request_id, record)| {
            let json = serde_json::to_value(record)
                .with_context(|| format!("serialize output record failed ({request_id})"))?;
            Ok((
                request_id.as_str(),
                record.input.club_nbr.as_str(),
                record.input.customer_item_nbr.as_str(),
                record.no_reco_reason_code.as_str(),
                json,
            ))
        })
        .collect::<anyhow::Result<_>>()?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query(
        "INSERT INTO markdown_runs (id, business_date, generated_at, source, request_count, success_count) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .persistent(false)
    .bind(run.id)
    .bind(run.business_date)
    .bind(run.generated_at)
    .bind(run.source)
    .bind(run.results.len() as i32)
    .bind(run.success_count() as i32)
    .execute(&mut *tx)
    .await
    .context("insert markdown_runs failed")?;

    for chunk in rows.chunks(RESULT_INSERT_BATCH) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO markdown_results (run_id, request_id, club_nbr, item_nbr, reason_code, record) ",
        );
        qb.push_values(chunk, |mut b, (request_id, club_nbr, item_nbr, reason_code, record)| {
            b.push_bind(run.id)
                .push_bind(*request_id)
                .push_bind(*club_nbr)
                .push_bind(*item_nbr)
                .push_bind(*reason_code)
                .push_bind(record);
        });
        qb.build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch insert markdown_results failed")?;
    }

    tx.commit().await.context("commit transaction failed")?;

    tracing::info!(
        run_id = %run.id,
        business_date = %run.business_date,
        source = run.source,
        requests = run.results.len(),
        successful = run.success_count(),
        "persisted markdown run"
    );
    Ok(run.id)
}
