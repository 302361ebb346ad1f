use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use crate::batch::StateReport;
use crate::models::{CaseRecord, EstimationRun};
use crate::source::CaseTable;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Upserts case counts, keyed on region and date. Returns the number of rows
/// inserted or changed.
pub async fn import_records(pool: &PgPool, records: &[CaseRecord]) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;
    let mut affected = 0u64;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO rt_estimates.case_counts (state, district, observed_on, count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (state, district, observed_on) DO UPDATE
            SET count = EXCLUDED.count, imported_at = now()
            WHERE rt_estimates.case_counts.count IS DISTINCT FROM EXCLUDED.count
            "#,
        )
        .bind(&record.state)
        .bind(record.district.as_deref().unwrap_or(""))
        .bind(record.date)
        .bind(record.count)
        .execute(&mut *tx)
        .await?;

        affected += result.rows_affected();
    }

    tx.commit().await?;
    Ok(affected)
}

pub async fn fetch_cases(pool: &PgPool, state: &str) -> anyhow::Result<CaseTable> {
    let rows = sqlx::query(
        "SELECT state, district, observed_on, count \
         FROM rt_estimates.case_counts \
         WHERE state = $1 \
         ORDER BY district, observed_on",
    )
    .bind(state)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let district: String = row.get("district");
        let date: NaiveDate = row.get("observed_on");
        records.push(CaseRecord {
            state: row.get("state"),
            district: Some(district).filter(|name| !name.is_empty()),
            date,
            count: row.get("count"),
        });
    }

    Ok(CaseTable::from_records(records))
}

/// Stores every retained row of a state report under its run id.
pub async fn store_report(pool: &PgPool, report: &StateReport) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;
    let mut stored = 0u64;

    let mut runs: Vec<(&str, Option<u32>, &EstimationRun)> = Vec::new();
    if let Ok(run) = &report.state_result {
        runs.push(("", None, run));
    }
    for (district, run) in report.succeeded() {
        runs.push((district.as_str(), report.districts[district].district_id, run));
    }

    for (district, district_id, run) in runs {
        for row in run.rows() {
            let result = sqlx::query(
                r#"
                INSERT INTO rt_estimates.estimates
                (run_id, state_code, state, district, district_id, estimated_on,
                 rt_pred, rt_ci_lower, rt_ci_upper, t_pred, t_ci_lower, t_ci_upper,
                 total_cases, new_cases)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (run_id, district, estimated_on) DO NOTHING
                "#,
            )
            .bind(report.run_id)
            .bind(&report.state_code)
            .bind(&report.state)
            .bind(district)
            .bind(district_id_column(district_id))
            .bind(row.date)
            .bind(row.rt_pred)
            .bind(row.rt_ci_lower)
            .bind(row.rt_ci_upper)
            .bind(row.t_pred)
            .bind(row.t_ci_lower)
            .bind(row.t_ci_upper)
            .bind(row.total_cases)
            .bind(row.new_cases)
            .execute(&mut *tx)
            .await?;

            stored += result.rows_affected();
        }
    }

    tx.commit().await?;
    Ok(stored)
}

fn district_id_column(id: Option<u32>) -> Option<i64> {
    id.map(i64::from)
}
