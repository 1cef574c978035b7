use sqlx::PgPool;
use water_client::{db, domain::RawRow};

use crate::pipeline::{Envelope, PipelineError, RowStream, Source};

/// Database source: one query for the year's readings, pivoted into
/// sheet-shaped rows (one per account) so it normalizes exactly like a CSV.
pub struct MeterReadingsDbSource {
    pool: PgPool,
    year: i32,
}

impl MeterReadingsDbSource {
    pub fn new(pool: PgPool, year: i32) -> Self {
        Self { pool, year }
    }
}

#[async_trait::async_trait]
impl Source<RawRow> for MeterReadingsDbSource {
    async fn stream(&self) -> RowStream<RawRow> {
        let pool = self.pool.clone();
        let year = self.year;
        let s = async_stream::try_stream! {
            let readings = db::meter_readings_for_year(&pool, year)
                .await
                .map_err(|e| {
                    metrics::counter!("water_db_source_errors_total").increment(1);
                    PipelineError::Source(format!("failed to load meter readings for {year}: {e}"))
                })?;

            tracing::debug!(year, readings = readings.len(), "meter readings fetched");

            for row in db::pivot_to_raw_rows(&readings) {
                yield Envelope::now(row);
            }
        };

        Box::pin(s)
    }
}
