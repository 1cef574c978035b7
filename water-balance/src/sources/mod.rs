pub mod meter_readings_db;
pub mod meter_sheet_csv_file;

pub use meter_readings_db::MeterReadingsDbSource;
pub use meter_sheet_csv_file::MeterSheetCsvFileSource;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::{
    config::{AppConfig, SourceKind},
    pipeline::collect_rows,
    registry::MeterRegistry,
};

/// Load and normalize the configured year's meters from the configured source.
pub async fn load_registry(cfg: &AppConfig) -> anyhow::Result<MeterRegistry> {
    let year = cfg.source.year;

    let rows = match cfg.source.kind {
        SourceKind::Csv => {
            let path = cfg
                .source
                .csv_path
                .as_deref()
                .context("csv source requires source.csv_path")?;
            collect_rows(&MeterSheetCsvFileSource::new(path)).await?
        }
        SourceKind::Pgwire => {
            let db = cfg
                .database
                .as_ref()
                .context("pgwire source requires a [database] section")?;
            let pool = PgPoolOptions::new()
                .max_connections(db.max_connections)
                .connect(&db.uri)
                .await?;
            collect_rows(&MeterReadingsDbSource::new(pool, year)).await?
        }
    };

    let registry = MeterRegistry::from_raw_rows(&rows, year);
    tracing::info!(
        year,
        source = ?cfg.source.kind,
        meters = registry.records.len(),
        periods = registry.available_periods().len(),
        "registry loaded"
    );
    Ok(registry)
}
