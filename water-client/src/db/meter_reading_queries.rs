use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgPool;
use time::{Date, Month};

use crate::domain::{Period, RawCell, RawRow};

/// One `(meter, month)` reading as stored in the database, with the meter's
/// hierarchy attributes denormalised onto it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MeterReadingRow {
    pub meter_name: String,
    pub account_number: String,
    pub level: Option<String>,
    pub zone: Option<String>,
    pub meter_type: Option<String>,
    pub parent_meter: Option<String>,
    /// First day of the reading month.
    pub reading_month: Date,
    pub volume: Option<f64>,
}

/// Fetch every meter reading that falls inside `year`.
pub async fn meter_readings_for_year(pool: &PgPool, year: i32) -> Result<Vec<MeterReadingRow>> {
    let start = Date::from_calendar_date(year, Month::January, 1)?;
    let end = Date::from_calendar_date(year + 1, Month::January, 1)?;

    let rows = sqlx::query_as::<_, MeterReadingRow>(
        r#"
        SELECT
            m.meter_name,
            m.account_number,
            m.level,
            m.zone,
            m.meter_type,
            m.parent_meter,
            r.reading_month,
            r.volume
        FROM water_meters m
        JOIN water_meter_readings r ON r.account_number = m.account_number
        WHERE r.reading_month >= $1
          AND r.reading_month <  $2
        ORDER BY m.account_number, r.reading_month
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Pivot per-month rows into one sheet-shaped row per account, with one
/// `Mon-YY` column per reading. Accounts keep the order they first appear in.
pub fn pivot_to_raw_rows(rows: &[MeterReadingRow]) -> Vec<RawRow> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<RawRow> = Vec::new();

    for row in rows {
        let slot = *index.entry(row.account_number.as_str()).or_insert_with(|| {
            let opt = |v: &Option<String>| v.as_deref().map(RawCell::from_text).unwrap_or(RawCell::Empty);
            out.push(
                RawRow::new()
                    .with("Meter Label", row.meter_name.as_str())
                    .with("Acct #", row.account_number.as_str())
                    .with("Level", opt(&row.level))
                    .with("Zone", opt(&row.zone))
                    .with("Type", opt(&row.meter_type))
                    .with("Parent Meter", opt(&row.parent_meter)),
            );
            out.len() - 1
        });

        let key = Period::from_date(row.reading_month).key();
        let cell = row.volume.map(RawCell::Number).unwrap_or(RawCell::Empty);
        out[slot].insert(key, cell);
    }

    out
}
