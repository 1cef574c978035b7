use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use water_client::domain::{RawCell, RawRow};

use crate::pipeline::{Envelope, PipelineError, RowStream, Source};

/// CSV source for the meter master sheet.
///
/// One row per meter. Expected header columns (names matched loosely by the
/// registry, so `Level ` and `Label` both work):
/// - Meter Label
/// - Acct #
/// - Label / Level
/// - Zone
/// - Type
/// - Parent Meter
/// - one `Mon-YY` column per month (e.g. `Jan-25`)
///
/// Headers are trimmed. Cells are passed through as text; the registry does
/// all numeric coercion.
pub struct MeterSheetCsvFileSource {
    path: PathBuf,
    delimiter: u8,
}

impl MeterSheetCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
        }
    }

    /// Use a different field delimiter, e.g. `b'|'` for pipe-delimited exports.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

fn record_to_raw_row(record: &StringRecord, headers: &StringRecord) -> RawRow {
    headers
        .iter()
        .zip(record.iter())
        .filter(|(h, _)| !h.trim().is_empty())
        .map(|(h, v)| (h.trim().to_string(), RawCell::from_text(v)))
        .collect()
}

#[async_trait::async_trait]
impl Source<RawRow> for MeterSheetCsvFileSource {
    async fn stream(&self) -> RowStream<RawRow> {
        // Blocking CSV reader inside a single async task; master sheets are a
        // few hundred rows.
        let path = self.path.clone();
        let delimiter = self.delimiter;
        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .map_err(|e| PipelineError::Source(format!("failed to open CSV file '{}': {e}", path.display())))?;
            let mut rdr = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .flexible(true)
                .from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| PipelineError::Source(format!("failed to read CSV headers: {e}")))?
                .clone();

            for result in rdr.records() {
                let record = match result {
                    Ok(r) => r,
                    Err(e) => {
                        metrics::counter!("water_sheet_csv_parse_errors_total").increment(1);
                        Err(PipelineError::Source(format!("failed to read CSV record: {e}")))?
                    }
                };

                let row = record_to_raw_row(&record, &headers);
                if row.iter().all(|(_, cell)| *cell == RawCell::Empty) {
                    continue;
                }

                yield Envelope::now(row);
            }
        };

        Box::pin(s)
    }
}
