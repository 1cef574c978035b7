pub mod meter_reading_queries;

pub use meter_reading_queries::{meter_readings_for_year, pivot_to_raw_rows, MeterReadingRow};
