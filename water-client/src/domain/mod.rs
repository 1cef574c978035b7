pub mod meter;
pub mod period;
pub mod raw_row;

pub use meter::{is_reportable_zone, MeterLevel, MeterLevelParseError, MeterRecord, UNKNOWN_ZONE};
pub use period::{Month, Period, PeriodParseError};
pub use raw_row::{RawCell, RawRow};
