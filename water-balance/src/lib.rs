pub mod cache;
pub mod config;
pub mod hierarchy;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod reconcile;
pub mod registry;
pub mod report;
pub mod server;
pub mod sources;

pub use pipeline::{Envelope, Source};
pub use reconcile::{reconcile, ExclusionRule, ExclusionScope, LossStatus, LossThresholds, ReconciliationResult};
pub use registry::MeterRegistry;
pub use report::{BalanceReport, ReportSettings};
