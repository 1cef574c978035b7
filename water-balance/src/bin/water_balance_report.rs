use anyhow::{Context, Result};
use water_balance::{config::AppConfig, observability, report::BalanceReport, sources};

/// One-shot balance report: `water_balance_report [Mon-YY]`, defaulting to
/// the latest month with readings. Prints the report as JSON on stdout.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let registry = sources::load_registry(&cfg).await?;

    let requested = std::env::args().nth(1);
    let period = registry
        .resolve_period(requested.as_deref())
        .with_context(|| format!("cannot report on {}", requested.as_deref().unwrap_or("the latest period")))?;

    let settings = cfg.reconcile.report_settings();
    let report = BalanceReport::build(&registry.records, period, &settings);

    if report.total.loss_pct > settings.thresholds.high_loss_pct {
        tracing::warn!(
            %period,
            total_loss = report.total.loss,
            total_loss_pct = report.total.loss_pct,
            "total system loss above high-loss threshold"
        );
    } else {
        tracing::info!(
            %period,
            total_loss = report.total.loss,
            total_loss_pct = report.total.loss_pct,
            status = %report.total.status,
            "water balance computed"
        );
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
