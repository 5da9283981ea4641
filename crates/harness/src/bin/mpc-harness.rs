//! Runs the full phase sequence once over the in-memory network and prints
//! per-participant outcomes and timings.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use common::{init_tracing, ProtocolMetrics};
use harness::{CompositeObserver, HarnessConfig, MetricsObserver, Orchestrator, TracingObserver};
use protocols::schnorr::ThresholdSchnorr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HarnessConfig::from_env();
    init_tracing(&config.log_level, config.log_json)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    info!("========================================");
    info!("  MPC Harness Starting");
    info!("========================================");
    info!("  - Participants: {}", config.participants);
    info!("  - Threshold: {} ({} signers)", config.threshold, config.threshold + 1);
    info!("  - Message: {:?}", config.message);
    info!("  - Receive timeout: {}s", config.receive_timeout_secs);

    let orchestrator = Orchestrator::new(ThresholdSchnorr, &config).context("invalid configuration")?;
    let metrics = Arc::new(ProtocolMetrics::new(orchestrator.run_id()));
    let observer = CompositeObserver::new()
        .with(Arc::new(TracingObserver))
        .with(Arc::new(MetricsObserver::new(Arc::clone(&metrics))));
    let orchestrator = Arc::new(orchestrator.with_observer(Arc::new(observer)));

    let reports = orchestrator.run_all().await;

    let mut tally: BTreeMap<&'static str, usize> = BTreeMap::new();
    for report in &reports {
        *tally.entry(report.outcome.label()).or_default() += 1;
        report.timings.log();
        if report.outcome.is_failure() {
            error!(participant = %report.id, outcome = %report.outcome, "Participant failed");
        }
    }

    if let Some(signature) = reports.iter().find_map(|r| r.signature(harness::Phase::Signing)) {
        info!("Signature: {}", signature.to_hex());
    }
    if let Some(public_key) = reports.iter().find_map(|r| r.public_key()) {
        info!("Public key: {}", public_key.to_hex());
    }

    info!("========================================");
    for (label, count) in &tally {
        info!("  {:24} {:>4}", label, count);
    }
    info!("========================================");

    let snapshot = serde_json::to_string(&metrics.snapshot()).context("serializing metrics")?;
    info!(metrics = %snapshot, "Run metrics");

    if tally.contains_key("protocol_error") || tally.contains_key("verification_failed") {
        anyhow::bail!("{} participant(s) failed", reports.iter().filter(|r| r.outcome.is_failure()).count());
    }
    Ok(())
}
