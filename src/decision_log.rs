use async_trait::async_trait;

use crate::error::Result;
use crate::models::DecisionLogEntry;

/// Append-only record of every evaluation, including HOLD and SKIP
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, entry: &DecisionLogEntry) -> Result<()>;
}

/// Writes decisions to the tracing output only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDecisionLog;

#[async_trait]
impl DecisionLog for TracingDecisionLog {
    async fn append(&self, entry: &DecisionLogEntry) -> Result<()> {
        tracing::info!(
            target: "signalbot::decisions",
            "[{} #{}] {} {} price={} rsi={} ema={} - {}",
            entry.bot_type,
            entry.bot_id,
            entry.symbol,
            entry.signal,
            fmt_opt(entry.price),
            fmt_opt(entry.rsi),
            fmt_opt(entry.ema),
            entry.reason
        );
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

/// Best-effort append: a failed write never aborts the cycle
pub async fn record(log: &dyn DecisionLog, entry: &DecisionLogEntry) {
    if let Err(e) = log.append(entry).await {
        tracing::warn!(
            "Failed to write decision log for bot {} ({}): {}",
            entry.bot_id,
            entry.signal,
            e
        );
    }
}
