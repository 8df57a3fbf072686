use std::sync::Arc;
use std::time::Duration;

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when at least `threshold` appends landed since the last rewrite.
/// Returns whether it compacted.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await?;
    if appends < threshold {
        return Ok(false);
    }
    tracing::debug!(appends, "compacting WAL");
    engine.compact_wal().await?;
    Ok(true)
}
