use chrono::{DateTime, Datelike, FixedOffset};
use thiserror::Error;

use super::ExecutionMetrics;
use super::engine::UnitMetadata;

/// Metadata could not be turned into metrics; the request still succeeds
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("inspect failed: {0:#}")]
    Inspect(anyhow::Error),

    #[error("malformed {field} timestamp {value:?}: {source}")]
    Timestamp {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Derives metrics from the engine's post-mortem metadata
///
/// A duration is only reported when both timestamps are real: the engine
/// reports year 1 for lifecycle events that never happened.
pub fn extract(meta: &UnitMetadata) -> Result<ExecutionMetrics, TelemetryError> {
    let started = parse_timestamp("start", meta.started_at.as_deref())?;
    let finished = parse_timestamp("finish", meta.finished_at.as_deref())?;

    let duration_ms = match (started, finished) {
        (Some(start), Some(finish)) if finish >= start => (finish - start)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0),
        _ => None,
    };

    Ok(ExecutionMetrics {
        duration_ms,
        oom_killed: meta.oom_killed,
        memory_limit_bytes: meta.memory_limit_bytes,
    })
}

fn parse_timestamp(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<FixedOffset>>, TelemetryError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let timestamp =
        DateTime::parse_from_rfc3339(value).map_err(|source| TelemetryError::Timestamp {
            field,
            value: value.to_string(),
            source,
        })?;

    if timestamp.year() <= 1 {
        return Ok(None);
    }
    Ok(Some(timestamp))
}
