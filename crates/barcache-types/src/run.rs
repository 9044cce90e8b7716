//! Ingestion run audit records.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::{StoredGranularity, VariantParseError};

/// Unique identifier for an ingestion run.
pub type RunId = Uuid;

/// Terminal or in-flight status of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is in progress.
    #[default]
    Running,
    /// Run finished; individual batches may still have failed.
    Completed,
    /// Run aborted with an error.
    Failed,
    /// Run never started (lock held or market closed).
    Skipped,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns the status as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = VariantParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(VariantParseError {
                kind: "run status",
                value: s.to_string(),
            }),
        }
    }
}

/// What triggered an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Primary timer firing at a bar close.
    Scheduled,
    /// Safety-net firing a fraction of a bar after the primary one.
    Retry,
    /// Collection queue drain.
    OnDemand,
    /// Systematic gap reconciliation sweep.
    GapSystematic,
    /// Random single-symbol gap spot check.
    GapSpotCheck,
    /// Oldest-first eviction sweep.
    Eviction,
}

impl JobKind {
    /// Returns the job kind as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
            Self::OnDemand => "on_demand",
            Self::GapSystematic => "gap_systematic",
            Self::GapSpotCheck => "gap_spot_check",
            Self::Eviction => "eviction",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = VariantParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "retry" => Ok(Self::Retry),
            "on_demand" => Ok(Self::OnDemand),
            "gap_systematic" => Ok(Self::GapSystematic),
            "gap_spot_check" => Ok(Self::GapSpotCheck),
            "eviction" => Ok(Self::Eviction),
            _ => Err(VariantParseError {
                kind: "job kind",
                value: s.to_string(),
            }),
        }
    }
}

/// Append-only audit record of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    /// Unique identifier for this run.
    pub id: RunId,
    /// What triggered the run.
    pub kind: JobKind,
    /// Granularity ingested, if the run targets a single one.
    pub granularity: Option<StoredGranularity>,
    /// Current status.
    pub status: RunStatus,
    /// Number of symbols the run requested.
    pub symbols_attempted: u64,
    /// Number of symbols that came back with at least one bar.
    pub symbols_succeeded: u64,
    /// Bars written for the first time.
    pub bars_inserted: u64,
    /// Bars that overwrote an existing row.
    pub bars_updated: u64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure or skip reason.
    pub error: Option<String>,
}

impl IngestionRun {
    /// Creates a running record stamped with the current time.
    #[must_use]
    pub fn new(kind: JobKind, granularity: Option<StoredGranularity>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            granularity,
            status: RunStatus::Running,
            symbols_attempted: 0,
            symbols_succeeded: 0,
            bars_inserted: 0,
            bars_updated: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Creates a record of a firing that never ran.
    #[must_use]
    pub fn skipped(
        kind: JobKind,
        granularity: Option<StoredGranularity>,
        reason: impl Into<String>,
    ) -> Self {
        let mut run = Self::new(kind, granularity);
        run.mark_skipped(reason);
        run
    }

    /// Returns true if the run is in a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    /// Returns the elapsed time of a finished run.
    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Adds the outcome of one batch to the counters.
    pub const fn record_symbols(&mut self, attempted: u64, succeeded: u64) {
        self.symbols_attempted += attempted;
        self.symbols_succeeded += succeeded;
    }

    /// Adds written bar counts to the counters.
    pub const fn record_writes(&mut self, inserted: u64, updated: u64) {
        self.bars_inserted += inserted;
        self.bars_updated += updated;
    }

    /// Marks the run as completed.
    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as failed with an error message.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Marks the run as skipped with a reason.
    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Skipped;
        self.finished_at = Some(Utc::now());
        self.error = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_is_finished() {
        assert!(!RunStatus::Running.is_finished());
        assert!(RunStatus::Completed.is_finished());
        assert!(RunStatus::Failed.is_finished());
        assert!(RunStatus::Skipped.is_finished());
    }

    #[test]
    fn test_string_round_trip() {
        for kind in [
            JobKind::Scheduled,
            JobKind::Retry,
            JobKind::OnDemand,
            JobKind::GapSystematic,
            JobKind::GapSpotCheck,
            JobKind::Eviction,
        ] {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert_eq!("skipped".parse::<RunStatus>().unwrap(), RunStatus::Skipped);
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = IngestionRun::new(JobKind::Scheduled, Some(StoredGranularity::Minute5));
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.duration().is_none());

        run.record_symbols(50, 48);
        run.record_symbols(30, 30);
        run.record_writes(700, 12);
        assert_eq!(run.symbols_attempted, 80);
        assert_eq!(run.symbols_succeeded, 78);
        assert_eq!(run.bars_inserted, 700);

        run.mark_completed();
        assert!(run.is_finished());
        assert!(run.duration().is_some());
    }

    #[test]
    fn test_skipped_run_carries_reason() {
        let run = IngestionRun::skipped(
            JobKind::Retry,
            Some(StoredGranularity::Hour1),
            "previous run still active",
        );
        assert_eq!(run.status, RunStatus::Skipped);
        assert_eq!(run.error.as_deref(), Some("previous run still active"));
        assert!(run.finished_at.is_some());
    }
}
