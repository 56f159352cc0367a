//! Running status: storage, event transitions, and aggregation.
//!
//! Steps and lifecycle events *store* their status, because their history
//! (`started_at`) is not otherwise recoverable. Jobs and the workflow
//! *derive* theirs on demand from their parts through [`aggregate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::ResultEvent;

/// The lifecycle state of a step, lifecycle event, job, or workflow.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StatusKind {
    #[default]
    NotStarted,
    Running {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percentage: Option<f32>,
    },
    Success {
        #[serde(rename = "finishedAt")]
        finished_at: DateTime<Utc>,
    },
    Failure {
        #[serde(rename = "finishedAt")]
        finished_at: DateTime<Utc>,
    },
    Skipped,
    Unknown,
}

/// A status kind plus the timestamps tracking when work began and when it
/// last made observable progress.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RunningStatus {
    #[serde(flatten)]
    pub kind: StatusKind,
    #[serde(default, rename = "startedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunningStatus {
    /// Mark the slot as running before its script's first event.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.kind = StatusKind::Running { percentage: None };
        self.started_at.get_or_insert(now);
        self.updated_at = Some(now);
    }

    /// Apply the transition for one routed event.
    pub fn apply(&mut self, event: &ResultEvent, now: DateTime<Utc>) {
        self.kind = match event {
            ResultEvent::Shell(_) | ResultEvent::Form(_) => {
                StatusKind::Running { percentage: None }
            }
            ResultEvent::Template(progress) => StatusKind::Running {
                percentage: Some(progress.completed),
            },
            ResultEvent::Boundary(_) => StatusKind::Success { finished_at: now },
        };
        self.started_at.get_or_insert(now);
        self.updated_at = Some(now);
    }

    /// Mark the slot failed after its executor reported an error.
    pub fn fail(&mut self, now: DateTime<Utc>) {
        self.kind = StatusKind::Failure { finished_at: now };
        self.started_at.get_or_insert(now);
        self.updated_at = Some(now);
    }

    pub fn is_running(&self) -> bool {
        matches!(self.kind, StatusKind::Running { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self.kind, StatusKind::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.kind, StatusKind::Failure { .. })
    }

    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }
}

/// Derive a composite status from child statuses.
///
/// Precedence: any running wins (with the mean of the carried percentages),
/// then any failure, then all-success, then all-skipped, then
/// not-started-or-skipped; anything else is `Unknown`. An empty set of
/// children is `NotStarted`.
pub fn aggregate<'a, I>(children: I) -> RunningStatus
where
    I: IntoIterator<Item = &'a RunningStatus>,
{
    let children: Vec<&RunningStatus> = children.into_iter().collect();

    let started_at = children.iter().filter_map(|s| s.started_at).min();
    let mut updated_at = children.iter().filter_map(|s| s.updated_at).max();

    let kind = if children.is_empty() {
        StatusKind::NotStarted
    } else if children.iter().any(|s| s.is_running()) {
        let percentages: Vec<f32> = children
            .iter()
            .filter_map(|s| match s.kind {
                StatusKind::Running { percentage } => percentage,
                _ => None,
            })
            .collect();
        let percentage = if percentages.is_empty() {
            None
        } else {
            Some(percentages.iter().sum::<f32>() / percentages.len() as f32)
        };
        StatusKind::Running { percentage }
    } else if children.iter().any(|s| s.is_failure()) {
        let finished_at = children
            .iter()
            .filter_map(|s| match s.kind {
                StatusKind::Failure { finished_at } => Some(finished_at),
                _ => None,
            })
            .max()
            .expect("at least one failure");
        StatusKind::Failure { finished_at }
    } else if children.iter().all(|s| s.is_success()) {
        let finished_at = children
            .iter()
            .filter_map(|s| match s.kind {
                StatusKind::Success { finished_at } => Some(finished_at),
                _ => None,
            })
            .max()
            .expect("at least one success");
        StatusKind::Success { finished_at }
    } else if children.iter().all(|s| s.kind == StatusKind::Skipped) {
        StatusKind::Skipped
    } else if children
        .iter()
        .all(|s| matches!(s.kind, StatusKind::NotStarted | StatusKind::Skipped))
    {
        StatusKind::NotStarted
    } else {
        StatusKind::Unknown
    };

    // A terminal timestamp later than any child update wins.
    if let StatusKind::Success { finished_at } | StatusKind::Failure { finished_at } = kind {
        updated_at = Some(updated_at.map_or(finished_at, |u| u.max(finished_at)));
    }

    RunningStatus {
        kind,
        started_at,
        updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn success(finished: i64) -> RunningStatus {
        RunningStatus {
            kind: StatusKind::Success {
                finished_at: at(finished),
            },
            started_at: Some(at(0)),
            updated_at: Some(at(finished)),
        }
    }

    fn running(percentage: Option<f32>) -> RunningStatus {
        RunningStatus {
            kind: StatusKind::Running { percentage },
            started_at: Some(at(1)),
            updated_at: Some(at(2)),
        }
    }

    #[test]
    fn boundary_event_finishes_successfully() {
        let mut status = RunningStatus::default();
        status.begin(at(10));
        assert!(status.is_running());
        assert_eq!(status.started_at, Some(at(10)));

        status.apply(&ResultEvent::shell("s", "out"), at(11));
        assert!(status.is_running());

        status.apply(&ResultEvent::boundary("s"), at(12));
        assert_eq!(status.kind, StatusKind::Success { finished_at: at(12) });
        assert_eq!(status.started_at, Some(at(10)));
        assert_eq!(status.updated_at, Some(at(12)));
    }

    #[test]
    fn template_progress_carries_percentage() {
        let mut status = RunningStatus::default();
        status.apply(&ResultEvent::template("s", "a", 0.25), at(1));
        assert_eq!(
            status.kind,
            StatusKind::Running {
                percentage: Some(0.25)
            }
        );
    }

    #[test]
    fn aggregate_running_takes_precedence_and_averages() {
        let children = [success(5), running(Some(0.2)), running(Some(0.6)), running(None)];
        let derived = aggregate(children.iter());
        match derived.kind {
            StatusKind::Running { percentage } => {
                assert!((percentage.unwrap() - 0.4).abs() < f32::EPSILON)
            }
            other => panic!("expected running, got {other:?}"),
        }
        assert_eq!(derived.started_at, Some(at(0)));
    }

    #[test]
    fn aggregate_running_without_percentages_is_nil() {
        let children = [running(None), success(3)];
        let derived = aggregate(children.iter());
        assert_eq!(derived.kind, StatusKind::Running { percentage: None });
    }

    #[test]
    fn aggregate_failure_beats_success_and_takes_latest_timestamp() {
        let failure = |finished: i64| RunningStatus {
            kind: StatusKind::Failure {
                finished_at: at(finished),
            },
            started_at: Some(at(0)),
            updated_at: Some(at(finished)),
        };
        let children = [success(9), failure(4), failure(7)];
        let derived = aggregate(children.iter());
        assert_eq!(derived.kind, StatusKind::Failure { finished_at: at(7) });
        assert_eq!(derived.updated_at, Some(at(9)));
    }

    #[test]
    fn aggregate_all_success_takes_max_timestamp() {
        let derived = aggregate([success(3), success(8)].iter());
        assert_eq!(derived.kind, StatusKind::Success { finished_at: at(8) });
    }

    #[test]
    fn aggregate_not_started_and_skipped_mixes() {
        let skipped = RunningStatus {
            kind: StatusKind::Skipped,
            ..Default::default()
        };
        let fresh = RunningStatus::default();

        assert_eq!(aggregate([skipped.clone()].iter()).kind, StatusKind::Skipped);
        assert_eq!(
            aggregate([skipped.clone(), fresh.clone()].iter()).kind,
            StatusKind::NotStarted
        );
        assert_eq!(
            aggregate(std::iter::empty::<&RunningStatus>()).kind,
            StatusKind::NotStarted
        );
        // A finished part next to untouched parts is indeterminate.
        assert_eq!(
            aggregate([success(2), fresh].iter()).kind,
            StatusKind::Unknown
        );
    }
}
