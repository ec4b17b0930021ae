//! Scale-down reconciliation primitives.
//!
//! This library holds the decision logic of a scale-down pass, kept free of
//! I/O so it can be tested exhaustively. Key concepts:
//!
//! - **Instance**: a provider-managed machine acting as a CI runner.
//! - **Registration**: the coordinator's record that a runner accepts jobs.
//! - **Reclaim**: de-registering (when registered) and terminating an
//!   instance that is old enough and not running a job.
//!
//! # Invariants
//!
//! - Candidates are visited newest-first; instances without a launch time last
//! - An instance younger than the minimum running time is never touched
//! - A busy registration is never de-registered or terminated
//! - An instance matches a registration only by exact name equality

use chrono::{DateTime, Duration, Utc};
use ghr_id::{InstanceId, RunnerId};
use serde::{Deserialize, Serialize};

/// A runner registration as reported by the coordinator's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRegistration {
    /// Coordinator-assigned runner id.
    pub id: RunnerId,

    /// Runner name; an instance registers under its own handle.
    pub name: String,

    /// Whether the runner is currently executing a job.
    pub busy: bool,

    /// Connection status (`online` / `offline`), informational only.
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub labels: Vec<RunnerLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerLabel {
    pub name: String,
}

/// Sort candidates newest-first.
///
/// Older instances are more likely to be mid-job, so visiting the newest first
/// biases reclamation toward idle capacity. Instances with no launch time sort
/// last. The sort is stable, so equal launch times keep their input order.
pub fn sort_newest_first<T, F>(items: &mut [T], launch_time: F)
where
    F: Fn(&T) -> Option<DateTime<Utc>>,
{
    items.sort_by(|a, b| match (launch_time(a), launch_time(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Returns true once an instance has outlived its boot/registration window.
///
/// An instance with an unknown launch time has not provably done so, and
/// neither has one whose window ends beyond the representable time range.
pub fn minimum_running_time_exceeded(
    launch_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    minimum: Duration,
) -> bool {
    match launch_time {
        Some(launched) => launched
            .checked_add_signed(minimum)
            .is_some_and(|ends| ends < now),
        None => false,
    }
}

/// Find the registration an instance holds, by exact name match.
pub fn find_registration<'a>(
    listing: &'a [RemoteRegistration],
    instance_id: &InstanceId,
) -> Option<&'a RemoteRegistration> {
    listing.iter().find(|r| r.name == instance_id.as_str())
}

/// What a pass should do with an instance that passed the youth guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimAction {
    /// The matching registration is running a job.
    SkipBusy,

    /// Idle registration: de-register first, then terminate.
    DeregisterAndTerminate { runner_id: RunnerId },

    /// No registration: terminate directly.
    TerminateOrphan,
}

/// Decide the action for an instance old enough to be reclaimed.
pub fn classify(registration: Option<&RemoteRegistration>) -> ReclaimAction {
    match registration {
        Some(r) if r.busy => ReclaimAction::SkipBusy,
        Some(r) => ReclaimAction::DeregisterAndTerminate { runner_id: r.id },
        None => ReclaimAction::TerminateOrphan,
    }
}

/// Terminal state of one instance within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReclaimOutcome {
    SkippedTooYoung,
    SkippedBusy,
    /// Owner scope could not be derived from the instance tags.
    SkippedUnresolvedScope,
    Terminated { deregistered: Option<RunnerId> },
    /// De-registration succeeded (or was not needed) but termination failed.
    Orphaned { deregistered: Option<RunnerId> },
}

/// Default interval between scale-down passes.
pub const DEFAULT_SCALE_DOWN_INTERVAL: std::time::Duration =
    std::time::Duration::from_secs(5 * 60);

/// Default minimum running time before an instance may be reclaimed.
pub const DEFAULT_MINIMUM_RUNNING_TIME_MINUTES: i64 = 5;

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn at(minutes_ago: i64) -> Option<DateTime<Utc>> {
        let base = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Some(base - Duration::minutes(minutes_ago))
    }

    fn registration(name: &str, id: u64, busy: bool) -> RemoteRegistration {
        RemoteRegistration {
            id: RunnerId::new(id),
            name: name.to_string(),
            busy,
            status: Some("online".to_string()),
            labels: vec![],
        }
    }

    #[test]
    fn test_sort_newest_first() {
        let mut items = vec![("old", at(90)), ("none", None), ("new", at(5)), ("mid", at(30))];
        sort_newest_first(&mut items, |(_, t)| *t);

        let order: Vec<_> = items.iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec!["new", "mid", "old", "none"]);
    }

    #[test]
    fn test_sort_keeps_order_for_equal_times() {
        let mut items = vec![("a", at(10)), ("b", at(10)), ("c", None), ("d", None)];
        sort_newest_first(&mut items, |(_, t)| *t);

        let order: Vec<_> = items.iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_minimum_running_time() {
        let now = at(0).unwrap();
        let minimum = Duration::minutes(30);

        assert!(minimum_running_time_exceeded(at(60), now, minimum));
        assert!(!minimum_running_time_exceeded(at(10), now, minimum));
        // Exactly at the boundary is still too young.
        assert!(!minimum_running_time_exceeded(at(30), now, minimum));
        assert!(!minimum_running_time_exceeded(None, now, minimum));
    }

    #[test]
    fn test_minimum_running_time_beyond_time_range_is_never_exceeded() {
        let now = at(0).unwrap();
        let huge = Duration::try_minutes(1_000_000_000_000).unwrap();

        assert!(!minimum_running_time_exceeded(Some(now), now, huge));
        assert!(!minimum_running_time_exceeded(at(1_000_000), now, Duration::MAX));
    }

    #[test]
    fn test_find_registration_exact_match() {
        let listing = vec![
            registration("i-10", 1, false),
            registration("i-1", 2, false),
        ];
        let id = InstanceId::parse("i-1").unwrap();

        let found = find_registration(&listing, &id).unwrap();
        assert_eq!(found.id, RunnerId::new(2));

        let missing = InstanceId::parse("i-100").unwrap();
        assert!(find_registration(&listing, &missing).is_none());
    }

    #[test]
    fn test_classify() {
        let busy = registration("i-1", 1, true);
        let idle = registration("i-1", 42, false);

        assert_eq!(classify(Some(&busy)), ReclaimAction::SkipBusy);
        assert_eq!(
            classify(Some(&idle)),
            ReclaimAction::DeregisterAndTerminate {
                runner_id: RunnerId::new(42)
            }
        );
        assert_eq!(classify(None), ReclaimAction::TerminateOrphan);
    }

    #[test]
    fn test_registration_from_listing_json() {
        let json = serde_json::json!({
            "id": 42,
            "name": "i-1",
            "os": "linux",
            "status": "online",
            "busy": false,
            "labels": [{"id": 1, "name": "self-hosted", "type": "read-only"}]
        });
        let parsed: RemoteRegistration = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.id, RunnerId::new(42));
        assert_eq!(parsed.labels[0].name, "self-hosted");
    }

    proptest! {
        #[test]
        fn prop_sorted_newest_first(offsets in proptest::collection::vec(proptest::option::of(0i64..10_000), 0..64)) {
            let mut items: Vec<Option<DateTime<Utc>>> = offsets.into_iter().map(|o| o.and_then(at)).collect();
            sort_newest_first(&mut items, |t| *t);

            for pair in items.windows(2) {
                match (pair[0], pair[1]) {
                    (Some(a), Some(b)) => prop_assert!(a >= b),
                    (None, Some(_)) => prop_assert!(false, "undefined launch time sorted before a defined one"),
                    _ => {}
                }
            }
        }
    }
}
