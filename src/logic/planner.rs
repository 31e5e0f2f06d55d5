//! Pure migration planning.
//!
//! Given the changesets a scope makes available and the versions a schema
//! has recorded, compute exactly which changesets a run executes and in
//! which order. Nothing here touches the database.

use itertools::Itertools;
use log::warn;
use thiserror::Error;

use crate::model::{AppliedChangeset, Changeset, Direction, Target};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("unknown revision {0:?}")]
    UnknownRevision(String),

    #[error("target {target} is not valid when migrating {direction}")]
    InvalidTarget { direction: Direction, target: String },

    #[error("revision {0:?} is behind the current version; migrate down instead")]
    TargetBehindCurrent(String),

    #[error("revision {0:?} is ahead of the current version; migrate up instead")]
    TargetAheadOfCurrent(String),

    #[error("requested {requested} step(s) but only {available} are available")]
    NotEnoughChangesets { requested: u32, available: usize },

    #[error("recorded version {recorded:?} does not match changeset {expected:?} at position {position}")]
    Diverged {
        position: usize,
        recorded: String,
        expected: Option<String>,
    },

    #[error("changeset {0:?} changed after it was applied")]
    ChecksumMismatch(String),

    #[error("changeset {0:?} has no down script")]
    Irreversible(String),

    #[error("duplicate changeset id {0:?}")]
    DuplicateId(String),
}

/// Ordered work for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub direction: Direction,
    pub steps: Vec<Changeset>,
    pub skipped_empty: Vec<String>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Check the source itself: ids must be unique.
pub fn validate_source(available: &[Changeset]) -> Result<(), PlanError> {
    match available.iter().map(|changeset| changeset.id.as_str()).duplicates().next() {
        Some(id) => Err(PlanError::DuplicateId(id.to_string())),
        None => Ok(()),
    }
}

/// Non-empty changesets in source order, each paired with its index in
/// the full list.
fn effective(available: &[Changeset]) -> Vec<(usize, &Changeset)> {
    available
        .iter()
        .enumerate()
        .filter(|(_, changeset)| !changeset.is_empty())
        .collect()
}

/// Verify the recorded history is a prefix of the effective changesets
/// and that nothing recorded has been edited since.
pub fn verify_history(available: &[Changeset], applied: &[AppliedChangeset]) -> Result<(), PlanError> {
    let effective = effective(available);
    for (position, record) in applied.iter().enumerate() {
        match effective.get(position) {
            Some((_, changeset)) if changeset.id == record.id => {
                if changeset.checksum() != record.checksum {
                    return Err(PlanError::ChecksumMismatch(record.id.clone()));
                }
            }
            other => {
                return Err(PlanError::Diverged {
                    position,
                    recorded: record.id.clone(),
                    expected: other.map(|(_, changeset)| changeset.id.clone()),
                })
            }
        }
    }
    Ok(())
}

/// Pending changesets (in apply order) for a status report.
pub fn pending(available: &[Changeset], applied: &[AppliedChangeset]) -> Vec<String> {
    effective(available)
        .into_iter()
        .skip(applied.len())
        .map(|(_, changeset)| changeset.id.clone())
        .collect()
}

pub fn plan(
    available: &[Changeset],
    applied: &[AppliedChangeset],
    direction: Direction,
    target: &Target,
) -> Result<MigrationPlan, PlanError> {
    validate_source(available)?;
    verify_history(available, applied)?;

    let effective = effective(available);
    let current = applied.len();

    // Number of effective changesets at or before a revision in the full list
    let effective_upto = |revision: &str| -> Result<(usize, usize), PlanError> {
        let index = available
            .iter()
            .position(|changeset| changeset.id == revision)
            .ok_or_else(|| PlanError::UnknownRevision(revision.to_string()))?;
        let count = effective.iter().filter(|(i, _)| *i <= index).count();
        Ok((index, count))
    };

    let invalid = || PlanError::InvalidTarget {
        direction,
        target: target.to_string(),
    };

    match direction {
        Direction::Up => {
            // full-list index where this run stops (inclusive)
            let (end, stop) = match target {
                Target::Head => (available.len().saturating_sub(1), effective.len()),
                Target::Base => return Err(invalid()),
                Target::Revision(revision) => {
                    let (index, count) = effective_upto(revision)?;
                    if count < current {
                        return Err(PlanError::TargetBehindCurrent(revision.clone()));
                    }
                    (index, count)
                }
                Target::Relative(steps) if *steps < 0 => return Err(invalid()),
                Target::Relative(steps) => {
                    let steps = steps.unsigned_abs();
                    let stop = current + steps as usize;
                    if stop > effective.len() {
                        return Err(PlanError::NotEnoughChangesets {
                            requested: steps,
                            available: effective.len() - current,
                        });
                    }
                    let end = match stop {
                        0 => 0,
                        n => effective[n - 1].0,
                    };
                    (end, stop)
                }
            };

            let start = match current {
                0 => 0,
                n => effective[n - 1].0 + 1,
            };
            let skipped_empty: Vec<String> = available
                .iter()
                .enumerate()
                .filter(|(i, changeset)| *i >= start && *i <= end && changeset.is_empty())
                .map(|(_, changeset)| changeset.id.clone())
                .collect();
            for id in &skipped_empty {
                warn!("changeset {id} is empty and will not be recorded");
            }

            Ok(MigrationPlan {
                direction,
                steps: effective[current..stop]
                    .iter()
                    .map(|(_, changeset)| (*changeset).clone())
                    .collect(),
                skipped_empty,
            })
        }
        Direction::Down => {
            let keep = match target {
                Target::Base => 0,
                Target::Head => return Err(invalid()),
                Target::Revision(revision) => {
                    let (_, count) = effective_upto(revision)?;
                    if count > current {
                        return Err(PlanError::TargetAheadOfCurrent(revision.clone()));
                    }
                    count
                }
                Target::Relative(steps) if *steps > 0 => return Err(invalid()),
                Target::Relative(steps) => {
                    let steps = steps.unsigned_abs() as usize;
                    if steps > current {
                        return Err(PlanError::NotEnoughChangesets {
                            requested: steps as u32,
                            available: current,
                        });
                    }
                    current - steps
                }
            };

            let steps: Vec<Changeset> = effective[keep..current]
                .iter()
                .rev()
                .map(|(_, changeset)| (*changeset).clone())
                .collect();
            if let Some(changeset) = steps.iter().find(|changeset| changeset.down.is_none()) {
                return Err(PlanError::Irreversible(changeset.id.clone()));
            }

            Ok(MigrationPlan {
                direction,
                steps,
                skipped_empty: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source() -> Vec<Changeset> {
        vec![
            Changeset::new("0001_customers", "CREATE TABLE customers (id serial primary key)")
                .with_down("DROP TABLE customers"),
            Changeset::new("0002_noop", "-- autogenerated, nothing changed\n"),
            Changeset::new("0003_orders", "CREATE TABLE orders (id serial primary key)")
                .with_down("DROP TABLE orders"),
            Changeset::new("0004_index", "CREATE INDEX orders_id ON orders (id)")
                .with_down("DROP INDEX orders_id"),
        ]
    }

    fn applied(ids: &[&str]) -> Vec<AppliedChangeset> {
        let source = source();
        ids.iter()
            .map(|id| {
                let changeset = source.iter().find(|c| c.id == *id).unwrap();
                AppliedChangeset {
                    id: id.to_string(),
                    checksum: changeset.checksum(),
                    applied_at: Utc::now(),
                }
            })
            .collect()
    }

    fn ids(plan: &MigrationPlan) -> Vec<&str> {
        plan.steps.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_upgrade_head_from_empty_skips_empty_changeset() {
        let plan = plan(&source(), &[], Direction::Up, &Target::Head).unwrap();
        assert_eq!(ids(&plan), vec!["0001_customers", "0003_orders", "0004_index"]);
        assert_eq!(plan.skipped_empty, vec!["0002_noop".to_string()]);
    }

    #[test]
    fn test_upgrade_head_twice_is_noop() {
        let done = applied(&["0001_customers", "0003_orders", "0004_index"]);
        let plan = plan(&source(), &done, Direction::Up, &Target::Head).unwrap();
        assert!(plan.is_empty());
        assert!(plan.skipped_empty.is_empty());
    }

    #[test]
    fn test_upgrade_to_revision_and_relative() {
        let to_orders = plan(
            &source(),
            &applied(&["0001_customers"]),
            Direction::Up,
            &Target::Revision("0003_orders".to_string()),
        )
        .unwrap();
        assert_eq!(ids(&to_orders), vec!["0003_orders"]);
        assert_eq!(to_orders.skipped_empty, vec!["0002_noop".to_string()]);

        let one = plan(&source(), &[], Direction::Up, &Target::Relative(1)).unwrap();
        assert_eq!(ids(&one), vec!["0001_customers"]);
        assert!(one.skipped_empty.is_empty());

        let too_many = plan(&source(), &[], Direction::Up, &Target::Relative(4));
        assert_eq!(
            too_many,
            Err(PlanError::NotEnoughChangesets {
                requested: 4,
                available: 3
            })
        );
    }

    #[test]
    fn test_upgrade_to_older_revision_is_rejected() {
        let done = applied(&["0001_customers", "0003_orders"]);
        let result = plan(
            &source(),
            &done,
            Direction::Up,
            &Target::Revision("0001_customers".to_string()),
        );
        assert_eq!(
            result,
            Err(PlanError::TargetBehindCurrent("0001_customers".to_string()))
        );
    }

    #[test]
    fn test_downgrade_to_base_reverses_everything() {
        let done = applied(&["0001_customers", "0003_orders", "0004_index"]);
        let plan = plan(&source(), &done, Direction::Down, &Target::Base).unwrap();
        assert_eq!(ids(&plan), vec!["0004_index", "0003_orders", "0001_customers"]);
    }

    #[test]
    fn test_downgrade_to_revision_keeps_it() {
        let done = applied(&["0001_customers", "0003_orders", "0004_index"]);
        let plan = plan(
            &source(),
            &done,
            Direction::Down,
            &Target::Revision("0001_customers".to_string()),
        )
        .unwrap();
        assert_eq!(ids(&plan), vec!["0004_index", "0003_orders"]);

        let by_step =
            super::plan(&source(), &done, Direction::Down, &Target::Relative(-1)).unwrap();
        assert_eq!(ids(&by_step), vec!["0004_index"]);
    }

    #[test]
    fn test_direction_target_mismatch() {
        assert!(matches!(
            plan(&source(), &[], Direction::Up, &Target::Base),
            Err(PlanError::InvalidTarget { .. })
        ));
        assert!(matches!(
            plan(&source(), &[], Direction::Down, &Target::Head),
            Err(PlanError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_relative_sign_must_match_direction() {
        let back_one: Target = "-1".parse().unwrap();
        assert_eq!(
            plan(&source(), &[], Direction::Up, &back_one),
            Err(PlanError::InvalidTarget {
                direction: Direction::Up,
                target: "-1".to_string()
            })
        );

        let done = applied(&["0001_customers", "0003_orders"]);
        let forward_one: Target = "+1".parse().unwrap();
        assert_eq!(
            plan(&source(), &done, Direction::Down, &forward_one),
            Err(PlanError::InvalidTarget {
                direction: Direction::Down,
                target: "+1".to_string()
            })
        );

        let reverted = plan(&source(), &done, Direction::Down, &back_one).unwrap();
        assert_eq!(ids(&reverted), vec!["0003_orders"]);
    }

    #[test]
    fn test_unknown_revision() {
        assert_eq!(
            plan(&source(), &[], Direction::Up, &Target::Revision("nope".to_string())),
            Err(PlanError::UnknownRevision("nope".to_string()))
        );
    }

    #[test]
    fn test_diverged_history() {
        let mut done = applied(&["0001_customers"]);
        done.push(AppliedChangeset {
            id: "9999_elsewhere".to_string(),
            checksum: String::new(),
            applied_at: Utc::now(),
        });
        assert!(matches!(
            plan(&source(), &done, Direction::Up, &Target::Head),
            Err(PlanError::Diverged { position: 1, .. })
        ));
    }

    #[test]
    fn test_checksum_drift() {
        let mut done = applied(&["0001_customers"]);
        done[0].checksum = "0".repeat(64);
        assert_eq!(
            plan(&source(), &done, Direction::Up, &Target::Head),
            Err(PlanError::ChecksumMismatch("0001_customers".to_string()))
        );
    }

    #[test]
    fn test_irreversible_changeset() {
        let source = vec![Changeset::new("0001", "CREATE TABLE t (id int)")];
        let done = vec![AppliedChangeset {
            id: "0001".to_string(),
            checksum: source[0].checksum(),
            applied_at: Utc::now(),
        }];
        assert_eq!(
            plan(&source, &done, Direction::Down, &Target::Base),
            Err(PlanError::Irreversible("0001".to_string()))
        );
    }

    #[test]
    fn test_duplicate_ids() {
        let source = vec![
            Changeset::new("0001", "CREATE TABLE a (id int)"),
            Changeset::new("0001", "CREATE TABLE b (id int)"),
        ];
        assert_eq!(
            plan(&source, &[], Direction::Up, &Target::Head),
            Err(PlanError::DuplicateId("0001".to_string()))
        );
    }

    #[test]
    fn test_pending() {
        let done = applied(&["0001_customers"]);
        assert_eq!(pending(&source(), &done), vec!["0003_orders", "0004_index"]);
    }
}
