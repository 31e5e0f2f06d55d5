use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::TenancyError;
use crate::model::TenantId;

/// Which changeset set a migration run draws from. The two sets are disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Shared,
    Tenant,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Shared => f.write_str("shared"),
            Scope::Tenant => f.write_str("tenant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Where a migration run should leave the version state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Every available changeset applied
    Head,
    /// Nothing applied
    Base,
    /// The named changeset is the last one applied
    Revision(String),
    /// Signed step count: `+N` moves forward, `-N` moves back
    Relative(i32),
}

impl FromStr for Target {
    type Err = TenancyError;

    /// Accepts `head`, `base`, `+N`/`-N` relative steps or a revision id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" => Err(TenancyError::Config("empty migration target".to_string())),
            "head" | "heads" => Ok(Target::Head),
            "base" => Ok(Target::Base),
            _ => {
                if s.starts_with(['+', '-']) {
                    let steps: i32 = s.parse().map_err(|_| {
                        TenancyError::Config(format!("invalid relative target {s:?}"))
                    })?;
                    Ok(Target::Relative(steps))
                } else {
                    Ok(Target::Revision(s.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => f.write_str("head"),
            Target::Base => f.write_str("base"),
            Target::Revision(id) => f.write_str(id),
            Target::Relative(n) => write!(f, "{n:+}"),
        }
    }
}

/// One versioned, reversible unit of schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: String,
    pub up: String,
    pub down: Option<String>,
}

impl Changeset {
    pub fn new(id: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            up: up.into(),
            down: None,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    /// SHA-256 of the up script, hex encoded
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.up.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True when the up script contains nothing but whitespace, comments
    /// and statement separators.
    pub fn is_empty(&self) -> bool {
        sql_is_blank(&self.up)
    }
}

fn sql_is_blank(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            match after.split_once("*/") {
                Some((_, tail)) => rest = tail,
                // unterminated comment swallows the rest of the script
                None => return true,
            }
        } else {
            return false;
        }
    }
}

/// A row of a schema's version table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChangeset {
    pub id: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of one migration run against one schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub schema: TenantId,
    pub scope: Scope,
    pub direction: Direction,
    /// Changesets applied (up) or reverted (down), in execution order
    pub executed: Vec<String>,
    /// Empty changesets that were passed over and not recorded
    pub skipped_empty: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

/// Applied versus pending changesets for one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub schema: TenantId,
    pub scope: Scope,
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

/// Result of migrating every active tenant
#[derive(Debug, Default)]
pub struct BulkSummary {
    pub succeeded: Vec<MigrationReport>,
    pub failed: Vec<(TenantId, TenancyError)>,
}

impl BulkSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
