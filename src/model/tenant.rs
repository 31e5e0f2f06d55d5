use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TenancyError};

/// PostgreSQL truncates identifiers at NAMEDATALEN - 1 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const RESERVED_SCHEMAS: &[&str] = &["public", "information_schema"];

/// Validated schema name used to route a unit of work.
///
/// Tenant identifiers only ever contain ASCII letters, digits and
/// underscores, so they can be embedded as quoted identifiers without
/// escaping concerns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Parse a tenant identifier coming from a request or an operator.
    ///
    /// Rejects reserved schema names (`public`, `information_schema` and
    /// the `pg_` namespace) in addition to the identifier grammar.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        check_grammar(&value)?;
        let lowered = value.to_ascii_lowercase();
        if RESERVED_SCHEMAS.contains(&lowered.as_str()) || lowered.starts_with("pg_") {
            return Err(TenancyError::InvalidTenantId {
                value,
                reason: "reserved schema name",
            });
        }
        Ok(Self(value))
    }

    /// Parse a configured schema name such as the default or shared schema.
    ///
    /// Only the identifier grammar is enforced; reserved names like
    /// `public` are accepted here.
    pub fn schema(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        check_grammar(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for interpolation into DDL and `search_path`.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

fn check_grammar(value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        Some("empty")
    } else if value.len() > MAX_IDENTIFIER_LEN {
        Some("longer than 63 bytes")
    } else if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        Some("only ASCII letters, digits and underscores are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TenancyError::InvalidTenantId {
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        TenantId::schema(value).map_err(serde::de::Error::custom)
    }
}

/// Registry row describing a known tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}
