//! Connection-related data models.
//!
//! Database flavours understood by the sqlx backend and the transaction
//! kinds a root frame may be opened with.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", ident.replace('`', "``")),
            Self::PostgreSQL | Self::SQLite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Statement that opens a root transaction.
    pub fn begin_sql(&self, kind: Option<TransactionKind>) -> String {
        match (self, kind) {
            (Self::SQLite, Some(kind)) => format!("BEGIN {}", kind.as_sql()),
            (Self::SQLite, None) => "BEGIN".to_string(),
            (Self::PostgreSQL, Some(kind)) => format!("BEGIN {}", kind.as_sql()),
            (Self::PostgreSQL, None) => "BEGIN".to_string(),
            (Self::MySQL, Some(kind)) => format!("START TRANSACTION {}", kind.as_sql()),
            (Self::MySQL, None) => "START TRANSACTION".to_string(),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Modifier for the statement that opens a root transaction.
///
/// The SQL rendering is dialect specific: SQLite takes the locking modes,
/// PostgreSQL and MySQL take the access modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deferred,
    Immediate,
    Exclusive,
    ReadOnly,
    ReadWrite,
}

impl TransactionKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Deferred => "DEFERRED",
            Self::Immediate => "IMMEDIATE",
            Self::Exclusive => "EXCLUSIVE",
            Self::ReadOnly => "READ ONLY",
            Self::ReadWrite => "READ WRITE",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}
