//! Unit-of-work transaction state.

use serde::Serialize;

/// Transaction state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Session leased, no outcome yet
    Open,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    /// Commit or rollback itself raised
    Failed,
}

impl TransactionState {
    /// Check if the transaction still accepts work.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the transaction reached an outcome (committed, rolled back, or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
