use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A money movement tied to an appointment. One appointment accumulates
/// several transactions over its life (deposit, balance, refund); the net
/// of completed charges minus completed refunds is what the client paid.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub appointment_id: String,
    pub amount: i64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub provider_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    FullPayment,
    Balance,
    Refund,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::FullPayment => write!(f, "full_payment"),
            TransactionKind::Balance => write!(f, "balance"),
            TransactionKind::Refund => write!(f, "refund"),
        }
    }
}

impl TransactionKind {
    pub fn is_charge(&self) -> bool {
        !matches!(self, TransactionKind::Refund)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}
