use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::AppResult;

// ============================================================================
// Transaction Repository
// ============================================================================

const TRANSACTION_COLUMNS: &str =
    "id, appointment_id, amount, kind, status, provider_charge_id, created_at, updated_at";

pub struct TransactionRepository;

impl TransactionRepository {
    pub async fn insert(
        conn: &mut SqliteConnection,
        appointment_id: &str,
        amount: i64,
        kind: TransactionKind,
        status: TransactionStatus,
        provider_charge_id: Option<&str>,
    ) -> AppResult<Transaction> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, appointment_id, amount, kind, status, provider_charge_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(appointment_id)
        .bind(amount)
        .bind(kind)
        .bind(status)
        .bind(provider_charge_id)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(Transaction {
            id,
            appointment_id: appointment_id.to_string(),
            amount,
            kind,
            status,
            provider_charge_id: provider_charge_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn mark_completed(conn: &mut SqliteConnection, id: &str) -> AppResult<()> {
        sqlx::query("UPDATE transactions SET status = 'completed', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn mark_completed_with_reference(
        conn: &mut SqliteConnection,
        id: &str,
        provider_charge_id: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'completed', provider_charge_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(provider_charge_id)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn mark_failed(conn: &mut SqliteConnection, id: &str) -> AppResult<()> {
        sqlx::query("UPDATE transactions SET status = 'failed', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn find_for_appointment(
        pool: &SqlitePool,
        appointment_id: &str,
    ) -> AppResult<Vec<Transaction>> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE appointment_id = ?
            ORDER BY created_at ASC
            "#
        ))
        .bind(appointment_id)
        .fetch_all(pool)
        .await?;

        Ok(transactions)
    }

    pub async fn find_for_appointment_tx(
        conn: &mut SqliteConnection,
        appointment_id: &str,
    ) -> AppResult<Vec<Transaction>> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE appointment_id = ?
            ORDER BY created_at ASC
            "#
        ))
        .bind(appointment_id)
        .fetch_all(conn)
        .await?;

        Ok(transactions)
    }

    /// Net amount the client has actually paid: completed charges minus
    /// completed refunds.
    pub fn net_paid(transactions: &[Transaction]) -> i64 {
        transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Completed)
            .map(|t| if t.kind.is_charge() { t.amount } else { -t.amount })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount: i64, kind: TransactionKind, status: TransactionStatus) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4().to_string(),
            appointment_id: "apt".to_string(),
            amount,
            kind,
            status,
            provider_charge_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn net_paid_is_completed_charges_minus_refunds() {
        let transactions = vec![
            tx(2000, TransactionKind::Deposit, TransactionStatus::Completed),
            tx(3000, TransactionKind::Balance, TransactionStatus::Completed),
            tx(2000, TransactionKind::Refund, TransactionStatus::Completed),
            // Pending and failed rows never count.
            tx(5000, TransactionKind::FullPayment, TransactionStatus::Pending),
            tx(1000, TransactionKind::Refund, TransactionStatus::Failed),
        ];

        assert_eq!(TransactionRepository::net_paid(&transactions), 3000);
    }
}
