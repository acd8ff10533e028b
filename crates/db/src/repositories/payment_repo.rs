//! Repository for the `payments` table.

use rust_decimal::Decimal;
use sqlx::PgPool;
use worklane_core::money::FeeSplit;
use worklane_core::types::{DbId, Timestamp};

use crate::models::payment::Payment;
use crate::models::status::{BankTransferStatus, PaymentStatus};
use crate::repositories::PgTx;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, milestone_id, project_id, amount, platform_fee_amount, \
     provider_amount, currency, status, gateway_intent_id, gateway_client_secret, \
     gateway_charge_id, gateway_refund_id, bank_transfer_status, bank_transfer_reference, \
     escrowed_at, released_at, bank_transfer_date, failure_message, refunded_total, \
     original_amount, created_at, updated_at";

/// Provides operations on payments.
///
/// Payments are never deleted; every mutation here is a forward status
/// transition or an in-place amount update on a reusable payment.
pub struct PaymentRepo;

impl PaymentRepo {
    /// Insert a pending payment for a milestone, created when the plan
    /// locks.
    pub async fn create_pending(
        tx: &mut PgTx<'_>,
        milestone_id: DbId,
        project_id: DbId,
        amount: Decimal,
        split: FeeSplit,
        currency: &str,
    ) -> Result<Payment, sqlx::Error> {
        let query = format!(
            "INSERT INTO payments \
             (milestone_id, project_id, amount, platform_fee_amount, provider_amount, currency)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(milestone_id)
            .bind(project_id)
            .bind(amount)
            .bind(split.platform_fee)
            .bind(split.provider_amount)
            .bind(currency)
            .fetch_one(&mut **tx)
            .await
    }

    /// Find a payment by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Payment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a payment and take a row lock for the remainder of the
    /// transaction.
    pub async fn find_by_id_for_update(
        tx: &mut PgTx<'_>,
        id: DbId,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Find a payment by gateway intent id, locking the row. Used by
    /// webhook reconciliation.
    pub async fn find_by_intent_id_for_update(
        tx: &mut PgTx<'_>,
        intent_id: &str,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM payments WHERE gateway_intent_id = $1 FOR UPDATE");
        sqlx::query_as::<_, Payment>(&query)
            .bind(intent_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Find a payment by gateway charge id, locking the row.
    pub async fn find_by_charge_id_for_update(
        tx: &mut PgTx<'_>,
        charge_id: &str,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM payments WHERE gateway_charge_id = $1 FOR UPDATE");
        sqlx::query_as::<_, Payment>(&query)
            .bind(charge_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Find the reusable (pending / in_progress) payment for a milestone,
    /// if any, locking the row.
    pub async fn find_reusable_for_milestone(
        tx: &mut PgTx<'_>,
        milestone_id: DbId,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM payments \
             WHERE milestone_id = $1 AND status IN ('pending', 'in_progress') \
             ORDER BY id DESC LIMIT 1 FOR UPDATE"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(milestone_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Whether the milestone already carries a finalized payment. A
    /// milestone may be funded exactly once in its lifetime.
    pub async fn has_finalized_for_milestone(
        tx: &mut PgTx<'_>,
        milestone_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments \
             WHERE milestone_id = $1 AND status NOT IN ('pending', 'in_progress')",
        )
        .bind(milestone_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count > 0)
    }

    /// Find the most recent escrowed payment for a milestone, locking the
    /// row.
    pub async fn find_escrowed_for_milestone(
        tx: &mut PgTx<'_>,
        milestone_id: DbId,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM payments \
             WHERE milestone_id = $1 AND status = 'escrowed' \
             ORDER BY id DESC LIMIT 1 FOR UPDATE"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(milestone_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Find the most recent escrowed or released payment for a milestone,
    /// locking the row. Used by dispute payout resolution.
    pub async fn find_settleable_for_milestone(
        tx: &mut PgTx<'_>,
        milestone_id: DbId,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM payments \
             WHERE milestone_id = $1 AND status IN ('escrowed', 'released') \
             ORDER BY id DESC LIMIT 1 FOR UPDATE"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(milestone_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Point a reusable payment at a (new or updated) gateway intent and
    /// refresh its amount and fee split, moving it to in_progress. The
    /// client secret is kept when reusing an existing intent.
    pub async fn update_for_initiate(
        tx: &mut PgTx<'_>,
        id: DbId,
        amount: Decimal,
        split: FeeSplit,
        intent_id: &str,
        client_secret: Option<&str>,
    ) -> Result<Payment, sqlx::Error> {
        let query = format!(
            "UPDATE payments SET amount = $2, platform_fee_amount = $3, provider_amount = $4, \
             gateway_intent_id = $5, \
             gateway_client_secret = COALESCE($6, gateway_client_secret), \
             status = $7, updated_at = NOW() \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(amount)
            .bind(split.platform_fee)
            .bind(split.provider_amount)
            .bind(intent_id)
            .bind(client_secret)
            .bind(PaymentStatus::InProgress)
            .fetch_one(&mut **tx)
            .await
    }

    /// Transition to escrowed, capturing the charge reference. The checkout
    /// is over, so the stored client secret is discarded; it must never
    /// surface on a finalized payment.
    pub async fn mark_escrowed(
        tx: &mut PgTx<'_>,
        id: DbId,
        charge_id: Option<&str>,
        escrowed_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payments SET status = $2, gateway_charge_id = COALESCE($3, gateway_charge_id), \
             gateway_client_secret = NULL, escrowed_at = $4, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(PaymentStatus::Escrowed)
        .bind(charge_id)
        .bind(escrowed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Transition to released; bank transfer is now pending.
    pub async fn mark_released(
        tx: &mut PgTx<'_>,
        id: DbId,
        released_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payments SET status = $2, bank_transfer_status = $3, released_at = $4, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(PaymentStatus::Released)
        .bind(BankTransferStatus::Pending)
        .bind(released_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Terminal success: the released funds reached the provider's bank.
    pub async fn mark_transferred(
        tx: &mut PgTx<'_>,
        id: DbId,
        reference: Option<&str>,
        transferred_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payments SET status = $2, bank_transfer_status = $3, \
             bank_transfer_reference = $4, bank_transfer_date = $5, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(PaymentStatus::Transferred)
        .bind(BankTransferStatus::Completed)
        .bind(reference)
        .bind(transferred_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Terminal refund of the full remaining amount.
    pub async fn mark_refunded(
        tx: &mut PgTx<'_>,
        id: DbId,
        refund_id: Option<&str>,
        refunded_total: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payments SET status = $2, \
             gateway_refund_id = COALESCE($3, gateway_refund_id), refunded_total = $4, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(PaymentStatus::Refunded)
        .bind(refund_id)
        .bind(refunded_total)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Apply a partial refund: the payment stays escrowed with a reduced
    /// amount and a recomputed fee split.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_partial_refund(
        tx: &mut PgTx<'_>,
        id: DbId,
        new_amount: Decimal,
        split: FeeSplit,
        refund_id: &str,
        refunded_total: Decimal,
        original_amount: Decimal,
    ) -> Result<Payment, sqlx::Error> {
        let query = format!(
            "UPDATE payments SET amount = $2, platform_fee_amount = $3, provider_amount = $4, \
             gateway_refund_id = $5, refunded_total = $6, \
             original_amount = COALESCE(original_amount, $7), updated_at = NOW() \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(new_amount)
            .bind(split.platform_fee)
            .bind(split.provider_amount)
            .bind(refund_id)
            .bind(refunded_total)
            .bind(original_amount)
            .fetch_one(&mut **tx)
            .await
    }

    /// Terminal failure from the gateway, with its error message.
    pub async fn mark_failed(
        tx: &mut PgTx<'_>,
        id: DbId,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payments SET status = $2, failure_message = $3, \
             gateway_client_secret = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(PaymentStatus::Failed)
        .bind(message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Set the payment status (chargeback transitions).
    pub async fn set_status(
        tx: &mut PgTx<'_>,
        id: DbId,
        status: PaymentStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Sum of non-refunded payment amounts for a project. Used to assert
    /// the approved-price ceiling.
    pub async fn sum_non_refunded_for_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Decimal, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments \
             WHERE project_id = $1 AND status <> 'refunded'",
        )
        .bind(project_id)
        .fetch_one(pool)
        .await
    }
}
