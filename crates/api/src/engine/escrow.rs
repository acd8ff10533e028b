//! Escrow payment engine.
//!
//! Owns the money side of a milestone: funding into escrow through the
//! payment gateway, release to the provider, manual bank-transfer
//! settlement, refunds, and reconciliation of inbound gateway webhooks.
//!
//! Gateway calls run while the payment row is locked, so a second writer
//! blocks until the first commits and then re-reads converged state. A
//! failed or timed-out gateway call rolls the transaction back and leaves
//! local state untouched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use worklane_core::error::CoreError;
use worklane_core::money::{fee_split, round2, to_minor_units};
use worklane_core::types::DbId;
use worklane_db::models::dispute::CreateDispute;
use worklane_db::models::milestone::Milestone;
use worklane_db::models::payment::Payment;
use worklane_db::models::project::Project;
use worklane_db::models::status::{DisputeStatus, MilestoneStatus, PaymentStatus, ProjectStatus};
use worklane_db::repositories::{
    DisputeRepo, MilestoneRepo, PaymentAuditRepo, PaymentRepo, PgTx, ProjectRepo, UserRepo,
    WebhookEventRepo,
};
use worklane_db::DbPool;
use worklane_events::{EventBus, PlatformEvent};
use worklane_gateway::webhook::{DisputeVerdict, GatewayEventType, WebhookEvent};
use worklane_gateway::{GatewayError, PaymentGateway};

use crate::error::{AppError, AppResult};

use super::publish_all;

/// Result of processing one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First delivery, effects applied.
    Processed,
    /// Event id seen before; no effects.
    Duplicate,
    /// Unrecognized event type or unmatched entity; acknowledged and dropped.
    Ignored,
}

/// Funding, settlement, and webhook reconciliation for payments.
pub struct EscrowEngine {
    pool: DbPool,
    gateway: Arc<dyn PaymentGateway>,
    bus: Arc<EventBus>,
}

impl EscrowEngine {
    pub fn new(pool: DbPool, gateway: Arc<dyn PaymentGateway>, bus: Arc<EventBus>) -> Self {
        Self { pool, gateway, bus }
    }

    /// Begin funding a locked milestone.
    ///
    /// Reuses the milestone's pending/in-progress payment if one exists,
    /// updating its gateway intent in place; a milestone that already has a
    /// finalized payment can never be funded again. Returns the payment
    /// carrying the client secret for checkout.
    pub async fn initiate(
        &self,
        milestone_id: DbId,
        actor_id: DbId,
        amount: Decimal,
    ) -> AppResult<Payment> {
        let mut tx = self.pool.begin().await?;

        let milestone = MilestoneRepo::find_by_id_for_update(&mut tx, milestone_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Milestone",
                id: milestone_id,
            })?;
        let project = self.project_of(&milestone).await?;

        if actor_id != project.company_id {
            return Err(
                CoreError::Forbidden("Only the company can fund a milestone".to_string()).into(),
            );
        }
        if milestone.status != MilestoneStatus::Locked {
            return Err(CoreError::invalid_state("Milestone", milestone.status, "locked").into());
        }
        let amount = round2(amount);
        if amount != milestone.amount {
            return Err(CoreError::Validation(format!(
                "Payment amount {amount} does not match the milestone amount {}",
                milestone.amount
            ))
            .into());
        }
        if PaymentRepo::has_finalized_for_milestone(&mut tx, milestone_id).await? {
            return Err(
                CoreError::Conflict("Milestone has already been funded".to_string()).into(),
            );
        }

        let split = fee_split(amount);
        let reusable = PaymentRepo::find_reusable_for_milestone(&mut tx, milestone_id).await?;
        let payment = match reusable {
            Some(existing) => existing,
            None => {
                PaymentRepo::create_pending(&mut tx, milestone_id, project.id, amount, split, "usd")
                    .await?
            }
        };

        let metadata = HashMap::from([
            ("payment_id".to_string(), payment.id.to_string()),
            ("milestone_id".to_string(), milestone_id.to_string()),
            ("project_id".to_string(), project.id.to_string()),
        ]);

        let payment = match payment.gateway_intent_id.as_deref() {
            // Re-initiation with a live intent: update its amount in place.
            Some(intent_id) => {
                self.gateway
                    .update_intent_amount(intent_id, to_minor_units(amount)?)
                    .await
                    .map_err(gateway_err)?;
                PaymentRepo::update_for_initiate(&mut tx, payment.id, amount, split, intent_id, None)
                    .await?
            }
            None => {
                let handle = self
                    .gateway
                    .create_intent(to_minor_units(amount)?, &payment.currency, &metadata)
                    .await
                    .map_err(gateway_err)?;
                PaymentRepo::update_for_initiate(
                    &mut tx,
                    payment.id,
                    amount,
                    split,
                    &handle.intent_id,
                    Some(&handle.client_secret),
                )
                .await?
            }
        };

        PaymentAuditRepo::append(
            &mut tx,
            payment.id,
            &format!("company:{actor_id}"),
            "initiated",
            &serde_json::json!({
                "amount": amount,
                "intent_id": payment.gateway_intent_id,
            }),
        )
        .await?;

        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new("payment.initiated")
                .with_source("payment", payment.id)
                .with_actor(actor_id)
                .with_payload(serde_json::json!({ "milestone_id": milestone_id }))],
        );
        Ok(payment)
    }

    /// Release an escrowed payment for an approved milestone.
    ///
    /// Requires the provider to have a registered payout destination. The
    /// payment becomes `released` with a pending bank transfer; actual
    /// settlement is confirmed manually by an admin.
    pub async fn release(&self, milestone_id: DbId, actor_id: DbId) -> AppResult<Payment> {
        let mut tx = self.pool.begin().await?;

        let milestone = MilestoneRepo::find_by_id_for_update(&mut tx, milestone_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Milestone",
                id: milestone_id,
            })?;
        let project = self.project_of(&milestone).await?;
        self.require_company_or_admin(&project, actor_id).await?;

        if milestone.status != MilestoneStatus::Approved {
            return Err(CoreError::invalid_state("Milestone", milestone.status, "approved").into());
        }

        let payment = PaymentRepo::find_settleable_for_milestone(&mut tx, milestone_id)
            .await?
            .ok_or_else(|| {
                CoreError::PreconditionFailed(
                    "Milestone has no escrowed payment to release".to_string(),
                )
            })?;
        if payment.status != PaymentStatus::Escrowed {
            return Err(CoreError::invalid_state("Payment", payment.status, "escrowed").into());
        }

        let provider = UserRepo::find_by_id(&self.pool, project.provider_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "User",
                id: project.provider_id,
            })?;
        if provider.payout_account_id.is_none() {
            return Err(CoreError::PreconditionFailed(
                "Provider has no registered payout destination".to_string(),
            )
            .into());
        }

        PaymentRepo::mark_released(&mut tx, payment.id, Utc::now()).await?;
        PaymentAuditRepo::append(
            &mut tx,
            payment.id,
            &format!("user:{actor_id}"),
            "released",
            &serde_json::json!({ "provider_amount": payment.provider_amount }),
        )
        .await?;

        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![
                PlatformEvent::new("payment.released")
                    .with_source("payment", payment.id)
                    .with_actor(actor_id)
                    .with_recipient(project.provider_id)
                    .with_payload(serde_json::json!({
                        "provider_amount": payment.provider_amount,
                    })),
                // Consumed by the operations dashboard; the bank transfer is
                // executed out of band.
                PlatformEvent::new("payment.payout_required")
                    .with_source("payment", payment.id)
                    .with_payload(serde_json::json!({
                        "provider_amount": payment.provider_amount,
                        "payout_account_id": provider.payout_account_id,
                    })),
            ],
        );
        self.reload(payment.id).await
    }

    /// Admin confirms the released funds reached the provider's bank.
    ///
    /// The milestone becomes `paid`; when it was the last unpaid milestone,
    /// the project completes and any still-open disputes are auto-closed.
    /// Re-confirming an already transferred payment is a no-op.
    pub async fn confirm_bank_transfer(
        &self,
        payment_id: DbId,
        admin_id: DbId,
        reference: Option<&str>,
    ) -> AppResult<Payment> {
        self.require_admin(admin_id).await?;

        let mut tx = self.pool.begin().await?;
        let payment = lock_payment(&mut tx, payment_id).await?;

        if payment.status == PaymentStatus::Transferred {
            tx.commit().await?;
            return Ok(payment);
        }
        if payment.status != PaymentStatus::Released {
            return Err(CoreError::invalid_state("Payment", payment.status, "released").into());
        }

        PaymentRepo::mark_transferred(&mut tx, payment_id, reference, Utc::now()).await?;

        let milestone = MilestoneRepo::find_by_id_for_update(&mut tx, payment.milestone_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Milestone",
                id: payment.milestone_id,
            })?;
        if milestone.status.can_transition_to(MilestoneStatus::Paid) {
            MilestoneRepo::set_status(&mut tx, milestone.id, MilestoneStatus::Paid).await?;
        }

        let project = self.project_of(&milestone).await?;
        let mut events = vec![PlatformEvent::new("payment.transferred")
            .with_source("payment", payment_id)
            .with_actor(admin_id)
            .with_recipient(project.provider_id)
            .with_payload(serde_json::json!({ "reference": reference }))];

        let unpaid = MilestoneRepo::count_unpaid(&mut tx, project.id).await?;
        if unpaid == 0 {
            if project.status.can_transition_to(ProjectStatus::Completed) {
                ProjectRepo::set_status(&mut tx, project.id, ProjectStatus::Completed).await?;
                events.push(
                    PlatformEvent::new("project.completed")
                        .with_source("project", project.id)
                        .with_recipient(project.company_id)
                        .with_recipient(project.provider_id),
                );
            }
            let closed =
                super::dispute::auto_close_for_completed_project(&mut tx, project.id).await?;
            if closed > 0 {
                tracing::info!(project_id = project.id, closed, "Auto-closed open disputes");
            }
        }

        PaymentAuditRepo::append(
            &mut tx,
            payment_id,
            &format!("admin:{admin_id}"),
            "transferred",
            &serde_json::json!({ "reference": reference }),
        )
        .await?;

        tx.commit().await?;
        publish_all(&self.bus, events);
        self.reload(payment_id).await
    }

    /// Refund part or all of an escrowed payment.
    ///
    /// A full refund terminates the payment and cancels its milestone. A
    /// partial refund leaves the payment escrowed with a reduced amount and
    /// a recomputed fee split.
    pub async fn refund(
        &self,
        payment_id: DbId,
        admin_id: DbId,
        amount: Option<Decimal>,
        reason: &str,
    ) -> AppResult<Payment> {
        self.require_admin(admin_id).await?;

        let mut tx = self.pool.begin().await?;
        let payment = lock_payment(&mut tx, payment_id).await?;

        let refund_amount = round2(amount.unwrap_or(payment.amount));
        let applied = apply_refund(
            self.gateway.as_ref(),
            &mut tx,
            &payment,
            refund_amount,
            reason,
            &format!("admin:{admin_id}"),
        )
        .await?;

        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new("payment.refunded")
                .with_source("payment", payment_id)
                .with_actor(admin_id)
                .with_recipient(self.company_of(&payment).await?)
                .with_payload(serde_json::json!({
                    "refunded_amount": applied.refunded_amount,
                    "full": applied.full,
                }))],
        );
        self.reload(payment_id).await
    }

    /// Process a verified webhook delivery.
    ///
    /// Deduplication and all effects share one transaction: a retry after a
    /// failed attempt is accepted, a retry after success is a no-op. Every
    /// handler converges idempotently, assuming nothing about delivery
    /// order.
    pub async fn process_webhook(&self, event: &WebhookEvent) -> AppResult<WebhookOutcome> {
        let mut tx = self.pool.begin().await?;

        if !WebhookEventRepo::insert_if_new(&mut tx, &event.id, &event.event_type_raw).await? {
            tx.commit().await?;
            return Ok(WebhookOutcome::Duplicate);
        }

        let Some(event_type) = event.event_type() else {
            tracing::debug!(event_type = %event.event_type_raw, "Ignoring unrecognized webhook");
            tx.commit().await?;
            return Ok(WebhookOutcome::Ignored);
        };

        let mut events = Vec::new();
        let outcome = match event_type {
            GatewayEventType::PaymentIntentSucceeded => {
                self.on_intent_succeeded(&mut tx, event, &mut events).await?
            }
            GatewayEventType::PaymentIntentFailed => {
                self.on_intent_failed(&mut tx, event, &mut events).await?
            }
            GatewayEventType::ChargeRefunded => {
                self.on_charge_refunded(&mut tx, event, &mut events).await?
            }
            GatewayEventType::ChargeDisputeCreated => {
                self.on_dispute_created(&mut tx, event, &mut events).await?
            }
            GatewayEventType::ChargeDisputeClosed => {
                self.on_dispute_closed(&mut tx, event, &mut events).await?
            }
        };

        tx.commit().await?;
        publish_all(&self.bus, events);
        Ok(outcome)
    }

    /// The charge succeeded: the funds are in escrow.
    async fn on_intent_succeeded(
        &self,
        tx: &mut PgTx<'_>,
        event: &WebhookEvent,
        events: &mut Vec<PlatformEvent>,
    ) -> AppResult<WebhookOutcome> {
        let Some(payment) = self.payment_by_intent(tx, event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };

        match payment.status {
            // Already converged (or moved further along); nothing to do.
            PaymentStatus::Escrowed
            | PaymentStatus::Released
            | PaymentStatus::Transferred
            | PaymentStatus::Refunded
            | PaymentStatus::Disputed => return Ok(WebhookOutcome::Processed),
            PaymentStatus::Failed => {
                tracing::warn!(
                    payment_id = payment.id,
                    "Success webhook for a failed payment; leaving state unchanged"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            PaymentStatus::Pending | PaymentStatus::InProgress => {}
        }

        // Prefer the charge id from the delivery; fall back to asking the
        // gateway.
        let charge_id = match event.charge_id() {
            Some(c) => Some(c.to_string()),
            None => {
                let intent_id = payment
                    .gateway_intent_id
                    .as_deref()
                    .ok_or_else(|| CoreError::Internal("In-progress payment without intent".into()))?;
                self.gateway
                    .retrieve_intent(intent_id)
                    .await
                    .map_err(gateway_err)?
                    .charge_id
            }
        };

        PaymentRepo::mark_escrowed(tx, payment.id, charge_id.as_deref(), Utc::now()).await?;

        let milestone = MilestoneRepo::find_by_id_for_update(tx, payment.milestone_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Milestone",
                id: payment.milestone_id,
            })?;
        if milestone.status == MilestoneStatus::Locked {
            MilestoneRepo::mark_escrow_funded(tx, milestone.id).await?;
        }

        PaymentAuditRepo::append(
            tx,
            payment.id,
            "gateway",
            "escrowed",
            &serde_json::json!({ "charge_id": charge_id }),
        )
        .await?;

        let project = self.project_of(&milestone).await?;
        events.push(
            PlatformEvent::new("payment.escrowed")
                .with_source("payment", payment.id)
                .with_recipient(project.company_id)
                .with_recipient(project.provider_id)
                .with_payload(serde_json::json!({ "milestone_id": milestone.id })),
        );
        Ok(WebhookOutcome::Processed)
    }

    /// The charge failed; the payment terminates with the gateway's message.
    async fn on_intent_failed(
        &self,
        tx: &mut PgTx<'_>,
        event: &WebhookEvent,
        events: &mut Vec<PlatformEvent>,
    ) -> AppResult<WebhookOutcome> {
        let Some(payment) = self.payment_by_intent(tx, event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };

        if !payment.status.can_transition_to(PaymentStatus::Failed) {
            // Out-of-order delivery after convergence; drop it.
            return Ok(WebhookOutcome::Processed);
        }

        let message = event.failure_message().unwrap_or("Payment failed");
        PaymentRepo::mark_failed(tx, payment.id, message).await?;
        PaymentAuditRepo::append(
            tx,
            payment.id,
            "gateway",
            "failed",
            &serde_json::json!({ "message": message }),
        )
        .await?;

        events.push(
            PlatformEvent::new("payment.failed")
                .with_source("payment", payment.id)
                .with_recipient(self.company_of(&payment).await?)
                .with_payload(serde_json::json!({ "message": message })),
        );
        Ok(WebhookOutcome::Processed)
    }

    /// The gateway reports a refund issued outside our refund path (or a
    /// retried notification of our own); converge to refunded.
    async fn on_charge_refunded(
        &self,
        tx: &mut PgTx<'_>,
        event: &WebhookEvent,
        events: &mut Vec<PlatformEvent>,
    ) -> AppResult<WebhookOutcome> {
        let Some(payment) = self.payment_by_charge(tx, event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };

        if payment.status == PaymentStatus::Refunded {
            return Ok(WebhookOutcome::Processed);
        }
        if !payment.status.can_transition_to(PaymentStatus::Refunded) {
            tracing::warn!(
                payment_id = payment.id,
                status = %payment.status,
                "Refund webhook for a payment that cannot refund; leaving state unchanged"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        PaymentRepo::mark_refunded(tx, payment.id, None, payment.refunded_total + payment.amount)
            .await?;
        cancel_milestone_if_possible(tx, payment.milestone_id).await?;
        PaymentAuditRepo::append(tx, payment.id, "gateway", "refunded", &serde_json::json!({}))
            .await?;

        events.push(
            PlatformEvent::new("payment.refunded")
                .with_source("payment", payment.id)
                .with_recipient(self.company_of(&payment).await?)
                .with_payload(serde_json::json!({
                    "refunded_amount": payment.amount,
                    "full": true,
                })),
        );
        Ok(WebhookOutcome::Processed)
    }

    /// An external chargeback opened: freeze the payment and milestone and
    /// open a tracking dispute raised by the gateway.
    async fn on_dispute_created(
        &self,
        tx: &mut PgTx<'_>,
        event: &WebhookEvent,
        events: &mut Vec<PlatformEvent>,
    ) -> AppResult<WebhookOutcome> {
        let Some(payment) = self.payment_by_charge(tx, event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };

        if payment.status == PaymentStatus::Disputed {
            return Ok(WebhookOutcome::Processed);
        }
        if !payment.status.can_transition_to(PaymentStatus::Disputed) {
            tracing::warn!(
                payment_id = payment.id,
                status = %payment.status,
                "Chargeback webhook for a payment that cannot dispute; leaving state unchanged"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        PaymentRepo::set_status(tx, payment.id, PaymentStatus::Disputed).await?;

        let milestone = MilestoneRepo::find_by_id_for_update(tx, payment.milestone_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Milestone",
                id: payment.milestone_id,
            })?;
        if milestone.status.can_transition_to(MilestoneStatus::Disputed) {
            MilestoneRepo::set_status(tx, milestone.id, MilestoneStatus::Disputed).await?;
        }

        let project = self.project_of(&milestone).await?;
        if project.status.can_transition_to(ProjectStatus::Disputed) {
            ProjectRepo::set_status(tx, project.id, ProjectStatus::Disputed).await?;
        }

        let dispute = DisputeRepo::create(
            tx,
            &CreateDispute {
                project_id: project.id,
                milestone_id: Some(milestone.id),
                payment_id: Some(payment.id),
                raised_by: "gateway".to_string(),
                reason: event.dispute_reason().unwrap_or("chargeback").to_string(),
                contested_amount: Some(payment.amount),
            },
        )
        .await?;

        PaymentAuditRepo::append(
            tx,
            payment.id,
            "gateway",
            "chargeback_opened",
            &serde_json::json!({ "dispute_id": dispute.id }),
        )
        .await?;

        events.push(
            PlatformEvent::new("dispute.opened")
                .with_source("dispute", dispute.id)
                .with_recipient(project.company_id)
                .with_recipient(project.provider_id)
                .with_payload(serde_json::json!({
                    "payment_id": payment.id,
                    "raised_by": "gateway",
                })),
        );
        Ok(WebhookOutcome::Processed)
    }

    /// An external chargeback closed: the verdict decides whether the funds
    /// return to escrow or leave as a refund.
    async fn on_dispute_closed(
        &self,
        tx: &mut PgTx<'_>,
        event: &WebhookEvent,
        events: &mut Vec<PlatformEvent>,
    ) -> AppResult<WebhookOutcome> {
        let Some(payment) = self.payment_by_charge(tx, event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };
        if payment.status != PaymentStatus::Disputed {
            // Already converged by an earlier delivery.
            return Ok(WebhookOutcome::Processed);
        }
        let Some(verdict) = event.dispute_verdict() else {
            tracing::warn!(payment_id = payment.id, "Chargeback closed without a verdict");
            return Ok(WebhookOutcome::Ignored);
        };

        let tracking = DisputeRepo::find_open_for_payment(tx, payment.id).await?;

        match verdict {
            DisputeVerdict::ProviderWins => {
                PaymentRepo::set_status(tx, payment.id, PaymentStatus::Escrowed).await?;
                if let Some(d) = &tracking {
                    DisputeRepo::append_note(
                        tx,
                        d.id,
                        "Chargeback closed in the provider's favor; funds returned to escrow.",
                        0,
                        "System",
                    )
                    .await?;
                    DisputeRepo::set_status(tx, d.id, DisputeStatus::Rejected).await?;
                }
                PaymentAuditRepo::append(
                    tx,
                    payment.id,
                    "gateway",
                    "chargeback_won",
                    &serde_json::json!({}),
                )
                .await?;
            }
            DisputeVerdict::CustomerWins => {
                PaymentRepo::mark_refunded(
                    tx,
                    payment.id,
                    None,
                    payment.refunded_total + payment.amount,
                )
                .await?;
                cancel_milestone_if_possible(tx, payment.milestone_id).await?;
                if let Some(d) = &tracking {
                    DisputeRepo::append_note(
                        tx,
                        d.id,
                        "Chargeback closed in the customer's favor; payment refunded.",
                        0,
                        "System",
                    )
                    .await?;
                    DisputeRepo::set_status(tx, d.id, DisputeStatus::Resolved).await?;
                }
                PaymentAuditRepo::append(
                    tx,
                    payment.id,
                    "gateway",
                    "chargeback_lost",
                    &serde_json::json!({}),
                )
                .await?;
            }
        }

        events.push(
            PlatformEvent::new("dispute.chargeback_closed")
                .with_source("payment", payment.id)
                .with_recipient(self.company_of(&payment).await?)
                .with_payload(serde_json::json!({
                    "verdict": match verdict {
                        DisputeVerdict::ProviderWins => "provider_wins",
                        DisputeVerdict::CustomerWins => "customer_wins",
                    },
                })),
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn payment_by_intent(
        &self,
        tx: &mut PgTx<'_>,
        event: &WebhookEvent,
    ) -> AppResult<Option<Payment>> {
        let Some(intent_id) = event.intent_id() else {
            tracing::warn!(event_id = %event.id, "Intent webhook without an intent id");
            return Ok(None);
        };
        let payment = PaymentRepo::find_by_intent_id_for_update(tx, intent_id).await?;
        if payment.is_none() {
            tracing::warn!(intent_id, "Webhook for an unknown payment intent");
        }
        Ok(payment)
    }

    async fn payment_by_charge(
        &self,
        tx: &mut PgTx<'_>,
        event: &WebhookEvent,
    ) -> AppResult<Option<Payment>> {
        let Some(charge_id) = event.charge_id() else {
            tracing::warn!(event_id = %event.id, "Charge webhook without a charge id");
            return Ok(None);
        };
        let payment = PaymentRepo::find_by_charge_id_for_update(tx, charge_id).await?;
        if payment.is_none() {
            tracing::warn!(charge_id, "Webhook for an unknown charge");
        }
        Ok(payment)
    }

    async fn project_of(&self, milestone: &Milestone) -> AppResult<Project> {
        ProjectRepo::find_by_id(&self.pool, milestone.project_id)
            .await?
            .ok_or_else(|| {
                AppError::from(CoreError::NotFound {
                    entity: "Project",
                    id: milestone.project_id,
                })
            })
    }

    async fn company_of(&self, payment: &Payment) -> AppResult<DbId> {
        let project = ProjectRepo::find_by_id(&self.pool, payment.project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: payment.project_id,
            })?;
        Ok(project.company_id)
    }

    async fn require_admin(&self, user_id: DbId) -> AppResult<()> {
        let user = UserRepo::find_by_id(&self.pool, user_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "User",
                id: user_id,
            })?;
        if user.role != "admin" {
            return Err(
                CoreError::Forbidden("This action requires an admin".to_string()).into(),
            );
        }
        Ok(())
    }

    async fn require_company_or_admin(&self, project: &Project, actor_id: DbId) -> AppResult<()> {
        if actor_id == project.company_id {
            return Ok(());
        }
        self.require_admin(actor_id).await.map_err(|_| {
            AppError::from(CoreError::Forbidden(
                "Only the company or an admin can release a payment".to_string(),
            ))
        })
    }

    async fn reload(&self, payment_id: DbId) -> AppResult<Payment> {
        PaymentRepo::find_by_id(&self.pool, payment_id)
            .await?
            .ok_or_else(|| {
                AppError::from(CoreError::NotFound {
                    entity: "Payment",
                    id: payment_id,
                })
            })
    }
}

/// Lock a payment row for the remainder of the transaction.
pub(crate) async fn lock_payment(
    tx: &mut PgTx<'_>,
    payment_id: DbId,
) -> Result<Payment, AppError> {
    PaymentRepo::find_by_id_for_update(tx, payment_id)
        .await?
        .ok_or_else(|| {
            AppError::from(CoreError::NotFound {
                entity: "Payment",
                id: payment_id,
            })
        })
}

/// A refund applied inside a transaction.
pub(crate) struct RefundApplied {
    pub refunded_amount: Decimal,
    /// Whether the refund consumed the full remaining amount.
    pub full: bool,
}

/// Validate and execute a refund against the gateway, then apply the local
/// state change. Shared by the admin refund endpoint and the dispute payout
/// refund leg; the caller holds the payment row lock.
pub(crate) async fn apply_refund(
    gateway: &dyn PaymentGateway,
    tx: &mut PgTx<'_>,
    payment: &Payment,
    refund_amount: Decimal,
    reason: &str,
    actor: &str,
) -> Result<RefundApplied, AppError> {
    if payment.status != PaymentStatus::Escrowed {
        return Err(CoreError::invalid_state("Payment", payment.status, "escrowed").into());
    }
    let charge_id = payment.gateway_charge_id.as_deref().ok_or_else(|| {
        CoreError::PreconditionFailed("Payment has no captured charge reference".to_string())
    })?;
    if refund_amount <= Decimal::ZERO || refund_amount > payment.amount {
        return Err(CoreError::Validation(format!(
            "Refund amount {refund_amount} must be positive and at most {}",
            payment.amount
        ))
        .into());
    }

    let metadata = HashMap::from([
        ("payment_id".to_string(), payment.id.to_string()),
        ("reason".to_string(), reason.to_string()),
        ("actor".to_string(), actor.to_string()),
    ]);
    let handle = gateway
        .refund(charge_id, to_minor_units(refund_amount)?, &metadata)
        .await
        .map_err(gateway_err)?;

    let full = refund_amount == payment.amount;
    if full {
        PaymentRepo::mark_refunded(
            tx,
            payment.id,
            Some(&handle.refund_id),
            payment.refunded_total + refund_amount,
        )
        .await?;
        cancel_milestone_if_possible(tx, payment.milestone_id).await?;
        PaymentAuditRepo::append(
            tx,
            payment.id,
            actor,
            "refunded",
            &serde_json::json!({
                "refund_amount": refund_amount,
                "refund_id": handle.refund_id,
                "reason": reason,
            }),
        )
        .await?;
    } else {
        let new_amount = payment.amount - refund_amount;
        PaymentRepo::apply_partial_refund(
            tx,
            payment.id,
            new_amount,
            fee_split(new_amount),
            &handle.refund_id,
            payment.refunded_total + refund_amount,
            payment.original_amount.unwrap_or(payment.amount),
        )
        .await?;
        PaymentAuditRepo::append(
            tx,
            payment.id,
            actor,
            "partial_refund",
            &serde_json::json!({
                "refund_amount": refund_amount,
                "remaining_amount": new_amount,
                "refund_id": handle.refund_id,
                "reason": reason,
            }),
        )
        .await?;
    }

    Ok(RefundApplied {
        refunded_amount: refund_amount,
        full,
    })
}

/// Cancel the milestone of a fully refunded payment where its state allows.
async fn cancel_milestone_if_possible(
    tx: &mut PgTx<'_>,
    milestone_id: DbId,
) -> Result<(), sqlx::Error> {
    if let Some(milestone) = MilestoneRepo::find_by_id_for_update(tx, milestone_id).await? {
        if milestone.status.can_transition_to(MilestoneStatus::Cancelled) {
            MilestoneRepo::set_status(tx, milestone.id, MilestoneStatus::Cancelled).await?;
        }
    }
    Ok(())
}

pub(crate) fn gateway_err(err: GatewayError) -> CoreError {
    CoreError::Gateway(err.to_string())
}
