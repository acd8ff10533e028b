//! Dispute resolution engine.
//!
//! Admin-driven resolution of disputes between the two parties, including
//! the partial-split payout that refunds one share to the customer and
//! releases the remainder to the provider. Every resolution action appends
//! to the dispute's journal; the journal is never edited.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use worklane_core::error::CoreError;
use worklane_core::money::round2;
use worklane_core::types::DbId;
use worklane_db::models::dispute::{CreateDispute, Dispute, DisputeResolutionNote};
use worklane_db::models::payment::Payment;
use worklane_db::models::status::{DisputeStatus, MilestoneStatus, PaymentStatus, ProjectStatus};
use worklane_db::models::user::User;
use worklane_db::repositories::{
    DisputeRepo, MilestoneRepo, PaymentAuditRepo, PaymentRepo, PgTx, ProjectRepo, UserRepo,
};
use worklane_db::DbPool;
use worklane_events::{EventBus, PlatformEvent};
use worklane_gateway::PaymentGateway;

use crate::error::{AppError, AppResult};

use super::escrow::{apply_refund, lock_payment};
use super::publish_all;

/// Outcome of one leg of a payout split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    /// The leg executed.
    Completed,
    /// The leg was attempted and failed; see the accompanying error.
    Failed,
    /// The payment had already been released before this payout ran.
    AlreadyReleased,
    /// The leg's amount was zero.
    NotRequested,
}

/// Result of a partial-split payout: one status per leg, captured
/// independently so a failed leg never hides a completed one.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutSummary {
    pub dispute_id: DbId,
    pub payment_id: DbId,
    pub refund_status: LegStatus,
    pub refund_error: Option<String>,
    pub refunded_amount: Decimal,
    pub release_status: LegStatus,
    pub release_error: Option<String>,
    pub released_amount: Decimal,
}

/// Admin dispute lifecycle: verdicts, payouts, redos.
pub struct DisputeEngine {
    pool: DbPool,
    gateway: Arc<dyn PaymentGateway>,
    bus: Arc<EventBus>,
}

impl DisputeEngine {
    pub fn new(pool: DbPool, gateway: Arc<dyn PaymentGateway>, bus: Arc<EventBus>) -> Self {
        Self { pool, gateway, bus }
    }

    /// A party raises a dispute against a project, optionally pinned to a
    /// milestone and payment. The pinned milestone freezes in `disputed`.
    pub async fn open(&self, input: CreateDispute, actor_id: DbId) -> AppResult<Dispute> {
        let mut tx = self.pool.begin().await?;

        let project = ProjectRepo::find_by_id_for_update(&mut tx, input.project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: input.project_id,
            })?;
        let raised_by = if actor_id == project.company_id {
            "company"
        } else if actor_id == project.provider_id {
            "provider"
        } else {
            return Err(CoreError::Forbidden(
                "Only a party to the project can raise a dispute".to_string(),
            )
            .into());
        };
        if input.reason.trim().is_empty() {
            return Err(CoreError::Validation("A dispute requires a reason".to_string()).into());
        }

        if let Some(milestone_id) = input.milestone_id {
            let milestone = MilestoneRepo::find_by_id_for_update(&mut tx, milestone_id)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: "Milestone",
                    id: milestone_id,
                })?;
            if milestone.project_id != project.id {
                return Err(CoreError::Validation(
                    "Milestone does not belong to the project".to_string(),
                )
                .into());
            }
            if milestone.status.can_transition_to(MilestoneStatus::Disputed) {
                MilestoneRepo::set_status(&mut tx, milestone_id, MilestoneStatus::Disputed).await?;
            }
        }
        if project.status.can_transition_to(ProjectStatus::Disputed) {
            ProjectRepo::set_status(&mut tx, project.id, ProjectStatus::Disputed).await?;
        }

        let dispute = DisputeRepo::create(
            &mut tx,
            &CreateDispute {
                raised_by: raised_by.to_string(),
                ..input
            },
        )
        .await?;

        tx.commit().await?;

        let counterparty = if actor_id == project.company_id {
            project.provider_id
        } else {
            project.company_id
        };
        publish_all(
            &self.bus,
            vec![PlatformEvent::new("dispute.opened")
                .with_source("dispute", dispute.id)
                .with_actor(actor_id)
                .with_recipient(counterparty)
                .with_payload(serde_json::json!({ "raised_by": raised_by }))],
        );
        Ok(dispute)
    }

    /// Admin records a verdict on a dispute.
    ///
    /// - `resolved`: the claim is upheld; the project moves to `disputed`
    ///   and every non-terminal milestone is rejected.
    /// - `closed`: the dispute ends without a verdict; a pinned milestone
    ///   stays frozen in `disputed`.
    /// - `rejected`: the claim is dismissed; the contested milestone
    ///   returns to `in_progress` and normal work resumes.
    ///
    /// Every verdict requires a journal note.
    pub async fn resolve(
        &self,
        dispute_id: DbId,
        admin_id: DbId,
        verdict: DisputeStatus,
        note: &str,
    ) -> AppResult<Dispute> {
        let admin = self.require_admin(admin_id).await?;
        if !matches!(
            verdict,
            DisputeStatus::Resolved | DisputeStatus::Closed | DisputeStatus::Rejected
        ) {
            return Err(CoreError::Validation(format!(
                "'{verdict}' is not a resolution verdict"
            ))
            .into());
        }
        if note.trim().is_empty() {
            return Err(
                CoreError::Validation("A resolution requires a note".to_string()).into(),
            );
        }

        let mut tx = self.pool.begin().await?;
        let dispute = lock_dispute(&mut tx, dispute_id).await?;
        require_open(&dispute)?;

        let project = ProjectRepo::find_by_id_for_update(&mut tx, dispute.project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: dispute.project_id,
            })?;

        match verdict {
            DisputeStatus::Resolved => {
                if project.status.can_transition_to(ProjectStatus::Disputed) {
                    ProjectRepo::set_status(&mut tx, project.id, ProjectStatus::Disputed).await?;
                }
                MilestoneRepo::reject_all_non_terminal(&mut tx, project.id).await?;
            }
            DisputeStatus::Closed => {
                // The pinned milestone stays disputed; no collateral effects.
            }
            DisputeStatus::Rejected => {
                if let Some(milestone_id) = dispute.milestone_id {
                    let milestone = MilestoneRepo::find_by_id_for_update(&mut tx, milestone_id)
                        .await?
                        .ok_or(CoreError::NotFound {
                            entity: "Milestone",
                            id: milestone_id,
                        })?;
                    if milestone.status == MilestoneStatus::Disputed {
                        MilestoneRepo::set_status(&mut tx, milestone_id, MilestoneStatus::InProgress)
                            .await?;
                    }
                    if let Some(payment) =
                        PaymentRepo::find_settleable_for_milestone(&mut tx, milestone_id).await?
                    {
                        PaymentAuditRepo::append(
                            &mut tx,
                            payment.id,
                            &format!("admin:{admin_id}"),
                            "dispute_rejected",
                            &serde_json::json!({ "dispute_id": dispute_id }),
                        )
                        .await?;
                    }
                }
                if project.status == ProjectStatus::Disputed {
                    ProjectRepo::set_status(&mut tx, project.id, ProjectStatus::InProgress).await?;
                }
            }
            _ => unreachable!("verdict validated above"),
        }

        DisputeRepo::append_note(&mut tx, dispute_id, note, admin_id, &admin.display_name).await?;
        DisputeRepo::set_status(&mut tx, dispute_id, verdict).await?;

        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new(format!("dispute.{verdict}"))
                .with_source("dispute", dispute_id)
                .with_actor(admin_id)
                .with_recipient(project.company_id)
                .with_recipient(project.provider_id)],
        );
        self.reload(dispute_id).await
    }

    /// Admin settles a dispute with a partial split: refund one share to
    /// the customer and release the remainder to the provider.
    ///
    /// The two legs are independent; a gateway failure in one leg is
    /// captured in the summary instead of aborting the other. The dispute
    /// resolves either way, with an auto-generated journal note describing
    /// the split.
    #[allow(clippy::too_many_arguments)]
    pub async fn settle_with_payout(
        &self,
        dispute_id: DbId,
        admin_id: DbId,
        refund_amount: Decimal,
        release_amount: Decimal,
        note: &str,
        transfer_reference: Option<&str>,
    ) -> AppResult<PayoutSummary> {
        let admin = self.require_admin(admin_id).await?;
        let refund_amount = round2(refund_amount);
        let release_amount = round2(release_amount);

        let mut tx = self.pool.begin().await?;
        let dispute = lock_dispute(&mut tx, dispute_id).await?;
        require_open(&dispute)?;

        let payment = self.settleable_payment(&mut tx, &dispute).await?;
        validate_split(&payment, refund_amount, release_amount)?;

        let actor = format!("admin:{admin_id}");
        let mut summary = PayoutSummary {
            dispute_id,
            payment_id: payment.id,
            refund_status: LegStatus::NotRequested,
            refund_error: None,
            refunded_amount: Decimal::ZERO,
            release_status: LegStatus::NotRequested,
            release_error: None,
            released_amount: Decimal::ZERO,
        };

        // Leg 1: refund. A gateway failure is recorded, not propagated; the
        // transaction only carries the leg's changes when it succeeded.
        if refund_amount > Decimal::ZERO {
            if payment.status == PaymentStatus::Released {
                summary.refund_status = LegStatus::Failed;
                summary.refund_error =
                    Some("Payment already released; nothing to refund".to_string());
            } else {
                match apply_refund(
                    self.gateway.as_ref(),
                    &mut tx,
                    &payment,
                    refund_amount,
                    "dispute payout split",
                    &actor,
                )
                .await
                {
                    Ok(applied) => {
                        summary.refund_status = LegStatus::Completed;
                        summary.refunded_amount = applied.refunded_amount;
                    }
                    Err(e) => {
                        summary.refund_status = LegStatus::Failed;
                        summary.refund_error = Some(e.to_string());
                        tracing::error!(
                            dispute_id,
                            payment_id = payment.id,
                            error = %e,
                            "Dispute payout refund leg failed"
                        );
                    }
                }
            }
        }

        // Leg 2: release the provider's share, but only when the payment is
        // still escrowed after leg 1.
        if release_amount > Decimal::ZERO {
            let current = lock_payment(&mut tx, payment.id).await?;
            match current.status {
                PaymentStatus::Released => {
                    summary.release_status = LegStatus::AlreadyReleased;
                }
                PaymentStatus::Escrowed => {
                    let provider_has_payout = self.provider_payout_exists(&dispute).await?;
                    if !provider_has_payout {
                        summary.release_status = LegStatus::Failed;
                        summary.release_error =
                            Some("Provider has no registered payout destination".to_string());
                    } else {
                        PaymentRepo::mark_released(&mut tx, payment.id, Utc::now()).await?;
                        PaymentRepo::mark_transferred(
                            &mut tx,
                            payment.id,
                            transfer_reference,
                            Utc::now(),
                        )
                        .await?;
                        PaymentAuditRepo::append(
                            &mut tx,
                            payment.id,
                            &actor,
                            "dispute_payout_released",
                            &serde_json::json!({
                                "released_amount": release_amount,
                                "reference": transfer_reference,
                            }),
                        )
                        .await?;
                        summary.release_status = LegStatus::Completed;
                        summary.released_amount = release_amount;
                    }
                }
                other => {
                    summary.release_status = LegStatus::Failed;
                    summary.release_error =
                        Some(format!("Payment is {other}; cannot release"));
                }
            }
        }

        // Journal: the auto-generated split description, then the admin's
        // own note.
        DisputeRepo::append_note(
            &mut tx,
            dispute_id,
            &split_note(&summary),
            admin_id,
            &admin.display_name,
        )
        .await?;
        if !note.trim().is_empty() {
            DisputeRepo::append_note(&mut tx, dispute_id, note, admin_id, &admin.display_name)
                .await?;
        }

        // The payout is the final word: the dispute resolves, the project
        // stays flagged, and remaining work is rejected.
        DisputeRepo::set_status(&mut tx, dispute_id, DisputeStatus::Resolved).await?;
        let project = ProjectRepo::find_by_id_for_update(&mut tx, dispute.project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: dispute.project_id,
            })?;
        if project.status.can_transition_to(ProjectStatus::Disputed) {
            ProjectRepo::set_status(&mut tx, project.id, ProjectStatus::Disputed).await?;
        }
        MilestoneRepo::reject_all_non_terminal(&mut tx, project.id).await?;

        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new("dispute.payout_settled")
                .with_source("dispute", dispute_id)
                .with_actor(admin_id)
                .with_recipient(project.company_id)
                .with_recipient(project.provider_id)
                .with_payload(serde_json::to_value(&summary).unwrap_or_default())],
        );
        Ok(summary)
    }

    /// Admin sends the contested milestone back to the provider for another
    /// attempt. Escrow is untouched; the dispute moves to `under_review`.
    pub async fn redo_milestone(
        &self,
        dispute_id: DbId,
        admin_id: DbId,
        note: &str,
    ) -> AppResult<Dispute> {
        let admin = self.require_admin(admin_id).await?;

        let mut tx = self.pool.begin().await?;
        let dispute = lock_dispute(&mut tx, dispute_id).await?;
        require_open(&dispute)?;

        let milestone_id = dispute.milestone_id.ok_or_else(|| {
            CoreError::PreconditionFailed(
                "Dispute is not attached to a milestone".to_string(),
            )
        })?;
        let milestone = MilestoneRepo::find_by_id_for_update(&mut tx, milestone_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Milestone",
                id: milestone_id,
            })?;
        if !milestone.status.can_transition_to(MilestoneStatus::InProgress)
            && milestone.status != MilestoneStatus::InProgress
        {
            return Err(CoreError::invalid_state(
                "Milestone",
                milestone.status,
                "a state that can return to in_progress",
            )
            .into());
        }
        if milestone.status != MilestoneStatus::InProgress {
            MilestoneRepo::set_status(&mut tx, milestone_id, MilestoneStatus::InProgress).await?;
        }

        if let Some(payment) =
            PaymentRepo::find_settleable_for_milestone(&mut tx, milestone_id).await?
        {
            PaymentAuditRepo::append(
                &mut tx,
                payment.id,
                &format!("admin:{admin_id}"),
                "redo_requested",
                &serde_json::json!({ "dispute_id": dispute_id }),
            )
            .await?;
        }

        let project = ProjectRepo::find_by_id_for_update(&mut tx, dispute.project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: dispute.project_id,
            })?;
        if project.status == ProjectStatus::Disputed {
            ProjectRepo::set_status(&mut tx, project.id, ProjectStatus::InProgress).await?;
        }

        DisputeRepo::append_note(
            &mut tx,
            dispute_id,
            "Redo requested: milestone returned to in_progress.",
            admin_id,
            &admin.display_name,
        )
        .await?;
        if !note.trim().is_empty() {
            DisputeRepo::append_note(&mut tx, dispute_id, note, admin_id, &admin.display_name)
                .await?;
        }
        if dispute.status == DisputeStatus::Open {
            DisputeRepo::set_status(&mut tx, dispute_id, DisputeStatus::UnderReview).await?;
        }

        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new("dispute.redo")
                .with_source("dispute", dispute_id)
                .with_actor(admin_id)
                .with_recipient(project.provider_id)
                .with_payload(serde_json::json!({ "milestone_id": milestone_id }))],
        );
        self.reload(dispute_id).await
    }

    /// A dispute with its resolution journal.
    pub async fn with_notes(
        &self,
        dispute_id: DbId,
    ) -> AppResult<(Dispute, Vec<DisputeResolutionNote>)> {
        let dispute = self.reload(dispute_id).await?;
        let notes = DisputeRepo::list_notes(&self.pool, dispute_id).await?;
        Ok((dispute, notes))
    }

    /// Resolve the payment a dispute settles against: the explicitly pinned
    /// payment, or the most recent escrowed/released payment of the pinned
    /// milestone.
    async fn settleable_payment(
        &self,
        tx: &mut PgTx<'_>,
        dispute: &Dispute,
    ) -> AppResult<Payment> {
        let payment = match (dispute.payment_id, dispute.milestone_id) {
            (Some(payment_id), _) => Some(lock_payment(tx, payment_id).await?),
            (None, Some(milestone_id)) => {
                PaymentRepo::find_settleable_for_milestone(tx, milestone_id).await?
            }
            (None, None) => None,
        };
        let payment = payment.ok_or_else(|| {
            CoreError::PreconditionFailed(
                "Dispute has no settleable payment".to_string(),
            )
        })?;
        if !matches!(
            payment.status,
            PaymentStatus::Escrowed | PaymentStatus::Released
        ) {
            return Err(CoreError::invalid_state(
                "Payment",
                payment.status,
                "escrowed or released",
            )
            .into());
        }
        Ok(payment)
    }

    async fn provider_payout_exists(&self, dispute: &Dispute) -> AppResult<bool> {
        let project = ProjectRepo::find_by_id(&self.pool, dispute.project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: dispute.project_id,
            })?;
        let provider = UserRepo::find_by_id(&self.pool, project.provider_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "User",
                id: project.provider_id,
            })?;
        Ok(provider.payout_account_id.is_some())
    }

    async fn require_admin(&self, user_id: DbId) -> AppResult<User> {
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
        Ok(user)
    }

    async fn reload(&self, dispute_id: DbId) -> AppResult<Dispute> {
        DisputeRepo::find_by_id(&self.pool, dispute_id)
            .await?
            .ok_or_else(|| {
                AppError::from(CoreError::NotFound {
                    entity: "Dispute",
                    id: dispute_id,
                })
            })
    }
}

/// Close every open dispute of a project that just completed with all
/// milestones paid. Called from the settlement path inside its transaction.
pub(crate) async fn auto_close_for_completed_project(
    tx: &mut PgTx<'_>,
    project_id: DbId,
) -> Result<u64, sqlx::Error> {
    let open = DisputeRepo::list_unresolved_for_project(tx, project_id).await?;
    let count = open.len() as u64;
    for dispute in open {
        DisputeRepo::append_note(
            tx,
            dispute.id,
            "Automatically closed: project completed with all milestones paid.",
            0,
            "System",
        )
        .await?;
        DisputeRepo::set_status(tx, dispute.id, DisputeStatus::Closed).await?;
    }
    Ok(count)
}

async fn lock_dispute(tx: &mut PgTx<'_>, dispute_id: DbId) -> Result<Dispute, AppError> {
    DisputeRepo::find_by_id_for_update(tx, dispute_id)
        .await?
        .ok_or_else(|| {
            AppError::from(CoreError::NotFound {
                entity: "Dispute",
                id: dispute_id,
            })
        })
}

fn require_open(dispute: &Dispute) -> Result<(), CoreError> {
    if dispute.status.is_terminal() {
        return Err(CoreError::invalid_state(
            "Dispute",
            dispute.status,
            "open or under_review",
        ));
    }
    Ok(())
}

/// Check the requested split against the payment before touching money.
fn validate_split(
    payment: &Payment,
    refund_amount: Decimal,
    release_amount: Decimal,
) -> Result<(), CoreError> {
    if refund_amount < Decimal::ZERO || release_amount < Decimal::ZERO {
        return Err(CoreError::Validation(
            "Split amounts must not be negative".to_string(),
        ));
    }
    if refund_amount + release_amount == Decimal::ZERO {
        return Err(CoreError::Validation(
            "A payout must refund or release a positive amount".to_string(),
        ));
    }
    if release_amount > Decimal::ZERO && refund_amount + release_amount != payment.amount {
        return Err(CoreError::Validation(format!(
            "Refund {refund_amount} and release {release_amount} must sum to the payment amount {}",
            payment.amount
        )));
    }
    if refund_amount > payment.amount {
        return Err(CoreError::Validation(format!(
            "Refund {refund_amount} exceeds the payment amount {}",
            payment.amount
        )));
    }
    Ok(())
}

/// Human-readable description of the split for the dispute journal.
fn split_note(summary: &PayoutSummary) -> String {
    match (summary.refund_status, summary.release_status) {
        (LegStatus::Completed, LegStatus::Completed) => format!(
            "Partial Split: Refunded {} to customer, Released {} to provider.",
            summary.refunded_amount, summary.released_amount
        ),
        (LegStatus::Completed, LegStatus::NotRequested) => {
            format!("Refunded {} to customer.", summary.refunded_amount)
        }
        (LegStatus::NotRequested, LegStatus::Completed) => {
            format!("Released {} to provider.", summary.released_amount)
        }
        _ => format!(
            "Payout attempted: refund {:?}, release {:?}.",
            summary.refund_status, summary.release_status
        ),
    }
}
