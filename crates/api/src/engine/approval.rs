//! Milestone approval coordinator.
//!
//! Governs the dual-approval handshake over a project's milestone plan and
//! the work review loop on individual milestones. The plan is mutable while
//! unlocked; once both parties approve, the plan locks irreversibly and a
//! pending payment is created for every milestone.

use std::sync::Arc;

use chrono::Utc;
use worklane_core::error::CoreError;
use worklane_core::milestone_plan::{self, MilestoneDraft};
use worklane_core::money::fee_split;
use worklane_core::roles::ActorRole;
use worklane_core::types::DbId;
use worklane_db::models::milestone::{Milestone, MilestoneSubmission};
use worklane_db::models::project::Project;
use worklane_db::models::status::{MilestoneStatus, ProjectStatus};
use worklane_db::repositories::{MilestoneRepo, PaymentRepo, ProjectRepo};
use worklane_db::DbPool;
use worklane_events::{EventBus, PlatformEvent};

use crate::error::AppResult;

use super::publish_all;

/// Coordinates plan approval and the milestone work/review loop.
pub struct ApprovalEngine {
    pool: DbPool,
    bus: Arc<EventBus>,
}

impl ApprovalEngine {
    pub fn new(pool: DbPool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    /// Replace a project's milestone plan wholesale.
    ///
    /// Only legal while the plan is unlocked; any prior approval from the
    /// other party is invalidated by the replacement.
    pub async fn replace_milestones(
        &self,
        project_id: DbId,
        actor_id: DbId,
        drafts: Vec<MilestoneDraft>,
    ) -> AppResult<Vec<Milestone>> {
        milestone_plan::validate_plan(&drafts, Utc::now().date_naive())?;

        let mut tx = self.pool.begin().await?;

        let project = ProjectRepo::find_by_id_for_update(&mut tx, project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: project_id,
            })?;
        let role = party_role(&project, actor_id)?;

        if project.milestones_locked {
            return Err(CoreError::invalid_state("Project", "locked", "an unlocked milestone plan").into());
        }

        let total = milestone_plan::plan_total(&drafts);
        if total != project.approved_price {
            return Err(CoreError::Validation(format!(
                "Milestone amounts must sum to the approved price {}, got {total}",
                project.approved_price
            ))
            .into());
        }

        let created = MilestoneRepo::replace_for_project(&mut tx, project_id, &drafts).await?;
        ProjectRepo::reset_approvals(&mut tx, project_id).await?;

        tx.commit().await?;

        let counterparty = counterparty_id(&project, role);
        publish_all(
            &self.bus,
            vec![PlatformEvent::new("milestone.plan_replaced")
                .with_source("project", project_id)
                .with_actor(actor_id)
                .with_recipient(counterparty)
                .with_payload(serde_json::json!({ "milestone_count": created.len() }))],
        );

        Ok(created)
    }

    /// Record one party's approval of the current plan.
    ///
    /// Idempotent per actor. When the second party approves, the plan locks
    /// in the same transaction: milestones move to `locked` and a pending
    /// payment is created for each with the platform fee split applied.
    pub async fn approve_plan(&self, project_id: DbId, actor_id: DbId) -> AppResult<Project> {
        let mut tx = self.pool.begin().await?;

        let project = ProjectRepo::find_by_id_for_update(&mut tx, project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: project_id,
            })?;
        let role = party_role(&project, actor_id)?;

        // Approving an already-locked plan is a no-op.
        if project.milestones_locked {
            tx.commit().await?;
            return Ok(project);
        }

        let (company_approved, provider_approved) = match role {
            ActorRole::Company => (true, project.provider_approved),
            ActorRole::Provider => (project.company_approved, true),
            ActorRole::Admin => unreachable!("party_role never returns Admin"),
        };

        let mut events = vec![PlatformEvent::new("milestone.plan_approved")
            .with_source("project", project_id)
            .with_actor(actor_id)
            .with_recipient(counterparty_id(&project, role))];

        ProjectRepo::set_approval_flag(&mut tx, project_id, company_approved, provider_approved)
            .await?;

        if company_approved && provider_approved {
            let milestones = list_in_tx(&mut tx, project_id).await?;
            if milestones.is_empty() {
                return Err(CoreError::PreconditionFailed(
                    "Project has no milestone plan to approve".to_string(),
                )
                .into());
            }

            ProjectRepo::lock_milestones(&mut tx, project_id, Utc::now()).await?;
            MilestoneRepo::set_status_for_project(
                &mut tx,
                project_id,
                MilestoneStatus::Draft,
                MilestoneStatus::Locked,
            )
            .await?;
            MilestoneRepo::set_status_for_project(
                &mut tx,
                project_id,
                MilestoneStatus::Pending,
                MilestoneStatus::Locked,
            )
            .await?;

            // One pending payment per milestone, split deterministically so
            // the set of payments is identical regardless of which party
            // approved last.
            for milestone in &milestones {
                PaymentRepo::create_pending(
                    &mut tx,
                    milestone.id,
                    project_id,
                    milestone.amount,
                    fee_split(milestone.amount),
                    "usd",
                )
                .await?;
            }

            events.push(
                PlatformEvent::new("milestone.plan_locked")
                    .with_source("project", project_id)
                    .with_actor(actor_id)
                    .with_recipient(project.company_id)
                    .with_recipient(project.provider_id)
                    .with_payload(serde_json::json!({ "milestone_count": milestones.len() })),
            );
        }

        tx.commit().await?;
        publish_all(&self.bus, events);

        let updated = ProjectRepo::find_by_id(&self.pool, project_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Project",
                id: project_id,
            })?;
        Ok(updated)
    }

    /// Provider starts work on a funded milestone.
    pub async fn start_work(&self, milestone_id: DbId, actor_id: DbId) -> AppResult<Milestone> {
        let mut tx = self.pool.begin().await?;
        let milestone = lock_milestone(&mut tx, milestone_id).await?;
        let project = self.project_of(&milestone).await?;

        if actor_id != project.provider_id {
            return Err(
                CoreError::Forbidden("Only the provider can start work".to_string()).into(),
            );
        }
        if milestone.status == MilestoneStatus::InProgress {
            tx.commit().await?;
            return Ok(milestone);
        }
        if milestone.status != MilestoneStatus::Locked {
            return Err(CoreError::invalid_state("Milestone", milestone.status, "locked").into());
        }

        MilestoneRepo::set_status(&mut tx, milestone_id, MilestoneStatus::InProgress).await?;
        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new("milestone.started")
                .with_source("milestone", milestone_id)
                .with_actor(actor_id)
                .with_recipient(project.company_id)],
        );
        self.reload(milestone_id).await
    }

    /// Provider submits work for review.
    pub async fn submit(
        &self,
        milestone_id: DbId,
        actor_id: DbId,
        note: Option<&str>,
        attachment_url: Option<&str>,
    ) -> AppResult<Milestone> {
        let mut tx = self.pool.begin().await?;
        let milestone = lock_milestone(&mut tx, milestone_id).await?;
        let project = self.project_of(&milestone).await?;

        if actor_id != project.provider_id {
            return Err(
                CoreError::Forbidden("Only the provider can submit work".to_string()).into(),
            );
        }
        require_transition(&milestone, MilestoneStatus::Submitted, "in_progress")?;

        MilestoneRepo::record_submission(&mut tx, milestone_id, note, attachment_url, Utc::now())
            .await?;
        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new("milestone.submitted")
                .with_source("milestone", milestone_id)
                .with_actor(actor_id)
                .with_recipient(project.company_id)
                .with_payload(serde_json::json!({ "revision": milestone.revision_number }))],
        );
        self.reload(milestone_id).await
    }

    /// Company requests changes on submitted work.
    ///
    /// The current submission is archived into the append-only history and
    /// the milestone returns to `in_progress` with a bumped revision number.
    pub async fn request_changes(
        &self,
        milestone_id: DbId,
        actor_id: DbId,
        reason: Option<&str>,
    ) -> AppResult<Milestone> {
        let mut tx = self.pool.begin().await?;
        let milestone = lock_milestone(&mut tx, milestone_id).await?;
        let project = self.project_of(&milestone).await?;

        if actor_id != project.company_id {
            return Err(
                CoreError::Forbidden("Only the company can request changes".to_string()).into(),
            );
        }
        if milestone.status != MilestoneStatus::Submitted {
            return Err(CoreError::invalid_state("Milestone", milestone.status, "submitted").into());
        }

        MilestoneRepo::archive_submission(&mut tx, &milestone).await?;
        tx.commit().await?;

        publish_all(
            &self.bus,
            vec![PlatformEvent::new("milestone.changes_requested")
                .with_source("milestone", milestone_id)
                .with_actor(actor_id)
                .with_recipient(project.provider_id)
                .with_payload(serde_json::json!({ "reason": reason }))],
        );
        self.reload(milestone_id).await
    }

    /// Company approves submitted work.
    ///
    /// When this was the last unapproved milestone, the project completes.
    pub async fn approve_submission(
        &self,
        milestone_id: DbId,
        actor_id: DbId,
    ) -> AppResult<Milestone> {
        let mut tx = self.pool.begin().await?;
        let milestone = lock_milestone(&mut tx, milestone_id).await?;
        let project = self.project_of(&milestone).await?;

        if actor_id != project.company_id {
            return Err(
                CoreError::Forbidden("Only the company can approve work".to_string()).into(),
            );
        }
        require_transition(&milestone, MilestoneStatus::Approved, "submitted")?;

        MilestoneRepo::record_approval(&mut tx, milestone_id, actor_id, Utc::now()).await?;

        let mut events = vec![PlatformEvent::new("milestone.approved")
            .with_source("milestone", milestone_id)
            .with_actor(actor_id)
            .with_recipient(project.provider_id)];

        let unapproved = MilestoneRepo::count_unapproved(&mut tx, project.id).await?;
        if unapproved == 0 && project.status.can_transition_to(ProjectStatus::Completed) {
            ProjectRepo::set_status(&mut tx, project.id, ProjectStatus::Completed).await?;
            events.push(
                PlatformEvent::new("project.completed")
                    .with_source("project", project.id)
                    .with_recipient(project.company_id)
                    .with_recipient(project.provider_id),
            );
        }

        tx.commit().await?;
        publish_all(&self.bus, events);
        self.reload(milestone_id).await
    }

    /// The archived submission history of a milestone, oldest first.
    pub async fn submission_history(
        &self,
        milestone_id: DbId,
    ) -> AppResult<Vec<MilestoneSubmission>> {
        MilestoneRepo::find_by_id(&self.pool, milestone_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Milestone",
                id: milestone_id,
            })?;
        Ok(MilestoneRepo::list_submissions(&self.pool, milestone_id).await?)
    }

    async fn project_of(&self, milestone: &Milestone) -> AppResult<Project> {
        ProjectRepo::find_by_id(&self.pool, milestone.project_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "Project",
                    id: milestone.project_id,
                }
                .into()
            })
    }

    async fn reload(&self, milestone_id: DbId) -> AppResult<Milestone> {
        MilestoneRepo::find_by_id(&self.pool, milestone_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "Milestone",
                    id: milestone_id,
                }
                .into()
            })
    }
}

/// Which side of the project the actor is on. Admins and strangers are
/// rejected; plan and work actions belong to the two parties.
fn party_role(project: &Project, actor_id: DbId) -> Result<ActorRole, CoreError> {
    if actor_id == project.company_id {
        Ok(ActorRole::Company)
    } else if actor_id == project.provider_id {
        Ok(ActorRole::Provider)
    } else {
        Err(CoreError::Forbidden(
            "Actor is not a party to this project".to_string(),
        ))
    }
}

fn counterparty_id(project: &Project, role: ActorRole) -> DbId {
    match role {
        ActorRole::Company => project.provider_id,
        _ => project.company_id,
    }
}

async fn lock_milestone(
    tx: &mut worklane_db::repositories::PgTx<'_>,
    milestone_id: DbId,
) -> Result<Milestone, crate::error::AppError> {
    MilestoneRepo::find_by_id_for_update(tx, milestone_id)
        .await?
        .ok_or_else(|| {
            CoreError::NotFound {
                entity: "Milestone",
                id: milestone_id,
            }
            .into()
        })
}

fn require_transition(
    milestone: &Milestone,
    to: MilestoneStatus,
    required: &'static str,
) -> Result<(), CoreError> {
    if !milestone.status.can_transition_to(to) {
        return Err(CoreError::invalid_state(
            "Milestone",
            milestone.status,
            required,
        ));
    }
    Ok(())
}

async fn list_in_tx(
    tx: &mut worklane_db::repositories::PgTx<'_>,
    project_id: DbId,
) -> Result<Vec<Milestone>, sqlx::Error> {
    // Plan locking needs the milestone set inside the locking transaction.
    sqlx::query_as::<_, Milestone>(
        "SELECT id, project_id, title, amount, due_date, seq, status, is_paid, submitted_at, \
         submission_note, submission_attachment_url, revision_number, approved_at, approved_by, \
         created_at, updated_at \
         FROM milestones WHERE project_id = $1 ORDER BY seq FOR UPDATE",
    )
    .bind(project_id)
    .fetch_all(&mut **tx)
    .await
}
