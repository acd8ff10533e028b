//! Route tree for the API.

pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /projects                                        create (POST)
/// /projects/{id}                                   get
/// /projects/{id}/milestones                        list, replace plan (PUT)
/// /projects/{id}/milestones/approve                approve plan (POST)
///
/// /milestones/{id}/start                           provider starts work (POST)
/// /milestones/{id}/submit                          provider submits work (POST)
/// /milestones/{id}/request-changes                 company requests changes (POST)
/// /milestones/{id}/approve                         company approves submission (POST)
/// /milestones/{id}/submissions                     archived submission history (GET)
/// /milestones/{id}/payments                        initiate escrow funding (POST)
/// /milestones/{id}/release                         release escrow to provider (POST)
///
/// /payments/{id}                                   get
/// /payments/{id}/audit                             audit trail (GET)
/// /payments/{id}/confirm-transfer                  admin confirms bank transfer (POST)
/// /payments/{id}/refund                            admin refunds escrow (POST)
///
/// /disputes                                        open dispute (POST)
/// /disputes/{id}                                   get with resolution notes
/// /disputes/{id}/resolve                           admin resolution verdict (POST)
/// /disputes/{id}/payout                            admin partial-split payout (POST)
/// /disputes/{id}/redo                              admin sends milestone back (POST)
///
/// /users/{id}/notifications                        list (GET)
/// /users/{id}/notifications/{nid}/read             mark read (POST)
///
/// /webhooks/gateway                                signed gateway deliveries (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Projects and milestone plans.
        .route("/projects", post(handlers::projects::create_project))
        .route("/projects/{id}", get(handlers::projects::get_project))
        .route(
            "/projects/{id}/milestones",
            get(handlers::projects::list_milestones)
                .put(handlers::projects::replace_milestones),
        )
        .route(
            "/projects/{id}/milestones/approve",
            post(handlers::projects::approve_plan),
        )
        // Milestone work lifecycle.
        .route("/milestones/{id}/start", post(handlers::milestones::start_work))
        .route("/milestones/{id}/submit", post(handlers::milestones::submit))
        .route(
            "/milestones/{id}/request-changes",
            post(handlers::milestones::request_changes),
        )
        .route(
            "/milestones/{id}/approve",
            post(handlers::milestones::approve_submission),
        )
        .route(
            "/milestones/{id}/submissions",
            get(handlers::milestones::list_submissions),
        )
        // Escrow funding and release.
        .route(
            "/milestones/{id}/payments",
            post(handlers::milestones::initiate_payment),
        )
        .route("/milestones/{id}/release", post(handlers::milestones::release))
        // Payments.
        .route("/payments/{id}", get(handlers::payments::get_payment))
        .route("/payments/{id}/audit", get(handlers::payments::list_audit))
        .route(
            "/payments/{id}/confirm-transfer",
            post(handlers::payments::confirm_transfer),
        )
        .route("/payments/{id}/refund", post(handlers::payments::refund))
        // Disputes.
        .route("/disputes", post(handlers::disputes::open_dispute))
        .route("/disputes/{id}", get(handlers::disputes::get_dispute))
        .route("/disputes/{id}/resolve", post(handlers::disputes::resolve))
        .route("/disputes/{id}/payout", post(handlers::disputes::payout))
        .route("/disputes/{id}/redo", post(handlers::disputes::redo_milestone))
        // Notifications.
        .route(
            "/users/{id}/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/users/{id}/notifications/{nid}/read",
            post(handlers::notifications::mark_read),
        )
        // Inbound gateway webhooks.
        .route("/webhooks/gateway", post(handlers::webhooks::gateway_webhook))
}
