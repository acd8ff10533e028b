//! Integration tests for the dispute lifecycle: raising, verdicts, the
//! partial-split payout, redo, and auto-close on project completion.

mod common;

use axum::http::StatusCode;
use common::{
    build_test_app, dec, fund_milestone, get_milestone, get_payment, get_project, locked_project,
    seed_parties, seed_parties_with_payout, submit_and_approve, Parties, TestApp,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sqlx::PgPool;

/// Open a dispute pinned to a milestone. Returns the dispute id.
async fn open_dispute(app: &TestApp, actor_id: i64, project_id: i64, milestone_id: i64) -> i64 {
    let (status, body) = app
        .post(
            "/api/v1/disputes",
            json!({
                "actor_id": actor_id,
                "project_id": project_id,
                "milestone_id": milestone_id,
                "reason": "work not as agreed",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_i64().unwrap()
}

/// A funded single-milestone project with an open dispute pinned to it.
async fn disputed_setup(app: &TestApp, parties: &Parties, amount: &str) -> (i64, i64, i64, i64) {
    let (project_id, milestones) = locked_project(app, parties, &[amount]).await;
    let m = milestones[0];
    let payment_id = fund_milestone(app, parties.company.id, m, amount).await;
    let dispute_id = open_dispute(app, parties.company.id, project_id, m).await;
    (project_id, m, payment_id, dispute_id)
}

async fn get_dispute(app: &TestApp, dispute_id: i64) -> Value {
    let (status, body) = app.get(&format!("/api/v1/disputes/{dispute_id}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"].clone()
}

fn note_texts(dispute: &Value) -> Vec<String> {
    dispute["notes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["note"].as_str().unwrap().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Raising disputes
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn raising_a_dispute_freezes_the_milestone(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, m, _, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    let dispute = get_dispute(&app, dispute_id).await;
    assert_eq!(dispute["status"], "open");
    assert_eq!(dispute["raised_by"], "company");

    assert_eq!(get_milestone(&app, project_id, m).await["status"], "disputed");
    assert_eq!(get_project(&app, project_id).await["status"], "disputed");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn the_provider_side_is_derived_too(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, milestones) = locked_project(&app, &parties, &["100.00"]).await;

    let dispute_id = open_dispute(&app, parties.provider.id, project_id, milestones[0]).await;
    assert_eq!(get_dispute(&app, dispute_id).await["raised_by"], "provider");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn strangers_cannot_raise_disputes(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, milestones) = locked_project(&app, &parties, &["100.00"]).await;

    let (status, body) = app
        .post(
            "/api/v1/disputes",
            json!({
                "actor_id": parties.admin.id,
                "project_id": project_id,
                "milestone_id": milestones[0],
                "reason": "not my project",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn a_dispute_requires_a_reason(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, _) = locked_project(&app, &parties, &["100.00"]).await;

    let (status, body) = app
        .post(
            "/api/v1/disputes",
            json!({
                "actor_id": parties.company.id,
                "project_id": project_id,
                "reason": "   ",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn a_verdict_requires_a_note(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (_, _, _, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/resolve"),
            json!({ "admin_id": parties.admin.id, "verdict": "rejected", "note": "" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    // A lifecycle status is not a verdict.
    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/resolve"),
            json!({ "admin_id": parties.admin.id, "verdict": "open", "note": "back to open" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn rejecting_a_dispute_resumes_work(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, m, _, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/resolve"),
            json!({
                "admin_id": parties.admin.id,
                "verdict": "rejected",
                "note": "claim not substantiated",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "rejected");

    assert_eq!(get_milestone(&app, project_id, m).await["status"], "in_progress");
    assert_eq!(get_project(&app, project_id).await["status"], "in_progress");

    let dispute = get_dispute(&app, dispute_id).await;
    assert!(note_texts(&dispute).contains(&"claim not substantiated".to_string()));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn upholding_a_dispute_rejects_remaining_work(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, milestones) = locked_project(&app, &parties, &["40.00", "60.00"]).await;
    let dispute_id = open_dispute(&app, parties.company.id, project_id, milestones[0]).await;

    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/resolve"),
            json!({
                "admin_id": parties.admin.id,
                "verdict": "resolved",
                "note": "claim upheld",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    assert_eq!(get_project(&app, project_id).await["status"], "disputed");
    for m in milestones {
        assert_eq!(get_milestone(&app, project_id, m).await["status"], "rejected");
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn a_settled_dispute_cannot_be_resolved_again(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (_, _, _, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    for (expected, note) in [(StatusCode::OK, "first"), (StatusCode::CONFLICT, "second")] {
        let (status, _) = app
            .post(
                &format!("/api/v1/disputes/{dispute_id}/resolve"),
                json!({ "admin_id": parties.admin.id, "verdict": "closed", "note": note }),
            )
            .await;
        assert_eq!(status, expected);
    }
}

// ---------------------------------------------------------------------------
// Partial-split payout
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn payout_splits_escrow_between_the_parties(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, m, payment_id, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/payout"),
            json!({
                "admin_id": parties.admin.id,
                "refund_amount": "30.00",
                "release_amount": "70.00",
                "transfer_reference": "wire-split-1",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let summary = &body["data"];
    assert_eq!(summary["refund_status"], "completed");
    assert_eq!(summary["release_status"], "completed");
    assert_eq!(dec(&summary["refunded_amount"]), dec!(30.00));
    assert_eq!(dec(&summary["released_amount"]), dec!(70.00));

    let payment = get_payment(&app, payment_id).await;
    assert_eq!(payment["status"], "transferred");
    assert_eq!(dec(&payment["amount"]), dec!(70.00));
    assert_eq!(dec(&payment["refunded_total"]), dec!(30.00));
    assert_eq!(dec(&payment["original_amount"]), dec!(100.00));

    let dispute = get_dispute(&app, dispute_id).await;
    assert_eq!(dispute["status"], "resolved");
    assert!(note_texts(&dispute).contains(
        &"Partial Split: Refunded 30.00 to customer, Released 70.00 to provider.".to_string()
    ));

    assert_eq!(get_milestone(&app, project_id, m).await["status"], "rejected");
    assert_eq!(get_project(&app, project_id).await["status"], "disputed");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn payout_release_leg_fails_without_a_destination(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties_with_payout(&pool, None).await;
    let (_, _, payment_id, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/payout"),
            json!({
                "admin_id": parties.admin.id,
                "refund_amount": "30.00",
                "release_amount": "70.00",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let summary = &body["data"];
    assert_eq!(summary["refund_status"], "completed");
    assert_eq!(dec(&summary["refunded_amount"]), dec!(30.00));
    assert_eq!(summary["release_status"], "failed");
    assert!(summary["release_error"]
        .as_str()
        .unwrap()
        .contains("payout destination"));

    // The refund leg stuck; the provider's share stays in escrow.
    let payment = get_payment(&app, payment_id).await;
    assert_eq!(payment["status"], "escrowed");
    assert_eq!(dec(&payment["amount"]), dec!(70.00));
    assert_eq!(dec(&payment["refunded_total"]), dec!(30.00));

    assert_eq!(get_dispute(&app, dispute_id).await["status"], "resolved");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn payout_rejects_invalid_splits(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (_, _, _, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    for (refund, release) in [("20.00", "70.00"), ("0.00", "0.00"), ("-5.00", "105.00")] {
        let (status, body) = app
            .post(
                &format!("/api/v1/disputes/{dispute_id}/payout"),
                json!({
                    "admin_id": parties.admin.id,
                    "refund_amount": refund,
                    "release_amount": release,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{refund}/{release}: {body}");
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn payout_captures_a_gateway_refund_failure(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (_, _, payment_id, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    app.gateway.fail_refunds(true);
    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/payout"),
            json!({
                "admin_id": parties.admin.id,
                "refund_amount": "30.00",
                "release_amount": "0.00",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let summary = &body["data"];
    assert_eq!(summary["refund_status"], "failed");
    assert!(summary["refund_error"].as_str().is_some());
    assert_eq!(summary["release_status"], "not_requested");

    // No money moved.
    let payment = get_payment(&app, payment_id).await;
    assert_eq!(payment["status"], "escrowed");
    assert_eq!(dec(&payment["amount"]), dec!(100.00));

    assert_eq!(get_dispute(&app, dispute_id).await["status"], "resolved");
}

// ---------------------------------------------------------------------------
// Redo
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn redo_returns_the_milestone_to_the_provider(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, m, _, dispute_id) = disputed_setup(&app, &parties, "100.00").await;

    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/redo"),
            json!({ "admin_id": parties.admin.id, "note": "one more iteration" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "under_review");

    assert_eq!(get_milestone(&app, project_id, m).await["status"], "in_progress");
    assert_eq!(get_project(&app, project_id).await["status"], "in_progress");

    let dispute = get_dispute(&app, dispute_id).await;
    let notes = note_texts(&dispute);
    assert!(notes.contains(&"Redo requested: milestone returned to in_progress.".to_string()));
    assert!(notes.contains(&"one more iteration".to_string()));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn redo_requires_a_pinned_milestone(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, _) = locked_project(&app, &parties, &["100.00"]).await;

    let (status, body) = app
        .post(
            "/api/v1/disputes",
            json!({
                "actor_id": parties.company.id,
                "project_id": project_id,
                "reason": "general grievance",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let dispute_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app
        .post(
            &format!("/api/v1/disputes/{dispute_id}/redo"),
            json!({ "admin_id": parties.admin.id }),
        )
        .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "PRECONDITION_FAILED");
}

// ---------------------------------------------------------------------------
// Auto-close on completion
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn open_disputes_close_when_the_project_completes(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let parties = seed_parties(&pool).await;
    let (project_id, milestones) = locked_project(&app, &parties, &["100.00"]).await;
    let m = milestones[0];

    // An unpinned dispute does not freeze the milestone, so work continues.
    let (status, body) = app
        .post(
            "/api/v1/disputes",
            json!({
                "actor_id": parties.provider.id,
                "project_id": project_id,
                "reason": "payment pace concerns",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let dispute_id = body["data"]["id"].as_i64().unwrap();

    let payment_id = fund_milestone(&app, parties.company.id, m, "100.00").await;
    submit_and_approve(&app, &parties, m).await;
    let (status, _) = app
        .post(
            &format!("/api/v1/milestones/{m}/release"),
            json!({ "actor_id": parties.company.id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .post(
            &format!("/api/v1/payments/{payment_id}/confirm-transfer"),
            json!({ "admin_id": parties.admin.id, "reference": "wire-final" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let dispute = get_dispute(&app, dispute_id).await;
    assert_eq!(dispute["status"], "closed");

    let system_note = dispute["notes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["admin_name"] == "System")
        .cloned()
        .unwrap();
    assert_eq!(
        system_note["note"],
        "Automatically closed: project completed with all milestones paid."
    );
}
