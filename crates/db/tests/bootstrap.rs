//! Schema bootstrap tests: connect, migrate, verify conventions.

use rust_decimal_macros::dec;
use sqlx::PgPool;
use worklane_db::models::status::MilestoneStatus;
use worklane_db::repositories::{MilestoneRepo, PaymentRepo, ProjectRepo, UserRepo};

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    worklane_db::health_check(&pool).await.unwrap();

    let tables = [
        "users",
        "projects",
        "milestones",
        "milestone_submissions",
        "payments",
        "payment_audit_log",
        "disputes",
        "dispute_resolution_notes",
        "notifications",
        "webhook_events",
    ];

    for table in tables {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert_eq!(count.0, 0, "{table} should exist and start empty");
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_fee_split_check_constraint(pool: PgPool) {
    let company = UserRepo::create(&pool, "company", "Acme", None).await.unwrap();
    let provider = UserRepo::create(&pool, "provider", "Dev", None).await.unwrap();
    let project = ProjectRepo::create(
        &pool,
        &worklane_db::models::project::CreateProject {
            company_id: company.id,
            provider_id: provider.id,
            approved_price: dec!(100.00),
        },
    )
    .await
    .unwrap();

    let milestone_id: i64 = sqlx::query_scalar(
        "INSERT INTO milestones (project_id, title, amount, due_date, seq) \
         VALUES ($1, 'm', 100.00, '2030-01-01', 1) RETURNING id",
    )
    .bind(project.id)
    .fetch_one(&pool)
    .await
    .unwrap();

    // A payment whose fee split does not sum to the amount must be rejected
    // at the schema level.
    let result = sqlx::query(
        "INSERT INTO payments (milestone_id, project_id, amount, platform_fee_amount, \
         provider_amount) VALUES ($1, $2, 100.00, 10.00, 80.00)",
    )
    .bind(milestone_id)
    .bind(project.id)
    .execute(&pool)
    .await;
    assert!(result.is_err(), "mismatched fee split should violate CHECK");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_lock_requires_both_approvals(pool: PgPool) {
    let company = UserRepo::create(&pool, "company", "Acme", None).await.unwrap();
    let provider = UserRepo::create(&pool, "provider", "Dev", None).await.unwrap();
    let project = ProjectRepo::create(
        &pool,
        &worklane_db::models::project::CreateProject {
            company_id: company.id,
            provider_id: provider.id,
            approved_price: dec!(100.00),
        },
    )
    .await
    .unwrap();

    let result = sqlx::query("UPDATE projects SET milestones_locked = TRUE WHERE id = $1")
        .bind(project.id)
        .execute(&pool)
        .await;
    assert!(
        result.is_err(),
        "locking without approvals should violate CHECK"
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_milestone_seq_unique_per_project(pool: PgPool) {
    let company = UserRepo::create(&pool, "company", "Acme", None).await.unwrap();
    let provider = UserRepo::create(&pool, "provider", "Dev", None).await.unwrap();
    let project = ProjectRepo::create(
        &pool,
        &worklane_db::models::project::CreateProject {
            company_id: company.id,
            provider_id: provider.id,
            approved_price: dec!(100.00),
        },
    )
    .await
    .unwrap();

    let insert = "INSERT INTO milestones (project_id, title, amount, due_date, seq) \
                  VALUES ($1, 'm', 50.00, '2030-01-01', 1)";
    sqlx::query(insert).bind(project.id).execute(&pool).await.unwrap();
    let duplicate = sqlx::query(insert).bind(project.id).execute(&pool).await;
    assert!(duplicate.is_err(), "duplicate seq should violate uq_");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_status_enum_round_trip(pool: PgPool) {
    let company = UserRepo::create(&pool, "company", "Acme", None).await.unwrap();
    let provider = UserRepo::create(&pool, "provider", "Dev", None).await.unwrap();
    let project = ProjectRepo::create(
        &pool,
        &worklane_db::models::project::CreateProject {
            company_id: company.id,
            provider_id: provider.id,
            approved_price: dec!(100.00),
        },
    )
    .await
    .unwrap();

    let mut tx = pool.begin().await.unwrap();
    let drafts = vec![worklane_core::milestone_plan::MilestoneDraft {
        title: "Design".to_string(),
        amount: dec!(100.00),
        due_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        seq: 1,
    }];
    let created = MilestoneRepo::replace_for_project(&mut tx, project.id, &drafts)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let milestone = MilestoneRepo::find_by_id(&pool, created[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(milestone.status, MilestoneStatus::Draft);
    assert_eq!(milestone.revision_number, 0);

    let sum = PaymentRepo::sum_non_refunded_for_project(&pool, project.id)
        .await
        .unwrap();
    assert_eq!(sum, dec!(0));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_archive_without_submission_is_an_error(pool: PgPool) {
    let company = UserRepo::create(&pool, "company", "Acme", None).await.unwrap();
    let provider = UserRepo::create(&pool, "provider", "Dev", None).await.unwrap();
    let project = ProjectRepo::create(
        &pool,
        &worklane_db::models::project::CreateProject {
            company_id: company.id,
            provider_id: provider.id,
            approved_price: dec!(100.00),
        },
    )
    .await
    .unwrap();

    let mut tx = pool.begin().await.unwrap();
    let drafts = vec![worklane_core::milestone_plan::MilestoneDraft {
        title: "Design".to_string(),
        amount: dec!(100.00),
        due_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        seq: 1,
    }];
    let created = MilestoneRepo::replace_for_project(&mut tx, project.id, &drafts)
        .await
        .unwrap();

    // The freshly created milestone carries no live submission.
    let result = MilestoneRepo::archive_submission(&mut tx, &created[0]).await;
    assert!(matches!(result, Err(sqlx::Error::RowNotFound)));

    tx.rollback().await.unwrap();

    let history = MilestoneRepo::list_submissions(&pool, created[0].id).await;
    assert!(history.unwrap().is_empty());
}
