mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use course_api::models::status::{OrderStatus, RefundStatus, UserRole};

// ===========================================================================
// POST /api/enrollments/:id/cancel
// ===========================================================================

/// Capacity 2; A, B, C enroll in order; A (paid) cancels.
#[tokio::test]
async fn cancelling_a_paid_seat_refunds_and_promotes_the_waitlist() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let admin = common::add_user(&app.store, "Admin", UserRole::Admin);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);
    let b = common::add_user(&app.store, "Ben", UserRole::Customer);
    let c = common::add_user(&app.store, "Cy", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let b_id = common::enroll_ok(&app.server, &b, &session).await;
    let (_, c_body) = common::enroll(&app.server, &c, &session).await;
    assert_eq!(c_body["enrollment"]["status"], "waitlist");
    let c_id = c_body["enrollment"]["id"].as_str().unwrap().to_string();

    let order = common::add_order(&app.store, &a, 45_000, OrderStatus::Paid);
    let (status, _) = common::record_payment(&app.server, &admin, &a_id, &order.id).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = common::cancel(&app.server, &a, &a_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrollment"]["status"], "cancelled");
    assert_eq!(body["refund"]["status"], "pending");
    assert_eq!(body["refund"]["amount_cents"], 45_000);
    assert_eq!(body["refund"]["enrollment_id"], a_id.as_str());
    assert_eq!(body["refund"]["course_id"], course.id.as_str());
    assert_eq!(body["refund"]["reason"], "schedule conflict");

    assert_eq!(common::enrollment_status(&app.store, &a_id), "cancelled");
    assert_eq!(common::enrollment_status(&app.store, &b_id), "enrolled");
    assert_eq!(common::enrollment_status(&app.store, &c_id), "enrolled");

    let refunds = app.store.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].user_id, a.id);
    assert_eq!(refunds[0].status, RefundStatus::Pending);

    assert_eq!(app.notifier.promoted(), vec![c_id.clone()]);

    let actions: Vec<String> = app
        .store
        .audit_logs()
        .into_iter()
        .map(|log| log.action)
        .collect();
    assert!(actions.contains(&"enrollment.cancel".to_string()));
    assert!(actions.contains(&"refund.create".to_string()));
    assert!(actions.contains(&"enrollment.promote".to_string()));
}

#[tokio::test]
async fn only_the_earliest_waitlisted_is_promoted() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 1);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);
    let b = common::add_user(&app.store, "Ben", UserRole::Customer);
    let c = common::add_user(&app.store, "Cy", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let b_id = common::enroll_ok(&app.server, &b, &session).await;
    let c_id = common::enroll_ok(&app.server, &c, &session).await;

    let (status, _) = common::cancel(&app.server, &a, &a_id).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(common::enrollment_status(&app.store, &b_id), "enrolled");
    assert_eq!(common::enrollment_status(&app.store, &c_id), "waitlist");
    assert_eq!(app.notifier.promoted(), vec![b_id]);
}

#[tokio::test]
async fn cancelling_a_waitlist_entry_creates_no_refund_and_promotes_nobody() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 1);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);
    let b = common::add_user(&app.store, "Ben", UserRole::Customer);
    let c = common::add_user(&app.store, "Cy", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let b_id = common::enroll_ok(&app.server, &b, &session).await;
    let c_id = common::enroll_ok(&app.server, &c, &session).await;

    let (status, body) = common::cancel(&app.server, &b, &b_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrollment"]["status"], "cancelled");
    assert!(body["refund"].is_null());

    assert!(app.store.refunds().is_empty());
    assert!(app.notifier.promoted().is_empty());
    assert_eq!(common::enrollment_status(&app.store, &a_id), "enrolled");
    assert_eq!(common::enrollment_status(&app.store, &c_id), "waitlist");
}

#[tokio::test]
async fn cancelling_an_unpaid_seat_creates_no_refund() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let (status, body) = common::cancel(&app.server, &a, &a_id).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["refund"].is_null());
    assert!(app.store.refunds().is_empty());
}

#[tokio::test]
async fn cancel_without_a_body_is_accepted() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);
    let a_id = common::enroll_ok(&app.server, &a, &session).await;

    let resp = app
        .server
        .post(&format!("/api/enrollments/{a_id}/cancel"))
        .add_header(AUTHORIZATION, common::bearer(&a))
        .await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn another_customer_cannot_cancel() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);
    let mallory = common::add_user(&app.store, "Mallory", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let (status, body) = common::cancel(&app.server, &mallory, &a_id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert_eq!(common::enrollment_status(&app.store, &a_id), "enrolled");
}

#[tokio::test]
async fn admin_can_cancel_for_a_customer() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let admin = common::add_user(&app.store, "Admin", UserRole::Admin);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let (status, _) = common::cancel(&app.server, &admin, &a_id).await;
    assert_eq!(status, StatusCode::OK);

    let log = app
        .store
        .audit_logs()
        .into_iter()
        .find(|l| l.action == "enrollment.cancel")
        .unwrap();
    assert_eq!(log.actor_id, admin.id);
}

#[tokio::test]
async fn cancelling_twice_is_conflict() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    common::cancel(&app.server, &a, &a_id).await;
    let (status, body) = common::cancel(&app.server, &a, &a_id).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn unknown_enrollment_is_not_found() {
    let app = common::test_app();
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);

    let (status, _) = common::cancel(&app.server, &a, "enr_missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===========================================================================
// POST /api/enrollments/:id/drop
// ===========================================================================

#[tokio::test]
async fn admin_drop_frees_the_seat_without_refund() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 1);
    let admin = common::add_user(&app.store, "Admin", UserRole::Admin);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);
    let b = common::add_user(&app.store, "Ben", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let b_id = common::enroll_ok(&app.server, &b, &session).await;
    let order = common::add_order(&app.store, &a, 45_000, OrderStatus::Paid);
    common::record_payment(&app.server, &admin, &a_id, &order.id).await;

    let resp = app
        .server
        .post(&format!("/api/enrollments/{a_id}/drop"))
        .add_header(AUTHORIZATION, common::bearer(&admin))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["enrollment"]["status"], "dropped");
    assert!(body["refund"].is_null());

    assert!(app.store.refunds().is_empty());
    assert_eq!(common::enrollment_status(&app.store, &b_id), "enrolled");
    assert_eq!(app.notifier.promoted(), vec![b_id]);
}

#[tokio::test]
async fn dropped_student_cannot_re_enroll() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let admin = common::add_user(&app.store, "Admin", UserRole::Admin);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    app.server
        .post(&format!("/api/enrollments/{a_id}/drop"))
        .add_header(AUTHORIZATION, common::bearer(&admin))
        .await
        .assert_status_ok();

    let (status, _) = common::enroll(&app.server, &a, &session).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn customers_cannot_drop() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 2);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let resp = app
        .server
        .post(&format!("/api/enrollments/{a_id}/drop"))
        .add_header(AUTHORIZATION, common::bearer(&a))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(common::enrollment_status(&app.store, &a_id), "enrolled");
}

#[tokio::test]
async fn dropping_a_waitlist_entry_is_conflict() {
    let app = common::test_app();
    let course = common::add_course(&app.store, "Open Water Diver");
    let session = common::add_session(&app.store, &course, 0);
    let admin = common::add_user(&app.store, "Admin", UserRole::Admin);
    let a = common::add_user(&app.store, "Ana", UserRole::Customer);

    let a_id = common::enroll_ok(&app.server, &a, &session).await;
    let resp = app
        .server
        .post(&format!("/api/enrollments/{a_id}/drop"))
        .add_header(AUTHORIZATION, common::bearer(&admin))
        .await;
    resp.assert_status(StatusCode::CONFLICT);
}
