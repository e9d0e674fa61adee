mod common;

use axum::http::{Method, StatusCode};
use common::{at, id_of, Harness};
use serde_json::json;
use uuid::Uuid;

const DUE: &str = "2025-06-01T23:59:00Z";

async fn assigned(h: &Harness) -> (Uuid, Uuid) {
    let (course, _) = h.create_course("Graphics 101").await;
    let task = h.create_task("Xor Lab").await;
    let (status, body) = h.assign(course, task, DUE).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (course, task)
}

#[tokio::test]
async fn status_follows_the_due_date_on_create_and_update() {
    let h = Harness::new().await;
    let (course, task) = assigned(&h).await;
    let uri = format!("/api/courses/{course}/tasks/{task}/submissions");

    h.clock.set(at("2025-06-01T23:59:00Z"));
    let (status, sub) = h.json(Method::POST, &uri, Some(&h.student.token), None).await;
    assert_eq!(status, StatusCode::CREATED, "{sub}");
    assert_eq!(sub["status"], "submitted");
    assert!(sub["grade"].is_null());

    let (status, body) = h.json(Method::POST, &uri, Some(&h.student.token), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    h.clock.set(at("2025-06-02T00:00:00Z"));
    let (status, updated) = h
        .json(
            Method::PUT,
            &format!("/api/submissions/{}", id_of(&sub)),
            Some(&h.student.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "late");
    assert_eq!(updated["submitted_at"], "2025-06-02T00:00:00Z");
}

#[tokio::test]
async fn late_on_first_submission() {
    let h = Harness::new().await;
    let (course, task) = assigned(&h).await;
    h.clock.set(at("2025-06-03T08:00:00Z"));
    let (status, sub) = h
        .json(
            Method::POST,
            &format!("/api/courses/{course}/tasks/{task}/submissions"),
            Some(&h.student.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sub["status"], "late");
}

#[tokio::test]
async fn updating_a_missing_submission_is_not_found() {
    let h = Harness::new().await;
    let (status, _) = h
        .json(
            Method::PUT,
            &format!("/api/submissions/{}", Uuid::new_v4()),
            Some(&h.student.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_enrolled_students_submit_their_own_work() {
    let h = Harness::new().await;
    let (course, task) = assigned(&h).await;
    let uri = format!("/api/courses/{course}/tasks/{task}/submissions");

    let (status, _) = h.json(Method::POST, &uri, Some(&h.outsider.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = h.json(Method::POST, &uri, Some(&h.teacher.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, sub) = h.json(Method::POST, &uri, Some(&h.student.token), None).await;
    let (status, _) = h
        .json(
            Method::PUT,
            &format!("/api/submissions/{}", id_of(&sub)),
            Some(&h.outsider.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unassigned_tasks_take_no_submissions() {
    let h = Harness::new().await;
    let (course, _) = h.create_course("Graphics 101").await;
    let task = h.create_task("Loose task").await;
    let (status, _) = h
        .json(
            Method::POST,
            &format!("/api/courses/{course}/tasks/{task}/submissions"),
            Some(&h.student.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn grading_is_bounded_and_cleared_on_resubmit() {
    let h = Harness::new().await;
    let (course, task) = assigned(&h).await;
    let (_, sub) = h
        .json(
            Method::POST,
            &format!("/api/courses/{course}/tasks/{task}/submissions"),
            Some(&h.student.token),
            None,
        )
        .await;
    let grade_uri = format!("/api/submissions/{}/grade", id_of(&sub));

    let (status, _) = h
        .json(Method::POST, &grade_uri, Some(&h.student.token), Some(json!({ "grade": 100 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = h
        .json(Method::POST, &grade_uri, Some(&h.teacher.token), Some(json!({ "grade": 150 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, graded) = h
        .json(Method::POST, &grade_uri, Some(&h.teacher.token), Some(json!({ "grade": 87.5 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graded["grade"], 87.5);
    assert_eq!(graded["status"], "submitted");

    let (_, again) = h
        .json(
            Method::PUT,
            &format!("/api/submissions/{}", id_of(&sub)),
            Some(&h.student.token),
            None,
        )
        .await;
    assert!(again["grade"].is_null());
}

#[tokio::test]
async fn roster_lists_who_is_missing() {
    let h = Harness::new().await;
    let (course, task) = assigned(&h).await;
    let uri = format!("/api/courses/{course}/tasks/{task}/submissions");

    let (status, roster) = h.json(Method::GET, &uri, Some(&h.teacher.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roster["not_submitted"], json!([h.student.id]));
    assert_eq!(roster["due_date"], DUE);

    h.json(Method::POST, &uri, Some(&h.student.token), None).await;
    let (_, roster) = h.json(Method::GET, &uri, Some(&h.teacher.token), None).await;
    assert_eq!(roster["submissions"].as_array().unwrap().len(), 1);
    assert!(roster["not_submitted"].as_array().unwrap().is_empty());

    let (status, _) = h.json(Method::GET, &uri, Some(&h.student.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unassigning_drops_the_assignment_and_its_submissions() {
    let h = Harness::new().await;
    let (course, task) = assigned(&h).await;
    let (_, sub) = h
        .json(
            Method::POST,
            &format!("/api/courses/{course}/tasks/{task}/submissions"),
            Some(&h.student.token),
            None,
        )
        .await;

    let (status, _) = h
        .json(
            Method::DELETE,
            &format!("/api/courses/{course}/tasks/{task}"),
            Some(&h.teacher.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = h
        .json(
            Method::PUT,
            &format!("/api/submissions/{}", id_of(&sub)),
            Some(&h.student.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, tasks) = h
        .json(Method::GET, &format!("/api/courses/{course}/tasks"), Some(&h.student.token), None)
        .await;
    assert!(tasks.as_array().unwrap().is_empty());
}
