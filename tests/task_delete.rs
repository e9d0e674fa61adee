mod common;

use axum::http::{Method, StatusCode};
use common::{file, id_of, Harness};

#[tokio::test]
async fn deleting_a_task_removes_its_build_and_course_links() {
    let h = Harness::new().await;
    let (course, _) = h.create_course("Graphics 101").await;
    let task = h.create_task("Xor Lab").await;
    let keep = h.create_task("Other Lab").await;

    let (status, _) = h
        .upload_batch(
            task,
            &[
                file("x.loader.js", "application/javascript", b"l"),
                file("x.data", "application/octet-stream", b"d"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    h.assign(course, task, "2025-06-01T23:59:00Z").await;
    h.assign(course, keep, "2025-06-08T23:59:00Z").await;
    let (_, sub) = h
        .json(
            Method::POST,
            &format!("/api/courses/{course}/tasks/{task}/submissions"),
            Some(&h.student.token),
            None,
        )
        .await;
    assert!(h.build_dir(task).is_dir());

    let (status, _) = h
        .json(Method::DELETE, &format!("/api/tasks/{task}"), Some(&h.admin.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!h.build_dir(task).exists());

    let (status, _) = h
        .json(Method::GET, &format!("/api/tasks/{task}"), Some(&h.admin.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h
        .json(Method::GET, &format!("/api/tasks/{task}/build"), Some(&h.admin.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = h.get_public(&format!("/api/tasks/{task}/build/loader")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = h.get_public(&format!("/builds/{task}/Build.loader.js")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, tasks) = h
        .json(Method::GET, &format!("/api/courses/{course}/tasks"), Some(&h.teacher.token), None)
        .await;
    let ids: Vec<_> = tasks.as_array().unwrap().iter().map(id_of).collect();
    assert_eq!(ids, vec![keep]);

    let (status, _) = h
        .json(
            Method::PUT,
            &format!("/api/submissions/{}", id_of(&sub)),
            Some(&h.student.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h
        .json(Method::DELETE, &format!("/api/tasks/{task}"), Some(&h.admin.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_task_without_a_build_is_fine() {
    let h = Harness::new().await;
    let task = h.create_task("Empty").await;
    let (status, _) = h
        .json(Method::DELETE, &format!("/api/tasks/{task}"), Some(&h.admin.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
