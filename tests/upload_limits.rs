//! Size ceilings and timeouts leave nothing behind on disk.

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{file, files_under, id_of, Harness};
use serde_json::json;

const MIB: usize = 1024 * 1024;

async fn folder(h: &Harness) -> uuid::Uuid {
    let (course, _) = h.create_course("Graphics 101").await;
    let (status, folder) = h
        .json(
            Method::POST,
            &format!("/api/courses/{course}/folders"),
            Some(&h.teacher.token),
            Some(json!({ "name": "Week 1" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{folder}");
    id_of(&folder)
}

#[tokio::test]
async fn oversized_material_is_rejected_without_leftovers() {
    let h = Harness::new().await;
    let folder = folder(&h).await;
    let body = vec![b'x'; 10 * MIB + MIB / 2];

    let (status, err) = h
        .multipart(
            Method::POST,
            &format!("/api/folders/{folder}/materials"),
            &h.teacher.token,
            &[file("notes.pdf", "application/pdf", &body)],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("10 MiB"), "{err}");
    assert!(files_under(&h.state.artifacts.materials_root()).is_empty());

    let (_, listed) = h
        .json(
            Method::GET,
            &format!("/api/folders/{folder}/materials"),
            Some(&h.teacher.token),
            None,
        )
        .await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn build_files_above_the_default_body_limit_are_accepted() {
    let h = Harness::new().await;
    let task = h.create_task("Xor Lab").await;
    let data = vec![7u8; 5 * MIB];

    let (status, body) = h
        .upload_batch(
            task,
            &[
                file("x.loader.js", "application/javascript", b"// loader"),
                file("x.data", "application/octet-stream", &data),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let stored = std::fs::metadata(h.build_dir(task).join("Build.data")).unwrap();
    assert_eq!(stored.len() as usize, data.len());
    assert!(files_under(&h.state.artifacts.staging_root()).is_empty());
}

#[tokio::test]
async fn timed_out_batch_leaves_no_staged_files() {
    let h = Harness::with_config(|c| c.upload_timeout = Duration::ZERO).await;
    let task = h.create_task("Xor Lab").await;

    let (status, _) = h
        .upload_batch(
            task,
            &[
                file("x.loader.js", "application/javascript", b"// loader"),
                file("x.data", "application/octet-stream", b"data"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert!(files_under(&h.state.artifacts.staging_root()).is_empty());
    assert!(!h.build_dir(task).exists());

    let (_, meta) = h
        .json(Method::GET, &format!("/api/tasks/{task}/build"), Some(&h.admin.token), None)
        .await;
    assert_eq!(meta["servable"], false, "{meta}");
}

#[tokio::test]
async fn timed_out_material_leaves_no_partial_file() {
    let h = Harness::with_config(|c| c.upload_timeout = Duration::ZERO).await;
    let folder = folder(&h).await;

    let (status, _) = h
        .multipart(
            Method::POST,
            &format!("/api/folders/{folder}/materials"),
            &h.teacher.token,
            &[file("notes.pdf", "application/pdf", b"%PDF-1.4")],
        )
        .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert!(files_under(&h.state.artifacts.materials_root()).is_empty());
}
