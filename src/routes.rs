use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    assignments::{self, CourseTaskView},
    auth::{authorize, Action},
    build::{canonical_file_name, classify, FileRole},
    courses, materials,
    error::{AppError, AppResult},
    models::*,
    serve::{self, BuildMetadata},
    state::AppState,
    submissions::{self, SubmissionRoster},
    tasks,
    upload::{self, build_upload_policy, receive_batch, receive_single, UploadChannel},
};

pub fn router(state: AppState) -> Router {
    let static_mount = format!("/{}", state.artifacts.static_prefix());
    let builds = ServeDir::new(state.artifacts.builds_root());
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // task catalogue
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route(
            "/api/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
        // builds
        .route(
            "/api/tasks/:id/build",
            post(upload_build)
                .layer(DefaultBodyLimit::max(UploadChannel::WebGl.body_limit()))
                .get(build_metadata),
        )
        .route(
            "/api/tasks/:id/build/:role",
            put(upload_build_file)
                .layer(DefaultBodyLimit::max(UploadChannel::WebGl.body_limit()))
                .get(build_file),
        )
        .route(
            "/api/tasks/:id/archive",
            post(upload_build_archive).layer(DefaultBodyLimit::max(UploadChannel::Archive.body_limit())),
        )
        // courses and enrollment
        .route("/api/courses", post(create_course).get(list_courses))
        .route("/api/enrollments", post(join_course))
        .route(
            "/api/courses/:id",
            get(get_course).patch(update_course).delete(delete_course),
        )
        .route("/api/courses/:id/students/:sid", delete(remove_student))
        // assignments and submissions
        .route("/api/courses/:id/tasks", get(course_tasks).post(assign_task))
        .route(
            "/api/courses/:id/tasks/:tid",
            patch(update_due_date).delete(unassign_task),
        )
        .route(
            "/api/courses/:id/tasks/:tid/submissions",
            get(submission_roster).post(submit),
        )
        .route("/api/submissions/:id", put(resubmit))
        .route("/api/submissions/:id/grade", post(grade_submission))
        // folders and materials
        .route("/api/courses/:id/folders", post(create_folder).get(list_folders))
        .route("/api/folders/:id", patch(rename_folder).delete(delete_folder))
        .route(
            "/api/folders/:id/materials",
            post(upload_material)
                .layer(DefaultBodyLimit::max(UploadChannel::Material.body_limit()))
                .get(list_materials),
        )
        .route("/api/materials/:id/download", get(download_material))
        .route("/api/materials/:id", delete(delete_material))
        // static build tree, same files as /api/tasks/:id/build/:role
        .nest_service(&static_mount, builds)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

type Created<T> = (StatusCode, Json<T>);

fn created<T>(value: T) -> Created<T> {
    (StatusCode::CREATED, Json(value))
}

// ---- tasks ----

async fn create_task(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CreateTaskReq>,
) -> AppResult<Created<Task>> {
    tasks::create(&state, &principal, req).await.map(created)
}

async fn list_tasks(State(state): State<AppState>, principal: Principal) -> AppResult<Json<Vec<Task>>> {
    tasks::list(&state, &principal).await.map(Json)
}

async fn get_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    tasks::get(&state, &principal, id).await.map(Json)
}

async fn update_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTaskReq>,
) -> AppResult<Json<Task>> {
    tasks::update(&state, &principal, id, req).await.map(Json)
}

async fn delete_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    tasks::delete(&state, &principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- builds ----

/// Multi-file batch. Files are received into a fresh staging directory
/// which either becomes the task's build or is thrown away.
async fn upload_build(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    mut mp: Multipart,
) -> AppResult<Json<Task>> {
    authorize(&principal, Action::ManageTask, None)?;
    tasks::load_task(&state, id).await?;
    let policy = build_upload_policy(&state.artifacts, id, UploadChannel::WebGl);
    let staging = state.artifacts.new_staging_dir();

    let received = upload::within(state.config.upload_timeout, async {
        tokio::fs::create_dir_all(&staging).await?;
        receive_batch(&mut mp, &policy, &staging).await
    })
    .await;
    let result = match received {
        Ok(roles) => state.assembler().commit_batch(&policy, &staging, &roles).await,
        Err(e) => Err(e),
    };
    state.artifacts.discard(&staging).await;
    result.map(Json)
}

async fn upload_build_archive(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    mut mp: Multipart,
) -> AppResult<Json<Task>> {
    authorize(&principal, Action::ManageTask, None)?;
    tasks::load_task(&state, id).await?;
    let staging = state.artifacts.new_staging_dir();
    let archive = staging.join("upload.zip");

    let received = upload::within(
        state.config.upload_timeout,
        receive_single(&mut mp, UploadChannel::Archive, &archive),
    )
    .await;
    let result = match received {
        Ok((file, _)) => state.assembler().commit_archive(id, &staging, &file.path).await,
        Err(e) => Err(e),
    };
    state.artifacts.discard(&staging).await;
    result.map(Json)
}

/// Replaces one role's file. A file whose name points at another role is
/// refused so a misaddressed upload cannot land in the wrong slot.
async fn upload_build_file(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, role)): Path<(Uuid, String)>,
    mut mp: Multipart,
) -> AppResult<Json<Task>> {
    authorize(&principal, Action::ManageTask, None)?;
    let role: BuildRole = role.parse().map_err(AppError::Validation)?;
    tasks::load_task(&state, id).await?;
    let staging = state.artifacts.new_staging_dir();
    let dest = staging.join(canonical_file_name(role));

    let received = upload::within(
        state.config.upload_timeout,
        receive_single(&mut mp, UploadChannel::WebGl, &dest),
    )
    .await;
    let result = match received {
        Ok((file, _)) => match classify(&file.part.file_name) {
            FileRole::Build(named) if named != role => Err(AppError::Validation(format!(
                "{:?} looks like a {named} file, not {role}",
                file.part.file_name
            ))),
            _ => state.assembler().replace_slot(id, role, &file.path).await,
        },
        Err(e) => Err(e),
    };
    state.artifacts.discard(&staging).await;
    result.map(Json)
}

async fn build_metadata(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BuildMetadata>> {
    serve::build_metadata(&state, &principal, id).await.map(Json)
}

async fn build_file(
    State(state): State<AppState>,
    Path((id, role)): Path<(Uuid, String)>,
    req: Request,
) -> AppResult<Response> {
    let role: BuildRole = role.parse().map_err(|_| AppError::NotFound("build file"))?;
    serve::build_file(&state, id, role, req).await
}

// ---- courses ----

async fn create_course(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CreateCourseReq>,
) -> AppResult<Created<Course>> {
    courses::create(&state, &principal, req).await.map(created)
}

async fn list_courses(State(state): State<AppState>, principal: Principal) -> AppResult<Json<Vec<Course>>> {
    courses::list(&state, &principal).await.map(Json)
}

async fn join_course(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<JoinCourseReq>,
) -> AppResult<Json<Course>> {
    courses::join(&state, &principal, req).await.map(Json)
}

async fn get_course(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Course>> {
    courses::get(&state, &principal, id).await.map(Json)
}

async fn update_course(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCourseReq>,
) -> AppResult<Json<Course>> {
    courses::update(&state, &principal, id, req).await.map(Json)
}

async fn delete_course(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    courses::delete(&state, &principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_student(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, student)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    courses::remove_student(&state, &principal, id, student).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- assignments & submissions ----

async fn course_tasks(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<CourseTaskView>>> {
    assignments::list_for_course(&state, &principal, id).await.map(Json)
}

async fn assign_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignTaskReq>,
) -> AppResult<Created<Task>> {
    assignments::assign(&state, &principal, id, req).await.map(created)
}

async fn update_due_date(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateDueDateReq>,
) -> AppResult<Json<Task>> {
    assignments::update_due_date(&state, &principal, id, task_id, req)
        .await
        .map(Json)
}

async fn unassign_task(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    assignments::unassign(&state, &principal, id, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submission_roster(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<SubmissionRoster>> {
    submissions::roster(&state, &principal, id, task_id).await.map(Json)
}

async fn submit(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Created<Submission>> {
    submissions::submit(&state, &principal, id, task_id).await.map(created)
}

async fn resubmit(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Submission>> {
    submissions::resubmit(&state, &principal, id).await.map(Json)
}

async fn grade_submission(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<GradeReq>,
) -> AppResult<Json<Submission>> {
    submissions::grade(&state, &principal, id, req).await.map(Json)
}

// ---- folders & materials ----

async fn create_folder(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<FolderReq>,
) -> AppResult<Created<Folder>> {
    materials::create_folder(&state, &principal, id, req).await.map(created)
}

async fn list_folders(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Folder>>> {
    materials::list_folders(&state, &principal, id).await.map(Json)
}

async fn rename_folder(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(req): Json<FolderReq>,
) -> AppResult<Json<Folder>> {
    materials::rename_folder(&state, &principal, id, req).await.map(Json)
}

async fn delete_folder(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    materials::delete_folder(&state, &principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_material(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    mut mp: Multipart,
) -> AppResult<Created<Material>> {
    materials::upload(&state, &principal, id, &mut mp).await.map(created)
}

async fn list_materials(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Material>>> {
    materials::list_materials(&state, &principal, id).await.map(Json)
}

async fn download_material(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    req: Request,
) -> AppResult<Response> {
    materials::download(&state, &principal, id, req).await
}

async fn delete_material(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    materials::delete(&state, &principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
