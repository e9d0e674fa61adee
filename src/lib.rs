//! WebGL classroom backend.
//!
//! Teachers publish WebGL builds as tasks, schedule them into courses with
//! due dates, and file course materials in folders. Students join courses
//! by code, play the assigned builds, and hand in submissions that are
//! marked `late` after the due date.
//!
//! Layout:
//! - [`upload`] screens inbound files per channel and streams them to disk.
//! - [`build`] turns accepted files or an archive into one coherent build.
//! - [`serve`] hands build files to the browser loader.
//! - [`tasks`], [`courses`], [`assignments`], [`submissions`], [`materials`]
//!   hold the classroom rules.
//! - [`db`] is the persistence seam, backed by Postgres or memory.

pub mod artifacts;
pub mod assignments;
pub mod auth;
pub mod build;
pub mod clock;
pub mod config;
pub mod courses;
pub mod db;
pub mod error;
pub mod locks;
pub mod materials;
pub mod models;
pub mod routes;
pub mod serve;
pub mod state;
pub mod submissions;
pub mod tasks;
pub mod upload;

pub use routes::router;
pub use state::AppState;
