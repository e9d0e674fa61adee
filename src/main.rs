use std::{env, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use webgl_classroom::{
    clock::{Clock, SystemClock},
    config::Config,
    db::{MemoryRepository, PgRepository, Repository},
    models::{Role, User},
    router, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "webgl_classroom=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let repo: Arc<dyn Repository> = match config.database_url.as_deref() {
        Some(url) => {
            let pg = PgRepository::connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            pg.migrate().await.context("running migrations")?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping everything in memory");
            Arc::new(MemoryRepository::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    if let Some(token) = config.bootstrap_admin_token.as_deref() {
        bootstrap_admin(repo.as_ref(), clock.as_ref(), token).await?;
    }

    let port = config.port;
    let state = AppState::new(config, repo, clock);
    state
        .artifacts
        .ensure_layout()
        .await
        .with_context(|| format!("preparing {}", state.config.data_dir.display()))?;

    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Makes `token` a session of an administrator unless it already is one.
async fn bootstrap_admin(repo: &dyn Repository, clock: &dyn Clock, token: &str) -> anyhow::Result<()> {
    if repo.principal_for_token(token, clock.now()).await?.is_some() {
        return Ok(());
    }
    let admin = User {
        id: Uuid::new_v4(),
        name: "admin".into(),
        role: Role::Admin,
    };
    repo.insert_user(&admin).await?;
    repo.insert_session(token, admin.id, None).await?;
    tracing::info!(user = %admin.id, "bootstrap administrator created");
    Ok(())
}
