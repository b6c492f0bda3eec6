use anyhow::Context;
use axum::{
    routing::{get, patch, post},
    Router,
};
use perigee_api::{AuthToken, Uuid};
use std::net::SocketAddr;
use structopt::StructOpt;
use tower_http::trace::TraceLayer;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

pub use error::Error;
pub use extractors::{AppState, ModerateNew, PgPool};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
struct Opt {
    /// Address to bind
    #[structopt(short, long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Bearer token accepted on the /api/admin endpoints
    #[structopt(long)]
    admin_token: Option<Uuid>,

    /// Hold new comments for moderation instead of publishing them outright
    #[structopt(long)]
    moderate_new: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    tracing_subscriber::fmt::init();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = create_sqlx_pool(&db_url).await?;
    MIGRATOR
        .run(&mut *db.acquire().await.context("acquiring migrator connection")?)
        .await
        .context("running pending migrations")?;

    let app = app(db, opt.admin_token.map(AuthToken), opt.moderate_new).await;

    tracing::info!("listening on {}", opt.bind);
    axum::Server::bind(&opt.bind)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .connect(db_url)
            .await
            .with_context(|| format!("Error opening database {:?}", db_url))?,
    ))
}

pub async fn app(db: PgPool, admin_token: Option<AuthToken>, moderate_new: bool) -> Router {
    Router::new()
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route(
            "/api/subjects/:subject/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/api/comments/:comment",
            patch(handlers::edit_comment).delete(handlers::delete_comment),
        )
        .route("/api/comments/:comment/like", post(handlers::toggle_like))
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route(
            "/api/admin/pending-comments",
            get(handlers::admin_pending_comments),
        )
        .route(
            "/api/admin/approve-comment/:comment",
            post(handlers::admin_approve_comment),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            db,
            admin_token,
            moderate_new: ModerateNew(moderate_new),
        })
}
