use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use lectern_api::AuthToken;

mod config;
mod db;
mod error;
mod extractors;
mod feeds;
mod fuzz;
mod handlers;

use error::Error;
use extractors::*;
use feeds::RoomFeeds;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

pub async fn create_sqlx_pool(db_url: &str, max_connections: u32) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub async fn app(db: sqlx::PgPool, admin_token: Option<AuthToken>) -> Router {
    let state = AppState {
        db: PgPool::new(db),
        feeds: RoomFeeds::new(),
        admin_token,
    };
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route(
            "/api/courses",
            get(handlers::list_courses).post(handlers::create_course),
        )
        .route("/api/my-courses", get(handlers::my_courses))
        .route("/api/enrolled-courses", get(handlers::enrolled_courses))
        .route(
            "/api/courses/:id",
            get(handlers::fetch_course)
                .put(handlers::update_course)
                .delete(handlers::delete_course),
        )
        .route("/api/courses/:id/enroll", post(handlers::enroll))
        .route("/api/courses/:id/unenroll", post(handlers::unenroll))
        .route(
            "/api/courses/:id/lessons",
            get(handlers::list_lessons).post(handlers::create_lesson),
        )
        .route(
            "/api/courses/:id/lessons/reorder",
            put(handlers::reorder_lessons),
        )
        .route(
            "/api/courses/:id/activities",
            get(handlers::course_activities),
        )
        .route("/api/activities/recent", get(handlers::recent_activities))
        .route(
            "/api/lessons/:id",
            get(handlers::fetch_lesson)
                .put(handlers::update_lesson)
                .delete(handlers::delete_lesson),
        )
        .route(
            "/api/lessons/:id/comments",
            get(handlers::list_comments).post(handlers::add_comment),
        )
        .route(
            "/api/comments/:id",
            put(handlers::edit_comment).delete(handlers::delete_comment),
        )
        .route(
            "/api/progress/lesson/:id/complete",
            post(handlers::complete_lesson),
        )
        .route(
            "/api/progress/lesson/:id/incomplete",
            post(handlers::uncomplete_lesson),
        )
        .route("/api/progress/course/:id", get(handlers::course_progress))
        .route("/api/progress/mine", get(handlers::my_progress))
        .route("/api/feed", get(handlers::feed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <config::Opt as structopt::StructOpt>::from_args();
    if opt.admin_token.is_none() {
        tracing::warn!("no ADMIN_TOKEN set, the admin endpoints are disabled");
    }

    let db = create_sqlx_pool(&opt.database_url, opt.max_db_connections).await?;
    MIGRATOR
        .run(&db)
        .await
        .context("running pending migrations")?;

    let app = app(db, opt.admin_token.map(AuthToken)).await;

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
