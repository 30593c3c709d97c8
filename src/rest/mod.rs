// rest/mod.rs — Public REST API server.
//
// Axum HTTP server bridging REST calls to the workspace, progress, chat,
// file, and activity services. All routes except health, registration,
// token issue, and the invite preview require a bearer token.
//
// Endpoints:
//   GET    /api/v1/health
//   POST   /api/v1/users
//   POST   /api/v1/auth/token
//   GET    /api/v1/me
//   POST   /api/v1/projects
//   GET    /api/v1/projects/{id}
//   GET    /api/v1/workspaces                POST /api/v1/workspaces
//   GET    /api/v1/workspaces/discover
//   GET    /api/v1/workspaces/{id}           PATCH | DELETE
//   GET    /api/v1/workspaces/{id}/members
//   POST   /api/v1/workspaces/{id}/join
//   POST   /api/v1/workspaces/{id}/leave
//   PATCH  /api/v1/workspaces/{id}/members/{member_id}   DELETE
//   GET    /api/v1/workspaces/{id}/invites   POST
//   DELETE /api/v1/workspaces/{id}/invites/{invite_id}
//   GET    /api/v1/invites/{token}
//   POST   /api/v1/invites/{token}/accept    /decline
//   GET    /api/v1/workspaces/{id}/messages  POST
//   DELETE /api/v1/workspaces/{id}/messages/{message_id}
//   GET    /api/v1/workspaces/{id}/files     POST (multipart)
//   GET    /api/v1/workspaces/{id}/files/{file_id}/download
//   DELETE /api/v1/workspaces/{id}/files/{file_id}
//   GET    /api/v1/workspaces/{id}/activity
//   POST   /api/v1/progress/initialize/{project_id}
//   GET    /api/v1/progress/{project_id}
//   POST   /api/v1/progress/customize/{project_id}
//   PUT    /api/v1/progress/phase/{phase_id}
//   PUT    /api/v1/progress/task/{task_id}/toggle
//   POST   /api/v1/progress/task
//   DELETE /api/v1/progress/task/{task_id}

pub mod auth;
pub mod routes;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>, listener: tokio::net::TcpListener) -> Result<()> {
    let router = build_router(ctx);
    info!("REST API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    // Multipart framing overhead on top of the raw upload cap.
    let body_limit = ctx.config.max_upload_bytes as usize + 64 * 1024;
    Router::new()
        // No auth
        .route("/api/v1/health", get(routes::health::health))
        .route("/api/v1/users", post(routes::identity::register))
        .route("/api/v1/auth/token", post(routes::identity::issue_token))
        .route("/api/v1/invites/{token}", get(routes::workspaces::preview_invite))
        // Identity & projects
        .route("/api/v1/me", get(routes::identity::me))
        .route("/api/v1/projects", post(routes::identity::create_project))
        .route("/api/v1/projects/{id}", get(routes::identity::get_project))
        // Workspaces
        .route(
            "/api/v1/workspaces",
            get(routes::workspaces::list_mine).post(routes::workspaces::create),
        )
        .route("/api/v1/workspaces/discover", get(routes::workspaces::discover))
        .route(
            "/api/v1/workspaces/{id}",
            get(routes::workspaces::get)
                .patch(routes::workspaces::update)
                .delete(routes::workspaces::remove),
        )
        .route("/api/v1/workspaces/{id}/members", get(routes::workspaces::members))
        .route("/api/v1/workspaces/{id}/join", post(routes::workspaces::join))
        .route("/api/v1/workspaces/{id}/leave", post(routes::workspaces::leave))
        .route(
            "/api/v1/workspaces/{id}/members/{member_id}",
            delete(routes::workspaces::remove_member).patch(routes::workspaces::update_member_role),
        )
        .route(
            "/api/v1/workspaces/{id}/invites",
            get(routes::workspaces::list_invites).post(routes::workspaces::create_invite),
        )
        .route(
            "/api/v1/workspaces/{id}/invites/{invite_id}",
            delete(routes::workspaces::revoke_invite),
        )
        .route(
            "/api/v1/invites/{token}/accept",
            post(routes::workspaces::accept_invite),
        )
        .route(
            "/api/v1/invites/{token}/decline",
            post(routes::workspaces::decline_invite),
        )
        // Chat
        .route(
            "/api/v1/workspaces/{id}/messages",
            get(routes::chat::list).post(routes::chat::post_message),
        )
        .route(
            "/api/v1/workspaces/{id}/messages/{message_id}",
            delete(routes::chat::remove),
        )
        // Files
        .route(
            "/api/v1/workspaces/{id}/files",
            get(routes::files::list).post(routes::files::upload),
        )
        .route(
            "/api/v1/workspaces/{id}/files/{file_id}/download",
            get(routes::files::download),
        )
        .route(
            "/api/v1/workspaces/{id}/files/{file_id}",
            delete(routes::files::remove),
        )
        // Activity
        .route("/api/v1/workspaces/{id}/activity", get(routes::activity::list))
        // Progress
        .route(
            "/api/v1/progress/initialize/{project_id}",
            post(routes::progress::initialize),
        )
        .route("/api/v1/progress/{project_id}", get(routes::progress::get))
        .route(
            "/api/v1/progress/customize/{project_id}",
            post(routes::progress::customize),
        )
        .route("/api/v1/progress/phase/{phase_id}", put(routes::progress::update_phase))
        .route(
            "/api/v1/progress/task/{task_id}/toggle",
            put(routes::progress::toggle_task),
        )
        .route("/api/v1/progress/task", post(routes::progress::add_task))
        .route(
            "/api/v1/progress/task/{task_id}",
            delete(routes::progress::delete_task),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
