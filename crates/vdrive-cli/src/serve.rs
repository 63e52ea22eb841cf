//! `vdrive serve`: HTTP read access to every mounted drive.

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use vdrive_kernel::content::ContentDelivery;
use vdrive_kernel::drive::{Drive, DriveError, DriveRegistry, DriveResult};
use vdrive_kernel::i18n::t;

#[derive(Clone)]
struct ServeState {
    registry: Arc<DriveRegistry>,
    delivery: ContentDelivery,
    force_proxy: bool,
}

fn router(state: ServeState) -> Router {
    // GET routes also answer HEAD; delivery drops the body itself.
    Router::new()
        .route("/{*path}", get(serve_content))
        .with_state(state)
}

pub async fn run(registry: DriveRegistry, listen: SocketAddr, force_proxy: bool) -> Result<()> {
    let state = ServeState {
        registry: Arc::new(registry),
        delivery: ContentDelivery::new()?,
        force_proxy,
    };
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot listen on {listen}"))?;
    tracing::info!(addr = %listen, force_proxy, "serving drive content");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn serve_content(
    State(state): State<ServeState>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    match deliver(&state, &path, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(path, error = %e, "content request failed");
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, e.to_string()).into_response()
        }
    }
}

async fn deliver(state: &ServeState, path: &str, request: Request) -> DriveResult<Response> {
    let (parts, _body) = request.into_parts();
    let (drive, inner) = state.registry.resolve(&format!("/{path}")).await?;
    let entry = drive.get(&inner).await?;
    let Some(content) = entry.content() else {
        return Err(DriveError::not_allowed_paths(
            t("drive.not_a_file", &[entry.path()]),
            [entry.path()],
        ));
    };
    state
        .delivery
        .deliver(content, &parts, state.force_proxy)
        .await
}
