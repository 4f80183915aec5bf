//! REST API server.
//!
//! The front door for operators: start/stop a session, watch its state,
//! browse past runs. All long-running work stays on the controller worker;
//! handlers return promptly.

pub mod error;
pub mod routes;

use crate::controller::SessionController;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::session::{SessionApiState, StartRequest};

pub struct ApiServer {
    port: u16,
    state: SessionApiState,
}

impl ApiServer {
    pub fn new(controller: Arc<SessionController>, port: u16) -> Self {
        Self {
            port,
            state: SessionApiState { controller },
        }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            .route("/", get(service_info))
            .route("/version", get(version))
            .merge(routes::session::router(self.state))
            .nest("/sessions", routes::history::router())
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  POST /start         - Start recording a meeting");
        info!("  POST /stop          - Stop the active session");
        info!("  GET  /status        - Current lifecycle state");
        info!("  GET  /sessions      - List past sessions");
        info!("  GET  /sessions/:id  - Get a single session");
        info!("  GET  /version       - Version info");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "meetrec",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "meetrec"
    }))
}
