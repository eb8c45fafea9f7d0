//! Tiny HTTP endpoint that uptime monitors poll to see the process is still up.

use crate::{log_error, log_internal};
use anyhow::{anyhow, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub const ALIVE: &str = "I'm alive!";

pub fn router() -> Router {
    Router::new().route("/", get(|| async { ALIVE }))
}

/// Bind `addr` and serve on a background task.  Returns the address actually bound.
pub async fn spawn(addr: SocketAddr) -> Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow!("Could not bind liveness endpoint to {}: {}", addr, e))?;
    let bound = listener.local_addr()?;
    log_internal!("Liveness endpoint listening on http://{}", bound);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            log_error!("Liveness endpoint stopped: {}", e);
        }
    });
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_root() {
        let addr = spawn(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(response.text().await.unwrap(), ALIVE);

        let missing = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
