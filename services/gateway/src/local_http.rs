//! Local HTTP server.
//!
//! Serves the same route table as the remote and provisioning surfaces.
//! Every table entry is registered with the HTTP stack at startup; the
//! root path redirects to the system-info endpoint.

use crate::routes::{self, Route, RouteTable};
use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect};
use axum::routing::{MethodFilter, MethodRouter, get};
use egw_protocol::{RequestEnvelope, Response, Verb};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Build the axum router from the route table.
pub fn build_router(table: &Arc<RouteTable>) -> Router {
    // Group entries by path so multi-verb paths share one method router.
    let mut by_path: BTreeMap<&'static str, Vec<Route>> = BTreeMap::new();
    for route in table.entries() {
        by_path.entry(route.path).or_default().push(route.clone());
    }

    let mut router = Router::new().route("/", get(|| async { Redirect::temporary(routes::SYSTEM_INFO_PATH) }));

    for (path, entries) in by_path {
        let mut method_router = MethodRouter::new();
        for route in entries {
            let Some(filter) = method_filter(route.verb) else {
                continue;
            };
            let handler = route.handler.clone();
            let verb = route.verb;
            method_router = method_router.on(filter, move |body: String| {
                let handler = handler.clone();
                async move {
                    let envelope = RequestEnvelope::new(path, verb, body);
                    let response =
                        tokio::task::spawn_blocking(move || handler.handle(&envelope))
                            .await
                            .unwrap_or_else(|_| Response::error(500, "handler failed"));
                    into_axum(response)
                }
            });
        }
        router = router.route(path, method_router);
    }

    router
}

fn method_filter(verb: Verb) -> Option<MethodFilter> {
    match verb {
        Verb::Get => Some(MethodFilter::GET),
        Verb::Post => Some(MethodFilter::POST),
        Verb::Delete => Some(MethodFilter::DELETE),
        Verb::Unknown => None,
    }
}

fn into_axum(response: Response) -> impl IntoResponse {
    (
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
}

/// Bind and serve in the background; returns the bound address.
pub async fn start(bind: &str, table: Arc<RouteTable>) -> std::io::Result<SocketAddr> {
    let app = build_router(&table);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "local http server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "local http server exited");
        }
    });

    Ok(addr)
}
