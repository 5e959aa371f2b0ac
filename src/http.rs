//! HTTP trigger surface
//!
//! ## Endpoints
//! - `GET /health` - Liveness plus store counters
//! - `POST /sweep` - Run the expiry sweep now
//! - `GET /audit[?branch=<id>]` - Run the consistency audit
//! - `POST /assignments` - Manual assignment
//! - `POST /assignments/{id}/confirm` - Guide accepts
//! - `POST /assignments/{id}/reject` - Guide declines (`{"reason": "..."}`)
//! - `POST /assignments/{id}/checkout` - Guide finished the trip
//!
//! Callers authenticate with `Authorization: Bearer <token>`; tokens come
//! from `api_tokens` in the config.
//!
//! ```bash
//! curl -X POST -H "Authorization: Bearer $TOKEN" http://localhost:8095/sweep
//! curl -H "Authorization: Bearer $TOKEN" "http://localhost:8095/audit?branch=jkt"
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthContext, TokenRegistry};
use crate::db::{LedgerDb, PartitionScope};
use crate::error::DispatchError;
use crate::services::response::{self, bad_request, from_create_result, from_result, not_found};
use crate::services::{CreateAssignmentInput, Services};

/// Body of `POST /assignments/{id}/reject`
#[derive(Debug, Default, Deserialize)]
struct RejectBody {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignmentAction {
    Confirm,
    Reject,
    Checkout,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    db: Arc<LedgerDb>,
    tokens: TokenRegistry,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, db: Arc<LedgerDb>, tokens: TokenRegistry, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            db,
            tokens,
            bind_addr,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), DispatchError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, tokens = self.tokens.len(), "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        let ctx = self.tokens.resolve(
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
        );

        debug!(method = %method, path = %path, caller = %ctx, "Incoming request");

        let response = match (method, path.as_str()) {
            (Method::GET, "/health") => self.handle_health(),

            (Method::POST, "/sweep") => {
                let services = self.services.clone();
                from_result(blocking(move || services.run_sweep(&ctx, Utc::now())).await)
            }

            (Method::GET, "/audit") => {
                let scope = branch_scope(req.uri().query());
                let services = self.services.clone();
                from_result(blocking(move || services.run_audit(&ctx, &scope, Utc::now())).await)
            }

            (Method::POST, "/assignments") => match read_json::<CreateAssignmentInput>(req).await {
                Ok(input) => {
                    let services = self.services.clone();
                    from_create_result(
                        blocking(move || services.create_assignment(&ctx, input, Utc::now())).await,
                    )
                }
                Err(e) => response::error_response(e),
            },

            (Method::POST, p) if p.starts_with("/assignments/") => match assignment_action(p) {
                Some((id, action)) => {
                    let id = id.to_string();
                    self.handle_assignment_action(req, ctx, id, action).await
                }
                None => not_found("Unknown assignment route"),
            },

            (_, "/health" | "/sweep" | "/audit" | "/assignments") => response::method_not_allowed(),

            _ => not_found("Not Found"),
        };

        Ok(response)
    }

    fn handle_health(&self) -> Response<Full<Bytes>> {
        match self.db.stats() {
            Ok(stats) => response::ok(&serde_json::json!({
                "status": "ok",
                "guides": stats.guide_count,
                "trips": stats.trip_count,
                "assignments": stats.assignment_count,
                "pending": stats.pending_count,
                "transactions": stats.transaction_count,
            })),
            Err(e) => {
                error!(error = %e, "Health check failed");
                response::internal_error(&e.to_string())
            }
        }
    }

    async fn handle_assignment_action(
        &self,
        req: Request<Incoming>,
        ctx: AuthContext,
        id: String,
        action: AssignmentAction,
    ) -> Response<Full<Bytes>> {
        let services = self.services.clone();
        match action {
            AssignmentAction::Confirm => {
                from_result(blocking(move || services.confirm_assignment(&ctx, &id, Utc::now())).await)
            }
            AssignmentAction::Checkout => {
                from_result(blocking(move || services.check_out(&ctx, &id, Utc::now())).await)
            }
            AssignmentAction::Reject => {
                let body = match read_optional_json::<RejectBody>(req).await {
                    Ok(body) => body,
                    Err(e) => return bad_request(&e.to_string()),
                };
                from_result(
                    blocking(move || {
                        services.reject_assignment(&ctx, &id, body.reason.as_deref(), Utc::now())
                    })
                    .await,
                )
            }
        }
    }
}

/// Run store-bound work off the async workers
async fn blocking<T, F>(f: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DispatchError::Internal(format!("Handler task failed: {}", e)))?
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, DispatchError> {
    let body = req
        .collect()
        .await
        .map_err(|e| DispatchError::InvalidInput(format!("Failed to read body: {}", e)))?;
    Ok(body.to_bytes())
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Incoming>) -> Result<T, DispatchError> {
    let data = read_body(req).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Empty body means `T::default()`
async fn read_optional_json<T: serde::de::DeserializeOwned + Default>(
    req: Request<Incoming>,
) -> Result<T, DispatchError> {
    let data = read_body(req).await?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(&data)?)
}

/// `/assignments/{id}/{action}`
fn assignment_action(path: &str) -> Option<(&str, AssignmentAction)> {
    let rest = path.strip_prefix("/assignments/")?;
    let (id, action) = rest.split_once('/')?;
    if id.is_empty() {
        return None;
    }
    let action = match action {
        "confirm" => AssignmentAction::Confirm,
        "reject" => AssignmentAction::Reject,
        "checkout" => AssignmentAction::Checkout,
        _ => return None,
    };
    Some((id, action))
}

/// `branch=<id>` from the query string; absent or empty means all branches
fn branch_scope(query: Option<&str>) -> PartitionScope {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "branch")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|branch| !branch.is_empty())
        .map(PartitionScope::branch)
        .unwrap_or_else(PartitionScope::all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_routes() {
        assert_eq!(
            assignment_action("/assignments/a-1/confirm"),
            Some(("a-1", AssignmentAction::Confirm))
        );
        assert_eq!(
            assignment_action("/assignments/a-1/checkout"),
            Some(("a-1", AssignmentAction::Checkout))
        );
        assert_eq!(assignment_action("/assignments//reject"), None);
        assert_eq!(assignment_action("/assignments/a-1/delete"), None);
        assert_eq!(assignment_action("/assignments/a-1"), None);
    }

    #[test]
    fn test_branch_scope() {
        assert_eq!(branch_scope(None), PartitionScope::all());
        assert_eq!(branch_scope(Some("branch=")), PartitionScope::all());
        assert_eq!(branch_scope(Some("branch=jkt")), PartitionScope::branch("jkt"));
        assert_eq!(
            branch_scope(Some("x=1&branch=bali%20north")),
            PartitionScope::branch("bali north")
        );
    }
}
