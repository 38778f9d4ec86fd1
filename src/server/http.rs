//! HTTP Server for Kagami Uploadr
//!
//! Built on `hyper` and `tokio`: one task per connection, HTTP/1.1, and a
//! route table resolved from configuration.
//!
//! # Endpoints
//!
//! * `GET /health` - Health check (`{"status":"ok"}`)
//! * `POST <store route>` - Multipart upload to storage or a backend
//! * `POST <predict route>` - Multipart upload proxied to the predictor
//! * `GET <list route>?page=&limit=` - Paginated category listing
//!
//! Every response body is JSON. Faults inside a handler, panics included,
//! are caught here and answered with a generic 500 envelope.
//!
//! # Example
//!
//! ```no_run
//! use kagami_uploadr::config::Config;
//! use kagami_uploadr::server::http::HttpServer;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::with_storage_root("127.0.0.1:0", Path::new("public"));
//! let server = HttpServer::new(config).await?;
//! println!("Server bound to: {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::ingest::{multipart_boundary, read_multipart, FieldSpec};
use crate::listing::{list_directory, PageQuery};
use crate::metrics;
use crate::response::{ApiResponse, GENERIC_FAILURE};
use crate::router::{Route, RouteAction, RouteTable, RouterError};
use crate::server::ServerError;
use crate::upload::UploadError;
use bytes::Bytes;
use futures::FutureExt;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Instrument};

/// Shared per-process state handed to every connection
struct AppState {
    routes: RouteTable,
    max_body_bytes: u64,
}

/// HTTP Server
///
/// # Fields
///
/// * `state` - Route table and limits (shared across connections)
/// * `listener` - TCP listener for accepting connections
/// * `local_addr` - The actual address the server is bound to
pub struct HttpServer {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server instance
    ///
    /// Builds the route table and binds immediately. If port 0 is specified,
    /// the OS assigns an available port.
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let routes = RouteTable::from_config(&config)
            .map_err(|e| ServerError::RuntimeError(e.to_string()))?;
        Self::with_routes(config, routes).await
    }

    /// Create a server over a prebuilt route table
    ///
    /// Only `config.server` is read; routes come from `routes`.
    pub async fn with_routes(config: Config, routes: RouteTable) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Get actual bound address (important for port 0)
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!(routes = routes.len(), "Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(AppState {
                routes,
                max_body_bytes: config.server.max_body_bytes,
            }),
            listener,
            local_addr,
        })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run until the process is killed
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Each connection is handled in its own task; connection errors are
    /// logged and never stop the accept loop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!("Starting server on {}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Handle one HTTP request inside its own span, converting panics to a 500
async fn handle_request(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = tracing::info_span!(
        "http.request",
        http.method = %method,
        http.target = %path,
        request.id = %uuid::Uuid::new_v4(),
        http.status_code = tracing::field::Empty,
    );

    async move {
        let start_time = Instant::now();

        let response = match AssertUnwindSafe(route_request(req, &state))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                error!("Request handler panicked");
                metrics::record_error("internal");
                ApiResponse::error(GENERIC_FAILURE, 500)
            }
        };

        let status = response.status();
        tracing::Span::current().record("http.status_code", status);
        metrics::record_request(
            state.routes.metric_label(&path),
            status,
            start_time.elapsed().as_secs_f64(),
        );
        info!(status, duration_ms = start_time.elapsed().as_millis(), "Request completed");

        response.into_response()
    }
    .instrument(span)
    .await
}

/// Resolve the route and run it
async fn route_request(req: Request<Incoming>, state: &AppState) -> ApiResponse {
    let path = req.uri().path();

    if path == "/health" && req.method() == Method::GET {
        return ApiResponse::Json {
            status: 200,
            body: serde_json::json!({ "status": "ok" }),
        };
    }

    let route = match state.routes.resolve(req.method(), path) {
        Ok(route) => route,
        Err(e @ RouterError::NotFound(_)) => return ApiResponse::error(e.to_string(), 404),
        Err(e @ RouterError::MethodNotAllowed(_)) => return ApiResponse::error(e.to_string(), 405),
        Err(e) => {
            error!(error = %e, "Route resolution failed");
            return ApiResponse::error(GENERIC_FAILURE, 500);
        }
    };

    match &route.action {
        RouteAction::List { dir, category } => {
            let query = PageQuery::from_query(req.uri().query());
            match list_directory(dir, *category, query).await {
                Ok(listing) => ApiResponse::Listing(listing),
                Err(e) => {
                    error!(error = %e, "Failed to list directory");
                    metrics::record_error("listing");
                    ApiResponse::error("Failed to fetch audio files", 500)
                }
            }
        }
        RouteAction::Upload(_) => {
            let result = run_upload(req, route, state.max_body_bytes).await;
            if let Err(e) = &result {
                metrics::record_error(e.kind());
                if e.status() >= 500 {
                    error!(error = %e, "Upload failed");
                } else {
                    warn!(error = %e, "Upload rejected");
                }
            }
            ApiResponse::from_result(result)
        }
    }
}

/// Buffer the body (bounded), ingest it, and hand it to the route's handler
async fn run_upload(
    req: Request<Incoming>,
    route: &Route,
    max_body_bytes: u64,
) -> Result<crate::upload::UploadOutcome, UploadError> {
    let RouteAction::Upload(handler) = &route.action else {
        return Err(UploadError::Internal("route has no upload handler".into()));
    };

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // Reject non-multipart requests before buffering the body
    multipart_boundary(content_type.as_deref())?;

    let limit = usize::try_from(max_body_bytes).unwrap_or(usize::MAX);
    let body = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(UploadError::PayloadTooLarge(max_body_bytes));
        }
        Err(e) => {
            return Err(UploadError::InvalidInput(format!("Failed to read body: {}", e)));
        }
    };

    let spec = FieldSpec {
        fields: &route.config.fields,
        batch: route.config.batch,
    };
    let files = read_multipart(content_type.as_deref(), body, spec).await?;

    info!(
        route = %route.config.path,
        files = files.len(),
        bytes = files.iter().map(|f| f.len()).sum::<usize>(),
        "Upload request ingested"
    );

    handler.handle(files).await
}
