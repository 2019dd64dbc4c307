//! HTTP front-ends over [`InferenceService`]. Both flavors share one set of
//! handlers; they differ in port, error body key and one extra route.

pub mod error;
pub mod handlers;

pub use error::ApiError;
pub use handlers::{ClassesResponse, HealthResponse, ModelStatusResponse, PredictionResponse};

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::service::InferenceService;

pub const DEFAULT_BODY_LIMIT: usize = 20 * 1024 * 1024;
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Flavor {
    /// JSON API on port 8000, errors as `{"detail": ..}`
    Api,
    /// Web app backend on port 5000, errors as `{"error": ..}`
    Web,
}

impl Flavor {
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Api => 8000,
            Self::Web => 5000,
        }
    }

    pub const fn error_key(self) -> &'static str {
        match self {
            Self::Api => "detail",
            Self::Web => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub flavor: Flavor,
    pub host: String,
    pub port: u16,
    pub body_limit: usize,
    pub cors_origins: Vec<String>,
}

impl ServerOptions {
    pub fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            host: "0.0.0.0".to_string(),
            port: flavor.default_port(),
            body_limit: DEFAULT_BODY_LIMIT,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct AppContext {
    pub service: InferenceService,
    pub flavor: Flavor,
}

pub type AppState = Arc<AppContext>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn router(service: InferenceService, options: &ServerOptions) -> Router {
    let flavor = options.flavor;
    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/model/status", get(handlers::model_status))
        .route("/classes", get(handlers::classes))
        .route("/predict", post(handlers::predict));
    let router = match flavor {
        Flavor::Api => router.route("/", get(handlers::health)),
        Flavor::Web => router.route("/model_status", get(handlers::model_status)),
    };

    router
        .layer(DefaultBodyLimit::max(options.body_limit))
        .layer(cors_layer(&options.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(AppContext { service, flavor }))
}

pub async fn serve(service: InferenceService, options: ServerOptions) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", options.host, options.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", options.host, options.port))?;
    let model_loaded = service.is_loaded();
    let app = router(service, &options);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(flavor = ?options.flavor, model_loaded, "listening on http://{addr}");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
