use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use unirest_core::Company;
use unirest_filter::{FilterCompiler, SchemaRegistry};
use unirest_gateway::{HttpGateway, InMemoryGateway, SessionGateway};

use crate::{
    cache::{ConnectionCache, ConnectionSettings},
    config::{AppConfig, RemoteBackend},
    handlers, middleware as app_middleware,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ConnectionCache>,
    pub schemas: Arc<SchemaRegistry>,
    pub compiler: Arc<FilterCompiler>,
    /// Cancelled when the server shuts down; request tokens are children of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn SessionGateway>,
        schemas: SchemaRegistry,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            cache: Arc::new(ConnectionCache::new(
                gateway,
                ConnectionSettings::from_config(cfg),
            )),
            schemas: Arc::new(schemas),
            compiler: Arc::new(FilterCompiler::new(cfg.filter.clone())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the gateway and schema registry described by the configuration.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let gateway: Arc<dyn SessionGateway> = match cfg.remote.backend {
            RemoteBackend::Http => {
                let base_url = cfg.remote.base_url.as_deref().unwrap_or_default();
                let gateway = HttpGateway::new(base_url, cfg.remote.timeout())?;
                tracing::info!(base_url = %gateway.base_url(), "using http remote backend");
                Arc::new(gateway)
            }
            RemoteBackend::Memory => {
                let mut gateway = InMemoryGateway::new();
                for account in &cfg.remote.accounts {
                    gateway = gateway.with_account(&account.username, &account.password);
                }
                for company in &cfg.remote.companies {
                    gateway = gateway.with_company(Company::new(company.id, &company.name));
                }
                tracing::info!(
                    accounts = cfg.remote.accounts.len(),
                    companies = cfg.remote.companies.len(),
                    "using in-memory remote backend"
                );
                Arc::new(gateway)
            }
        };

        let mut schemas = SchemaRegistry::builtin();
        if let Some(path) = cfg.schema.path.as_deref() {
            let added = schemas.extend_from_file(path)?;
            tracing::info!(path, added, "loaded entity schemas");
        }

        Ok(Self::new(gateway, schemas, cfg))
    }
}

pub struct UnirestServer {
    addr: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/stats", get(connection_stats))
        .route(
            "/Companies/{company_id}/Query/{type_name}",
            get(handlers::query_entities),
        )
        .route(
            "/Companies/{company_id}/Crud/{type_name}",
            post(handlers::create_entities)
                .patch(handlers::patch_entities)
                .delete(handlers::delete_entities),
        )
        .route(
            "/Companies/{company_id}/Invoice/DebtorOrders/{order_number}",
            post(handlers::invoice_debtor_order),
        )
        .route(
            "/Companies/{company_id}/Invoice/Orders/{order_number}",
            post(handlers::invoice_debtor_order),
        )
        .route(
            "/Companies/{company_id}/Invoice/CreditorOrders/{order_number}",
            post(handlers::invoice_creditor_order),
        )
        .route(
            "/Companies/{company_id}/Posting/InventoryJournals/{journal_id}",
            post(handlers::post_inventory_journal),
        )
        .with_state(state)
        // Middleware stack (order: request id -> compression/cors/trace -> body limit)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

async fn connection_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats().await)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    state: Option<AppState>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            state: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use a prepared state instead of building one from the configuration.
    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> anyhow::Result<UnirestServer> {
        let state = match self.state {
            Some(state) => state,
            None => AppState::from_config(&self.config)?,
        };
        let shutdown = state.shutdown.clone();
        let app = build_app(state, &self.config);

        Ok(UnirestServer {
            addr: self.addr,
            app,
            shutdown,
        })
    }
}

impl UnirestServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;
        Ok(())
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
