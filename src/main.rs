use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use realtor_valuation::config::Settings;
use realtor_valuation::error::{ErrorKind, ErrorRecord, ValuationError};
use realtor_valuation::sourcing::{
    CacheStore, Feed, Freshness, KeyValueStore, MemoryStore, PgStore, QuotaLedger,
    ReqwestTransport, RetryPolicy, SourceOrchestrator, SourceStatus,
};
use realtor_valuation::valuation::engine::with_default_weights;
use realtor_valuation::valuation::{
    appraise, Appraisal, AppraisalRequest, ComparableSale, LastSale, LocationSignals,
    PointEstimate, PropertyDescriptor,
};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    orchestrator: Arc<SourceOrchestrator>,
}

#[derive(Serialize, Deserialize)]
struct ApiResponse {
    message: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ValuationBody {
    property: PropertyDescriptor,
    comps: Option<Vec<ComparableSale>>,
    estimates: Option<Vec<PointEstimate>>,
    location: Option<LocationSignals>,
    last_sale: Option<LastSale>,
    preferred_source: Option<String>,
    #[serde(default)]
    force_refresh: bool,
}

/// Where fetched comps came from
#[derive(Debug, Serialize)]
struct CompsProvenance {
    source: String,
    from_cache: bool,
    freshness: Freshness,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ValuationResponse {
    #[serde(flatten)]
    appraisal: Appraisal,
    comps_provenance: Option<CompsProvenance>,
}

struct ApiError(ValuationError);

impl From<ValuationError> for ApiError {
    fn from(e: ValuationError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InputError => StatusCode::BAD_REQUEST,
            ErrorKind::InsufficientDataError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::SourceUnavailableError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::SourceError | ErrorKind::ParseError => StatusCode::BAD_GATEWAY,
            ErrorKind::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }

        (status, Json(ErrorRecord::from(&self.0))).into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🏠 Starting valuation API server...");

    let settings = Settings::from_env().context("Invalid configuration")?;
    info!("Loaded {} source(s)", settings.sources.len());

    let store: Arc<dyn KeyValueStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            info!("📦 Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await
                .context("Failed to connect to database")?;

            let store = PgStore::new(pool);
            store.ensure_schema().await.context("Failed to prepare kv_store")?;
            info!("✅ Database connected successfully");
            Arc::new(store)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, quota and cache state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = build_state(settings, store)?;
    let app = router(state);

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".to_string());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("BIND_ADDR '{}' is not a socket address", bind))?;
    info!("🚀 Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_state(settings: Settings, store: Arc<dyn KeyValueStore>) -> anyhow::Result<AppState> {
    let transport = ReqwestTransport::new(settings.http_timeout).context("Failed to build HTTP client")?;
    let ledger = QuotaLedger::new(
        store.clone(),
        settings.sources.clone(),
        settings.quota.threshold_percent,
    );
    let cache = CacheStore::new(store, settings.cache.clone());
    let orchestrator = SourceOrchestrator::new(
        Arc::new(transport),
        Arc::new(ledger),
        Arc::new(cache),
        RetryPolicy::from_settings(&settings.retry),
    );

    Ok(AppState {
        settings: Arc::new(settings),
        orchestrator: Arc::new(orchestrator),
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/valuations", post(create_valuation))
        .route("/api/usage", get(get_usage))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<ApiResponse> {
    Json(ApiResponse {
        message: "Valuation API is running!".to_string(),
        status: "ok".to_string(),
    })
}

fn has_sources(settings: &Settings, feed: Feed) -> bool {
    settings.sources.iter().any(|s| s.feed == feed)
}

async fn create_valuation(
    State(state): State<AppState>,
    Json(body): Json<ValuationBody>,
) -> Result<Json<ValuationResponse>, ApiError> {
    body.property.validate()?;

    let settings = &state.settings;
    let orchestrator = &state.orchestrator;
    let property = &body.property;
    let preferred = body.preferred_source.as_deref();

    // Step 1/3: Comps, fetched only when the caller has none
    let (comps, comps_provenance) = match body.comps {
        Some(comps) if !comps.is_empty() => (comps, None),
        _ => {
            let sourced = orchestrator
                .fetch_comps(property, preferred, body.force_refresh)
                .await?;
            let provenance = CompsProvenance {
                source: sourced.source,
                from_cache: sourced.from_cache,
                freshness: sourced.freshness,
                fetched_at: sourced.fetched_at,
            };
            (sourced.data, Some(provenance))
        }
    };

    // Step 2/3: Third-party estimates
    let estimates = match body.estimates {
        Some(estimates) => estimates,
        None if has_sources(settings, Feed::Estimate) => {
            let values = orchestrator
                .fetch_estimates(property, body.force_refresh)
                .await?;
            with_default_weights(values, &settings.valuation)
        }
        None => Vec::new(),
    };

    // Step 3/3: Location signals, optional
    let location = match body.location {
        Some(location) => Some(location),
        None if has_sources(settings, Feed::Location) => {
            match orchestrator
                .fetch_location(property, None, body.force_refresh)
                .await
            {
                Ok(sourced) => Some(sourced.data),
                Err(e) => {
                    warn!("Continuing without location signals: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let request = AppraisalRequest {
        property: body.property,
        comps,
        estimates,
        location,
        last_sale: body.last_sale,
    };

    let appraisal = appraise(request, Utc::now().date_naive(), settings)?;
    info!(
        "Appraisal {} for {}: {:.0}",
        appraisal.id, appraisal.property.address, appraisal.final_arv
    );

    Ok(Json(ValuationResponse {
        appraisal,
        comps_provenance,
    }))
}

async fn get_usage(State(state): State<AppState>) -> Result<Json<Vec<SourceStatus>>, ApiError> {
    Ok(Json(state.orchestrator.ledger().report().await?))
}
