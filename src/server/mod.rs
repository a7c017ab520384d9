//! REST API server
//!
//! axum router plus the two middlewares the surface needs: bearer-token
//! authentication for portfolio routes and a fixed-window rate limit over
//! everything. This is also the only layer that maps error kinds to HTTP
//! status codes.

pub mod rate_limit;
pub mod routes;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rusqlite::Connection;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::market::{CoinMarketCap, MarketData};
use crate::{auth, db};
use rate_limit::FixedWindowLimiter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub market: Arc<MarketData>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub jwt_secret: Arc<str>,
}

/// The authenticated caller, injected by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Market(_) => StatusCode::BAD_GATEWAY,
            Error::Db(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Verify the bearer token and resolve it to a stored user.
async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Unauthorized("authentication required, no token provided".to_string()))?;

    let claims = auth::verify_token(token, &state.jwt_secret)?;

    // The token may outlive the account; check the store.
    let user = {
        let conn = state.db.lock().unwrap();
        db::find_user_by_id(&conn, &claims.sub)?
    }
    .ok_or_else(|| Error::Unauthorized("user not found or token invalid".to_string()))?;

    request.extensions_mut().insert(AuthUser { id: user.id });
    Ok(next.run(request).await)
}

async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if !state.limiter.check(addr.ip()) {
        warn!("Rate limit exceeded for IP: {}", addr.ip());
        return Err(Error::RateLimited);
    }
    Ok(next.run(request).await)
}

/// Build the full application router.
///
/// The rate limiter wraps the API routes only; `/health` stays outside so
/// liveness checks are never throttled.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/auth/register", post(routes::register))
        .route("/api/auth/login", post(routes::login))
        .route("/api/market/listings", get(routes::market_listings))
        .route("/api/market/quotes", get(routes::market_quotes))
        .route("/api/market/crypto/{symbol}", get(routes::market_detail))
        .route("/api/market/search", get(routes::market_search))
        .route("/api/market/global", get(routes::market_global));

    let protected = Router::new()
        .route(
            "/api/auth/profile",
            get(routes::get_profile).put(routes::update_profile),
        )
        .route("/api/auth/password", put(routes::change_password))
        .route("/api/portfolio", get(routes::get_portfolio))
        .route("/api/portfolio/valuation", get(routes::get_valuation))
        .route("/api/portfolio/name", put(routes::rename_portfolio))
        .route("/api/portfolio/holdings", post(routes::add_holding))
        .route(
            "/api/portfolio/holdings/{holding_id}",
            put(routes::update_holding).delete(routes::delete_holding),
        )
        .route("/api/market/cache/clear", post(routes::clear_market_cache))
        .route("/api/market/cache/stats", get(routes::market_cache_stats))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let api = Router::new()
        .merge(public)
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Initialize the database, build the state, and serve until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    db::init_database(config.db_path.clone())?;
    let conn = db::open_db(config.db_path.clone())?;

    let client = CoinMarketCap::new(config.cmc_api_key.clone())?;
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        market: Arc::new(MarketData::new(client, config.market_cache_ttl_secs)),
        limiter: Arc::new(FixedWindowLimiter::new(
            config.rate_limit_window_secs,
            config.rate_limit_max_requests,
        )),
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    };

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        "cryptofolio v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
