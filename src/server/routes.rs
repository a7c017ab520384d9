//! API route handlers
//!
//! Each handler maps one endpoint to one core operation: load the
//! portfolio, apply a mutator, save it back with the optimistic timestamp
//! taken at load. A 409 tells the client to re-fetch and retry.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{self, RegisterInput, Session};
use crate::db;
use crate::error::{Error, Result};
use crate::market;
use crate::portfolio::valuation::PortfolioReport;
use crate::portfolio::{HoldingPatch, NewHolding, Portfolio};

use super::{AppState, AuthUser};

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterInput>,
) -> Result<(StatusCode, Json<Session>)> {
    let conn = state.db.lock().unwrap();
    let session = auth::register(&conn, &input, &state.jwt_secret)?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<Session>> {
    let conn = state.db.lock().unwrap();
    let session = auth::login(&conn, &input.email, &input.password, &state.jwt_secret)?;
    Ok(Json(session))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<auth::UserProfile>> {
    let conn = state.db.lock().unwrap();
    let profile = auth::profile(&conn, &user.id)?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(patch): Json<auth::ProfilePatch>,
) -> Result<Json<auth::UserProfile>> {
    let conn = state.db.lock().unwrap();
    let profile = auth::update_profile(&conn, &user.id, &patch)?;
    Ok(Json(profile))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(change): Json<auth::PasswordChange>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.lock().unwrap();
    auth::change_password(&conn, &user.id, &change)?;
    Ok(Json(json!({ "message": "password updated" })))
}

pub async fn get_portfolio(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Portfolio>> {
    let conn = state.db.lock().unwrap();
    let portfolio = db::get_or_create_portfolio(&conn, &user.id)?;
    Ok(Json(portfolio))
}

pub async fn get_valuation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<PortfolioReport>> {
    let portfolio = {
        let conn = state.db.lock().unwrap();
        db::get_or_create_portfolio(&conn, &user.id)?
    };

    let report = market::portfolio_report(&portfolio, state.market.as_ref()).await;
    Ok(Json(report))
}

pub async fn add_holding(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<NewHolding>,
) -> Result<(StatusCode, Json<Portfolio>)> {
    let mut conn = state.db.lock().unwrap();
    let mut portfolio = db::get_or_create_portfolio(&conn, &user.id)?;
    let loaded_at = portfolio.updated_at;

    portfolio.add_holding(input)?;
    db::save_portfolio(&mut conn, &portfolio, loaded_at)?;
    Ok((StatusCode::CREATED, Json(portfolio)))
}

pub async fn update_holding(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(holding_id): Path<String>,
    Json(patch): Json<HoldingPatch>,
) -> Result<Json<Portfolio>> {
    let mut conn = state.db.lock().unwrap();
    let mut portfolio = db::get_or_create_portfolio(&conn, &user.id)?;
    let loaded_at = portfolio.updated_at;

    portfolio.update_holding(&holding_id, patch)?;
    db::save_portfolio(&mut conn, &portfolio, loaded_at)?;
    Ok(Json(portfolio))
}

pub async fn delete_holding(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(holding_id): Path<String>,
) -> Result<Json<Portfolio>> {
    let mut conn = state.db.lock().unwrap();
    let mut portfolio = db::get_or_create_portfolio(&conn, &user.id)?;
    let loaded_at = portfolio.updated_at;

    portfolio.remove_holding(&holding_id)?;
    db::save_portfolio(&mut conn, &portfolio, loaded_at)?;
    Ok(Json(portfolio))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

pub async fn rename_portfolio(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<RenameRequest>,
) -> Result<Json<Portfolio>> {
    let mut conn = state.db.lock().unwrap();
    let mut portfolio = db::get_or_create_portfolio(&conn, &user.id)?;
    let loaded_at = portfolio.updated_at;

    portfolio.rename(&input.name)?;
    db::save_portfolio(&mut conn, &portfolio, loaded_at)?;
    Ok(Json(portfolio))
}

#[derive(Debug, Deserialize)]
pub struct ListingsQuery {
    pub limit: Option<u32>,
}

pub async fn market_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingsQuery>,
) -> Result<Json<Vec<market::Listing>>> {
    let limit = query.limit.unwrap_or(100).min(500);
    let listings = state.market.listings(limit).await?;
    Ok(Json(listings))
}

#[derive(Debug, Deserialize)]
pub struct QuotesQuery {
    pub symbols: String,
}

pub async fn market_quotes(
    State(state): State<AppState>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<std::collections::HashMap<String, market::AssetQuote>>> {
    let symbols: Vec<String> = query
        .symbols
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(Error::validation("missing field: symbols"));
    }

    let quotes = state.market.quotes(&symbols).await?;
    Ok(Json(quotes))
}

pub async fn market_detail(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<market::AssetDetail>> {
    let detail = state.market.asset_detail(&symbol).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

pub async fn market_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<market::Listing>>> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(Error::validation("missing field: q"));
    }

    let limit = query.limit.unwrap_or(10).min(50);
    let results = state.market.search(q, limit).await?;
    Ok(Json(results))
}

pub async fn market_global(State(state): State<AppState>) -> Result<Json<market::GlobalMetrics>> {
    let metrics = state.market.global().await?;
    Ok(Json(metrics))
}

pub async fn clear_market_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.market.clear_cache();
    Json(json!({ "cleared": cleared }))
}

pub async fn market_cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "entries": state.market.cache_entries() }))
}
