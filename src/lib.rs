//! Cryptofolio - cryptocurrency portfolio tracker
//!
//! This library provides the portfolio and holdings domain model, the
//! valuation engine, SQLite persistence, CoinMarketCap market data with
//! TTL caching, JWT-based auth, and the REST API server that ties them
//! together.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod market;
pub mod portfolio;
pub mod server;
