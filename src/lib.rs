//! Time-series analytics for a groundwater monitoring network.
//!
//! The crate takes raw water-level telemetry (plus companion sensors) and
//! turns it into operational answers: quality flags, trend summaries,
//! drought-risk scores, recharge estimates, and short-range level
//! forecasts with a managed model lifecycle.
//!
//! [`facade::AnalyticsService`] is the single entry point. Everything
//! underneath is public for direct use and testing:
//!
//! - `ingest`: reading and rainfall acquisition behind narrow traits;
//! - `quality`: anomaly scanning and the modeling data gate;
//! - `analysis`: trend, drought-risk, and recharge computations;
//! - `forecast`: the level model, its versioned store, and the lifecycle
//!   manager;
//! - `stations`: the monitored-network registry;
//! - `config`: layered TOML configuration;
//! - `model`: the shared domain types.
//!
//! Every computation takes its clock as an argument. Nothing in the
//! analytics path reads the wall clock, which keeps results reproducible
//! and the tests deterministic.

pub mod analysis;
pub mod config;
pub mod error;
pub mod facade;
pub mod forecast;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod quality;
pub mod stations;

pub use config::AnalyticsConfig;
pub use error::AnalyticsError;
pub use facade::AnalyticsService;
