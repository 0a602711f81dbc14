//! SeriesVault Core: on-disk cache for downloaded time series.
//!
//! This crate contains:
//! - Domain types (series identities, resolutions, write policies, data points)
//! - A keyed synchronizer with single-flight coalescing
//! - The archive store, its path layout and line codec
//! - The partition writer and its three write policies
//! - Freshness checks and the download orchestrator

pub mod archive;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod freshness;
pub mod sync;
pub mod writer;

pub use config::CacheConfig;
pub use error::CacheError;
