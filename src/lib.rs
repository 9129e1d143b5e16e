//! # assettrack-core
//!
//! Dependency tracking and incremental transform state for editor asset pipelines.
//!
//! ## Overview
//!
//! Every source asset is a small document (see [`codec::asset_doc`]) carrying a stable GUID,
//! transform settings and the dependencies it declares: other assets by GUID, arbitrary files by
//! path. For each asset the engine computes an asset hash and a thumbnail hash transitively over
//! those dependencies, classifies the asset into a [`properties::TransformState`], detects
//! circular dependencies, and propagates invalidation to everything downstream when a file
//! changes. It decides *whether* an asset needs to be transformed; running the transform is left
//! to the caller.
//!
//! ## Architecture
//!
//! - **[`hash`]**: pure hash combination (`settings + Σ dependencies`, order independent)
//! - **[`depindex`]**: inverse dependency index plus pending edges to assets not seen yet
//! - **[`registry`]**: asset and sub-asset tables, state buckets, invalidation and cycle checks
//! - **[`engine`]**: the [`engine::AssetEngine`] handle owning the registry lock
//! - **[`scheduler`]**: background workers that evaluate stale assets
//! - **[`files`]**, **[`codec`]**, **[`cache`]**: file model, document types, parsed-info cache
//! - **[`watch`]** (feature `service`): file system notifications into the engine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use assettrack_core::{config::TrackerConfig, engine::AssetEngine};
//!
//! let engine = AssetEngine::open(TrackerConfig::with_data_dir("./assets"), None)?;
//! engine.scan_data_directories();
//! engine.process_all();
//! for asset in engine.assets() {
//!     println!("{} {} {}", asset.path, asset.guid, asset.transform_state);
//! }
//! engine.shutdown()?;
//! # Ok::<(), assettrack_core::AssetTrackError>(())
//! ```
//!
//! ## Staleness
//!
//! Invalidating an asset bumps a per-asset generation counter for it and its whole dependent
//! closure. Evaluations run without the registry lock and commit only when the generation they
//! started from is still current, so results computed against outdated inputs are dropped and
//! the asset is evaluated again.
//!
//! ## Features
//!
//! - **default**: the engine, local file model and TOML asset documents
//! - **service**: file watching (`notify`)
//! - **bin**: the `assettrack` command line tool

pub mod cache;
pub mod codec;
pub mod config;
pub mod depindex;
pub mod engine;
pub mod error;
pub mod event;
pub mod files;
pub mod hash;
pub mod properties;
pub mod registry;
pub mod scheduler;
#[cfg(test)]
mod tests;
#[cfg(feature = "service")]
pub mod watch;

pub use error::*;
