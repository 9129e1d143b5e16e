//! Registry of known assets and their transform state.
//!
//! # Module Organization
//!
//! - [`state`]: the lock-protected [`RegistryState`] tables and their bookkeeping helpers
//! - `transform`: per-state buckets, invalidation, cycle detection and the generation-gated commit
//! - `update`: file-system driven registration (add, modify, move, duplicate, overwrite, remove)
//!   on [`crate::engine::AssetEngine`]
//!
//! Every table lives behind the engine's single registry lock. Cross references between tables
//! (inverse index, sub-asset owners, pending edges) hold [`crate::properties::AssetGuid`] keys
//! only.

pub mod state;
mod transform;
mod update;


pub use state::RegistryState;
