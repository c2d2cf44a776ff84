//! Core shared types for Questlog
//!
//! This crate contains:
//! - Normalized achievement/trophy data models
//! - Rarity bucketing and score/level aggregation
//! - The platform/console registry and resolver
//! - Fuzzy title matching for identity resolution
//! - Provider catalog DTOs
//! - Scan settings and cooperative cancellation

pub mod cancel;
pub mod consoles;
pub mod dto;
pub mod error;
pub mod matching;
pub mod models;
pub mod progress;
pub mod rarity;
pub mod settings;

pub use cancel::CancelToken;
pub use error::*;
pub use models::*;
pub use rarity::{BucketCounts, RarityBuckets, RarityThresholds};
pub use settings::ScanSettings;
