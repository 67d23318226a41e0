//! # aggmatch
//!
//! Aggregate-table recognition and summary-index construction for
//! star-schema query layers.
//!
//! ## Architecture
//!
//! A batch pass turns physical catalog metadata into query-ready
//! summary-table descriptors:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Catalog (physical tables/columns)           │
//! │        lazy column loading via Introspector              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [recognizer]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Column Usages (fact count, measures, FKs,         │
//! │        collapsed/non-collapsed levels)                   │
//! │   Default (naming conventions) / Explicit (rules)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [aggstar]
//! ┌─────────────────────────────────────────────────────────┐
//! │        AggStar (bit-indexed summary descriptor)          │
//! │        bitkey algebra answers select() queries           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The star schema itself is an external input (see [`star`]); every star
//! column carries a globally unique bit position, and all coverage questions
//! reduce to [`bitkey::BitKey`] set algebra. [`manager::AggTableManager`] is
//! the entry point tying the pieces together.

pub mod aggstar;
pub mod bitkey;
pub mod catalog;
pub mod config;
pub mod manager;
pub mod recognizer;
pub mod recorder;
pub mod rules;
pub mod star;

pub use aggstar::{AggColumn, AggStar, AggStarError};
pub use bitkey::BitKey;
pub use catalog::{DbCatalog, Introspector, MemoryIntrospector};
pub use config::Settings;
pub use manager::{AggTableManager, LoadError, LoadReport, StarAggregates};
pub use rules::AggRuleGroup;
pub use star::Star;
