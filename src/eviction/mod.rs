//! Eviction policy for the cache engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  priority.rs    - Scoring + victim selection                 │
//! │  └─ PriorityPolicy: recency + frequency + freshness → score  │
//! │  └─ select_victims: (score asc, created_at asc) until the    │
//! │     byte target AND the minimum batch are both met           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cache engine calls [`priority::PriorityPolicy::select_victims`] from its
//! capacity check before every insert.

pub mod priority;

pub use priority::{PriorityPolicy, EvictionPlan};
