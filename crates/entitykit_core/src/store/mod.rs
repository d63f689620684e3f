//! Unit-of-work tracking and stack orchestration.
//!
//! # Responsibility
//! - Track pending entity changes until an explicit save.
//! - Bundle model, store backend, context and configuration into one
//!   caller-owned persistence stack handle.
//!
//! # Invariants
//! - Nothing reaches the backing store before `save`.
//! - Entity handles from one context are rejected by another until
//!   materialized.

pub mod context;
pub mod stack;
