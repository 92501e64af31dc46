// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! OutcomeSignal shared types
//!
//! Domain types, the tier policy table and database helpers used by the
//! API server, the billing crate and the worker.

pub mod db;
pub mod tiers;
pub mod types;

pub use db::{create_pool, run_migrations, unique_violation_constraint, UNIQUE_VIOLATION};
pub use sqlx::PgPool;
pub use tiers::{is_unlimited, limits_for, TierLimits, TRIAL_DURATION_DAYS, UNLIMITED};
pub use types::*;
