//! Authentication module for OutcomeSignal

pub mod middleware;

pub use middleware::{require_auth, AuthError, AuthState, AuthUser};
