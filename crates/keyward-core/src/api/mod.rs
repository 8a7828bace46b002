//! REST client module for the keyward authentication service.
//!
//! This module provides the `HttpSessionClient`, the production
//! implementation of `SessionClient`, and `ApiError`, which classifies HTTP
//! failures into the session error classes the authenticator acts on.

pub mod client;
pub mod error;

pub use client::{HttpSessionClient, DEFAULT_BASE_URL};
pub use error::ApiError;
