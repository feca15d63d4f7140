//! Portcullis gateway library crate.
//!
//! # Purpose
//! Exposes the HTTP API, auth and rate-limit middleware, configuration and
//! storage backends for use by the binary and tests.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod observability;
pub mod ratelimit;
pub mod store;
