#![forbid(unsafe_code)]

//! Public entry point for the videodex crate.
//!
//! The crate is intentionally small: a flat-file video catalog, a headless
//! browser scraper, and the axum router that exposes both. The `backend`
//! binary wires them together from a [`config::ServerConfig`].

pub mod api;
pub mod catalog;
pub mod config;
pub mod scrape;
