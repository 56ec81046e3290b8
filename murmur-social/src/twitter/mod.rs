//! Twitter/X recent-search integration.
//!
//! `client` shapes the request (auth, query, window) and turns the response
//! into [`murmur_common::Item`]s; `types` holds the wire models.
pub mod client;
pub mod types;

pub use client::TwitterApi;
