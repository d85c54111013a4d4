// ABOUTME: ClickHouse destination module
// ABOUTME: Re-exports the HTTP client and its URL configuration

pub mod client;

pub use client::{bind_params, to_literal, ClickHouseClient, ClickHouseConfig};
