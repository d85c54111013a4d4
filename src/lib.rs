// ABOUTME: Library root for pgtoch - PostgreSQL to ClickHouse table ingestion
// ABOUTME: Exposes the pipeline core, destination client, config and commands

pub mod clickhouse;
pub mod commands;
pub mod config;
pub mod error;
pub mod etl;
pub mod export;
pub mod pipeline;
pub mod postgres;
pub mod progress;
pub mod retry;
pub mod tls;
pub mod utils;

pub use error::{EtlError, Result};
