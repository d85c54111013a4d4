// ABOUTME: Command implementations for each CLI entry point
// ABOUTME: Exports connect, ingest, export and sample-config commands

pub mod connect;
pub mod export;
pub mod ingest;
pub mod sample_config;

pub use connect::ConnectArgs;
pub use export::ExportArgs;
pub use ingest::IngestArgs;
pub use sample_config::SampleConfigArgs;
