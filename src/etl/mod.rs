// ABOUTME: Core data-movement pipeline: extraction, type mapping, batch loading, polling
// ABOUTME: Components depend only on the SourceReader/DestinationWriter capabilities

pub mod poller;
pub mod reader;
pub mod typemap;
pub mod value;
pub mod writer;

pub use poller::{
    initial_watermark, BatchHandler, ChangePoller, CycleOutcome, LoadingHandler, PollSpec,
    PollerState,
};
pub use reader::{describe_columns, extract_all, extract_since, PostgresSource, SourceReader};
pub use typemap::{build_create_table_statement, map_types, MappedColumn};
pub use value::{Column, TableSnapshot, Value, Watermark};
pub use writer::{BatchLoader, DestinationWriter, LoadStats};
