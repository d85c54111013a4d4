// ABOUTME: PostgreSQL source access
// ABOUTME: Connection setup and the catalog/row reader used by extraction

pub mod connection;

pub use connection::connect;
