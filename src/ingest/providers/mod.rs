// src/ingest/providers/mod.rs
pub mod json_file;

pub use json_file::JsonFileSource;
