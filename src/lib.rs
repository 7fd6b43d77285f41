//! Resumable batch enrichment of music datasets - shared modules for the CLI.

pub mod batch;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod lookup;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod pacer;
pub mod progress;
pub mod safety;
pub mod scoring;
pub mod table;
