//! S3-compatible object storage for the Reel transcode pipeline.
//!
//! This crate provides:
//! - An S3 client for the raw-asset and rendition buckets
//! - The `BlobStore` trait seam the pipeline is written against
//! - The deterministic rendition key scheme

pub mod client;
pub mod error;
pub mod keys;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use keys::{manifest_key, rendition_key, thumbnail_key};
pub use store::BlobStore;
