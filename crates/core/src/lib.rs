//! s3gate-core - Core library for the s3gate file gateway
//!
//! This library moves files between local disk and an S3-compatible object
//! store: bucket checks, server-side encryption selection, single-part vs
//! multipart planning, uploads with progress and completion tracking,
//! downloads and listings.

pub mod backend;
pub mod bucket;
pub mod client;
pub mod config;
pub mod download;
pub mod encryption;
pub mod error;
pub mod gateway;
pub mod lister;
pub mod memory;
pub mod planner;
pub mod progress;
pub mod request;
pub mod upload;

// Re-export commonly used types
pub use backend::{ObjectSummary, StorageBackend, StoreEvent};
pub use bucket::BucketDirectory;
pub use client::StorageClient;
pub use config::{get_config_path, load_config, parse_config, validate_config};
pub use config::{Config, ConfigFile, EncryptionMode, Profile};
pub use download::{DownloadedObject, Downloader};
pub use encryption::{EncryptionHandle, EncryptionPolicy, EncryptionSelector, EncryptionSpec};
pub use error::{Error, ErrorKind, Result};
pub use gateway::FileGateway;
pub use lister::ObjectLister;
pub use memory::MemoryBackend;
pub use planner::{TransferPlan, TransferPlanner, TransferSettings};
pub use progress::{NoopProgress, ProgressObserver, TracingProgress};
pub use request::{DownloadRequest, TransferRequest};
pub use upload::{SourceFile, TransferOutcome, Uploader};
