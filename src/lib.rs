//! tutorgen - Incremental, Cache-Aware Tutorial Generator
//!
//! Crawls a repository, asks a language model to identify its core
//! abstractions, and writes a beginner-friendly multi-chapter tutorial. A
//! per-repository cache of file fingerprints and generated chapters lets later
//! runs rewrite only what a change actually affects.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tutorgen::{CacheManager, GenerationRequest, IncrementalGenerator, TutorialPipeline};
//! use tutorgen::{ai::{ProviderConfig, create_invoker}, crawler::LocalCrawler, storage::FileStorage};
//!
//! let invoker = create_invoker(&ProviderConfig::default())?;
//! let pipeline = TutorialPipeline::new(invoker)
//!     .with_crawler(Arc::new(LocalCrawler::new("./widgets")));
//! let cache = CacheManager::new(Arc::new(FileStorage::new(".tutorgen/cache", None)));
//!
//! let outcome = IncrementalGenerator::new(cache, pipeline)
//!     .generate(GenerationRequest::new("https://github.com/acme/widgets"))
//!     .await?;
//! outcome.output.write_to("output/widgets".as_ref()).await?;
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: key/value backends (memory, file, sqlite) with quota eviction
//! - [`cache`]: repository identity, fingerprints, change analysis, planning
//! - [`pipeline`]: the six generation stages and the incremental driver
//! - [`ai`]: model providers behind the `ModelInvoker` trait
//! - [`crawler`]: repository crawling behind the `Crawler` trait
//! - [`config`]: layered configuration

pub mod ai;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod crawler;
pub mod pipeline;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, StorageBackend, StorageConfig};

// Error Types
pub use types::error::{CacheOp, ErrorKind, Result, ResultExt, TutorError};

// Storage
pub use storage::{SharedStorage, StorageAdapter, create_storage};

// Cache
pub use cache::{CacheManager, RegenerationMode, RegenerationPlan, RepoCache};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{
    GenerationOutcome, GenerationRequest, IncrementalGenerator, ProgressEvent, SharedContext,
    StageKind, TutorialOutput, TutorialPipeline,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{ModelInvoker, ProviderConfig, SharedInvoker, create_invoker};
