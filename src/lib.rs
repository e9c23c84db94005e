//! enrichd - resumable keyword enrichment dispatcher
//!
//! Annotates previously harvested article records with generated keywords by
//! calling a text-generation service through a pool of interchangeable,
//! rate-limited API keys. The backlog may span many thousands of rows and
//! survives process restarts: terminal outcomes are checkpointed to the
//! output CSV as they happen and completed keys are never reprocessed.
//!
//! # Modules
//!
//! - [`pool`] - credential pool with per-key cooldown and permanent eviction
//! - [`client`] - annotation client boundary and the Gemini implementation
//! - [`checkpoint`] - durable, resumable terminal-outcome store
//! - [`dispatcher`] - bounded worker pool, retry/eviction/backoff policy
//! - [`record`] - article record schema, work items, sentinel markers
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod checkpoint;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod pool;
pub mod record;

// Re-export commonly used types
pub use checkpoint::{CheckpointStore, StoreSummary, read_records};
pub use client::{AnnotationClient, GeminiClient, Outcome, SkipReason, UnavailableReason};
pub use config::{Config, CredentialsConfig, DispatchConfig, ServiceConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig, RunSummary};
pub use pool::{CredentialPool, Lease, PoolError};
pub use record::{
    ArticleRecord, MARKER_UNRESOLVED, SENTINEL_EMPTY, SENTINEL_POLICY, SENTINEL_TOO_SHORT, WorkItem,
};
