//! Annotation client boundary
//!
//! One enrichment attempt = one [`AnnotationClient::annotate`] call with one
//! credential. All classification of service responses happens inside the
//! client; everything downstream works purely on [`Outcome`].

use async_trait::async_trait;

mod gemini;
mod outcome;

pub use gemini::GeminiClient;
pub use outcome::{Outcome, SkipReason, UnavailableReason};

use crate::record::WorkItem;

/// Performs one enrichment attempt for a work item using one credential.
#[async_trait]
pub trait AnnotationClient: Send + Sync {
    async fn annotate(&self, item: &WorkItem, token: &str) -> Outcome;
}
