//! Invocation outcome taxonomy

/// Why the service could not be used for this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Connection / DNS / TLS failure.
    Transport(String),
    /// The call exceeded the configured timeout.
    Timeout,
    /// Non-quota server-side error (5xx, malformed body).
    Api(String),
    /// Every configured model variant returned "not found" for this
    /// credential. A pool-health signal: the credential's configuration is
    /// suspect.
    NoVariant,
}

/// Why the input itself can never be enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Content-policy rejection from the service.
    Policy,
    /// The service returned an empty or below-minimum annotation.
    EmptyAnnotation,
}

/// Classified result of exactly one enrichment attempt.
///
/// Exactly one variant per attempt. `RateLimited` and `ServiceUnavailable`
/// are transient (the item may be retried on a different credential);
/// `InvalidInput` is terminal and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A cleaned, non-trivial annotation.
    Success(String),
    /// Quota exhausted on this credential. Not a variant problem, so the
    /// client stops trying further variants.
    RateLimited,
    /// Transient service failure; classified further for eviction tracking.
    ServiceUnavailable(UnavailableReason),
    /// The input is unsuitable; checkpointed as a sentinel, never retried.
    InvalidInput(SkipReason),
}
