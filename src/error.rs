use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for Custos.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum CustosError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Journal ─────────────────────────────────────────────────────────
    #[error("journal: {0}")]
    Journal(#[from] JournalError),

    // ── Snapshot / Rollback ─────────────────────────────────────────────
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Journal errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("append failed: {0}")]
    Append(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Snapshot errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("capture failed for {path}: {message}")]
    Capture { path: String, message: String },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, CustosError>;
