use thiserror::Error;

/// Storage-layer faults surfaced by [`crate::CodeStore`].
///
/// Expected conditions (quota reached, no codes left) are not errors; they
/// are variants of [`crate::ClaimAttempt`]. Anything here is unexpected and
/// ends up logged server-side as a [`crate::ClaimOutcome::Fault`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The claim UPDATE touched an unexpected number of rows. Should be
    /// impossible inside the claim transaction; indicates a corrupted store.
    #[error("claiming code {code:?} updated {rows} rows, expected 1")]
    CorruptClaim { code: String, rows: u64 },
}
