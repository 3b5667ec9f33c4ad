use inspectra_core::AppError;

/// Maps a sqlx error, treating lost connectivity as an unavailable store.
pub(crate) fn map_sqlx_error(context: impl std::fmt::Display, error: sqlx::Error) -> AppError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => AppError::Unavailable(format!("{context}: {error}")),
        _ => AppError::Internal(format!("{context}: {error}")),
    }
}
