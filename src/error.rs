use thiserror::Error;

/// Error returned when installing the process-wide default execution
/// context fails.
///
/// All other misuse of this crate's API is soft: double resolves and
/// late continuation registrations return `None`, and a finalized
/// combiner hands back invalid keys. Replacing the default context is
/// the one operation that can genuinely be attempted too late.
#[derive(Debug, Error)]
pub enum DefaultContextError {
    /// The default context was already installed, either explicitly or
    /// implicitly by the first caller that asked for it.
    #[error("default execution context is already installed")]
    AlreadyInstalled,
}
