use function_store::FunctionVersion;

/// Failures surfaced by deploys and invocations.
///
/// A version lookup that finds nothing is not an error; it resolves to
/// `None` and only becomes [`Error::VersionUnavailable`] when a caller needs
/// a version to run against.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("deploy payload is empty")]
    EmptyPayload,

    /// Chunks already written stay in the store; the version must be treated
    /// as invalid.
    #[error(
        "deploy of version {version} failed after {uploaded} of {chunk_count} chunks: {source:#}"
    )]
    DeployUpload {
        version: FunctionVersion,
        uploaded: usize,
        chunk_count: usize,
        source: anyhow::Error,
    },

    #[error("failed to acquire execution context for version {version}: {source:#}")]
    ContextAcquisition {
        version: FunctionVersion,
        source: anyhow::Error,
    },

    #[error("function {function_id} failed on version {version}: {source:#}")]
    Invocation {
        function_id: String,
        version: FunctionVersion,
        source: anyhow::Error,
    },

    #[error("no deployed function version is available")]
    VersionUnavailable,
}
