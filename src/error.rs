use parse_display::Display;

/// Failure of a persistence backend or of a persisted blob.
///
/// Persistence failures never affect the in-memory state.
#[derive(Display, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[display("storage is unavailable: {0}")]
    Unavailable(String),
    #[display("persisted state is corrupted: {0}")]
    Corrupted(String),
    #[display("failed to serialize state: {0}")]
    Serialize(String),
}

impl std::error::Error for PersistError {}

/// The arguments of a query could not be serialized into a cache key.
#[derive(Display, Debug)]
#[display("failed to build query key: {source}")]
pub struct QueryKeyError {
    source: serde_json::Error,
}
impl QueryKeyError {
    pub(crate) fn new(source: serde_json::Error) -> Self {
        Self { source }
    }
}

impl std::error::Error for QueryKeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
