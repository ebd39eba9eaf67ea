use super::ServiceError;

/// State of a crawler invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CrawlState {
    /// The crawl has not finished yet.
    Running,
    /// The crawl finished successfully.
    Success,
    /// The crawl crashed.
    Crashed,
    /// A state string this engine does not recognise.
    Other(String),
}

/// The external indexing crawler.
pub trait CrawlerService: Send + Sync {
    /// Ask the crawler to (re)index an archive subtree. Returns an invocation
    /// ID which can later be passed to [`CrawlerService::state`].
    fn invoke(&self, reference: &str) -> Result<String, ServiceError>;

    /// Query the state of an earlier invocation.
    fn state(&self, invocation: &str) -> Result<CrawlState, ServiceError>;

    /// Create permanent version records for a batch of `(old, new)` archive
    /// reference pairs.
    fn create_versions(&self, pairs: &[(String, String)]) -> Result<(), ServiceError>;
}
