use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backend refused the query shape, typically because no composite
    /// index covers the filter/order combination.
    #[error("Missing index for query on '{0}'")]
    MissingIndex(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Subscription closed")]
    SubscriptionClosed,
}
