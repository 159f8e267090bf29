use shared::error::ApiError;
use thiserror::Error;

/// Failures surfaced by the view core. Every variant is caught and logged at
/// the call site that produced it; none of them are retried.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("query on {collection} failed: {reason}")]
    Query { collection: String, reason: String },
    #[error("insert into {collection} failed: {reason}")]
    Insert { collection: String, reason: String },
    #[error("update of {collection} failed: {reason}")]
    Update { collection: String, reason: String },
    #[error("subscription to {topic} failed: {reason}")]
    Subscription { topic: String, reason: String },
    #[error("upload to {bucket}/{key} failed: {reason}")]
    Upload {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("{collection} record {id} not found")]
    NotFound { collection: String, id: String },
    #[error("malformed {collection} record: {reason}")]
    Malformed { collection: String, reason: String },
    #[error("metrics fetch failed: {0}")]
    Metrics(String),
    #[error("an upload is already in progress")]
    UploadInFlight,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn query(collection: &str, reason: impl ToString) -> Self {
        ClientError::Query {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn insert(collection: &str, reason: impl ToString) -> Self {
        ClientError::Insert {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn update(collection: &str, reason: impl ToString) -> Self {
        ClientError::Update {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn subscription(topic: &str, reason: impl ToString) -> Self {
        ClientError::Subscription {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn upload(bucket: &str, key: &str, reason: impl ToString) -> Self {
        ClientError::Upload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(collection: &str, reason: impl ToString) -> Self {
        ClientError::Malformed {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn api_reason(err: &ApiError) -> String {
        match (&err.backend_code, &err.hint) {
            (Some(code), Some(hint)) => format!("{} [{code}] hint: {hint}", err.message),
            (Some(code), None) => format!("{} [{code}]", err.message),
            (None, Some(hint)) => format!("{} hint: {hint}", err.message),
            (None, None) => err.message.clone(),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
