use store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("File already exists: {path}")]
    AlreadyExists { path: String },

    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Malformed file document at {key}: {source}")]
    Encoding {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Store(err) => err.is_not_found(),
            _ => false,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
