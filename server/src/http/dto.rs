use serde::{Deserialize, Serialize};
use shared_types::File;
use std::collections::BTreeMap;

/// Request body for creating or updating a file
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteFileRequest {
    pub contents: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Store revision the caller last read, for optimistic updates
    /// - None overwrites unconditionally
    /// - Some(rev) fails with 409 if anything was written after `rev`
    #[serde(default)]
    pub expected_revision: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub prefix: Option<String>,
}

/// Response for listing files
#[derive(Debug, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<File>,
    pub revision: i64,
}

/// Response for a delete
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteFileResponse {
    pub path: String,
    pub revision: i64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}
