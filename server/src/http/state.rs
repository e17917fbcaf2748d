use crate::service::FileService;
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers
pub struct AppState {
    pub files: FileService,
    /// Parent of every request context; cancelled on shutdown
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(files: FileService, shutdown: CancellationToken) -> Self {
        Self { files, shutdown }
    }

    /// Context for one request's store calls
    pub fn request_context(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
