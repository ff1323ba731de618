use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("report output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("report encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
