use thiserror::Error;
use crate::types::JobId;

#[derive(Error, Debug)]
pub enum UploadError {
    /// 获取上传地址失败，此时还没有创建任务
    #[error("Stage error: {0}")]
    Stage(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    /// 启动远端处理失败
    #[error("Processing error: {0}")]
    Processing(String),

    /// 轮询处理状态失败（临时错误）
    #[error("Status check error: {0}")]
    StatusCheck(String),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Engine shut down")]
    EngineShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn transfer_error(message: impl Into<String>) -> Self {
        Self::Transfer(message.into())
    }

    pub fn status_check_error(message: impl Into<String>) -> Self {
        Self::StatusCheck(message.into())
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
