pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod progress;
pub mod store;
pub mod traits;
pub mod types;

// 重新导出核心类型
pub use config::{AppConfig, EngineConfig, ProcessingOutcome};
pub use engine::{EngineHandle, UploadEngine, UploadEngineBuilder};
pub use errors::{Result, UploadError};
pub use progress::ProgressEmitter;
pub use store::{ProgressView, UploadJob};
pub use traits::{
    Notifier,
    RemoteProcessor,
    StageRequester,
    TaskStatusChecker,
    TracingNotifier,
    TransferExecutor,
};
pub use types::{
    EngineEvent,
    JobId,
    Notice,
    NoticeKind,
    ProcessingState,
    ProcessingTask,
    StagedAsset,
    StatusReport,
    TransferProgress,
    UploadStatus,
};
