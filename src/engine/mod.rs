mod manager;
mod manager_worker;
mod poller;
mod queue;
mod uploader;
mod worker;

pub use manager::{EngineHandle, FilteredEventReceiver, UploadEngine, UploadEngineBuilder};
pub use queue::{JobQueue, QueueEntry};
