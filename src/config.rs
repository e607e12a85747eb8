use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::errors::{Result, UploadError};
use crate::types::StatusReport;

// 用于序列化 Duration（毫秒）
fn serialize_millis<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// 远端处理状态的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    InProgress,
    Completed,
    Failed,
}

/// 引擎配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 最大并发上传数（worker 数量）
    pub max_concurrent_uploads: usize,

    /// 状态轮询间隔
    #[serde(
        rename = "poll_interval_ms",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub poll_interval: Duration,

    /// 每次轮询并发检查的任务数
    pub max_concurrent_status_checks: usize,

    /// 事件广播缓存大小
    pub event_capacity: usize,

    /// 代表处理完成的子状态
    pub completed_statuses: Vec<String>,

    /// 代表处理失败的子状态
    pub failed_statuses: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 10,
            poll_interval: Duration::from_millis(2000),
            max_concurrent_status_checks: 10,
            event_capacity: 256,
            completed_statuses: ["done", "finished", "completed", "success"]
                .into_iter()
                .map(String::from)
                .collect(),
            failed_statuses: ["failed", "error"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_uploads == 0 {
            return Err(UploadError::Config("max_concurrent_uploads must be at least 1".to_string()));
        }
        if self.max_concurrent_status_checks == 0 {
            return Err(UploadError::Config("max_concurrent_status_checks must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(UploadError::Config("poll_interval_ms must be greater than 0".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(UploadError::Config("event_capacity must be at least 1".to_string()));
        }

        Ok(())
    }

    /// 判定一次状态查询的结果，带 error 的一律视为失败
    pub fn classify(&self, report: &StatusReport) -> ProcessingOutcome {
        if report.error.is_some() {
            return ProcessingOutcome::Failed;
        }

        let Some(status) = report.status.as_deref() else {
            return ProcessingOutcome::InProgress;
        };

        let matches = |list: &[String]| list.iter().any(|s| s.eq_ignore_ascii_case(status));
        if matches(&self.failed_statuses) {
            ProcessingOutcome::Failed
        } else if matches(&self.completed_statuses) {
            ProcessingOutcome::Completed
        } else {
            ProcessingOutcome::InProgress
        }
    }
}

/// HTTP 接口配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub pipeline: String,
    pub chunk_size: usize,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/pipeline".to_string(),
            pipeline: "img-basic".to_string(),
            chunk_size: 64 * 1024,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub api: ApiConfig,
    pub files: Vec<PathBuf>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .map_err(|err| UploadError::Config(format!("Can't read {}: {}", path.display(), err)))?;

        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<AppConfig> {
        let config: AppConfig = toml::from_str(config_str)
            .map_err(|err| UploadError::Config(err.to_string()))?;
        config.engine.validate()?;

        Ok(config)
    }
}
