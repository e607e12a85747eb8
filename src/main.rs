use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use bytes::Bytes;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstage::api::HttpApi;
use upstage::{AppConfig, UploadEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upstage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("UPSTAGE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path))?;

    let api = Arc::new(HttpApi::new(&config.api)?);
    let handle = UploadEngine::builder()
        .config(config.engine.clone())
        .api(api)
        .start()?;

    for path in &config.files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        // 单个文件暂存失败不影响其它文件
        if let Err(err) = handle.stage_and_submit(name.clone(), Bytes::from(data)).await {
            tracing::error!(%name, error = %err, "Skipping file");
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let views = handle.list_progress_views().await;
        for view in &views {
            tracing::info!(
                label = %view.label,
                status = %view.status,
                upload = view.upload_percentage.unwrap_or(0),
                task_id = view.task_id.as_deref().unwrap_or("-"),
                "Progress",
            );
        }

        if views.iter().all(|view| view.status.is_terminal()) {
            break;
        }
    }

    handle.shutdown().await?;
    Ok(())
}
