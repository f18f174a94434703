//! Process setup for duet: tracing subscriber, output/scratch directories
//! and the run deadline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use duet_domain::{DuetError, DuetResult};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` wins over the `duet=info`
/// default; `DUET_LOG_FORMAT=json` switches to JSON lines. Calling it
/// twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("duet=info,duet_domain=info"));

    let json = std::env::var("DUET_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        let _ = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init();
    } else {
        let _ = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init();
    }
}

/// Create the artifact directory if needed.
pub fn prepare_output_dir(dir: &Path) -> DuetResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        DuetError::Persistence(format!(
            "failed to create output directory {}: {e}",
            dir.display()
        ))
    })?;
    info!(dir = %dir.display(), "output directory ready");
    Ok(())
}

/// Parent for worker scratch directories: the configured one, else
/// `<cache>/duet/scratch`, else the system temp dir.
pub fn scratch_root(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("duet")
        .join("scratch")
}

/// Run blocking `job` off the async runtime, giving up once `deadline`
/// passes. The blocking thread itself is not interrupted.
pub async fn run_blocking_with_deadline<T, F>(deadline: Option<Duration>, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let task = tokio::task::spawn_blocking(job);
    let joined = match deadline {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .with_context(|| format!("run exceeded its {limit:?} deadline"))?,
        None => task.await,
    };
    joined.context("generation task failed")
}
