//! Runtime reload of the check configuration file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ChecksConfig;
use super::engine::CheckEngine;

/// Polls `path` every `poll` and reloads `engine` when the file content
/// changes, until `shutdown` is cancelled.
///
/// A file that cannot be read or parsed is logged and skipped; the engine
/// keeps its current checks until a valid version appears.
pub async fn watch_checks_config(
    path: PathBuf,
    engine: Arc<CheckEngine>,
    poll: Duration,
    shutdown: CancellationToken,
) {
    let mut last = tokio::fs::read_to_string(&path).await.ok();
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    info!("Watching {} for check configuration changes", path.display());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Stopped watching {}", path.display());
                return;
            }
            _ = ticker.tick() => {}
        }

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };
        if last.as_deref() == Some(raw.as_str()) {
            continue;
        }

        let result = ChecksConfig::from_yaml(&raw).and_then(|config| engine.reload(&config));
        last = Some(raw);
        match result {
            Ok(true) => info!("Reloaded check configuration from {}", path.display()),
            Ok(false) => debug!("{} changed but selects the same checks", path.display()),
            Err(e) => warn!(
                "Ignoring invalid check configuration in {}: {}",
                path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationEngine;
    use prometheus_client::metrics::family::Family;
    use std::io::Write;

    async fn wait_for_generation(engine: &CheckEngine, generation: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.generation() < generation {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine was not reloaded");
    }

    #[tokio::test]
    async fn test_file_change_reloads_engine() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "checks:\n  include: [latest-tag]").unwrap();
        let config = ChecksConfig::load(Some(file.path())).unwrap();
        let engine = Arc::new(CheckEngine::new(&config, Family::default()).unwrap());
        assert!(engine.is_enabled("latest-tag"));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(watch_checks_config(
            file.path().to_path_buf(),
            engine.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        // Unparseable content is skipped without touching the engine.
        std::fs::write(file.path(), "checks: [").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.generation(), 0);

        std::fs::write(file.path(), "checks:\n  exclude: [host-pid]\n").unwrap();
        wait_for_generation(&engine, 1).await;
        assert!(!engine.is_enabled("latest-tag"));
        assert!(!engine.is_enabled("host-pid"));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_on_cancel() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let engine = CheckEngine::new(&ChecksConfig::default(), Family::default()).unwrap();
        let engine = Arc::new(engine);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(
            Duration::from_secs(5),
            watch_checks_config(
                file.path().to_path_buf(),
                engine,
                Duration::from_secs(60),
                shutdown,
            ),
        )
        .await
        .unwrap();
    }
}
