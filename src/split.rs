use crate::cli::SplitArgs;
use multiwriter::config::Config;
use multiwriter::{Manager, OsFileSystem, WriteError};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(args: SplitArgs) -> Result<(), AnyError> {
    let mut config = match args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if args.gzip {
        config.writer.compression = true;
    }

    let manager = Arc::new(Manager::new(
        config.manager_config(),
        Arc::new(OsFileSystem::new()),
    )?);
    let dispatcher = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run().await }
    });

    info!(out_dir = %args.out_dir.display(), "Splitting stdin");

    tokio::select! {
        result = copy_lines(&manager, &args.out_dir) => {
            if let Err(e) = result {
                warn!(error = %e, "Stopped reading stdin");
            }
        }
        _ = shutdown_signal() => {}
    }

    manager.stop().await;
    dispatcher.await?;

    println!("{}", serde_json::to_string_pretty(&manager.metrics())?);
    Ok(())
}

async fn copy_lines(manager: &Manager, out_dir: &Path) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let Some((relative, payload)) = line.split_once('\t') else {
            warn!(line = line_no, "Missing tab separator, skipping");
            continue;
        };
        let Some(path) = output_path(out_dir, relative) else {
            warn!(line = line_no, path = relative, "Path escapes the output directory, skipping");
            continue;
        };

        match manager.write(path, format!("{payload}\n")).await {
            Ok(()) => {}
            Err(WriteError::Stopped) => break,
            Err(e) => warn!(line = line_no, error = %e, "Write failed"),
        }
    }

    Ok(())
}

/// Join `relative` under `out_dir`, refusing anything that could leave it
fn output_path(out_dir: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut components = relative.components().peekable();
    components.peek()?;
    if components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        Some(out_dir.join(relative))
    } else {
        None
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining writers");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_stays_inside() {
        let root = Path::new("/data/out");
        assert_eq!(
            output_path(root, "logs/a.txt"),
            Some(PathBuf::from("/data/out/logs/a.txt"))
        );
        assert_eq!(output_path(root, "../etc/passwd"), None);
        assert_eq!(output_path(root, "/etc/passwd"), None);
        assert_eq!(output_path(root, ""), None);
    }
}
