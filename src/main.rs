use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;

use rtp_clusters::clustering::config::{ClusterConfig, DEFAULT_CONFIG_PATH};
use rtp_clusters::clustering::ClusteringPlugin;
use rtp_clusters::sandbox::{build_engine, SandboxPlugin, SandboxSettings};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_PREFIX: &str = "rtp_clusters";
const KEEP_LOGS: usize = 25;
const TICK_RATE_HZ: f64 = 20.0;

/// Stdout plus a timestamped file under `logs/`. Returns the file path, or
/// `None` when the directory could not be created (stdout still works).
fn setup_file_logging() -> Option<String> {
    let log_dir = PathBuf::from("logs");
    let file_ready = fs::create_dir_all(&log_dir).is_ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bevy_app=info,bevy_ecs=info,rtp_clusters=info"));

    if !file_ready {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
            .init();
        return None;
    }

    cleanup_old_logs(&log_dir, KEEP_LOGS);

    let now = chrono::Local::now();
    let log_filename = format!("{}_{}.log", LOG_PREFIX, now.format("%Y%m%d_%H%M%S"));
    let log_path = log_dir.join(&log_filename).to_string_lossy().to_string();

    // One file per run
    let file_appender = RollingFileAppender::new(Rotation::NEVER, &log_dir, &log_filename);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
        .init();

    Some(log_path)
}

fn cleanup_old_logs(log_dir: &Path, keep_count: usize) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|s| s.starts_with(LOG_PREFIX) && s.ends_with(".log"))
        })
        .collect();

    // Oldest first
    log_files.sort_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));

    if log_files.len() > keep_count {
        for file in log_files.iter().take(log_files.len() - keep_count) {
            let _ = fs::remove_file(file.path());
        }
    }
}

fn main() -> AppExit {
    let log_file = setup_file_logging();
    if let Some(path) = &log_file {
        println!("RTP cluster sandbox, logging to {}", path);
    }

    let config = ClusterConfig::load_or_default(DEFAULT_CONFIG_PATH);
    let (world, engine) = match build_engine(config) {
        Ok(built) => built,
        Err(e) => {
            error!("[SANDBOX] Could not start clustering engine: {}", e);
            return AppExit::error();
        }
    };

    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
            1.0 / TICK_RATE_HZ,
        ))))
        .add_plugins(ClusteringPlugin::with_engine(engine))
        .add_plugins(SandboxPlugin {
            settings: SandboxSettings::default(),
            world,
        })
        .run()
}
