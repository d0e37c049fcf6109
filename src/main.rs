use anyhow::Context;
use clap::Parser;
use perfwatch::platform::fetch::{self, FetchRequest, ReqwestFetch};
use perfwatch::platform::timeline::PerformanceTimeline;
use perfwatch::{Hosts, TelemetryConfig, TelemetrySession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "perfwatch", about = "Headless performance telemetry collector")]
struct Args {
    /// JSON config file. Fields it leaves out keep their defaults.
    #[arg(long, env = "PERFWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Frame-rate measurement window.
    #[arg(long, env = "PERFWATCH_FRAME_WINDOW_MS")]
    frame_window_ms: Option<u64>,

    /// Paint cadence of the frame driver.
    #[arg(long, env = "PERFWATCH_REFRESH_RATE_HZ")]
    refresh_rate_hz: Option<u32>,

    #[arg(long, env = "PERFWATCH_HEAP_INTERVAL_MS")]
    heap_interval_ms: Option<u64>,

    #[arg(long, env = "PERFWATCH_HISTORY_CAPACITY")]
    history_capacity: Option<usize>,

    #[arg(long, env = "PERFWATCH_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// URLs to request once through the process-wide fetch capability.
    urls: Vec<String>,
}

impl Args {
    /// File (or defaults) first, then flag/env overrides on top.
    fn load_config(&self) -> anyhow::Result<TelemetryConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
                TelemetryConfig::from_json(&raw)?
            }
            None => TelemetryConfig::default(),
        };

        if let Some(v) = self.frame_window_ms {
            config.frame_window_ms = v;
        }
        if let Some(v) = self.refresh_rate_hz {
            config.refresh_rate_hz = v;
        }
        if let Some(v) = self.heap_interval_ms {
            config.heap_interval_ms = v;
        }
        if let Some(v) = self.history_capacity {
            config.history_capacity = v;
        }
        if let Some(v) = self.request_timeout_ms {
            config.request_timeout_ms = v;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.load_config()?;
    fetch::init_global(Arc::new(ReqwestFetch::new(config.request_timeout())));

    let session = TelemetrySession::start(&config, Hosts::native(&config, PerformanceTimeline::with_all_types()));

    // Probe targets go through the process-wide capability like any other caller.
    for url in args.urls {
        tokio::spawn(async move {
            match fetch::fetch(FetchRequest::get(&url)).await {
                Ok(response) => info!(%url, status = response.status, "probe finished"),
                Err(err) => warn!(%url, error = %err, "probe failed"),
            }
        });
    }

    let mut cadence = interval(Duration::from_secs(1));
    cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("perfwatch running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = cadence.tick() => {
                let snapshot = session.snapshot();
                info!("{}", serde_json::to_string(&snapshot)?);
            }
        }
    }

    session.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "perfwatch",
            "--heap-interval-ms",
            "250",
            "--refresh-rate-hz",
            "120",
            "https://a.test/",
            "https://b.test/",
        ])
        .unwrap();

        let config = args.load_config().unwrap();
        assert_eq!(config.heap_interval(), Duration::from_millis(250));
        assert_eq!(config.refresh_rate_hz, 120);
        assert_eq!(config.history_capacity, TelemetryConfig::default().history_capacity);
        assert_eq!(args.urls, vec!["https://a.test/", "https://b.test/"]);
    }

    #[test]
    fn zero_override_is_rejected() {
        let args = Args::try_parse_from(["perfwatch", "--history-capacity", "0"]).unwrap();
        assert!(args.load_config().is_err());
    }

    #[test]
    fn non_numeric_flag_is_a_parse_error() {
        assert!(Args::try_parse_from(["perfwatch", "--frame-window-ms", "soon"]).is_err());
    }
}
