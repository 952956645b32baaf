use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use fallwatch::analysis::DetectionStrategy;
use fallwatch::config::{Config, SourceConfig};
use fallwatch::{logging, server, FallMonitor};

/// Default request timeout for --inference-url
const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 5000;

/// Real-time fall and gait-instability monitor over pose keypoints
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.fallwatch/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Fall detection strategy: "weighted" or "simple-horizontal"
    #[arg(short, long)]
    strategy: Option<DetectionStrategy>,

    /// Pose-inference endpoint; frames are sent there instead of carrying keypoints
    #[arg(long)]
    inference_url: Option<String>,

    /// Directory for rolling JSON activity logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Apply command-line overrides on top of the file config
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(strategy) = self.strategy {
            config.detection.strategy = strategy;
        }
        if let Some(url) = &self.inference_url {
            let timeout_ms = match &config.source {
                SourceConfig::Http { timeout_ms, .. } => *timeout_ms,
                SourceConfig::Inline => DEFAULT_INFERENCE_TIMEOUT_MS,
            };
            config.source = SourceConfig::Http {
                url: url.clone(),
                timeout_ms,
            };
        }
        if let Some(dir) = &self.log_dir {
            config.logging.json_dir = Some(dir.clone());
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init_logging(&config.logging.level, config.logging.json_dir.as_deref())?;

    info!("Fall monitor starting...");
    info!("Config: {:?}", config_path);
    info!("Strategy: {}", config.detection.strategy.as_str());

    let monitor = Arc::new(FallMonitor::from_config(&config.detection, &config.source)?);
    info!("Keypoint source: {}", monitor.source_name());

    server::serve(&config.server, monitor).await?;

    info!("Fall monitor stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let args = Args::parse_from([
            "fallwatch",
            "--port",
            "9000",
            "--strategy",
            "simple",
            "--inference-url",
            "http://localhost:9001/pose",
            "--verbose",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.detection.strategy, DetectionStrategy::SimpleHorizontal);
        assert_eq!(
            config.source,
            SourceConfig::Http {
                url: "http://localhost:9001/pose".to_string(),
                timeout_ms: DEFAULT_INFERENCE_TIMEOUT_MS,
            }
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_no_flags_keep_file_config() {
        let args = Args::parse_from(["fallwatch"]);
        let mut config = Config::default();
        config.server.port = 8123;
        args.apply(&mut config);
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.source, SourceConfig::Inline);
    }

    #[test]
    fn test_bad_strategy_rejected() {
        assert!(Args::try_parse_from(["fallwatch", "--strategy", "neural"]).is_err());
    }
}
