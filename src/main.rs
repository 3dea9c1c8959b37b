//! Forecast command-line driver.
//!
//! Runs one forecast against locally generated market data and prints the
//! percentile series.
//!
//! Usage: forecast <symbol> [--provider mock] [--tf 1h] [--window N] [--horizon N]
//!                 [--model NAME] [--backend auto|cpu|webgpu] [--config PATH]

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use forecast_config::{Config, FeatureBackendPreference};
use forecast_core::{Provider, Timeframe};
use forecast_orchestrator::{ForecastManager, ForecastRequest, LocalCache, MockProvider, WorkerClient};
use tokio_util::sync::CancellationToken;

const DEFAULT_WINDOW: u32 = 200;
const DEFAULT_HORIZON: u32 = 24;

struct Args {
    symbol: String,
    provider: Provider,
    tf: Timeframe,
    window: u32,
    horizon: u32,
    model: Option<String>,
    backend: Option<FeatureBackendPreference>,
    config: Option<String>,
}

fn usage(program: &str) {
    eprintln!("Usage: {} <symbol> [options]", program);
    eprintln!("Options:");
    eprintln!("  --provider NAME  mock or custom (default: mock)");
    eprintln!("  --tf TF          1h, 8h, 1d, 7d or 1mo (default: 1h)");
    eprintln!("  --window N       Bars to fetch (default: {})", DEFAULT_WINDOW);
    eprintln!("  --horizon N      Steps to forecast (default: {})", DEFAULT_HORIZON);
    eprintln!("  --model NAME     Model alias or version (default: from config)");
    eprintln!("  --backend NAME   Feature backend: auto, cpu or webgpu");
    eprintln!("  --config PATH    Config file (default: forecast.toml)");
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        symbol: args[1].clone(),
        provider: Provider::Mock,
        tf: Timeframe::Hour1,
        window: DEFAULT_WINDOW,
        horizon: DEFAULT_HORIZON,
        model: None,
        backend: None,
        config: None,
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--provider" if i + 1 < args.len() => {
                parsed.provider = args[i + 1].parse().map_err(anyhow::Error::msg)?;
                i += 2;
            }
            "--tf" if i + 1 < args.len() => {
                parsed.tf = args[i + 1].parse()?;
                i += 2;
            }
            "--window" if i + 1 < args.len() => {
                parsed.window = args[i + 1].parse().unwrap_or(DEFAULT_WINDOW);
                i += 2;
            }
            "--horizon" if i + 1 < args.len() => {
                parsed.horizon = args[i + 1].parse().unwrap_or(DEFAULT_HORIZON);
                i += 2;
            }
            "--model" if i + 1 < args.len() => {
                parsed.model = Some(args[i + 1].clone());
                i += 2;
            }
            "--backend" if i + 1 < args.len() => {
                parsed.backend = args[i + 1].parse().ok();
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                parsed.config = Some(args[i + 1].clone());
                i += 2;
            }
            other => {
                log::warn!("Ignoring argument {}", other);
                i += 1;
            }
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let argv: Vec<String> = env::args().collect();
    if argv.len() < 2 {
        usage(&argv[0]);
        std::process::exit(1);
    }
    let args = parse_args(&argv)?;

    let mut config = match &args.config {
        Some(path) => Config::load(Path::new(path)).with_context(|| format!("loading {}", path))?,
        None => Config::load_default(),
    };
    if let Some(backend) = args.backend {
        config.features.backend = backend;
    }

    let cache = LocalCache::shared();
    let client = WorkerClient::new(config.clone());
    let manager = ForecastManager::new(cache.clone(), Arc::new(MockProvider), Arc::new(client))
        .with_config(&config.orchestrator)
        .with_models(config.models.clone());

    let request = ForecastRequest {
        symbol: args.symbol,
        provider: args.provider,
        tf: args.tf,
        window: args.window,
        horizon: args.horizon,
        model: args.model,
    };

    let started = Instant::now();
    manager
        .run(&request, &CancellationToken::new())
        .await
        .with_context(|| format!("forecast for {} failed", request.symbol))?;

    let Some(forecast) = cache.get_forecast(&request.forecast_key()) else {
        bail!("no forecast stored for {}", request.forecast_key());
    };

    println!(
        "{} {} horizon {} | model {} | features {} | session {} | {:.1} ms",
        request.symbol,
        request.tf,
        request.horizon,
        forecast.meta.model_ver,
        forecast
            .meta
            .features_backend
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".into()),
        forecast.meta.backend,
        started.elapsed().as_secs_f64() * 1000.0
    );
    println!("{:>15} {:>12} {:>12} {:>12}", "ts", "p10", "p50", "p90");
    let series = &forecast.series;
    for (i, (ts, p50)) in forecast.timestamped(&series.p50).into_iter().enumerate() {
        let p10 = series.p10.get(i).copied().unwrap_or(f64::NAN);
        let p90 = series.p90.get(i).copied().unwrap_or(f64::NAN);
        println!("{:>15} {:>12.4} {:>12.4} {:>12.4}", ts, p10, p50, p90);
    }

    Ok(())
}
