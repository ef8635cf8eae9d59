//! Tunnel Fallback - CLI Entry Point
//!
//! Sends one request to the configured server and prints the response body.

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunnel_fallback::{
    AttemptOutcome, Config, HttpsRequestClient, RequestOrchestrator, RequestParameters,
    Transport, TransportRegistry, VERSION,
};

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "tunnel-fallback")]
#[command(author = "Tsang")]
#[command(version = VERSION)]
#[command(about = "Reach a server's web endpoint through whatever path is available")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Request path, e.g. /status
    #[arg(short = 'p', long = "path", required_unless_present = "test")]
    path: Option<String>,

    /// Extra request header "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body; sends a POST
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Do not bring up temporary tunnels
    #[arg(long = "no-temporary")]
    no_temporary: bool,

    /// Connect this configured transport first and use it as the current tunnel
    #[arg(long = "tunnel")]
    tunnel: Option<String>,

    /// Log level (overrides config)
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tunnel-fallback-worker")
        .build()?;

    let code = runtime.block_on(async_main(args))?;
    drop(runtime);
    std::process::exit(code)
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tunnel_fallback={}", level).parse()?),
        )
        .init();
    Ok(())
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header must be \"Name: value\": {}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("header name cannot be empty: {}", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn request_parameters(args: &Args) -> anyhow::Result<RequestParameters> {
    let mut params = RequestParameters::new(args.path.clone().unwrap_or_default());
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        params = params.with_header(name, value);
    }
    if let Some(data) = &args.data {
        params = params.with_body(data.clone());
    }
    Ok(params)
}

async fn async_main(args: Args) -> anyhow::Result<i32> {
    let loaded = Config::load(args.config.to_str().unwrap_or("config.yaml"));

    let level = args
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level)?;

    info!("Tunnel Fallback v{}", VERSION);
    info!("Loading configuration from: {}", args.config.display());

    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Ok(EXIT_FAILURE);
        }
    };

    if args.test {
        info!("Configuration test passed");
        return Ok(0);
    }

    let params = request_parameters(&args)?;
    let session = config.session_info()?;
    let local_proxy = config.local_proxy_addr()?;

    let registry = Arc::new(TransportRegistry::new(
        &config.transports,
        local_proxy,
        config.connect_timeout(),
    )?);
    info!("Loaded {} transports", registry.len());

    let client = HttpsRequestClient::new(
        local_proxy,
        config.connect_timeout(),
        config.request_timeout(),
    );
    let orchestrator = RequestOrchestrator::new(Arc::new(client), registry.clone());

    let current: Option<Box<dyn Transport>> = match &args.tunnel {
        Some(name) => {
            let transport = registry.create(name)?;
            match transport.connect(&session).await {
                Ok(()) => info!("[{}] connected", name),
                Err(e) => warn!("[{}] failed to connect: {}", name, e),
            }
            Some(transport)
        }
        None => None,
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling");
            signal.cancel();
        }
    });

    let allow_temporary = config.allow_temporary && !args.no_temporary;
    let result = orchestrator
        .make_request(
            allow_temporary,
            current.as_deref(),
            &session,
            &params,
            &shutdown,
        )
        .await;

    if let Some(transport) = current {
        if transport.is_connected() {
            if let Err(e) = transport.disconnect().await {
                warn!("[{}] disconnect failed: {}", transport.name(), e);
            }
        }
    }

    match result {
        Ok(AttemptOutcome::Success(body)) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&body)?;
            stdout.flush()?;
            Ok(0)
        }
        Ok(AttemptOutcome::Failed(reason)) => {
            error!("Request failed: {}", reason);
            for attempt in reason.attempts() {
                error!("  {}", attempt);
            }
            Ok(EXIT_FAILURE)
        }
        Ok(AttemptOutcome::Cancelled) => {
            warn!("Request cancelled");
            Ok(EXIT_CANCELLED)
        }
        Err(e) => {
            error!("Invalid request: {}", e);
            Ok(EXIT_FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Client:  cli ").unwrap(),
            ("X-Client".to_string(), "cli".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_args_require_path_unless_test() {
        assert!(Args::try_parse_from(["tunnel-fallback"]).is_err());
        assert!(Args::try_parse_from(["tunnel-fallback", "-t"]).is_ok());

        let args = Args::try_parse_from([
            "tunnel-fallback",
            "-p",
            "/status",
            "-H",
            "X-A: 1",
            "-H",
            "X-B: 2",
            "-d",
            "body",
            "--no-temporary",
        ])
        .unwrap();
        let params = request_parameters(&args).unwrap();
        assert_eq!(params.headers().len(), 2);
        assert!(params.body().is_some());
        assert!(args.no_temporary);
    }
}
