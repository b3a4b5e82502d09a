mod cli;

use mediafeed::{
    config::{self, Config, UpstreamConfig},
    server::MediaServer,
    source::ProcessCommand,
    streaming::SubtitleStore,
};
use mediafeed_common::MediaFeedDescriptor;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ServeArgs};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

async fn serve(args: ServeArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.server.allowed_ips.extend(args.allow.iter().cloned());
    config::validate_config(&config)?;

    let descriptor = describe(&args, &config.upstream).await?;
    tracing::info!(
        source = %descriptor.source,
        size = ?descriptor.size,
        ranges = ?descriptor.accepts_ranges,
        "Resolved media feed"
    );

    let mut server = MediaServer::new(config, descriptor);
    if let Some((program, rest)) = args.exec.split_first() {
        let process = ProcessCommand::new(program)
            .args(rest)
            .spawn()
            .context("Failed to start feed command")?;
        server = server.with_reader(process);
    }
    if let Some(path) = &args.subtitle {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read subtitle: {:?}", path))?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("srt");
        let store = Arc::new(SubtitleStore::new());
        store.set_subtitle(data, extension);
        server = server.with_subtitles(store);
    }

    let handle = server
        .start()
        .await
        .context("Failed to start media server")?;
    if !handle.wait_built().await {
        let status = handle.status();
        handle.stop().await?;
        anyhow::bail!("Media feed failed to start (status: {status})");
    }

    println!("Serving {}", handle.media_url());
    shutdown_signal().await;

    tracing::info!(status = %handle.status(), "Stopping");
    handle.stop().await?;
    Ok(())
}

/// Stand-in for an external resolver: size and range support come from the
/// filesystem or a HEAD request.
async fn describe(args: &ServeArgs, upstream: &UpstreamConfig) -> Result<MediaFeedDescriptor> {
    let title = args.title.clone();

    let mut descriptor = if let Some(program) = args.exec.first() {
        let extension = args.extension.as_deref().unwrap_or("ts");
        MediaFeedDescriptor::path(program, extension, title.as_deref().unwrap_or(program))
    } else {
        let source = args
            .source
            .as_deref()
            .context("A source path or URL is required")?;
        let name = source
            .split(['?', '#'])
            .next()
            .and_then(|s| s.rsplit('/').next())
            .unwrap_or(source);
        let extension = args.extension.clone().unwrap_or_else(|| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_string()
        });
        let title = title.as_deref().unwrap_or(name);

        if source.starts_with("http://") || source.starts_with("https://") {
            let mut descriptor = MediaFeedDescriptor::url(source, &extension, title);
            let (size, ranges) = probe_url(source, upstream).await;
            descriptor.size = size;
            descriptor.accepts_ranges = ranges;
            descriptor
        } else {
            let meta = tokio::fs::metadata(source)
                .await
                .with_context(|| format!("Failed to stat media file: {source}"))?;
            MediaFeedDescriptor::path(source, &extension, title)
                .with_size(meta.len())
                .with_ranges(true)
        }
    };

    if let Some(size) = args.size {
        descriptor.size = Some(size);
    }
    if args.sequential {
        descriptor.size = None;
    }
    Ok(descriptor)
}

/// Ask the upstream for its size and range support. Failures leave both
/// unknown, which selects sequential delivery.
async fn probe_url(url: &str, upstream: &UpstreamConfig) -> (Option<u64>, Option<bool>) {
    let client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(upstream.connect_timeout_secs))
        .timeout(Duration::from_secs(upstream.read_timeout_secs))
        .user_agent(upstream.user_agent.clone())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Failed to build HTTP client: {e}");
            return (None, None);
        }
    };

    match client.head(url).send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => {
            let headers = response.headers();
            let size = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let ranges = headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("bytes"));
            (size, ranges)
        }
        Err(e) => {
            tracing::warn!(url, "HEAD request failed: {e}");
            (None, None)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}

fn validate(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Allowed renderers: {}",
        if config.server.allowed_ips.is_empty() {
            "any".to_string()
        } else {
            config.server.allowed_ips.join(", ")
        }
    );
    println!(
        "  Buffer: {} blocks of {} bytes, {} ahead",
        config.buffer.capacity_blocks, config.buffer.block_size, config.buffer.ahead_blocks
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediafeed=trace,mediafeed_common=debug,tower_http=debug".to_string()
        } else {
            "mediafeed=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(args, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate(path.as_deref())
        }
        Commands::Version => {
            println!("mediafeed {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
