mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use dr_core::config::Config;
use dr_engine::{default_engines, EngineProber, ProcessReaper, SystemProcessTable};

/// Load the config file (or defaults) and layer environment overrides.
fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config
}

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path);

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting docrelay");
    tracing::info!(
        workers = config.workers.count,
        timeout_secs = config.engines.convert_timeout_secs,
        local_dir = %config.storage.local_dir.display(),
        "Effective configuration"
    );

    dr_server::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise pick defaults from --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "docrelay=trace,dr_server=trace,dr_engine=trace,dr_core=debug,tower_http=debug".to_string()
        } else {
            "docrelay=info,dr_server=info,dr_engine=info,dr_core=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckEngines => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_engines(cli.config.as_deref()))
        }
        Commands::Reap => reap(cli.config.as_deref()),
        Commands::Validate { config: path } => {
            let path = path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("docrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn check_engines(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let engines = default_engines(&config.engines);

    println!("Checking conversion engines...\n");

    let prober = EngineProber::new(
        engines.clone(),
        config.engines.probe_timeout(),
        config.engines.probe_cache(),
    );
    let availability = prober.refresh().await;

    for engine in &engines {
        let available = availability.is_available(engine.kind());
        print!("{} {}", if available { "✓" } else { "✗" }, engine.name());
        match engine.executable() {
            Some(path) => print!(" - {}", path.display()),
            None => print!(" - not found"),
        }
        println!();
    }

    println!();
    if availability.any_available() {
        println!("At least one engine is available.");
    } else {
        println!("No conversion engine is available; every job will fail.");
    }
    Ok(())
}

fn reap(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let names: Vec<String> = default_engines(&config.engines)
        .iter()
        .flat_map(|e| e.process_names().iter().map(|n| n.to_string()))
        .collect();

    let reaper = ProcessReaper::new(Arc::new(SystemProcessTable::new()), names, config.reaper.grace());
    let count = reaper.sweep();
    println!(
        "Terminated {count} stale engine process(es) older than {}s",
        config.reaper.grace_secs
    );
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let mut config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            Config::from_json(&raw)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());

    println!("✓ Configuration parsed");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Artifact dir: {}", config.storage.local_dir.display());
    println!("  Workers: {}", config.workers.count);
    println!("  Convert timeout: {}s", config.engines.convert_timeout_secs);
    println!(
        "  Reaper: {} (grace {}s, every {}s)",
        if config.reaper.enabled { "enabled" } else { "disabled" },
        config.reaper.grace_secs,
        config.reaper.interval_secs
    );

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("  No warnings");
    } else {
        println!("  Warnings:");
        for warning in warnings {
            println!("    - {warning}");
        }
    }

    Ok(())
}
