//! slotlock - resolve and inspect local instance slots
//!
//! Command-line interface for the slotlock core

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use slotlock_core::config::instance_config::DEFAULT_CONFIG_FILE;
use slotlock_core::{
    resolve, scan_cache_folders, CacheDirState, Instance, InstanceConfig, PortConfig, PortProbe,
    PortState, ServerSocketResolver, TcpProbe,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slotlock")]
#[command(version = "0.4.2")]
#[command(about = "Coordinator-free instance slots, ports and cache folders", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an instance number, dependent ports and a cache folder
    Resolve {
        #[command(flatten)]
        source: ConfigSource,
        /// Output format (table, json, yaml)
        #[arg(long, default_value = "table")]
        format: String,
        /// Keep the slot and cache lock until interrupted
        #[arg(long)]
        hold: bool,
    },
    /// Show occupied slots and cache folder lock state
    Status {
        #[command(flatten)]
        source: ConfigSource,
    },
    /// Check whether a localhost port is occupied
    Probe {
        /// Port to probe
        port: u16,
        /// Connect timeout in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Write a default config file
    Init {
        /// Where to write the config
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
        /// Client type (selects the cache sub-root)
        #[arg(long, default_value = "default")]
        client_type: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Config file plus command-line overrides
#[derive(Args)]
struct ConfigSource {
    /// Config file (defaults to ./.slotlock.yaml when present)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Client type (selects the cache sub-root)
    #[arg(long)]
    client_type: Option<String>,
    /// Parent folder of the per-client-type cache roots
    #[arg(long)]
    cache_root: Option<PathBuf>,
    /// Base port for instance slots (slot n binds base + n)
    #[arg(long)]
    instance_port_base: Option<u16>,
    /// Maximum number of instance numbers to try
    #[arg(long)]
    max_instances: Option<u32>,
    /// Dependent port as id=basePort (repeatable)
    #[arg(long = "port", value_parser = parse_port_arg)]
    ports: Vec<PortConfig>,
}

impl ConfigSource {
    fn load(&self) -> anyhow::Result<InstanceConfig> {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        let mut config = match &self.config {
            Some(path) => InstanceConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None if default_path.exists() => InstanceConfig::load(&default_path)
                .with_context(|| format!("Failed to load config {}", default_path.display()))?,
            None => InstanceConfig::default_for("default"),
        };

        if let Some(client_type) = &self.client_type {
            config.metadata.client_type = client_type.clone();
        }
        if let Some(cache_root) = &self.cache_root {
            config.spec.cache_parent_folder = cache_root.clone();
        }
        if let Some(base) = self.instance_port_base {
            config.spec.instance_port_base = base;
        }
        if let Some(max) = self.max_instances {
            config.spec.max_instances = max;
        }
        for port in &self.ports {
            // Command-line ports replace config ports with the same id
            config.spec.ports.retain(|p| p.id != port.id);
            config.spec.ports.push(port.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_port_arg(value: &str) -> Result<PortConfig, String> {
    let (id, base) = value
        .split_once('=')
        .ok_or_else(|| format!("expected id=basePort, got '{}'", value))?;
    let base_port = base
        .trim()
        .parse::<u16>()
        .map_err(|e| format!("invalid base port '{}': {}", base, e))?;
    if id.trim().is_empty() {
        return Err("port id cannot be empty".to_string());
    }
    Ok(PortConfig {
        id: id.trim().to_string(),
        base_port,
        description: None,
    })
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_instance(instance: &Instance, format: &str) -> anyhow::Result<()> {
    let summary = instance.summary();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        "yaml" => print!("{}", serde_yaml::to_string(&summary)?),
        "table" => {
            let number = summary
                .instance_number
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{} {}", "Instance".bold(), number.green().bold());
            println!("  Client Type:  {}", summary.client_type);
            if let Some(port) = summary.slot_port {
                println!("  Slot Port:    {}", port);
            }
            println!("  PID:          {}", summary.pid);
            match &summary.cache_path {
                Some(path) => println!("  Cache:        {}", path.display()),
                None => println!("  Cache:        {}", "(none)".yellow()),
            }
            if !summary.ports.is_empty() {
                println!("  Ports:");
                for port in &summary.ports {
                    let assigned = port
                        .assigned_port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("    {:<12} {:>5} (base {})", port.id, assigned, port.base_port);
                }
            }
        }
        other => bail!("Unknown format '{}' (expected table, json or yaml)", other),
    }
    Ok(())
}

fn handle_resolve(source: &ConfigSource, format: &str, hold: bool) -> anyhow::Result<()> {
    let config = source.load()?;
    let instance = resolve(&config).context("Instance resolution failed")?;
    print_instance(&instance, format)?;

    if hold {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        ctrlc::set_handler(move || {
            eprintln!("[slotlock] Received SIGTERM/SIGINT, releasing instance...");
            shutdown_clone.store(true, Ordering::SeqCst);
        })?;

        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    // Dropping the instance closes the slot listener and unlocks the cache folder
    drop(instance);
    Ok(())
}

fn handle_status(source: &ConfigSource) -> anyhow::Result<()> {
    let config = source.load()?;
    let resolver = ServerSocketResolver::new(&config);

    let slots = resolver.occupied_slots();
    println!(
        "{} (base {}, {} candidates)",
        "Instance slots".bold(),
        resolver.instance_port_base(),
        resolver.max_instances()
    );
    if slots.is_empty() {
        println!("  No live instances.");
    }
    for n in &slots {
        let port = resolver.slot_port(*n).unwrap_or_default();
        println!("  {:>4}  port {}  {}", n, port, "live".green());
    }

    let root = config.client_cache_root();
    let folders = scan_cache_folders(&root)?;
    println!("\n{} ({})", "Cache folders".bold(), root.display());
    if folders.is_empty() {
        println!("  No cache folders.");
    }
    for folder in &folders {
        let state = match folder.state {
            CacheDirState::InUse => "in use".red(),
            CacheDirState::Free => "free".green(),
            CacheDirState::Unguarded => "unguarded".yellow(),
        };
        println!("  data-{:<6} {}", folder.number, state);
    }

    println!("\nTotal: {} live instance(s), {} cache folder(s)", slots.len(), folders.len());
    Ok(())
}

fn handle_probe(port: u16, timeout_ms: u64) -> anyhow::Result<()> {
    let probe = TcpProbe::new("localhost", Duration::from_millis(timeout_ms));
    match probe.probe(port) {
        Ok(PortState::Occupied) => println!("{} {}", port, "occupied".red()),
        Ok(PortState::Free) => println!("{} {}", port, "free".green()),
        Err(e) => println!("{} {} ({})", port, "unknown".yellow(), e),
    }
    Ok(())
}

fn handle_init(path: &Path, client_type: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = InstanceConfig::default_for(client_type);
    config.validate()?;
    config.save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Resolve { source, format, hold } => handle_resolve(source, format, *hold),
        Commands::Status { source } => handle_status(source),
        Commands::Probe { port, timeout_ms } => handle_probe(*port, *timeout_ms),
        Commands::Init { path, client_type, force } => handle_init(path, client_type, *force),
    }
}
