use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pgsample_catalog::{PostgresCatalog, SchemaIntrospector};
use pgsample_core::{Config, ConnectionConfig};
use pgsample_engine::{render_template, DumpEngine, DumpSummary};
use pgsample_manifest::Manifest;

const DEFAULT_CONFIG_FILE: &str = "pgsample.toml";

/// pgsample - consistent partial dumps of PostgreSQL databases
#[derive(Parser)]
#[command(name = "pgsample")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Path to config file (default: pgsample.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Print help
    #[arg(long, global = true, action = ArgAction::Help)]
    help: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the tables listed in a manifest as COPY statements
    #[command(disable_help_flag = true)]
    Dump {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Path to the manifest YAML file
        #[arg(short = 'f', long)]
        manifest: PathBuf,

        /// Write the dump to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a JSON summary of dumped rows
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show dump order, columns and queries without dumping
    #[command(disable_help_flag = true)]
    Plan {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Path to the manifest YAML file
        #[arg(short = 'f', long)]
        manifest: PathBuf,
    },

    /// Check a manifest without connecting to the database
    #[command(disable_help_flag = true)]
    Validate {
        /// Path to the manifest YAML file
        #[arg(short = 'f', long)]
        manifest: PathBuf,
    },
}

/// libpq-style connection flags
#[derive(Args, Debug, Clone, Default)]
struct ConnectionArgs {
    /// Database server host
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Database server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Database user name
    #[arg(short = 'U', long = "username")]
    user: Option<String>,

    /// Connect over TLS
    #[arg(long)]
    tls: bool,

    /// Database to dump
    dbname: Option<String>,
}

impl ConnectionArgs {
    fn overrides(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: None,
            dbname: self.dbname.clone(),
            tls: self.tls.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A missing .env is fine
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout may carry the dump itself
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref(), cli.verbose > 0)?;

    match cli.command {
        Commands::Dump { connection, manifest, output, report } => {
            dump_command(&config, &connection, &manifest, output.as_deref(), report.as_deref()).await
        }
        Commands::Plan { connection, manifest } => {
            plan_command(&config, &connection, &manifest).await
        }
        Commands::Validate { manifest } => validate_command(&manifest),
    }
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    if let Some(path) = path {
        return Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return Config::from_file(default_path)
            .with_context(|| format!("Failed to load config {}", default_path.display()));
    }

    if verbose {
        eprintln!("{}", "No config file found, using defaults".yellow());
    }
    Ok(Config::default())
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::from_file(path).with_context(|| format!("Failed to load manifest {}", path.display()))
}

/// Connect and make sure the server answers before anything is written
async fn connect(config: &Config, args: &ConnectionArgs) -> Result<PostgresCatalog> {
    let settings = config
        .connection
        .resolve(&args.overrides(), |key| std::env::var(key).ok())?;

    let catalog = PostgresCatalog::connect(&settings)
        .await
        .with_context(|| format!("Failed to connect to {}", settings))?
        .with_fetch_size(config.dump.fetch_size);

    catalog
        .test_connection()
        .await
        .with_context(|| format!("Connection check against {} failed", settings))?;

    tracing::info!(server = %settings, "connected");
    Ok(catalog)
}

/// Dump command - write the manifest's tables to stdout or a file
async fn dump_command(
    config: &Config,
    args: &ConnectionArgs,
    manifest_path: &Path,
    output: Option<&Path>,
    report: Option<&Path>,
) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let catalog = connect(config, args).await?;
    let engine = DumpEngine::new(&catalog);

    let summary = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let result = engine.write_dump(&manifest, &mut writer).await;
            drop(writer);

            match result {
                Ok(summary) => summary,
                Err(err) => {
                    discard_partial_output(path);
                    return Err(err).context("Dump failed");
                }
            }
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            engine
                .write_dump(&manifest, &mut writer)
                .await
                .context("Dump failed")?
        }
    };

    if let Some(path) = report {
        write_report(path, &summary)?;
    }

    eprintln!(
        "{} Dumped {} tables ({} rows)",
        "✓".green(),
        summary.tables.len(),
        summary.total_rows
    );
    Ok(())
}

/// Remove an incomplete dump so it cannot be mistaken for a good one
fn discard_partial_output(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "could not remove partial dump");
    }
}

fn write_report(path: &Path, summary: &DumpSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    writeln!(file, "{}", json)?;
    Ok(())
}

/// Plan command - print the resolved dump order
async fn plan_command(config: &Config, args: &ConnectionArgs, manifest_path: &Path) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let catalog = connect(config, args).await?;
    let plan = DumpEngine::new(&catalog)
        .plan(&manifest)
        .await
        .context("Planning failed")?;

    println!("{} ({} tables)", "Dump order".bold(), plan.graph.len());
    for (i, table) in plan.tables.iter().enumerate() {
        println!("{:>3}. {}", i + 1, table.table.cyan());
        println!("     columns: {}", table.columns.join(", "));

        let parents = plan.graph.parents(&table.canonical);
        if !parents.is_empty() {
            let names: Vec<&str> = parents.iter().map(|p| p.as_str()).collect();
            println!("     after:   {}", names.join(", "));
        }

        println!("     query:   {}", table.sql);
        if !table.post_actions.is_empty() {
            println!("     post-actions: {}", table.post_actions.len());
        }
    }

    Ok(())
}

/// Validate command - offline manifest checks
fn validate_command(manifest_path: &Path) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;

    let duplicates = manifest.duplicate_tables();
    if !duplicates.is_empty() {
        anyhow::bail!("Tables listed more than once: {}", duplicates.join(", "));
    }

    for item in &manifest.tables {
        if let Some(query) = &item.query {
            if render_template(query, &manifest.vars).contains("{{") {
                eprintln!(
                    "{} {}: query has placeholders with no matching var",
                    "⚠".yellow(),
                    item.table
                );
            }
        }
    }

    println!(
        "{} {} is valid ({} tables)",
        "✓".green(),
        manifest_path.display(),
        manifest.tables.len()
    );
    Ok(())
}
