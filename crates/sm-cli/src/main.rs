mod server;
mod session;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use sm_core::{Features, RecallHit, SpectrumCompressor, StarId};
use sm_store::resolve_data_dir;

use session::Session;

#[derive(Parser)]
#[command(name = "sm", about = "Starmap compressed associative memory CLI and MCP server")]
struct Cli {
    /// Data directory (defaults to $SM_DATA_DIR, then ~/.starmap)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Encode and store a memory
    Remember {
        /// Four raw feature values
        #[arg(num_args = 4, value_names = ["A", "B", "C", "D"], allow_negative_numbers = true)]
        features: Vec<f64>,

        #[arg(long, default_value_t = 0.5)]
        brightness: f64,

        #[arg(long, default_value_t = 0.0)]
        gravity: f64,

        /// Frequency hint in [0, 1]
        #[arg(long)]
        frequency: Option<f64>,

        /// Phase hint in radians
        #[arg(long, allow_negative_numbers = true)]
        phase: Option<f64>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Recall memories resonating with a feature vector
    Recall {
        #[arg(num_args = 4, value_names = ["A", "B", "C", "D"], allow_negative_numbers = true)]
        features: Vec<f64>,

        #[arg(long, default_value_t = 0.0)]
        threshold: f64,

        /// Maximum number of memories. Zero or negative returns nothing
        #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
        top_k: i64,

        /// Give up after this many milliseconds and return what was found
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Group stars into constellations
    Constellation {
        /// Star ids (all stars when omitted)
        ids: Vec<u64>,

        /// Maximum edge length (defaults to the configured distance)
        #[arg(long)]
        distance: Option<f64>,

        #[arg(long)]
        json: bool,
    },

    /// Show store statistics
    Stats,

    /// Export every star to a flat record file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Append stars from a flat record file
    Import {
        /// Input file path
        path: PathBuf,
    },
}

fn open_session(cli: &Cli) -> Result<Session> {
    let data_dir = resolve_data_dir(cli.data_dir.as_deref());
    Session::open(&data_dir).context("failed to open starmap data directory")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve => cmd_serve(&cli).await,
        Commands::Remember {
            features,
            brightness,
            gravity,
            frequency,
            phase,
            tags,
        } => cmd_remember(
            &cli,
            to_features(features, *frequency, *phase)?,
            *brightness,
            *gravity,
            tags,
        ),
        Commands::Recall {
            features,
            threshold,
            top_k,
            deadline_ms,
            json,
        } => cmd_recall(
            &cli,
            to_features(features, None, None)?,
            *threshold,
            *top_k,
            *deadline_ms,
            *json,
        ),
        Commands::Constellation {
            ids,
            distance,
            json,
        } => cmd_constellation(&cli, ids, *distance, *json),
        Commands::Stats => cmd_stats(&cli),
        Commands::Export { path } => cmd_export(&cli, path),
        Commands::Import { path } => cmd_import(&cli, path),
    }
}

fn to_features(values: &[f64], frequency: Option<f64>, phase: Option<f64>) -> Result<Features> {
    let Ok(components) = <[f64; 4]>::try_from(values) else {
        bail!("expected exactly 4 feature values, got {}", values.len());
    };
    let mut features = Features::new(components);
    if let Some(f) = frequency {
        features = features.with_frequency(f);
    }
    if let Some(p) = phase {
        features = features.with_phase(p);
    }
    Ok(features)
}

async fn cmd_serve(cli: &Cli) -> Result<()> {
    let session = open_session(cli)?;
    tracing::info!(
        stars = session.engine().stats().total,
        "starting MCP server"
    );

    let server = server::SmServer::new(session);
    let service = server
        .clone()
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;

    tokio::select! {
        result = service.waiting() => {
            result.context("MCP server failed")?;
            tracing::info!("client disconnected");
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    server.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn cmd_remember(
    cli: &Cli,
    features: Features,
    brightness: f64,
    gravity: f64,
    tags: &[String],
) -> Result<()> {
    let session = open_session(cli)?;
    let star = session.remember(&features, brightness, gravity, tags)?;
    println!(
        "remembered star {} at [{}]",
        star.id,
        format_coords(&star.coordinates)
    );
    session.close();
    Ok(())
}

fn cmd_recall(
    cli: &Cli,
    features: Features,
    threshold: f64,
    top_k: i64,
    deadline_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let top_k = usize::try_from(top_k).unwrap_or(0);
    let session = open_session(cli)?;
    let deadline = deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    let hits = session.engine().recall(&features, threshold, top_k, deadline);

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else if hits.is_empty() {
        println!("(no memories found)");
    } else {
        for hit in &hits {
            println!("{}", format_hit(hit));
        }
    }
    session.close();
    Ok(())
}

fn format_hit(hit: &RecallHit) -> String {
    format!(
        "#{:<6} score={:.4}  brightness={:.2}  approx=[{}]  tags={}",
        hit.id.0,
        hit.score,
        hit.brightness,
        format_coords(&hit.approx.coordinates()),
        hit.tags.join(",")
    )
}

fn format_coords(coords: &[f64; 4]) -> String {
    coords
        .iter()
        .map(|c| format!("{c:.3}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn cmd_constellation(cli: &Cli, ids: &[u64], distance: Option<f64>, json: bool) -> Result<()> {
    let session = open_session(cli)?;
    let engine = session.engine();
    let distance = distance.unwrap_or(engine.config().default_connection_distance);
    let ids: Vec<StarId> = if ids.is_empty() {
        engine.store().snapshot().iter().map(|s| s.id).collect()
    } else {
        ids.iter().copied().map(StarId).collect()
    };

    let constellations = engine
        .form_constellation(&ids, distance)
        .context("failed to form constellations")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&constellations)?);
    } else if constellations.is_empty() {
        println!("(no stars)");
    } else {
        for c in &constellations {
            let members: Vec<String> = c.members.iter().map(|id| id.to_string()).collect();
            println!(
                "{:<8} tone={:<12} members=[{}]  edges={}",
                c.pattern,
                c.tone.as_deref().unwrap_or("-"),
                members.join(", "),
                c.edges.len()
            );
        }
    }
    session.close();
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<()> {
    let session = open_session(cli)?;
    let stats = session.engine().stats();
    let db_size = session.store().db_size().context("failed to read db size")?;

    if let Some(dir) = session.data_dir() {
        println!("data_dir:   {}", dir.display());
    }
    println!("stars:      {}", stats.total);
    println!("indexed:    {}", stats.indexed);
    println!("staged:     {}", stats.staged);
    println!("generation: {}", stats.generation);
    println!(
        "ratio:      {:.2}x",
        SpectrumCompressor::compression_ratio()
    );
    println!("db_size:    {:.1}KB", db_size as f64 / 1024.0);
    session.close();
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let session = open_session(cli)?;
    let count = session.export(path)?;
    println!("exported {count} stars to {}", path.display());
    session.close();
    Ok(())
}

fn cmd_import(cli: &Cli, path: &Path) -> Result<()> {
    let session = open_session(cli)?;
    let count = session.import(path)?;
    println!(
        "imported {count} stars from {}. total={}",
        path.display(),
        session.engine().stats().total
    );
    session.close();
    Ok(())
}
