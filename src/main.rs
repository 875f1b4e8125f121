use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use sqlx::postgres::PgPoolOptions;

use mystops::{config::Config, server, TileView};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve vector tiles over HTTP
    Serve(Serve),

    /// Print the SQL statement generated for an endpoint
    Sql(Sql),
}

#[derive(Args, Debug)]
struct Serve {
    /// Configuration file
    #[arg(short, long, default_value = "mystops.yml")]
    config: PathBuf,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[derive(Args, Debug)]
struct Sql {
    /// Configuration file
    #[arg(short, long, default_value = "mystops.yml")]
    config: PathBuf,

    /// Endpoint path, e.g. "stops/mvt"
    endpoint: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .format_timestamp(None)
        .init();

    match &cli.command {
        Commands::Serve(arguments) => serve(arguments).await,
        Commands::Sql(arguments) => print_sql(arguments),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to read configuration from {path:?}"))
}

// Views are built before anything connects so a bad tile spec fails at startup.
fn build_views(config: &Config) -> Result<Vec<(String, TileView)>> {
    config
        .endpoints
        .iter()
        .map(|endpoint| {
            let view = TileView::build(&endpoint.spec)
                .with_context(|| format!("Invalid tile endpoint '{}'", endpoint.path))?;
            Ok((endpoint.path.clone(), view))
        })
        .collect()
}

async fn serve(arguments: &Serve) -> Result<()> {
    let config = load_config(&arguments.config)?;
    let views = build_views(&config)?;
    if views.is_empty() {
        bail!("no tile endpoints configured");
    }

    let addr: SocketAddr = match arguments.listen {
        Some(addr) => addr,
        None => config
            .listen
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", config.listen))?,
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_lazy(&config.database_url()?)
        .context("Invalid database URL")?;

    let cache_time = config.cache_time();
    log::info!("caching tile responses for {}s", cache_time.as_secs());

    let router = server::router(views, Arc::new(pool), cache_time)?;

    server::serve(addr, router, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("unable to listen for shutdown signal: {err}");
        }
        log::info!("stopping server");
    })
    .await
    .context("Server failed")
}

fn print_sql(arguments: &Sql) -> Result<()> {
    let config = load_config(&arguments.config)?;
    let Some(endpoint) = config.endpoint(&arguments.endpoint) else {
        bail!("no endpoint '{}' in configuration", arguments.endpoint);
    };

    let view = TileView::build(&endpoint.spec)?;
    println!("{}", view.statement());
    Ok(())
}
