//! planecast CLI
//!
//! Polls OpenSky for aircraft in a bounding box, attaches routes from a
//! Virtual Radar database and streams the result to WebSocket subscribers.

use clap::{Args, Parser, Subcommand};
use planecast::{
    client::{BoundingBox, ClientConfig, OpenSkyClient},
    hub::{Hub, HubConfig},
    merger::Merger,
    report::TracingReporter,
    routes::{RouteDatabase, RouteLookup},
    server::{Server, ServerConfig},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "planecast")]
#[command(about = "Live aircraft positions with routes, over WebSockets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the Virtual Radar StandingData.sqb database
    #[arg(long, env = "PLANECAST_DB", default_value = "data/StandingData.sqb", global = true)]
    db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed and serve snapshots to WebSocket subscribers
    Serve {
        /// Address to listen on
        #[arg(long, env = "PLANECAST_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,

        /// WebSocket request path
        #[arg(long, default_value = "/ws")]
        path: String,

        /// Poll interval in seconds
        #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        /// Snapshots buffered per subscriber before it is evicted
        #[arg(long, default_value = "16")]
        queue_capacity: usize,

        #[command(flatten)]
        feed: FeedArgs,
    },

    /// Fetch and merge once, printing the snapshot
    Snapshot {
        #[command(flatten)]
        feed: FeedArgs,
    },

    /// Look up the route for a callsign
    Route {
        /// Callsign, e.g. "BAW123"
        callsign: String,
    },
}

#[derive(Args)]
struct FeedArgs {
    /// South bound of bounding box
    #[arg(long, env = "PLANECAST_MIN_LAT", default_value_t = BoundingBox::LONDON.south, allow_hyphen_values = true)]
    min_lat: f64,

    /// North bound of bounding box
    #[arg(long, env = "PLANECAST_MAX_LAT", default_value_t = BoundingBox::LONDON.north, allow_hyphen_values = true)]
    max_lat: f64,

    /// West bound of bounding box
    #[arg(long, env = "PLANECAST_MIN_LONG", default_value_t = BoundingBox::LONDON.west, allow_hyphen_values = true)]
    min_long: f64,

    /// East bound of bounding box
    #[arg(long, env = "PLANECAST_MAX_LONG", default_value_t = BoundingBox::LONDON.east, allow_hyphen_values = true)]
    max_long: f64,

    /// OpenSky username
    #[arg(long, env = "OPENSKY_USERNAME", requires = "password")]
    username: Option<String>,

    /// OpenSky password
    #[arg(long, env = "OPENSKY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,
}

impl FeedArgs {
    fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.min_lat, self.max_lat, self.min_long, self.max_long)
    }

    fn client_config(&self) -> ClientConfig {
        let mut config =
            ClientConfig::new(self.bbox()).with_timeout(Duration::from_secs(self.timeout));

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config = config.with_credentials(username.clone(), password.clone());
        }

        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            addr,
            path,
            interval,
            queue_capacity,
            feed,
        } => {
            let server_config = ServerConfig {
                listen_addr: addr,
                path,
                client_queue_capacity: queue_capacity,
                ..Default::default()
            };
            let hub_config = HubConfig {
                poll_interval: Duration::from_secs(interval),
                ..Default::default()
            };
            serve(&cli.db, feed.client_config(), hub_config, server_config).await?;
        }

        Commands::Snapshot { feed } => {
            print_snapshot(&cli.db, feed.client_config()).await?;
        }

        Commands::Route { callsign } => {
            lookup_route(&cli.db, &callsign)?;
        }
    }

    Ok(())
}

async fn serve(
    db_path: &PathBuf,
    client_config: ClientConfig,
    hub_config: HubConfig,
    server_config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let bbox = client_config.bbox;
    tracing::info!(
        "Bounding box: S={}, N={}, W={}, E={}",
        bbox.south,
        bbox.north,
        bbox.west,
        bbox.east
    );
    tracing::info!("Loading database: {}", db_path.display());

    let reporter = Arc::new(TracingReporter);

    let routes = RouteDatabase::open(db_path)?;
    let client = OpenSkyClient::new(client_config)?;
    let merger = Merger::new(client, routes, reporter.clone());

    let hub = Hub::new(merger, reporter, hub_config);
    let server = Server::bind(server_config, hub.handle()).await?;
    tracing::info!("Listening on {}", server.local_addr()?);

    let stats = hub.stats();

    // Spawn stats reporting task
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let s = stats.snapshot();
            tracing::info!(
                "Stats: clients={}, ticks={}, fetches={}, broadcasts={}, errors={}, evictions={}, last_fetch={}ms",
                s.clients,
                s.ticks,
                s.fetches,
                s.broadcasts,
                s.errors,
                s.evictions,
                s.last_fetch_ms
            );
        }
    });

    let hub_handle = tokio::spawn(hub.run());
    let server_handle = tokio::spawn(server.run());

    // Handle Ctrl+C
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        result = hub_handle => {
            if let Err(e) = result {
                tracing::error!("Hub task failed: {}", e);
            }
        }
        result = server_handle => {
            if let Err(e) = result {
                tracing::error!("Server task failed: {}", e);
            }
        }
    }

    stats_handle.abort();

    Ok(())
}

async fn print_snapshot(
    db_path: &PathBuf,
    client_config: ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let reporter = Arc::new(TracingReporter);
    let routes = RouteDatabase::open(db_path)?;
    let client = OpenSkyClient::new(client_config)?;
    let merger = Merger::new(client, routes, reporter);

    let snapshot = merger.fetch().await?;
    tracing::info!("Merged {} aircraft", snapshot.aircraft_count());
    println!("{}", snapshot.as_str());

    Ok(())
}

fn lookup_route(db_path: &PathBuf, callsign: &str) -> Result<(), Box<dyn std::error::Error>> {
    let routes = RouteDatabase::open(db_path)?;
    let callsign = callsign.trim();

    match routes.find_route(callsign)? {
        Some(route) => {
            println!("{}: {}", callsign, route);
        }
        None => {
            println!("No route found for {}", callsign);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = Cli::try_parse_from(["planecast", "serve", "--interval", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_interval_parsed() {
        let cli = Cli::try_parse_from(["planecast", "serve", "-i", "3"]).unwrap();
        match cli.command {
            Commands::Serve { interval, .. } => assert_eq!(interval, 3),
            _ => panic!("expected serve"),
        }
    }
}
