#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;

use piazza_api::{BusinessDirectory, Geocoder, IndexQuery, SearchIndex};
use piazza_core::{GeoPoint, SearchQuery, SuggestionKind, ViewportBounds, ZoomLevel};
use piazza_persist::{JsonFileStore, RecentSearches};
use piazza_remote::{HttpDirectory, HttpGeocoder, HttpSearchIndex};
use piazza_suggest::build_suggestions;

#[derive(Parser, Debug)]
#[command(name = "piazzactl", version, about = "Piazza discovery CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Autocomplete a partial query against the search index
    Suggest {
        /// Partial query text, e.g. "piz"
        text: String,
        /// Cap per suggestion group (businesses, categories)
        #[arg(long = "limit", default_value_t = 5)]
        limit: usize,
    },
    /// Resolve a free-text address to a point
    Geocode {
        /// Address or place name, e.g. "Austin, TX"
        address: String,
    },
    /// Resolve a point to its "City, Region" label
    Reverse {
        lat: f64,
        lng: f64,
    },
    /// Fetch businesses, within a viewport when bounds are given
    Search {
        /// Query text; empty string browses everything
        query: String,
        /// Category filter, e.g. "Restaurants"
        #[arg(long = "category")]
        category: Option<String>,
        /// Viewport as "north,south,east,west" in degrees
        #[arg(long = "bounds")]
        bounds: Option<String>,
        /// Map zoom paired with --bounds
        #[arg(long = "zoom", default_value_t = 13)]
        zoom: ZoomLevel,
    },
    /// Show, add to, or clear the recent-search list
    Recent {
        /// Record a query before printing the list
        #[arg(long = "add")]
        add: Option<String>,
        /// Empty the list
        #[arg(long = "clear", action = ArgAction::SetTrue)]
        clear: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("PIAZZA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PIAZZA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid PIAZZA_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_bounds(raw: &str) -> Result<ViewportBounds> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid bounds '{raw}'"))?;
    match parts.as_slice() {
        [north, south, east, west] => Ok(ViewportBounds::new(*north, *south, *east, *west)),
        _ => anyhow::bail!("bounds must be 'north,south,east,west', got '{raw}'"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Suggest { text, limit } => {
            info!(text = %text, limit, "suggest invoked");
            let index = HttpSearchIndex::from_env()?;
            let hits = index.search(IndexQuery::new(text, limit * 4)).await?;
            let rows = build_suggestions(&hits, limit);
            match cli.output {
                Output::Human => {
                    for row in &rows {
                        let tag = match row.kind {
                            SuggestionKind::Business => "business",
                            SuggestionKind::Category => "category",
                        };
                        println!("{:<8} {}", tag, row.text);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Commands::Geocode { address } => {
            info!(address = %address, "geocode invoked");
            let geocoder = HttpGeocoder::from_env()?;
            let point = geocoder.geocode(&address).await?;
            match cli.output {
                Output::Human => println!("{point}"),
                Output::Json => println!("{}", serde_json::to_string_pretty(&point)?),
            }
        }
        Commands::Reverse { lat, lng } => {
            info!(lat, lng, "reverse invoked");
            let geocoder = HttpGeocoder::from_env()?;
            let label = geocoder.reverse_geocode(GeoPoint::new(lat, lng)).await?;
            match cli.output {
                Output::Human => println!("{label}"),
                Output::Json => println!("{}", serde_json::to_string_pretty(&label)?),
            }
        }
        Commands::Search { query, category, bounds, zoom } => {
            info!(query = %query, bounds = ?bounds, zoom, "search invoked");
            let directory = HttpDirectory::from_env()?;
            let q = SearchQuery { text: query, category };
            let businesses = match bounds {
                Some(raw) => {
                    let b = parse_bounds(&raw)?;
                    directory.fetch_in_bounds(&q, b, zoom).await?
                }
                None => directory.fetch_by_query(&q).await?,
            };
            match cli.output {
                Output::Human => {
                    println!("{:<24} {:<16} {:<7} LOCATION", "NAME", "CATEGORY", "RATING");
                    for b in &businesses {
                        let rating =
                            b.rating.map(|r| format!("{r:.1}")).unwrap_or_else(|| "-".into());
                        println!("{:<24} {:<16} {:<7} {}", b.name, b.category, rating, b.location);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&businesses)?),
            }
        }
        Commands::Recent { add, clear } => {
            let ledger = RecentSearches::new(Arc::new(JsonFileStore::open_default()));
            if clear {
                ledger.clear()?;
            }
            if let Some(text) = add {
                ledger.add(&text)?;
            }
            let entries = ledger.all()?;
            match cli.output {
                Output::Human => {
                    for entry in &entries {
                        println!("{entry}");
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            }
        }
    }

    Ok(())
}
