//! pincache - drop map pins and keep a cached photo album for each.
//!
//! Every command opens the local store, does its work, and flushes to
//! disk before exiting. Only `album` and `refresh` touch the network.

use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pincache_core::preferences::ViewportStore;
use pincache_core::{
    AlbumSlot, Config, LocationId, PhotoId, PinCache, SyncError, SyncOutcome, Viewport,
};

// ============================================================================
// Constants
// ============================================================================

/// Log directory inside the data directory
const LOG_DIR: &str = "logs";

/// Rolling log file prefix
const LOG_FILE: &str = "pincache.log";

const USAGE: &str = "\
Usage: pincache <command> [args]

Commands:
  place <lat> <lon> [title]          Drop a pin
  list                               List pins
  album <pin>                        Show a pin's album, fetching it if empty
  refresh <pin>                      Replace a pin's album with new photos
  remove <pin>                       Delete a pin and its photos
  remove-photo <pin> <photo>         Delete one photo
  title <pin> [title]                Set or clear a pin's title
  viewport [lat lon dlat dlon]       Show or save the map viewport
";

/// Initialize the tracing subscriber for logging
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=pincache_core=debug).
/// Returns the file writer guard, which must live until exit.
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprint!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "-h" | "--help" | "help") {
        print!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.data_dir()?.join(LOG_DIR))?;
    info!(command = command, "pincache starting");

    let rest = &args[1..];
    match command {
        "viewport" => viewport(rest),
        "album" | "refresh" => {
            let cache = PinCache::open_with_flickr(&config)?;
            let pin = parse_pin(rest.first())?;
            let result = if command == "album" {
                cache.album().request(pin).await
            } else {
                cache.album().refresh(pin).await
            };
            report_sync(&cache, pin, result);
            finish(&cache).await
        }
        _ => {
            let cache = PinCache::open_offline(&config)?;
            run_offline(&cache, command, rest)?;
            finish(&cache).await
        }
    }
}

fn run_offline(cache: &PinCache, command: &str, args: &[String]) -> Result<()> {
    match command {
        "place" => {
            let (Some(lat), Some(lon)) = (args.first(), args.get(1)) else {
                bail!("place needs <lat> <lon>");
            };
            let latitude: f64 = lat.parse().with_context(|| format!("Bad latitude: {}", lat))?;
            let longitude: f64 = lon.parse().with_context(|| format!("Bad longitude: {}", lon))?;
            let title = (args.len() > 2).then(|| args[2..].join(" "));
            let location = cache.place_location(latitude, longitude, title)?;
            println!("Placed pin {} at {}", location.id, location.coordinate);
        }
        "list" => {
            let locations = cache.list_locations();
            if locations.is_empty() {
                println!("No pins yet.");
            }
            for location in locations {
                println!(
                    "{:>5}  {}  {:<24}  {:>3} photos  {}",
                    location.id,
                    location.coordinate,
                    location.display_title(),
                    cache.store().photo_count(location.id),
                    location.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                );
            }
        }
        "remove" => {
            let pin = parse_pin(args.first())?;
            let removed = cache.remove_location(pin)?;
            println!("Removed pin {} and {} photos", pin, removed);
        }
        "remove-photo" => {
            let pin = parse_pin(args.first())?;
            let photo = args
                .get(1)
                .context("remove-photo needs <pin> <photo>")?
                .parse::<i64>()
                .map(PhotoId)
                .context("Bad photo id")?;
            cache.album().remove_photo(pin, photo)?;
            println!("Removed photo {}", photo);
        }
        "title" => {
            let pin = parse_pin(args.first())?;
            let title = (args.len() > 1).then(|| args[1..].join(" "));
            cache.set_location_title(pin, title)?;
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
    Ok(())
}

fn parse_pin(arg: Option<&String>) -> Result<LocationId> {
    let arg = arg.context("Missing pin id")?;
    let id: i64 = arg.parse().with_context(|| format!("Bad pin id: {}", arg))?;
    Ok(LocationId(id))
}

fn report_sync(cache: &PinCache, pin: LocationId, result: Result<SyncOutcome, SyncError>) {
    match result {
        Ok(SyncOutcome::Cached { count }) => println!("{} cached photos", count),
        Ok(SyncOutcome::Fetched { expected, added }) if added < expected => {
            println!("Downloaded {} of {} photos", added, expected)
        }
        Ok(SyncOutcome::Fetched { added, .. }) => println!("Downloaded {} photos", added),
        Err(e) => {
            eprintln!("{}", e.user_message());
            return;
        }
    }
    for slot in cache.album().slots(pin) {
        match slot {
            AlbumSlot::Photo(photo) if photo.is_placeholder() => {
                println!("{:>6}  (pending)", photo.id)
            }
            AlbumSlot::Photo(photo) => println!(
                "{:>6}  {:>8} bytes  {}",
                photo.id,
                photo.payload_len(),
                photo.source_url.as_deref().unwrap_or("-"),
            ),
            AlbumSlot::Placeholder => println!("     -  (loading)"),
        }
    }
}

fn viewport(args: &[String]) -> Result<()> {
    let store = ViewportStore::open_default()?;
    if args.is_empty() {
        match store.load() {
            Some(v) => println!(
                "center ({}, {})  span {} x {}",
                v.center_latitude, v.center_longitude, v.latitude_delta, v.longitude_delta
            ),
            None => println!("No saved viewport."),
        }
        return Ok(());
    }

    let values = args
        .iter()
        .map(|a| a.parse::<f64>().with_context(|| format!("Bad number: {}", a)))
        .collect::<Result<Vec<_>>>()?;
    let &[center_latitude, center_longitude, latitude_delta, longitude_delta] = values.as_slice() else {
        bail!("viewport needs <lat> <lon> <dlat> <dlon>");
    };
    store.save(&Viewport {
        center_latitude,
        center_longitude,
        latitude_delta,
        longitude_delta,
    })
}

/// Flush before exit; a failure here means changes are lost.
async fn finish(cache: &PinCache) -> Result<()> {
    let report = match cache.flush().await {
        Ok(report) => report,
        Err(e) if e.is_fatal() => {
            eprintln!("Changes from this run were not saved: {}", e);
            return Err(e).context("Local storage is unavailable");
        }
        Err(e) => return Err(e).context("Failed to save changes"),
    };
    info!(?report, "pincache shutting down");
    Ok(())
}
