use std::path::Path;
use std::process::ExitCode;

use crate::commands::base_commands::Source;
use crate::commands::fetch_cmd::cached_requests;
use crate::domain::date_range::DateRange;
use crate::services::metrics_config::MetricsConfig;

pub async fn clear_cache_command(config: Option<String>) -> ExitCode {
    let config = match MetricsConfig::load(config.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let cache = config.fetcher.cache();
    match cache.clear().await {
        Ok(count) => {
            println!("Removed {count} cached result(s) from {}", cache.path().display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to clear cache: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn invalidate_cache_command(
    source: Source,
    month: String,
    config: Option<String>,
) -> ExitCode {
    let config = match MetricsConfig::load(config.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let range = match DateRange::for_month(&month) {
        Ok(range) => range,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let cache = config.fetcher.cache();
    let mut dropped = false;
    for request in cached_requests(source, &config, range) {
        match cache.invalidate(&request).await {
            Ok(removed) => dropped |= removed,
            Err(e) => {
                eprintln!("Failed to update cache: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    if dropped {
        println!("Dropped cached {} result for {month}", source.name());
    } else {
        println!("No cached {} result for {month}", source.name());
    }
    ExitCode::SUCCESS
}
