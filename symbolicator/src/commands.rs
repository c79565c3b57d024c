//! Implementations of the subcommands.

use std::error::Error;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use symbolic::breakpad::ParseOptions;
use symbolic::cache::{CacheStore, EvictionConfig, EvictionManager};
use symbolic::symbolication::{
    FilesystemSource, HttpSource, ResolverConfig, ServiceConfig, SourceSet, SymbolResolver,
    SymbolicationService,
};
use tokio::net::TcpListener;

use crate::cli::Config;
use crate::server;

/// Resolves once the process receives Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = &error as &dyn Error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

fn build_sources(config: &Config) -> Result<SourceSet> {
    let mut sources = SourceSet::new();

    for source in &config.sources {
        if source.starts_with("http://") || source.starts_with("https://") {
            let http = HttpSource::with_timeout(source, config.request_timeout)
                .with_context(|| format!("invalid symbol source {source}"))?;
            sources.push(http);
        } else {
            sources.push(FilesystemSource::new(source));
        }
    }

    if sources.is_empty() {
        tracing::warn!("no symbol sources configured, only cached symbols will resolve");
    }

    Ok(sources)
}

/// Creates the symbolication service described by the configuration.
pub fn build_service(config: &Config) -> Result<SymbolicationService> {
    let sources = build_sources(config)?;

    let cache = config.cache_dir.as_ref().and_then(|dir| match CacheStore::open(dir) {
        Ok(cache) => Some(cache),
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn Error,
                path = %dir.display(),
                "symbol cache unavailable, fetching all symbols from sources"
            );
            None
        }
    });

    let resolver_config = ResolverConfig {
        fetch_retries: config.fetch_retries,
        retry_backoff: config.retry_backoff,
        memory_cache_capacity: config.memory_cache_capacity,
        parse_options: ParseOptions {
            with_lines: config.with_lines,
        },
        ..Default::default()
    };

    let service_config = ServiceConfig {
        request_timeout: config.request_timeout,
        ..Default::default()
    };

    let resolver = SymbolResolver::new(sources, cache, resolver_config);
    Ok(SymbolicationService::new(Arc::new(resolver), service_config))
}

/// Runs the symbolication server until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let service = build_service(&config)?;

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(addr = %config.bind, "symbolication server listening");
    server::serve(listener, service, shutdown_signal())
        .await
        .context("server failed")
}

/// Runs cache eviction until interrupted.
pub async fn cleanup(config: Config) -> Result<()> {
    let dir = config
        .cache_dir
        .as_ref()
        .context("cleanup requires --cache-dir")?;
    let max_size = config
        .cache_max_size
        .context("cleanup requires --cache-max-size")?;

    let eviction_config = match config.cache_low_watermark {
        Some(low_watermark) => EvictionConfig::new(max_size, low_watermark)?,
        None => EvictionConfig::with_max_size(max_size)?,
    }
    .interval(config.scan_interval)?
    .error_backoff(config.error_backoff);

    let store = CacheStore::open(dir)
        .with_context(|| format!("failed to open symbol cache {}", dir.display()))?;

    EvictionManager::new(store, eviction_config)
        .run_until(shutdown_signal())
        .await;

    Ok(())
}

/// Symbolicates a single v5 request and prints the response to stdout.
pub async fn symbolicate(config: Config, request: &Path) -> Result<()> {
    let body = if request == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("failed to read request from stdin")?;
        body
    } else {
        std::fs::read(request)
            .with_context(|| format!("failed to read request {}", request.display()))?
    };

    let service = build_service(&config)?;
    let response = service.symbolicate_v5(&body).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;
    use symbolic::cache::CacheStore;

    use crate::cli;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["symbolicator"];
        argv.extend_from_slice(args);
        let matches = cli::command().try_get_matches_from(argv).unwrap();
        Config::from_matches(&matches).unwrap()
    }

    #[tokio::test]
    async fn test_build_service_with_cache() {
        let dir = tempfile::tempdir().unwrap();
        let symbols = symbolic_testutils::symbol_store();
        let config = config(&[
            "--cache-dir",
            dir.path().to_str().unwrap(),
            "--source",
            symbols.to_str().unwrap(),
            "run",
        ]);

        let service = build_service(&config).unwrap();
        let request = br#"{"jobs": [{"memoryMap": [["xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2"]], "stacks": [[[0, 16384]]]}]}"#;
        let response = service.symbolicate_v5(request).await.unwrap();

        assert_eq!(
            response.results[0].stacks[0][0].function.as_deref(),
            Some("XRE_main")
        );

        let cache = CacheStore::open(dir.path()).unwrap();
        assert_eq!(cache.list_entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unusable_cache_dir_falls_back_to_sources() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("cache");
        std::fs::write(&not_a_dir, b"not a directory").unwrap();

        let symbols = symbolic_testutils::symbol_store();
        let config = config(&[
            "--cache-dir",
            not_a_dir.to_str().unwrap(),
            "--source",
            symbols.to_str().unwrap(),
            "run",
        ]);

        let service = build_service(&config).unwrap();
        let request = br#"{"jobs": [{"memoryMap": [["xul.pdb", "44E4EC8C2F41492B9369D6B9A059577C2"]], "stacks": [[[0, 16384]]]}]}"#;
        let response = service.symbolicate_v5(request).await.unwrap();

        assert_eq!(
            response.results[0].stacks[0][0].function.as_deref(),
            Some("XRE_main")
        );
    }

    #[tokio::test]
    async fn test_cleanup_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&[
            "--cache-dir",
            dir.path().to_str().unwrap(),
            "--cache-max-size",
            "1M",
            "--cache-scan-interval",
            "0s",
            "cleanup",
        ]);

        let error = cleanup(config).await.unwrap_err();
        assert_eq!(error.to_string(), "scan interval must be greater than zero");
    }

    #[test]
    fn test_invalid_http_source() {
        let config = config(&["--source", "http://", "run"]);
        assert!(build_service(&config).is_err());
    }

    #[tokio::test]
    async fn test_cleanup_requires_cache_settings() {
        let error = cleanup(config(&["cleanup"])).await.unwrap_err();
        assert_eq!(error.to_string(), "cleanup requires --cache-dir");
    }
}
