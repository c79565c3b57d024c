//! Command line interface and configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use symbolic::cache::{DEFAULT_ERROR_BACKOFF, DEFAULT_SCAN_INTERVAL};
use symbolic::symbolication::{
    DEFAULT_FETCH_RETRIES, DEFAULT_MEMORY_CACHE_CAPACITY, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_RETRY_BACKOFF,
};

/// Settings shared by all subcommands.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the shared symbol cache, if caching is enabled.
    pub cache_dir: Option<PathBuf>,
    /// Size above which the cache is evicted.
    pub cache_max_size: Option<u64>,
    /// Size the cache is evicted down to.
    pub cache_low_watermark: Option<u64>,
    /// Time between two eviction cycles.
    pub scan_interval: Duration,
    /// Pause after a failed eviction cycle.
    pub error_backoff: Duration,
    /// Symbol sources in order of priority.
    pub sources: Vec<String>,
    /// Address the server listens on.
    pub bind: SocketAddr,
    /// Time budget for loading the modules of a request.
    pub request_timeout: Duration,
    /// Retries after a transient fetch error.
    pub fetch_retries: u32,
    /// Delay before the first retry.
    pub retry_backoff: Duration,
    /// Number of parsed symbol tables kept in memory.
    pub memory_cache_capacity: usize,
    /// Whether to resolve source files and line numbers.
    pub with_lines: bool,
}

fn get<T>(matches: &ArgMatches, id: &str) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
{
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing value for --{}", id.replace('_', "-")))
}

impl Config {
    /// Reads the configuration from parsed command line arguments.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let sources = matches
            .get_many::<String>("sources")
            .map(|values| values.filter(|s| !s.is_empty()).cloned().collect())
            .unwrap_or_default();

        Ok(Config {
            cache_dir: matches.get_one::<PathBuf>("cache_dir").cloned(),
            cache_max_size: matches.get_one::<u64>("cache_max_size").copied(),
            cache_low_watermark: matches.get_one::<u64>("cache_low_watermark").copied(),
            scan_interval: get(matches, "scan_interval")?,
            error_backoff: get(matches, "error_backoff")?,
            sources,
            bind: get(matches, "bind")?,
            request_timeout: get(matches, "request_timeout")?,
            fetch_retries: get(matches, "fetch_retries")?,
            retry_backoff: get(matches, "retry_backoff")?,
            memory_cache_capacity: get(matches, "memory_cache_capacity")?,
            with_lines: matches.get_flag("with_lines"),
        })
    }
}

/// Parses a size in bytes with an optional binary unit suffix, such as `512M` or `40GiB`.
pub fn parse_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let number: u64 = number
        .parse()
        .with_context(|| format!("invalid size {value:?}"))?;

    let shift = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        "t" | "tb" | "tib" => 40,
        other => bail!("invalid size unit {other:?}"),
    };

    number
        .checked_mul(1 << shift)
        .with_context(|| format!("size {value:?} is too large"))
}

fn duration_arg(
    id: &'static str,
    long: &'static str,
    env: &'static str,
    default: Duration,
) -> Arg {
    Arg::new(id)
        .long(long)
        .env(env)
        .global(true)
        .value_name("duration")
        .value_parser(humantime::parse_duration)
        .default_value(humantime::format_duration(default).to_string())
}

/// Builds the command line interface.
pub fn command() -> Command {
    Command::new("symbolicator")
        .about("Symbolicates stack traces against Breakpad symbol files")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .env("SYMBOLICATOR_CACHE_DIR")
                .global(true)
                .value_name("path")
                .value_parser(value_parser!(PathBuf))
                .help("Directory of the symbol cache shared by all processes"),
        )
        .arg(
            Arg::new("cache_max_size")
                .long("cache-max-size")
                .env("SYMBOLICATOR_CACHE_MAX_SIZE")
                .global(true)
                .value_name("size")
                .value_parser(parse_size)
                .help("Size above which the cache is evicted, such as 40G"),
        )
        .arg(
            Arg::new("cache_low_watermark")
                .long("cache-low-watermark")
                .env("SYMBOLICATOR_CACHE_LOW_WATERMARK")
                .global(true)
                .value_name("size")
                .value_parser(parse_size)
                .help("Size the cache is evicted down to [default: 90% of the maximum]"),
        )
        .arg(
            duration_arg(
                "scan_interval",
                "cache-scan-interval",
                "SYMBOLICATOR_CACHE_SCAN_INTERVAL",
                DEFAULT_SCAN_INTERVAL,
            )
            .help("Time between two eviction cycles"),
        )
        .arg(
            duration_arg(
                "error_backoff",
                "cache-error-backoff",
                "SYMBOLICATOR_CACHE_ERROR_BACKOFF",
                DEFAULT_ERROR_BACKOFF,
            )
            .help("Pause after a failed eviction cycle"),
        )
        .arg(
            Arg::new("sources")
                .long("source")
                .env("SYMBOLICATOR_SOURCES")
                .global(true)
                .value_name("url|path")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .help("Symbol server URL or local directory, in order of priority"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .env("SYMBOLICATOR_BIND")
                .global(true)
                .value_name("addr")
                .value_parser(value_parser!(SocketAddr))
                .default_value("127.0.0.1:3021")
                .help("Address the server listens on"),
        )
        .arg(
            duration_arg(
                "request_timeout",
                "request-timeout",
                "SYMBOLICATOR_REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT,
            )
            .help("Time budget for loading the symbols of a request"),
        )
        .arg(
            Arg::new("fetch_retries")
                .long("fetch-retries")
                .env("SYMBOLICATOR_FETCH_RETRIES")
                .global(true)
                .value_name("count")
                .value_parser(value_parser!(u32))
                .default_value(DEFAULT_FETCH_RETRIES.to_string())
                .help("Retries after a transient error fetching a symbol file"),
        )
        .arg(
            duration_arg(
                "retry_backoff",
                "retry-backoff",
                "SYMBOLICATOR_RETRY_BACKOFF",
                DEFAULT_RETRY_BACKOFF,
            )
            .help("Delay before the first retry, growing linearly"),
        )
        .arg(
            Arg::new("memory_cache_capacity")
                .long("memory-cache-capacity")
                .env("SYMBOLICATOR_MEMORY_CACHE_CAPACITY")
                .global(true)
                .value_name("count")
                .value_parser(value_parser!(usize))
                .default_value(DEFAULT_MEMORY_CACHE_CAPACITY.to_string())
                .help("Number of parsed symbol files kept in memory"),
        )
        .arg(
            Arg::new("with_lines")
                .long("with-lines")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Resolve source files and line numbers"),
        )
        .subcommand(Command::new("run").about("Runs the symbolication server"))
        .subcommand(
            Command::new("cleanup")
                .about("Keeps the symbol cache within its size budget until interrupted"),
        )
        .subcommand(
            Command::new("symbolicate")
                .about("Symbolicates a v5 request file and prints the response")
                .arg(
                    Arg::new("request")
                        .required(true)
                        .value_name("file")
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the request, or - for stdin"),
                ),
        )
}
