//! Locations symbol files are fetched from on a cache miss.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use symbolic_common::ModuleRef;
use thiserror::Error;

/// Default timeout for a single HTTP download.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// An error returned by a [`SymbolSource`].
///
/// Callers rely on the distinction between both variants: a module that is not found is known to
/// be missing and is not retried, while transient errors are.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source confirmed that it does not have the symbol file.
    #[error("symbol file not found")]
    NotFound,

    /// The source could not be reached or returned an unexpected response.
    #[error("failed to fetch symbol file")]
    Transient(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl FetchError {
    /// Creates a transient error from an arbitrary error payload.
    pub fn transient<E>(error: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        FetchError::Transient(error.into())
    }

    /// Returns `true` if the symbol file is known to be missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound)
    }
}

/// An error returned when creating a source from invalid configuration.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The base URL of an HTTP source cannot be parsed or cannot contain a path.
    #[error("invalid symbol source url {url:?}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// The reason, if the URL did not parse.
        #[source]
        source: Option<Box<dyn Error + Send + Sync + 'static>>,
    },

    /// The HTTP client could not be initialized.
    #[error("failed to create http client")]
    Client(#[from] reqwest::Error),
}

/// A storage location serving Breakpad symbol files.
///
/// This is the upstream collaborator of the [`SymbolResolver`](crate::SymbolResolver): on a cache
/// miss, the resolver asks its source for the raw contents of a module's symbol file.
#[async_trait]
pub trait SymbolSource: fmt::Debug + Send + Sync {
    /// A short name of this source for diagnostics.
    fn name(&self) -> &str;

    /// Fetches the raw contents of a module's symbol file.
    async fn fetch(&self, module: &ModuleRef) -> Result<Bytes, FetchError>;
}

/// A local directory in the symbol server layout `<debug_file>/<debug_id>/<symbol_file>`.
#[derive(Clone, Debug)]
pub struct FilesystemSource {
    name: String,
    root: PathBuf,
}

impl FilesystemSource {
    /// Creates a source reading from the given directory.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        FilesystemSource {
            name: root.display().to_string(),
            root,
        }
    }
}

#[async_trait]
impl SymbolSource for FilesystemSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "trace", skip_all, fields(source = %self.name, module = %module))]
    async fn fetch(&self, module: &ModuleRef) -> Result<Bytes, FetchError> {
        let path = self.root.join(module.symbol_path());
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data.into()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FetchError::NotFound),
            Err(e) => Err(FetchError::transient(e)),
        }
    }
}

/// A symbol server reachable over HTTP, such as a public Breakpad symbol server.
///
/// Symbol files are requested from `<base_url>/<debug_file>/<debug_id>/<symbol_file>`. A `404`
/// response means the file is missing. Every other failure is transient.
#[derive(Clone, Debug)]
pub struct HttpSource {
    name: String,
    base_url: Url,
    client: Client,
}

impl HttpSource {
    /// Creates a source for the given base URL with the default timeout.
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        Self::with_timeout(base_url, DEFAULT_HTTP_TIMEOUT)
    }

    /// Creates a source for the given base URL, aborting downloads after `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let parsed = Url::parse(base_url).map_err(|e| SourceError::InvalidUrl {
            url: base_url.to_owned(),
            source: Some(e.into()),
        })?;

        if parsed.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl {
                url: base_url.to_owned(),
                source: None,
            });
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(HttpSource {
            name: base_url.to_owned(),
            base_url: parsed,
            client,
        })
    }

    fn file_url(&self, module: &ModuleRef) -> Option<Url> {
        let symbol_file = module.symbol_file();
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend([module.debug_file(), module.debug_id(), symbol_file.as_str()]);
        Some(url)
    }
}

#[async_trait]
impl SymbolSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "trace", skip_all, fields(source = %self.name, module = %module))]
    async fn fetch(&self, module: &ModuleRef) -> Result<Bytes, FetchError> {
        let url = self
            .file_url(module)
            .ok_or_else(|| FetchError::transient("symbol source url cannot be a base"))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::transient)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            status if status.is_success() => {
                response.bytes().await.map_err(FetchError::transient)
            }
            status => Err(FetchError::transient(format!(
                "unexpected status {status} from symbol server"
            ))),
        }
    }
}

/// An ordered list of sources queried by priority.
///
/// The first source that has the symbol file wins. The file is missing only if every source
/// confirms it missing. If no source has it and at least one failed, the last failure is
/// returned, since the file may still exist on the unreachable source.
#[derive(Clone, Debug, Default)]
pub struct SourceSet {
    sources: Vec<Arc<dyn SymbolSource>>,
}

impl SourceSet {
    /// Creates an empty set, which never finds any symbol file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source with lower priority than all previous ones.
    pub fn push<S: SymbolSource + 'static>(&mut self, source: S) {
        self.sources.push(Arc::new(source));
    }

    /// Appends a source and returns the set.
    pub fn with<S: SymbolSource + 'static>(mut self, source: S) -> Self {
        self.push(source);
        self
    }

    /// Returns the number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if this set contains no sources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl SymbolSource for SourceSet {
    fn name(&self) -> &str {
        "sources"
    }

    async fn fetch(&self, module: &ModuleRef) -> Result<Bytes, FetchError> {
        let mut last_error = None;

        for source in &self.sources {
            match source.fetch(module).await {
                Ok(data) => {
                    tracing::trace!(source = source.name(), module = %module, "found symbol file");
                    return Ok(data);
                }
                Err(FetchError::NotFound) => continue,
                Err(error) => {
                    tracing::debug!(
                        error = &error as &dyn Error,
                        source = source.name(),
                        module = %module,
                        "symbol source failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(FetchError::NotFound))
    }
}
