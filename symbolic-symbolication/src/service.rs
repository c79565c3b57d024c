//! The symbolication API handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{SymbolicationError, SymbolicationErrorKind, ValidationError};
use crate::resolver::{LoadedModules, ModuleStatus, SymbolResolver};
use crate::types::{
    Job, JobResult, SymbolicatedFrame, V4Request, V4Response, V5Request, V5Response,
};

/// Default time budget for loading the modules of a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of jobs in a request.
pub const DEFAULT_MAX_JOBS: usize = 100;

/// Default maximum number of frames across all jobs of a request.
pub const DEFAULT_MAX_FRAMES: usize = 50_000;

/// Limits applied to every request of a [`SymbolicationService`].
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Time budget for loading all modules of a request.
    pub request_timeout: Duration,
    /// Maximum number of jobs in a request.
    pub max_jobs: usize,
    /// Maximum number of frames across all jobs of a request.
    pub max_frames: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_jobs: DEFAULT_MAX_JOBS,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

/// Handles symbolication requests.
///
/// A request is validated completely before any symbols are loaded. Afterwards, all modules of all
/// jobs are loaded concurrently within the request timeout, and every frame is resolved against the
/// loaded modules. Modules that are missing, corrupt or too slow to load only affect their own
/// frames, which render as unknown. The request as a whole fails only if it is malformed or if
/// every module failed to load because the symbol sources are unreachable.
#[derive(Clone, Debug)]
pub struct SymbolicationService {
    resolver: Arc<SymbolResolver>,
    config: ServiceConfig,
}

impl SymbolicationService {
    /// Creates a service resolving symbols with the given resolver.
    pub fn new(resolver: Arc<SymbolResolver>, config: ServiceConfig) -> Self {
        SymbolicationService { resolver, config }
    }

    /// The resolver used by this service.
    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    /// Handles a v4 request body.
    pub async fn symbolicate_v4(&self, body: &[u8]) -> Result<V4Response, SymbolicationError> {
        let request: V4Request = serde_json::from_slice(body).map_err(ValidationError::json)?;

        if let Some(version) = request.version {
            if version != 4 {
                let message = format!("unsupported version {version}");
                return Err(ValidationError::new(message).into());
            }
        }

        match (request.jobs, request.memory_map, request.stacks) {
            (Some(jobs), None, None) => {
                let results = self.symbolicate(jobs).await?;
                Ok(V4Response::Batch {
                    results: results.iter().map(JobResult::to_v4).collect(),
                })
            }
            (Some(_), _, _) => Err(ValidationError::new(
                "request must contain either `jobs` or `memoryMap` and `stacks`",
            )
            .into()),
            (None, Some(memory_map), Some(stacks)) => {
                let job = Job { memory_map, stacks };
                let results = self.symbolicate(vec![job]).await?;
                let result = results
                    .first()
                    .map(JobResult::to_v4)
                    .ok_or_else(|| ValidationError::new("request contains no jobs"))?;
                Ok(V4Response::Job(result))
            }
            (None, None, _) => Err(ValidationError::new("missing field `memoryMap`").into()),
            (None, _, None) => Err(ValidationError::new("missing field `stacks`").into()),
        }
    }

    /// Handles a v5 request body.
    pub async fn symbolicate_v5(&self, body: &[u8]) -> Result<V5Response, SymbolicationError> {
        let request: V5Request = serde_json::from_slice(body).map_err(ValidationError::json)?;
        let results = self.symbolicate(request.jobs).await?;

        Ok(V5Response {
            results: results.iter().map(JobResult::to_v5).collect(),
        })
    }

    /// Symbolicates a batch of jobs, returning one result per job in request order.
    #[tracing::instrument(skip_all, fields(jobs = jobs.len()))]
    pub async fn symbolicate(&self, jobs: Vec<Job>) -> Result<Vec<JobResult>, SymbolicationError> {
        self.validate(&jobs)?;

        let deadline = Instant::now() + self.config.request_timeout;
        let modules = jobs.iter().flat_map(|job| &job.memory_map);
        let loaded = self.resolver.load_modules(modules, deadline).await;

        let all_failed = !loaded.is_empty()
            && loaded
                .statuses()
                .all(|(_, status)| status == ModuleStatus::FetchFailed);

        if all_failed {
            tracing::error!(modules = loaded.len(), "all symbol fetches failed");
            return Err(SymbolicationErrorKind::BackendUnavailable.into());
        }

        let results: Vec<_> = jobs.into_iter().map(|job| resolve_job(&loaded, job)).collect();

        tracing::info!(
            modules = loaded.len(),
            found = loaded.statuses().filter(|(_, s)| s.is_found()).count(),
            frames = results
                .iter()
                .flat_map(|r| &r.stacks)
                .map(Vec::len)
                .sum::<usize>(),
            "symbolicated request"
        );

        Ok(results)
    }

    fn validate(&self, jobs: &[Job]) -> Result<(), ValidationError> {
        if jobs.is_empty() {
            return Err(ValidationError::new("request contains no jobs"));
        }

        if jobs.len() > self.config.max_jobs {
            return Err(ValidationError::new(format!(
                "too many jobs: {} (limit {})",
                jobs.len(),
                self.config.max_jobs
            )));
        }

        let frames: usize = jobs.iter().map(Job::frame_count).sum();
        if frames > self.config.max_frames {
            return Err(ValidationError::new(format!(
                "too many frames: {frames} (limit {})",
                self.config.max_frames
            )));
        }

        for (job_index, job) in jobs.iter().enumerate() {
            let modules = job.memory_map.len();
            for (stack_index, stack) in job.stacks.iter().enumerate() {
                for (frame_index, frame) in stack.iter().enumerate() {
                    let in_range = usize::try_from(frame.module_index)
                        .map_or(true, |index| index < modules);

                    if !in_range {
                        return Err(ValidationError::new(format!(
                            "job {job_index}, stack {stack_index}, frame {frame_index}: \
                             module index {} out of range for memory map of {modules} modules",
                            frame.module_index,
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn resolve_job(loaded: &LoadedModules, job: Job) -> JobResult {
    let module_statuses = job
        .memory_map
        .iter()
        .map(|module| loaded.status(module).unwrap_or(ModuleStatus::NotFound))
        .collect();

    let stacks = job
        .stacks
        .iter()
        .map(|stack| {
            stack
                .iter()
                .map(|frame| SymbolicatedFrame {
                    module_index: frame.module_index,
                    module_offset: frame.offset,
                    module: usize::try_from(frame.module_index)
                        .ok()
                        .and_then(|index| job.memory_map.get(index))
                        .cloned(),
                    resolved: loaded.resolve_frame(
                        &job.memory_map,
                        frame.module_index,
                        frame.offset,
                    ),
                })
                .collect()
        })
        .collect();

    JobResult {
        memory_map: job.memory_map,
        module_statuses,
        stacks,
    }
}
