//! Single-process runner: coordinator, worker pools and notifications over
//! one manifest store.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use jobforge_aggregator::FileOutputSink;
use jobforge_config::{ConfigLoader, PartialJobConfig, PartialOutputConfig};
use jobforge_coordinator::{
    ApiError, CancelAck, Coordinator, JobService, JobSummary, LogNotifier, NotificationWorker,
};
use jobforge_core::{JobId, SystemClock};
use jobforge_events::{InMemoryEventBus, JobEvent};
use jobforge_manifest::{DirectoryManifestBackend, InMemoryManifestBackend, ManifestBackend, ManifestStore};
use jobforge_partition::SourceRegistry;
use jobforge_worker::{HandlerRegistry, TaskWorker, WorkerConfig, WorkerStats};

use crate::settings::RuntimeSettings;

type Bus = Arc<InMemoryEventBus<JobEvent>>;

/// Outcome of one `run` invocation.
#[derive(Debug)]
pub struct RunReport {
    pub jobs: Vec<JobSummary>,
    /// Config files that were rejected, with the reason.
    pub rejected: Vec<(String, ApiError)>,
    pub worker_stats: Vec<WorkerStats>,
}

pub struct Runner {
    settings: RuntimeSettings,
    registry: Arc<HandlerRegistry>,
    service: JobService<Bus>,
    loader: ConfigLoader,
}

impl Runner {
    pub fn new(settings: RuntimeSettings, registry: HandlerRegistry) -> anyhow::Result<Self> {
        let backend: Arc<dyn ManifestBackend> = match &settings.state_dir {
            Some(dir) => Arc::new(
                DirectoryManifestBackend::open(dir)
                    .with_context(|| format!("cannot open state directory {}", dir.display()))?,
            ),
            None => Arc::new(InMemoryManifestBackend::new()),
        };
        let store = ManifestStore::new(backend);
        let coordinator = Coordinator::new(
            store,
            Arc::new(SourceRegistry::with_local_files()),
            Arc::new(FileOutputSink),
            Arc::new(InMemoryEventBus::new()),
            SystemClock::shared(),
        );

        Ok(Self {
            settings,
            registry: Arc::new(registry),
            service: JobService::new(Arc::new(coordinator)),
            loader: ConfigLoader::new(),
        })
    }

    pub fn service(&self) -> &JobService<Bus> {
        &self.service
    }

    /// Layer applied under every submitted config.
    fn base_config(&self) -> PartialJobConfig {
        PartialJobConfig {
            output: self.settings.output_dir.as_ref().map(|dir| PartialOutputConfig {
                location: Some(dir.display().to_string()),
                ..PartialOutputConfig::default()
            }),
            ..PartialJobConfig::default()
        }
    }

    /// Resolve, layer and submit one config file.
    pub fn submit_file(&self, path: &Path) -> Result<JobId, ApiError> {
        let doc = self.loader.load_partial(path)?;
        let raw = self.base_config().merge(&doc).to_json();
        self.service.submit(&raw)
    }

    /// Submit every config, run the resulting jobs (and any left unfinished
    /// by an earlier run) to a terminal state.
    pub fn run(&self, paths: &[impl AsRef<Path>]) -> anyhow::Result<RunReport> {
        let coordinator = self.service.coordinator();
        let notifications = NotificationWorker::spawn(coordinator.bus(), LogNotifier)
            .context("cannot start notification worker")?;
        let pools = self.spawn_pools()?;

        let resumed = coordinator.recover().context("recovering unfinished jobs")?;
        let mut job_ids: Vec<JobId> = resumed
            .into_iter()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(id, _)| id)
            .collect();

        let mut rejected = Vec::new();
        for path in paths {
            let path = path.as_ref();
            match self.submit_file(path) {
                Ok(job_id) => {
                    info!(job_id = %job_id, config = %path.display(), "job accepted");
                    job_ids.push(job_id);
                }
                Err(e) => {
                    warn!(config = %path.display(), code = e.code(), error = %e, "job rejected");
                    rejected.push((path.display().to_string(), e));
                }
            }
        }

        let mut outcome = Ok(());
        for job_id in &job_ids {
            if let Err(e) = coordinator.run_to_completion(*job_id, self.settings.poll_interval) {
                outcome = Err(e).with_context(|| format!("job {job_id} did not finish"));
                break;
            }
        }

        let worker_stats = pools.into_iter().map(|p| p.shutdown()).collect();
        notifications.shutdown();
        outcome?;

        let jobs = job_ids
            .iter()
            .map(|id| self.service.status(*id))
            .collect::<Result<_, _>>()?;
        Ok(RunReport {
            jobs,
            rejected,
            worker_stats,
        })
    }

    pub fn status(&self, job_id: JobId) -> Result<JobSummary, ApiError> {
        self.service.status(job_id)
    }

    pub fn list(&self) -> Result<Vec<JobSummary>, ApiError> {
        self.service.list()
    }

    pub fn cancel(&self, job_id: JobId) -> Result<CancelAck, ApiError> {
        self.service.cancel(job_id)
    }

    fn spawn_pools(&self) -> anyhow::Result<Vec<jobforge_worker::WorkerHandle>> {
        (0..self.settings.workers)
            .map(|i| {
                let config = WorkerConfig::default()
                    .with_name(format!("worker-{i}"))
                    .with_poll_interval(self.settings.poll_interval)
                    .with_max_concurrent_tasks(self.settings.max_concurrent_tasks);
                TaskWorker::new(
                    self.service.coordinator().store().clone(),
                    self.registry.clone(),
                    SystemClock::shared(),
                    config,
                )
                .spawn()
                .context("cannot start worker pool")
            })
            .collect()
    }
}
