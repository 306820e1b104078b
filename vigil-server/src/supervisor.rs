//! Worker supervision
//!
//! Starts one `SourceWorker` per configured source, spaced by the configured
//! start stagger, and stops them all on shutdown.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::detector::DetectionInvoker;
use crate::source::{
    FrameSource, ImageSequenceSource, SourceWorker, WorkerExit, WorkerHandle, WorkerReport,
    WorkerStats,
};
use crate::store::EventStore;

/// Running set of capture workers
pub struct Supervisor {
    handles: Vec<WorkerHandle>,
    join_timeout: Duration,
}

impl Supervisor {
    /// Build and start a worker for every source in `config`
    pub async fn start(
        config: &ServerConfig,
        store: Arc<EventStore>,
        invoker: Arc<dyn DetectionInvoker>,
    ) -> Self {
        let ffmpeg = config.ffmpeg.options();
        let stagger = config.worker_start_stagger();
        let mut handles = Vec::with_capacity(config.sources.len());

        for (index, source) in config.sources.iter().enumerate() {
            if index > 0 && !stagger.is_zero() {
                sleep(stagger).await;
            }

            let input = config.source_input(source);
            let fallback = config.fallback_sequence_dir.as_ref().map(|dir| {
                Box::new(ImageSequenceSource::new(dir.clone())) as Box<dyn FrameSource>
            });

            info!(source_id = %source.id, "Starting worker for {}", input);
            let worker = SourceWorker::new(
                config.worker_config(source),
                input.build(&ffmpeg),
                fallback,
                Arc::clone(&invoker),
                Arc::clone(&store),
            );
            handles.push(worker.spawn());
        }

        Self::from_handles(handles, config.worker_join_timeout())
    }

    /// Supervise already spawned workers
    pub fn from_handles(handles: Vec<WorkerHandle>, join_timeout: Duration) -> Self {
        Self {
            handles,
            join_timeout,
        }
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    /// Number of workers that have not finished yet
    pub fn active_count(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Signal every worker to stop
    pub fn stop_all(&self) {
        for handle in &self.handles {
            handle.stop();
        }
    }

    /// Stop every worker and wait for each up to the join timeout
    ///
    /// A worker that does not finish in time is left detached and reported
    /// as faulted.
    pub async fn shutdown(self) -> Vec<WorkerReport> {
        self.stop_all();

        let join_timeout = self.join_timeout;
        let joins = self.handles.into_iter().map(|handle| async move {
            let source_id = handle.source_id().to_string();
            match tokio::time::timeout(join_timeout, handle.join()).await {
                Ok(report) => report,
                Err(_) => {
                    warn!(
                        source_id = %source_id,
                        "Worker did not stop within {:?}", join_timeout
                    );
                    WorkerReport {
                        source_id,
                        exit: WorkerExit::Faulted("join timed out".to_string()),
                        stats: WorkerStats::default(),
                    }
                }
            }
        });
        let reports = join_all(joins).await;

        info!("All {} workers stopped", reports.len());
        reports
    }
}
