//! Batch conversion facade tying the scheduler to per-job executors.
//!
//! [`BatchConverter`] owns the scheduler, the encoder backend, and the map
//! of currently running executors. That map is what makes full-stop
//! cancellation possible: the scheduler's batch token only stops queued
//! jobs, so [`BatchConverter::cancel_all`] also cancels every running
//! executor individually to kill the live encoder processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use vp_av::{ConversionExecutor, ConversionStats, EncoderBackend, JobSpec};
use vp_core::config::Config;
use vp_core::Result;

use crate::monitor::ResourceMonitor;
use crate::scheduler::{JobScheduler, ProgressObserver};

/// Converts batches of files with bounded parallelism and live progress.
pub struct BatchConverter {
    scheduler: Arc<JobScheduler>,
    backend: Arc<dyn EncoderBackend>,
    min_callback_interval: Duration,
    running: Arc<Mutex<HashMap<usize, Arc<ConversionExecutor>>>>,
}

impl BatchConverter {
    /// Build a converter from config, wiring up the resource monitor and
    /// scheduler.
    pub fn new(config: &Config, backend: Arc<dyn EncoderBackend>) -> Self {
        let monitor = ResourceMonitor::new(config.monitor.clone());
        let scheduler = Arc::new(JobScheduler::new(config.scheduler.clone(), monitor));
        Self {
            scheduler,
            backend,
            min_callback_interval: Duration::from_millis(config.conversion.min_callback_interval_ms),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The underlying scheduler, for progress polling.
    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Convert a batch of jobs. Returns one slot per input spec in input
    /// order; failed and cancelled jobs leave `None`.
    pub async fn convert_batch(
        &self,
        specs: Vec<JobSpec>,
        observer: Option<ProgressObserver>,
    ) -> Result<Vec<Option<ConversionStats>>> {
        let backend = Arc::clone(&self.backend);
        let running = Arc::clone(&self.running);
        let interval = self.min_callback_interval;

        self.scheduler
            .process_batch(
                specs,
                move |spec: JobSpec, progress| {
                    let backend = Arc::clone(&backend);
                    let running = Arc::clone(&running);
                    async move {
                        let executor = Arc::new(ConversionExecutor::new(backend));
                        let id = progress.job_id();
                        running.lock().insert(id, Arc::clone(&executor));

                        let result = executor
                            .execute(
                                &spec,
                                |sample| {
                                    progress.report(sample.percentage() / 100.0);
                                    Ok(())
                                },
                                interval,
                            )
                            .await;

                        running.lock().remove(&id);
                        result
                    }
                },
                observer,
            )
            .await
    }

    /// Stop everything: queued jobs never start, and every running encoder
    /// process is asked to terminate.
    pub fn cancel_all(&self) {
        self.scheduler.cancel();
        let running = self.running.lock();
        tracing::info!("cancelling batch ({} running jobs)", running.len());
        for executor in running.values() {
            executor.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct ShellBackend {
        script: String,
    }

    impl EncoderBackend for ShellBackend {
        fn build_argv(&self, _spec: &JobSpec) -> Vec<String> {
            vec!["/bin/sh".into(), "-c".into(), self.script.clone()]
        }

        fn is_available(&self, _spec: &JobSpec) -> bool {
            true
        }
    }

    fn converter(script: &str) -> BatchConverter {
        let config = Config {
            scheduler: vp_core::config::SchedulerConfig {
                max_concurrent: 2,
                adaptive: false,
            },
            ..Config::default()
        };
        BatchConverter::new(
            &config,
            Arc::new(ShellBackend {
                script: script.into(),
            }),
        )
    }

    fn specs(dir: &TempDir, count: usize) -> Vec<JobSpec> {
        (0..count)
            .map(|i| {
                let input = dir.path().join(format!("in{i}.mkv"));
                std::fs::write(&input, vec![0u8; 1024]).unwrap();
                JobSpec {
                    input,
                    output: dir.path().join(format!("out{i}.mp4")),
                    encoder: "ffmpeg".into(),
                    duration_seconds: 10.0,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn batch_converts_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let specs = specs(&dir, 3);
        // One shared script; it writes every expected output.
        let converter = converter(&format!(
            "for f in {}; do printf data > \"$f\"; done",
            specs
                .iter()
                .map(|s| format!("'{}'", s.output.display()))
                .collect::<Vec<_>>()
                .join(" ")
        ));

        let results = converter.convert_batch(specs, None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(Option::is_some));

        let progress = converter.scheduler().aggregated_progress();
        assert_eq!(progress.completed_jobs, 3);
    }

    #[tokio::test]
    async fn running_map_is_empty_after_batch() {
        let dir = tempfile::tempdir().unwrap();
        let specs = specs(&dir, 2);
        let script = specs
            .iter()
            .map(|s| format!("printf data > '{}'", s.output.display()))
            .collect::<Vec<_>>()
            .join("; ");
        let converter = converter(&script);

        converter.convert_batch(specs, None).await.unwrap();
        assert!(converter.running.lock().is_empty());
    }
}
