//! Single-consumer materialization queue
//!
//! Episode jobs go through a bounded channel to exactly one background
//! thread, so materializations never overlap. Each submission returns a
//! [`JobHandle`] the exporter keeps until the job's result is collected.

use agenttrace_bundle::{EpisodeBundle, Materializer};
use agenttrace_core::{Error, Result, SpanRecord};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error};

const WORKER_THREAD_NAME: &str = "agenttrace-materialize";

enum Slot {
    Pending,
    Ready(Result<EpisodeBundle>),
    Taken,
}

struct JobState {
    slot: Mutex<Slot>,
    done: Condvar,
}

impl JobState {
    fn complete(&self, result: Result<EpisodeBundle>) {
        let mut slot = self.slot.lock();
        *slot = Slot::Ready(result);
        self.done.notify_all();
    }
}

/// Handle to one submitted materialization
pub struct JobHandle {
    episode: String,
    state: Arc<JobState>,
}

impl JobHandle {
    /// Episode name the job was submitted for.
    pub fn episode(&self) -> &str {
        &self.episode
    }

    /// Check whether the worker has finished this job.
    pub fn is_finished(&self) -> bool {
        !matches!(*self.state.slot.lock(), Slot::Pending)
    }

    /// Block until the job finishes or `deadline` passes.
    ///
    /// Returns `true` if the job finished.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut slot = self.state.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.state.done.wait_until(&mut slot, deadline).timed_out() {
                return !matches!(*slot, Slot::Pending);
            }
        }
        true
    }

    /// Take the job's result. `None` while pending or once taken.
    pub fn take_result(&self) -> Option<Result<EpisodeBundle>> {
        let mut slot = self.state.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => Some(result),
            Slot::Pending => {
                *slot = Slot::Pending;
                None
            }
            Slot::Taken => None,
        }
    }
}

struct Job {
    episode: SpanRecord,
    state: Arc<JobState>,
}

/// Bounded queue with one background consumer
pub struct MaterializeWorker {
    sender: Mutex<Option<SyncSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MaterializeWorker {
    /// Start the worker thread.
    ///
    /// `capacity` bounds jobs waiting behind the one in progress; a full
    /// queue blocks `submit`.
    pub fn spawn(materializer: Arc<dyn Materializer>, capacity: usize) -> Result<Self> {
        let (sender, receiver) = sync_channel::<Job>(capacity.max(1));
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(materializer, receiver))?;
        Ok(MaterializeWorker {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queue `episode` for materialization.
    pub fn submit(&self, episode: SpanRecord) -> Result<JobHandle> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(Error::Closed("materialization worker"))?;

        let state = Arc::new(JobState {
            slot: Mutex::new(Slot::Pending),
            done: Condvar::new(),
        });
        let handle = JobHandle {
            episode: episode.scope_name().to_string(),
            state: Arc::clone(&state),
        };
        sender
            .send(Job { episode, state })
            .map_err(|_| Error::WorkerGone)?;
        Ok(handle)
    }

    /// Stop accepting jobs. Queued jobs still run.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Wait for the worker to drain its queue and exit.
    ///
    /// Only meaningful after [`close`](Self::close).
    pub fn join(&self) {
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Materialization worker exited by panic");
            }
        }
    }
}

impl Drop for MaterializeWorker {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(materializer: Arc<dyn Materializer>, receiver: Receiver<Job>) {
    debug!("Materialization worker started");
    for job in receiver {
        let name = job.episode.scope_name().to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| materializer.materialize(&job.episode)));
        let result = match outcome {
            Ok(Ok(bundle)) => Ok(bundle),
            Ok(Err(e)) => {
                error!(episode = %name, "Materialization failed: {}", e);
                Err(match e {
                    Error::Materialization { .. } => e,
                    other => Error::materialization(&name, &other),
                })
            }
            Err(_) => {
                error!(episode = %name, "Materializer panicked");
                Err(Error::Materialization {
                    episode: name,
                    reason: "materializer panicked".to_string(),
                })
            }
        };
        job.state.complete(result);
    }
    debug!("Materialization worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenttrace_core::{Attributes, SpanStatus};
    use std::path::PathBuf;
    use std::time::Duration;

    fn episode(name: &str) -> SpanRecord {
        SpanRecord {
            trace_id: 1,
            span_id: 2,
            parent_span_id: None,
            name: name.to_string(),
            attributes: Attributes::new(),
            start_time: Some(0),
            end_time: Some(1),
            status: SpanStatus::Ok,
        }
    }

    fn bundle_for(episode: &SpanRecord) -> EpisodeBundle {
        EpisodeBundle {
            experiment: "default".to_string(),
            episode: episode.name.clone(),
            step_count: 0,
            directory: PathBuf::from(&episode.name),
            archive: PathBuf::from(format!("{}.zip", episode.name)),
        }
    }

    #[test]
    fn test_job_result_taken_once() {
        let materializer = |ep: &SpanRecord| -> Result<EpisodeBundle> { Ok(bundle_for(ep)) };
        let worker = MaterializeWorker::spawn(Arc::new(materializer), 4).unwrap();

        let handle = worker.submit(episode("ep")).unwrap();
        assert!(handle.wait_until(Instant::now() + Duration::from_secs(10)));
        assert!(handle.is_finished());
        assert_eq!(handle.episode(), "ep");

        let bundle = handle.take_result().unwrap().unwrap();
        assert_eq!(bundle.episode, "ep");
        assert!(handle.take_result().is_none());
        assert!(handle.is_finished());
    }

    #[test]
    fn test_panicking_materializer_reported() {
        let materializer = |_: &SpanRecord| -> Result<EpisodeBundle> { panic!("boom") };
        let worker = MaterializeWorker::spawn(Arc::new(materializer), 1).unwrap();

        let handle = worker.submit(episode("ep")).unwrap();
        assert!(handle.wait_until(Instant::now() + Duration::from_secs(10)));
        match handle.take_result() {
            Some(Err(Error::Materialization { episode, .. })) => assert_eq!(episode, "ep"),
            _ => panic!("expected materialization error"),
        }

        // The worker survives the panic
        let next = worker.submit(episode("ep2")).unwrap();
        assert!(next.wait_until(Instant::now() + Duration::from_secs(10)));
    }

    #[test]
    fn test_submit_after_close_fails() {
        let materializer = |ep: &SpanRecord| -> Result<EpisodeBundle> { Ok(bundle_for(ep)) };
        let worker = MaterializeWorker::spawn(Arc::new(materializer), 1).unwrap();
        worker.close();
        worker.join();

        assert!(matches!(
            worker.submit(episode("late")),
            Err(Error::Closed(_))
        ));
    }

    #[test]
    fn test_jobs_run_in_submission_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let materializer = move |ep: &SpanRecord| -> Result<EpisodeBundle> {
            log.lock().push(ep.name.clone());
            Ok(bundle_for(ep))
        };
        let worker = MaterializeWorker::spawn(Arc::new(materializer), 8).unwrap();

        let handles: Vec<_> = (0..5)
            .map(|i| worker.submit(episode(&format!("ep{}", i))).unwrap())
            .collect();
        worker.close();
        worker.join();

        assert!(handles.iter().all(JobHandle::is_finished));
        assert_eq!(*seen.lock(), vec!["ep0", "ep1", "ep2", "ep3", "ep4"]);
    }
}
