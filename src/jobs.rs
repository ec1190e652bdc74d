//! Coalescing job queue.
//!
//! One logical queue drains job keys FIFO on a single worker task, so at
//! most one job per key (and in fact one job overall) runs at a time.
//! Enqueue semantics per key: while a job is still queued, a new enqueue
//! replaces its payload in place and shares the same pending result; while a
//! job is running, a new enqueue parks one payload to run right after the
//! current run finishes. Waiters receive a clone of the run's result.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::debug;

/// Job outcome delivered to waiters. The error side is a plain message so
/// results stay cloneable across waiters.
pub type JobResult<R> = Result<R, String>;

type Waiter<R> = oneshot::Sender<JobResult<R>>;
type RunnerFuture<R> = Pin<Box<dyn Future<Output = JobResult<R>> + Send>>;
type Runner<J, R> = Arc<dyn Fn(String, J) -> RunnerFuture<R> + Send + Sync>;

enum Slot<J, R> {
    Queued {
        job: J,
        waiters: Vec<Waiter<R>>,
    },
    Running {
        waiters: Vec<Waiter<R>>,
        /// Payload enqueued while running; runs immediately after this run.
        requeued: Option<(J, Vec<Waiter<R>>)>,
    },
}

struct QueueState<J, R> {
    slots: HashMap<String, Slot<J, R>>,
    fifo: VecDeque<String>,
}

pub struct JobQueue<J, R> {
    state: Arc<Mutex<QueueState<J, R>>>,
    notify: Arc<Notify>,
}

impl<J, R> JobQueue<J, R>
where
    J: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Start the queue with its worker task. The runner is invoked once per
    /// executed job with the job's key and latest payload.
    pub fn new(runner: Runner<J, R>) -> Self {
        let state = Arc::new(Mutex::new(QueueState {
            slots: HashMap::new(),
            fifo: VecDeque::new(),
        }));
        let notify = Arc::new(Notify::new());

        let worker_state = Arc::clone(&state);
        let worker_notify = Arc::clone(&notify);
        tokio::spawn(async move {
            worker_loop(worker_state, worker_notify, runner).await;
        });

        Self { state, notify }
    }

    /// Submit a job under a key. The returned receiver resolves with the
    /// result of the run that ends up executing this payload (or a coalesced
    /// successor of it).
    pub async fn enqueue(&self, key: &str, job: J) -> oneshot::Receiver<JobResult<R>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        match state.slots.get_mut(key) {
            None => {
                state.slots.insert(
                    key.to_string(),
                    Slot::Queued {
                        job,
                        waiters: vec![tx],
                    },
                );
                state.fifo.push_back(key.to_string());
                debug!(key, "job queued");
            }
            Some(Slot::Queued {
                job: pending,
                waiters,
            }) => {
                // Latest payload wins; everyone shares the one pending run.
                *pending = job;
                waiters.push(tx);
                debug!(key, "job payload coalesced");
            }
            Some(Slot::Running { requeued, .. }) => {
                match requeued {
                    Some((pending, waiters)) => {
                        *pending = job;
                        waiters.push(tx);
                    }
                    None => *requeued = Some((job, vec![tx])),
                }
                debug!(key, "job parked behind running job");
            }
        }
        drop(state);
        self.notify.notify_one();
        rx
    }

    /// Number of keys with queued or running work. Used by status output.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.slots.len()
    }
}

async fn worker_loop<J, R>(
    state: Arc<Mutex<QueueState<J, R>>>,
    notify: Arc<Notify>,
    runner: Runner<J, R>,
) where
    J: Send + 'static,
    R: Clone + Send + 'static,
{
    loop {
        let next_key = { state.lock().await.fifo.pop_front() };
        let Some(key) = next_key else {
            notify.notified().await;
            continue;
        };

        let job = {
            let mut st = state.lock().await;
            match st.slots.remove(&key) {
                Some(Slot::Queued { job, waiters }) => {
                    st.slots.insert(
                        key.clone(),
                        Slot::Running {
                            waiters,
                            requeued: None,
                        },
                    );
                    Some(job)
                }
                Some(other) => {
                    st.slots.insert(key.clone(), other);
                    None
                }
                None => None,
            }
        };
        let Some(job) = job else { continue };

        let result = runner(key.clone(), job).await;

        let mut st = state.lock().await;
        if let Some(Slot::Running { waiters, requeued }) = st.slots.remove(&key) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
            if let Some((job, waiters)) = requeued {
                // The parked payload runs next, ahead of other keys.
                st.slots.insert(key.clone(), Slot::Queued { job, waiters });
                st.fifo.push_front(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn counting_runner(
        runs: Arc<Mutex<Vec<String>>>,
        run_count: Arc<AtomicUsize>,
    ) -> Runner<String, String> {
        Arc::new(move |_key, payload: String| {
            let runs = Arc::clone(&runs);
            let run_count = Arc::clone(&run_count);
            Box::pin(async move {
                run_count.fetch_add(1, Ordering::SeqCst);
                runs.lock().await.push(payload.clone());
                Ok(payload)
            })
        })
    }

    #[tokio::test]
    async fn queued_jobs_coalesce_to_latest_payload() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let run_count = Arc::new(AtomicUsize::new(0));

        // Gate the first run so both enqueues land while it is still queued
        // behind another key's in-flight job.
        let (gate_tx, gate_rx) = mpsc::channel::<()>(1);
        let gate_rx = Arc::new(Mutex::new(gate_rx));
        let inner = counting_runner(Arc::clone(&runs), Arc::clone(&run_count));
        let runner: Runner<String, String> = Arc::new(move |key: String, payload: String| {
            let inner = Arc::clone(&inner);
            let gate_rx = Arc::clone(&gate_rx);
            Box::pin(async move {
                if key == "blocker" {
                    gate_rx.lock().await.recv().await;
                }
                inner(key, payload).await
            })
        });

        let queue = JobQueue::new(runner);
        let blocker = queue.enqueue("blocker", "hold".to_string()).await;
        tokio::task::yield_now().await;

        let first = queue.enqueue("doc", "v1".to_string()).await;
        let second = queue.enqueue("doc", "v2".to_string()).await;
        gate_tx.send(()).await.unwrap();

        assert_eq!(blocker.await.unwrap().unwrap(), "hold");
        assert_eq!(first.await.unwrap().unwrap(), "v2");
        assert_eq!(second.await.unwrap().unwrap(), "v2");
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert!(!runs.lock().await.contains(&"v1".to_string()));
    }

    #[tokio::test]
    async fn enqueue_while_running_runs_after_completion_with_latest_payload() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let run_count = Arc::new(AtomicUsize::new(0));

        let (gate_tx, gate_rx) = mpsc::channel::<()>(2);
        let gate_rx = Arc::new(Mutex::new(gate_rx));
        let started = Arc::new(Notify::new());
        let started_tx = Arc::clone(&started);

        let runs_inner = Arc::clone(&runs);
        let count_inner = Arc::clone(&run_count);
        let runner: Runner<String, String> = Arc::new(move |_key, payload: String| {
            let runs = Arc::clone(&runs_inner);
            let run_count = Arc::clone(&count_inner);
            let gate_rx = Arc::clone(&gate_rx);
            let started = Arc::clone(&started_tx);
            Box::pin(async move {
                started.notify_one();
                gate_rx.lock().await.recv().await;
                run_count.fetch_add(1, Ordering::SeqCst);
                runs.lock().await.push(payload.clone());
                Ok(payload)
            })
        });

        let queue = JobQueue::new(runner);
        let first = queue.enqueue("doc", "v1".to_string()).await;
        started.notified().await;

        // First run is in flight; these coalesce into one follow-up run.
        let second = queue.enqueue("doc", "v2".to_string()).await;
        let third = queue.enqueue("doc", "v3".to_string()).await;
        assert_eq!(run_count.load(Ordering::SeqCst), 0);

        gate_tx.send(()).await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "v1");

        gate_tx.send(()).await.unwrap();
        assert_eq!(second.await.unwrap().unwrap(), "v3");
        assert_eq!(third.await.unwrap().unwrap(), "v3");

        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert_eq!(*runs.lock().await, vec!["v1".to_string(), "v3".to_string()]);
    }

    #[tokio::test]
    async fn different_keys_run_in_submission_order() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let run_count = Arc::new(AtomicUsize::new(0));
        let queue = JobQueue::new(counting_runner(Arc::clone(&runs), run_count));

        let a = queue.enqueue("a", "first".to_string()).await;
        let b = queue.enqueue("b", "second".to_string()).await;
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(
            *runs.lock().await,
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_jobs_report_to_all_waiters() {
        let runner: Runner<String, String> = Arc::new(|_key, _payload| {
            Box::pin(async { Err("boom".to_string()) })
        });
        let queue = JobQueue::new(runner);
        let rx = queue.enqueue("doc", "v1".to_string()).await;
        assert_eq!(rx.await.unwrap().unwrap_err(), "boom");
    }
}
