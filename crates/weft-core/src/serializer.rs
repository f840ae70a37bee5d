//! Per-process execution serializer
//!
//! All mutating work for one store in one process runs on a single worker
//! thread, one unit at a time, in submission order. The worker owns a
//! resource (the store's write connection) that never leaves the thread;
//! each unit of work borrows it through a [`Turn`].
//!
//! Two ways in:
//!
//! - [`Serializer::enqueue_async`] queues the work and returns a [`Pending`]
//!   immediately. The result is delivered through a one-shot channel, so
//!   whatever the caller does with it runs off the worker thread.
//! - [`Serializer::enqueue_sync_if_needed`] runs the work inline when the
//!   caller is already inside one of this serializer's turns (a nested call
//!   from work on the worker thread), and otherwise blocks until everything
//!   queued before it and the work itself have finished.
//!
//! Reentrancy is detected with a thread-local stack of active turns keyed
//! by serializer id, so two serializers never mistake each other's turns.
//!
//! A unit that fails or panics reports to its own caller only; the worker
//! moves on to the next unit.

use crate::error::{Result, WeftError};
use crate::observe;
use parking_lot::Mutex;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

static NEXT_SERIALIZER_ID: AtomicU64 = AtomicU64::new(1);

type Job<R> = Box<dyn FnOnce(&Turn<'_, R>) + Send>;

struct ActiveTurn {
    serializer: u64,
    resource: Rc<dyn Any>,
    nesting: Cell<usize>,
}

thread_local! {
    static ACTIVE_TURNS: RefCell<Vec<ActiveTurn>> = const { RefCell::new(Vec::new()) };
}

/// Access to the serializer's resource for the duration of one unit of work.
///
/// `nesting` is 0 for work dequeued by the worker and grows by one for each
/// inline reentrant call.
pub struct Turn<'a, R> {
    resource: &'a R,
    nesting: usize,
}

impl<'a, R> Turn<'a, R> {
    pub fn resource(&self) -> &'a R {
        self.resource
    }

    pub fn nesting(&self) -> usize {
        self.nesting
    }

    pub fn is_nested(&self) -> bool {
        self.nesting > 0
    }
}

/// Result of work queued with [`Serializer::enqueue_async`].
///
/// Await it from async code or call [`Pending::wait`] from a plain thread.
/// Dropping it does not cancel the work.
#[must_use = "dropping a Pending discards the result, not the work"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
    /// Serializer the work was queued on
    serializer: Option<u64>,
}

impl<T> Pending<T> {
    /// A `Pending` that already holds its result
    pub fn ready(result: Result<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            rx,
            serializer: None,
        }
    }

    /// Block the current thread until the work has run.
    ///
    /// Must not be called from inside an async runtime; `.await` instead.
    /// Called from inside a turn of the serializer the work was queued on,
    /// it returns [`WeftError::WaitInsideTurn`] at once: the work cannot
    /// start before that turn ends. The work itself stays queued.
    pub fn wait(self) -> Result<T> {
        if let Some(id) = self.serializer {
            let own_turn =
                ACTIVE_TURNS.with(|turns| turns.borrow().iter().any(|t| t.serializer == id));
            if own_turn {
                return Err(WeftError::WaitInsideTurn);
            }
        }
        self.rx
            .blocking_recv()
            .unwrap_or(Err(WeftError::SerializerClosed))
    }

    /// Take the result if the work already finished
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WeftError::SerializerClosed)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(WeftError::SerializerClosed)))
    }
}

/// FIFO single-worker executor owning a resource of type `R`
pub struct Serializer<R: 'static> {
    id: u64,
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Job<R>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<R: 'static> Serializer<R> {
    /// Spawn the worker thread and build its resource on it.
    ///
    /// `init` runs on the worker thread; its error is returned here and no
    /// worker is left running.
    pub fn spawn<F>(name: impl Into<String>, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let id = NEXT_SERIALIZER_ID.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<R>>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        let thread_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let resource = match init() {
                    Ok(resource) => {
                        let _ = ready_tx.send(Ok(()));
                        Rc::new(resource)
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Some(job) = rx.blocking_recv() {
                    ACTIVE_TURNS.with(|turns| {
                        turns.borrow_mut().push(ActiveTurn {
                            serializer: id,
                            resource: resource.clone() as Rc<dyn Any>,
                            nesting: Cell::new(0),
                        })
                    });

                    let turn = Turn {
                        resource: resource.as_ref(),
                        nesting: 0,
                    };
                    job(&turn);

                    ACTIVE_TURNS.with(|turns| turns.borrow_mut().pop());
                }

                tracing::debug!(serializer = %thread_name, "Serializer worker exiting");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(WeftError::WorkPanicked(format!(
                    "serializer '{}' panicked during initialization",
                    name
                )));
            }
        }

        Ok(Self {
            id,
            name,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is currently running one of this
    /// serializer's turns
    pub fn is_in_turn(&self) -> bool {
        ACTIVE_TURNS.with(|turns| turns.borrow().iter().any(|t| t.serializer == self.id))
    }

    /// Queue `work` behind everything already submitted and return at once
    pub fn enqueue_async<T, F>(&self, work: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&Turn<'_, R>) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued_at = Instant::now();
        let name = self.name.clone();

        let job: Job<R> = Box::new(move |turn: &Turn<'_, R>| {
            observe::record_serializer_wait(queued_at.elapsed());
            let result = run_guarded(&name, || work(turn));
            // Receiver may be gone; the work still ran
            let _ = tx.send(result);
        });

        match self.submit(job) {
            Ok(()) => Pending {
                rx,
                serializer: Some(self.id),
            },
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Run `work` inline when already inside this serializer's turn,
    /// otherwise queue it and block until it completes
    pub fn enqueue_sync_if_needed<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Turn<'_, R>) -> Result<T> + Send + 'static,
    {
        if let Some((resource, nesting)) = self.enter_nested() {
            let turn = Turn {
                resource: resource.as_ref(),
                nesting,
            };
            let result = run_guarded(&self.name, || work(&turn));
            self.exit_nested();
            return result;
        }

        let (tx, rx) = std_mpsc::sync_channel::<Result<T>>(1);
        let queued_at = Instant::now();
        let name = self.name.clone();

        let job: Job<R> = Box::new(move |turn: &Turn<'_, R>| {
            observe::record_serializer_wait(queued_at.elapsed());
            let result = run_guarded(&name, || work(turn));
            let _ = tx.send(result);
        });
        self.submit(job)?;

        rx.recv().unwrap_or(Err(WeftError::SerializerClosed))
    }

    /// Stop accepting work, let queued work drain and join the worker.
    ///
    /// Called from inside a turn it only closes the queue; the worker exits
    /// after the current turn and whatever was queued before it.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        if self.is_in_turn() {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(serializer = %self.name, "Serializer worker panicked");
            }
        }
    }

    fn submit(&self, job: Job<R>) -> Result<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| WeftError::SerializerClosed),
            None => Err(WeftError::SerializerClosed),
        }
    }

    fn enter_nested(&self) -> Option<(Rc<R>, usize)> {
        ACTIVE_TURNS.with(|turns| {
            let turns = turns.borrow();
            let active = turns.iter().rev().find(|t| t.serializer == self.id)?;
            let resource = Rc::downcast::<R>(active.resource.clone()).ok()?;
            let nesting = active.nesting.get() + 1;
            active.nesting.set(nesting);
            Some((resource, nesting))
        })
    }

    fn exit_nested(&self) {
        ACTIVE_TURNS.with(|turns| {
            if let Some(active) = turns.borrow().iter().rev().find(|t| t.serializer == self.id) {
                active.nesting.set(active.nesting.get().saturating_sub(1));
            }
        })
    }
}

impl<R: 'static> Drop for Serializer<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_guarded<T>(name: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(serializer = %name, panic = %message, "Work panicked");
            Err(WeftError::WorkPanicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn counter_serializer() -> Arc<Serializer<RefCell<Vec<u32>>>> {
        Arc::new(Serializer::spawn("test-serial", || Ok(RefCell::new(Vec::new()))).unwrap())
    }

    #[test]
    fn test_async_work_runs_in_submission_order() {
        let serializer = counter_serializer();

        let pending: Vec<_> = (0..50u32)
            .map(|i| {
                serializer.enqueue_async(move |turn| {
                    turn.resource().borrow_mut().push(i);
                    Ok(())
                })
            })
            .collect();
        for p in pending {
            p.wait().unwrap();
        }

        let seen = serializer
            .enqueue_sync_if_needed(|turn| Ok(turn.resource().borrow().clone()))
            .unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_sync_call_inside_turn_runs_inline() {
        let serializer = counter_serializer();
        let inner = serializer.clone();

        let nesting = serializer
            .enqueue_async(move |turn| {
                assert_eq!(turn.nesting(), 0);
                // Would deadlock if queued behind the running turn
                inner.enqueue_sync_if_needed(|nested| {
                    nested.resource().borrow_mut().push(1);
                    Ok(nested.nesting())
                })
            })
            .wait()
            .unwrap();

        assert_eq!(nesting, 1);
        assert!(!serializer.is_in_turn());
    }

    #[test]
    fn test_waiting_inside_own_turn_fails_instead_of_hanging() {
        let serializer = counter_serializer();
        let inner = serializer.clone();

        let outcome = serializer
            .enqueue_async(move |_| {
                let queued = inner.enqueue_async(|turn| {
                    turn.resource().borrow_mut().push(7);
                    Ok(())
                });
                Ok(queued.wait())
            })
            .wait()
            .unwrap();
        assert!(matches!(outcome, Err(WeftError::WaitInsideTurn)));

        // The queued work still ran after the outer turn
        let seen = serializer
            .enqueue_sync_if_needed(|turn| Ok(turn.resource().borrow().clone()))
            .unwrap();
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn test_sync_call_from_other_thread_waits_for_prior_work() {
        let serializer = counter_serializer();
        let finished = Arc::new(AtomicUsize::new(0));

        let slow_finished = finished.clone();
        let _slow = serializer.enqueue_async(move |_| {
            std::thread::sleep(Duration::from_millis(50));
            slow_finished.store(1, Ordering::SeqCst);
            Ok(())
        });

        let observed = serializer
            .enqueue_sync_if_needed({
                let finished = finished.clone();
                move |_| Ok(finished.load(Ordering::SeqCst))
            })
            .unwrap();
        assert_eq!(observed, 1);
    }

    #[test]
    fn test_failure_does_not_stop_the_queue() {
        let serializer = counter_serializer();

        let failed = serializer.enqueue_async(|_| -> Result<()> {
            Err(WeftError::Config("boom".into()))
        });
        let panicked = serializer.enqueue_async(|_| -> Result<()> { panic!("kaboom") });
        let ok = serializer.enqueue_async(|_| Ok(42));

        assert!(matches!(failed.wait(), Err(WeftError::Config(_))));
        match panicked.wait() {
            Err(WeftError::WorkPanicked(msg)) => assert!(msg.contains("kaboom")),
            other => panic!("expected WorkPanicked, got {:?}", other.map(|_| ())),
        }
        assert_eq!(ok.wait().unwrap(), 42);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_closed() {
        let serializer = counter_serializer();
        serializer.shutdown();

        assert!(matches!(
            serializer.enqueue_async(|_| Ok(())).wait(),
            Err(WeftError::SerializerClosed)
        ));
        assert!(matches!(
            serializer.enqueue_sync_if_needed(|_| Ok(())),
            Err(WeftError::SerializerClosed)
        ));
    }

    #[test]
    fn test_init_failure_is_returned() {
        let result = Serializer::<()>::spawn("broken", || Err(WeftError::Config("no".into())));
        assert!(matches!(result, Err(WeftError::Config(_))));
    }

    #[test]
    fn test_turns_of_different_serializers_are_not_confused() {
        let a = counter_serializer();
        let b = counter_serializer();
        let b_inner = b.clone();

        // Inside a's turn, a sync call on b must go through b's queue
        let in_b_turn = a
            .enqueue_async(move |_| b_inner.enqueue_sync_if_needed(|turn| Ok(turn.nesting())))
            .wait()
            .unwrap();
        assert_eq!(in_b_turn, 0);
    }

    #[tokio::test]
    async fn test_pending_can_be_awaited() {
        let serializer = counter_serializer();
        let value = serializer.enqueue_async(|_| Ok("done")).await.unwrap();
        assert_eq!(value, "done");
    }
}
