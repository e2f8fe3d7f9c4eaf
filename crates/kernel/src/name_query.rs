//! Bounded object name lookups.
//!
//! `NtQueryObject(ObjectNameInformation)` can block indefinitely on some
//! objects. Queries run on a dedicated thread and the caller waits at most
//! the configured timeout. A worker that overruns is abandoned; it exits on
//! its own once the stuck call returns and it finds nobody listening. At most
//! [`MAX_WORKERS`] threads exist at once, abandoned ones included.

use crate::error::Error;
use crate::native::{self, NtApi, OwnedHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound on name query threads, the active one plus abandoned ones
/// still stuck in the kernel.
pub const MAX_WORKERS: usize = 4;

/// Counts one live worker thread until dropped.
struct Alive(Arc<AtomicUsize>);

impl Drop for Alive {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker {
    requests: Sender<OwnedHandle>,
    replies: Receiver<Result<String, Error>>,
}

impl Worker {
    fn spawn(api: Arc<dyn NtApi>, live: &Arc<AtomicUsize>) -> Result<Self, Error> {
        let (requests, inbox) = mpsc::channel::<OwnedHandle>();
        let (outbox, replies) = mpsc::channel();

        live.fetch_add(1, Ordering::SeqCst);
        let alive = Alive(Arc::clone(live));
        thread::Builder::new()
            .name("object-name-query".into())
            .spawn(move || {
                let _alive = alive;
                for handle in inbox {
                    let result = native::query_object_name(&*api, handle.raw());
                    // The duplicate is ours; close it before reporting back.
                    drop(handle);
                    if outbox.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(Error::Thread)?;

        Ok(Self { requests, replies })
    }
}

pub struct NameQuery {
    api: Arc<dyn NtApi>,
    timeout: Duration,
    worker: Mutex<Option<Worker>>,
    live: Arc<AtomicUsize>,
}

impl NameQuery {
    pub fn new(api: Arc<dyn NtApi>, timeout: Duration) -> Self {
        Self {
            api,
            timeout,
            worker: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Worker threads currently alive, including abandoned ones.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Resolve the name of `handle`, which must be owned by this process.
    ///
    /// The handle is closed by the worker when the query returns, even if
    /// that happens after this call has given up.
    pub fn query(&self, handle: OwnedHandle) -> Result<String, Error> {
        let raw = handle.raw();
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        let worker = match slot.take() {
            Some(worker) => worker,
            None => {
                let live = self.live_workers();
                if live >= MAX_WORKERS {
                    trace!(handle = %raw, live, "all name query workers are stuck");
                    return Err(Error::NameWorkersBusy { stuck: live });
                }
                Worker::spawn(Arc::clone(&self.api), &self.live)?
            }
        };

        if worker.requests.send(handle).is_err() {
            return Err(Error::NameWorkerExited);
        }

        match worker.replies.recv_timeout(self.timeout) {
            Ok(result) => {
                *slot = Some(worker);
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!(handle = %raw, timeout = ?self.timeout, "abandoning stuck name query");
                Err(Error::NameQueryTimedOut {
                    handle: raw,
                    timeout: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                trace!(handle = %raw, "name query worker disconnected");
                Err(Error::NameWorkerExited)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeNt;
    use crate::native::RawHandle;
    use std::time::Instant;

    #[test]
    fn returns_name_and_closes_duplicate() {
        let fake = FakeNt::new();
        let local = fake.add_local(RawHandle(0x40), "Event", r"\BaseNamedObjects\Ready");
        let api: Arc<dyn NtApi> = fake.clone();
        let names = NameQuery::new(Arc::clone(&api), Duration::from_secs(5));

        let name = names.query(OwnedHandle::new(api, local)).unwrap();
        assert_eq!(name, r"\BaseNamedObjects\Ready");
        assert!(fake.is_closed(local));
    }

    #[test]
    fn stuck_query_times_out_and_worker_is_replaced() {
        let fake = FakeNt::new();
        let slow = fake.add_local(RawHandle(0x40), "Event", r"\Slow");
        let fast = fake.add_local(RawHandle(0x44), "Event", r"\Fast");
        fake.slow_name(r"\Slow", Duration::from_millis(400));
        let api: Arc<dyn NtApi> = fake.clone();
        let names = NameQuery::new(Arc::clone(&api), Duration::from_millis(50));

        let err = names
            .query(OwnedHandle::new(Arc::clone(&api), slow))
            .unwrap_err();
        assert!(matches!(err, Error::NameQueryTimedOut { .. }));

        let name = names.query(OwnedHandle::new(api, fast)).unwrap();
        assert_eq!(name, r"\Fast");

        thread::sleep(Duration::from_millis(600));
        assert!(fake.is_closed(slow));
    }

    #[test]
    fn abandoned_workers_are_capped() {
        let fake = FakeNt::new();
        fake.slow_name(r"\Slow", Duration::from_millis(800));
        let api: Arc<dyn NtApi> = fake.clone();
        let names = NameQuery::new(Arc::clone(&api), Duration::from_millis(50));

        let mut timed_out = 0;
        let mut busy = 0;
        for index in 0..(MAX_WORKERS + 6) {
            let local = fake.add_local(RawHandle(0x100 + index * 4), "Event", r"\Slow");
            match names.query(OwnedHandle::new(Arc::clone(&api), local)) {
                Err(Error::NameQueryTimedOut { .. }) => timed_out += 1,
                Err(Error::NameWorkersBusy { .. }) => busy += 1,
                other => panic!("unexpected result: {other:?}"),
            }
            assert!(names.live_workers() <= MAX_WORKERS);
        }
        assert_eq!(timed_out, MAX_WORKERS);
        assert_eq!(busy, 6);
        assert_eq!(fake.name_queries(), MAX_WORKERS);

        let deadline = Instant::now() + Duration::from_secs(5);
        while names.live_workers() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(names.live_workers(), 0);
        assert_eq!(fake.leaked(), 0);

        let fast = fake.add_local(RawHandle(0x40), "Event", r"\Fast");
        assert_eq!(names.query(OwnedHandle::new(api, fast)).unwrap(), r"\Fast");
    }
}
