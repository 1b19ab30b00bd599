//! Background execution of pipeline runs.
//!
//! At most one run is active per [`Runner`]; a second `spawn` while one is
//! in flight fails with [`Error::Busy`]. Progress flows one way through a
//! channel, finished by [`Event::Done`]. Cancellation is cooperative: the
//! pipelines check the token between files.

use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::progress::{self, Event, Observer};

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a pipeline needs from its caller besides its inputs.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub observer: &'a dyn Observer,
    pub cancel: &'a CancelToken,
}

impl<'a> RunContext<'a> {
    pub fn new(observer: &'a dyn Observer, cancel: &'a CancelToken) -> Self {
        Self { observer, cancel }
    }

    pub fn report(&self, message: impl AsRef<str>) {
        self.observer.report(message.as_ref());
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct Runner {
    busy: Arc<AtomicBool>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Run `job` on a background thread.
    pub fn spawn<T, F>(&self, job: F) -> Result<RunHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(RunContext<'_>) -> T + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let guard = BusyGuard(self.busy.clone());

        let (observer, events) = progress::channel();
        let cancel = CancelToken::default();
        let job_cancel = cancel.clone();

        let thread = std::thread::spawn(move || {
            let result = job(RunContext::new(&observer, &job_cancel));
            // Free the runner before announcing completion.
            drop(guard);
            observer.done();
            result
        });

        Ok(RunHandle {
            events,
            cancel,
            thread,
        })
    }
}

pub struct RunHandle<T> {
    events: Receiver<Event>,
    cancel: CancelToken,
    thread: JoinHandle<T>,
}

impl<T> RunHandle<T> {
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Forward every event to `observer` until the run is done, then join.
    pub fn drain_into(self, observer: &dyn Observer) -> T {
        for event in self.events.iter() {
            match event {
                Event::Progress(message) => observer.report(&message),
                Event::Done => {
                    observer.done();
                    break;
                }
            }
        }
        self.join()
    }

    pub fn join(self) -> T {
        match self.thread.join() {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
