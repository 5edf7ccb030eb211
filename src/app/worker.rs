use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::detect::ChangeDetector;
use crate::http::PageSource;
use crate::model::Subscription;
use crate::page::EpisodePageParser;
use crate::store::{RefreshSummary, StoreError, SubscriptionOutcome, SubscriptionStore};

/// The store together with the fetch/parse/detect pipeline it refreshes through.
pub(crate) struct RefreshEngine {
    pub(crate) store: Arc<SubscriptionStore>,
    source: Arc<dyn PageSource>,
    parser: EpisodePageParser,
    detector: ChangeDetector,
}

impl RefreshEngine {
    pub(crate) fn new(store: Arc<SubscriptionStore>, source: Arc<dyn PageSource>) -> Self {
        Self {
            store,
            source,
            parser: EpisodePageParser,
            detector: ChangeDetector,
        }
    }

    pub(crate) fn refresh_all(&self) -> RefreshSummary {
        self.store
            .refresh_all(self.source.as_ref(), &self.parser, &self.detector)
    }

    pub(crate) fn refresh_all_cancellable(&self, cancel: &AtomicBool) -> RefreshSummary {
        self.store
            .refresh_all_cancellable(self.source.as_ref(), &self.parser, &self.detector, cancel)
    }

    pub(crate) fn refresh_one(&self, url: &str) -> Result<(String, SubscriptionOutcome), StoreError> {
        self.store
            .refresh_one(url, self.source.as_ref(), &self.parser, &self.detector)
    }

    pub(crate) fn add(&self, url: &str) -> Result<Subscription, StoreError> {
        self.store.add(url, self.source.as_ref(), &self.parser)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshTrigger {
    Startup,
    Manual,
    Timer,
}

#[derive(Debug)]
pub(crate) struct RefreshCompletion {
    pub(crate) trigger: RefreshTrigger,
    pub(crate) summary: RefreshSummary,
    pub(crate) finished_at: DateTime<Local>,
}

/// Single background thread running one refresh pass at a time. Triggers that arrive
/// while a pass is running are dropped.
pub(crate) struct RefreshWorker {
    jobs: Option<Sender<RefreshTrigger>>,
    in_flight: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    pub(crate) fn spawn(
        engine: Arc<RefreshEngine>,
        completions: Sender<RefreshCompletion>,
    ) -> io::Result<Self> {
        let (jobs, job_rx) = mpsc::channel::<RefreshTrigger>();
        let in_flight = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));

        let worker_in_flight = Arc::clone(&in_flight);
        let worker_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("refresh".to_string())
            .spawn(move || {
                while let Ok(trigger) = job_rx.recv() {
                    info!(?trigger, "refresh started");
                    let summary = engine.refresh_all_cancellable(&worker_cancel);
                    info!(?trigger, has_updates = summary.has_updates, "refresh finished");
                    // Cleared before reporting so the receiver can trigger again right away.
                    worker_in_flight.store(false, Ordering::SeqCst);
                    let completion = RefreshCompletion {
                        trigger,
                        summary,
                        finished_at: Local::now(),
                    };
                    if completions.send(completion).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            jobs: Some(jobs),
            in_flight,
            cancel,
            handle: Some(handle),
        })
    }

    /// Starts a pass unless one is already running. Returns whether a pass was started.
    pub(crate) fn trigger(&self, trigger: RefreshTrigger) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?trigger, "refresh already running; trigger coalesced");
            return false;
        }

        let sent = self
            .jobs
            .as_ref()
            .is_some_and(|jobs| jobs.send(trigger).is_ok());
        if !sent {
            warn!(?trigger, "refresh worker is gone");
            self.in_flight.store(false, Ordering::SeqCst);
        }
        sent
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
