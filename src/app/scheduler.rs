use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::config::Config;
use crate::store::SettingsStore;

use super::format::{NO_NEW_EPISODES, summary_lines};
use super::worker::{RefreshCompletion, RefreshEngine, RefreshTrigger, RefreshWorker};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// When the next automatic refresh is due: once after the startup delay, then every
/// `interval` after the previous automatic trigger.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Schedule {
    next_due: Instant,
    interval: Duration,
    startup_pending: bool,
}

impl Schedule {
    pub(crate) fn new(now: Instant, startup_delay: Duration, interval: Duration) -> Self {
        Self {
            next_due: now + startup_delay,
            interval,
            startup_pending: true,
        }
    }

    pub(crate) fn take_due(&mut self, now: Instant) -> Option<RefreshTrigger> {
        if now < self.next_due {
            return None;
        }
        let trigger = if self.startup_pending {
            RefreshTrigger::Startup
        } else {
            RefreshTrigger::Timer
        };
        self.startup_pending = false;
        self.next_due = now + self.interval;
        Some(trigger)
    }

    pub(crate) fn time_until_due(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchInput {
    Refresh,
    Quit,
}

pub(crate) fn parse_watch_input(line: &str) -> WatchInput {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => WatchInput::Quit,
        _ => WatchInput::Refresh,
    }
}

pub(crate) fn run_watch(
    engine: Arc<RefreshEngine>,
    settings: &SettingsStore,
    config: &Config,
) -> Result<()> {
    let (completion_tx, completion_rx) = mpsc::channel();
    let worker = RefreshWorker::spawn(engine, completion_tx)
        .context("failed to start refresh worker")?;
    let input = spawn_input_reader().context("failed to start input reader")?;
    let mut schedule = Schedule::new(
        Instant::now(),
        config.startup_delay,
        config.refresh_interval,
    );

    println!(
        "Watching subscriptions (every {} min). Press Enter to refresh now, `q` to quit.",
        config.refresh_interval.as_secs() / 60
    );

    loop {
        if let Some(trigger) = schedule.take_due(Instant::now()) {
            worker.trigger(trigger);
        }

        match input.try_recv() {
            Ok(WatchInput::Quit) => break,
            Ok(WatchInput::Refresh) => {
                if worker.trigger(RefreshTrigger::Manual) {
                    println!("Refreshing...");
                } else {
                    println!("A refresh is already running.");
                }
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }

        let wait = schedule.time_until_due(Instant::now()).min(POLL_INTERVAL);
        match completion_rx.recv_timeout(wait) {
            Ok(completion) => report_completion(&completion, settings),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("refresh worker stopped unexpectedly"),
        }
    }

    if worker.is_busy() {
        println!("Stopping after the current subscription...");
    }
    drop(worker);
    Ok(())
}

/// Prints the notifications for a finished pass and stamps `settings.json` when the
/// results were saved.
pub(crate) fn report_completion(completion: &RefreshCompletion, settings: &SettingsStore) {
    let lines = summary_lines(&completion.summary);
    let routine = completion.trigger != RefreshTrigger::Manual && lines == [NO_NEW_EPISODES];
    if !routine {
        for line in lines {
            println!("{line}");
        }
    }
    if completion.summary.error.is_some() {
        return;
    }
    if let Err(err) = settings.record_check(completion.finished_at) {
        warn!(error = %err, "failed to record last check time");
    }
}

fn spawn_input_reader() -> io::Result<Receiver<WatchInput>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(parse_watch_input(&line)).is_err() {
                    break;
                }
            }
            info!("stdin closed; manual refresh unavailable");
        })?;
    Ok(rx)
}
