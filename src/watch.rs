// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Change watching.
//!
//! Configuration changes are modelled as __change tokens__. A watcher bumps
//! its token once a burst of file changes has gone quiet, and consumers
//! refresh whenever the token they last saw differs from the current one.
//! Runtime status of services is watched separately by polling launchd.
//!
//! Every watcher runs as a tokio task owned by its handle. Dropping the
//! handle aborts the task.

use crate::service::launchd::{RuntimeStatus, ServiceControl};

use std::{
    collections::BTreeMap,
    fs::metadata,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, trace};

/// Monotonically increasing marker of observed configuration changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeToken(u64);

impl ChangeToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Collapse bursts of change events into single change tokens.
///
/// A new token is only issued after `window` has passed without any further
/// event. While paused, incoming events are dropped outright, since whoever
/// paused the debouncer refreshes on their own afterwards.
#[derive(Debug, Clone)]
pub struct ChangeDebouncer {
    window: Duration,
    last_event: Option<Instant>,
    token: ChangeToken,
    paused: bool,
}

impl ChangeDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
            token: ChangeToken::default(),
            paused: false,
        }
    }

    /// Record change event seen at `now`.
    pub fn record(&mut self, now: Instant) {
        if self.paused {
            trace!("drop change event while paused");
            return;
        }

        self.last_event = Some(now);
    }

    /// Issue new token if pending events have been quiet long enough.
    pub fn poll(&mut self, now: Instant) -> Option<ChangeToken> {
        let last_event = self.last_event?;
        if now.saturating_duration_since(last_event) < self.window {
            return None;
        }

        self.last_event = None;
        self.token.0 += 1;
        Some(self.token)
    }

    /// Stop accepting events, discarding any that are pending.
    pub fn pause(&mut self) {
        self.paused = true;
        self.last_event = None;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Most recently issued token.
    pub fn current(&self) -> ChangeToken {
        self.token
    }
}

/// What a [`ConfigWatcher`] keeps an eye on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// Single file, such as a flake.
    File(PathBuf),

    /// Every `*.toml` file directly inside of a directory.
    TomlDir(PathBuf),
}

impl WatchTarget {
    /// Modification time and size of every watched file.
    ///
    /// Files that vanished or never existed are simply absent.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, (SystemTime, u64)> {
        let paths = match self {
            Self::File(path) => vec![path.clone()],
            Self::TomlDir(dir) => toml_files(dir),
        };

        paths
            .into_iter()
            .filter_map(|path| {
                let meta = metadata(&path).ok()?;
                let modified = meta.modified().ok()?;
                Some((path, (modified, meta.len())))
            })
            .collect()
    }
}

fn toml_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!("{}/*.toml", glob::Pattern::escape(dir.to_string_lossy().as_ref()));
    glob::glob(&pattern)
        .map(|paths| paths.filter_map(|path| path.ok()).collect())
        .unwrap_or_default()
}

/// Debounced watcher of configuration files.
#[derive(Debug)]
pub struct ConfigWatcher {
    receiver: watch::Receiver<ChangeToken>,
    paused: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching target, scanning it every `scan` and issuing tokens
    /// after `window` of quiet.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(target: WatchTarget, window: Duration, scan: Duration) -> Self {
        let (sender, receiver) = watch::channel(ChangeToken::default());
        let paused = Arc::new(AtomicBool::new(false));
        let task_paused = paused.clone();

        let handle = tokio::spawn(async move {
            let mut debouncer = ChangeDebouncer::new(window);
            let mut snapshot = target.snapshot();
            let mut ticker = interval(scan);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let now = Instant::now();

                match (task_paused.load(Ordering::Acquire), debouncer.is_paused()) {
                    (true, false) => debouncer.pause(),
                    (false, true) => debouncer.resume(),
                    _ => {}
                }

                // INVARIANT: Snapshot always advances, so changes made while
                //   paused are never reported once resumed.
                let current = target.snapshot();
                if current != snapshot {
                    debug!("change detected in {target:?}");
                    snapshot = current;
                    debouncer.record(now);
                }

                if let Some(token) = debouncer.poll(now) {
                    if sender.send(token).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            receiver,
            paused,
            handle,
        }
    }

    /// New receiver of change tokens.
    pub fn subscribe(&self) -> watch::Receiver<ChangeToken> {
        self.receiver.clone()
    }

    /// Ignore changes until resumed, e.g. while writing the watched files.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Snapshot of runtime status by service label.
pub type StatusSnapshot = BTreeMap<String, RuntimeStatus>;

/// Periodic poller of service runtime status.
///
/// Only publishes when some status actually changed.
#[derive(Debug)]
pub struct StatusPoller {
    receiver: watch::Receiver<StatusSnapshot>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    /// Start polling every `period`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C>(control: Arc<C>, labels: Vec<String>, period: Duration) -> Self
    where
        C: ServiceControl + Send + Sync + 'static,
    {
        let (sender, receiver) = watch::channel(StatusSnapshot::new());

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let mut snapshot = StatusSnapshot::new();
                for label in &labels {
                    snapshot.insert(label.clone(), control.status(label).await);
                }

                let changed = sender.send_if_modified(|current| {
                    if *current == snapshot {
                        return false;
                    }
                    *current = snapshot;
                    true
                });
                if changed {
                    debug!("service status changed");
                }

                if sender.is_closed() {
                    break;
                }
            }
        });

        Self { receiver, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.receiver.clone()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
