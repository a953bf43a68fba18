//! Watch mode re-runs a designated subset of the task graph whenever the
//! monitored files change.
//!
//! 1. **File watcher**: the `notify` crate reports filesystem events for
//!    every monitored root. Events are filtered against the watch patterns
//!    and the exclusion set, so generated files living next to the sources
//!    (such as the version marker) never trigger a rebuild of themselves.
//! 2. **Debouncing**: a relevant event opens a quiet window, every further
//!    event resets it. Only when the window elapses does the subset run.
//! 3. **Triggering**: the [`Scheduler`] runs the subset plan on the watch
//!    thread. Events arriving meanwhile stay queued and are folded into the
//!    next quiet window, so runs never overlap.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::time::{Duration, Instant};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::engine::{CancelToken, ExecutionPlan, RunReport, Scheduler, TaskGraph};
use crate::error::WatchError;

/// Default quiet window after the last event.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// How often an idle session checks for cancellation.
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    Debouncing,
    Triggering,
}

/// The debounce state machine, driven by explicit timestamps.
#[derive(Debug)]
pub(crate) struct Debounce {
    window: Duration,
    state: WatchState,
    deadline: Option<Instant>,
    pending: bool,
}

impl Debounce {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            state: WatchState::Idle,
            deadline: None,
            pending: false,
        }
    }

    pub(crate) fn state(&self) -> WatchState {
        self.state
    }

    pub(crate) fn start(&mut self) {
        if self.state == WatchState::Idle {
            self.state = WatchState::Watching;
        }
    }

    pub(crate) fn on_event(&mut self, now: Instant) {
        match self.state {
            WatchState::Watching | WatchState::Debouncing => {
                self.state = WatchState::Debouncing;
                self.deadline = Some(now + self.window);
            }
            WatchState::Triggering => self.pending = true,
            WatchState::Idle => {}
        }
    }

    /// Moves to `Triggering` once the quiet window has elapsed.
    pub(crate) fn poll(&mut self, now: Instant) -> bool {
        match (self.state, self.deadline) {
            (WatchState::Debouncing, Some(deadline)) if now >= deadline => {
                self.state = WatchState::Triggering;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Time left in the quiet window, if one is open.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Ends a trigger. Events seen while triggering open a new window.
    pub(crate) fn finish(&mut self, now: Instant) {
        if self.state != WatchState::Triggering {
            return;
        }

        if std::mem::take(&mut self.pending) {
            self.state = WatchState::Debouncing;
            self.deadline = Some(now + self.window);
        } else {
            self.state = WatchState::Watching;
        }
    }
}

/// Decides which filesystem events are relevant.
#[derive(Debug)]
pub(crate) struct WatchFilter {
    roots: Vec<Utf8PathBuf>,
    patterns: Vec<Pattern>,
    exclusions: Vec<Pattern>,
}

impl WatchFilter {
    pub(crate) fn new(
        root: &Utf8Path,
        watch: &[String],
        exclude: &[String],
    ) -> Result<Self, WatchError> {
        let root = root.canonicalize_utf8()?;

        let mut roots = HashSet::new();
        let mut patterns = Vec::new();
        for glob in watch {
            let (path, pattern) = resolve_watch_path(&root, glob)?;
            roots.insert(path);
            patterns.push(pattern);
        }

        let exclusions = exclude
            .iter()
            .map(|glob| exclusion_pattern(&root, glob))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            roots: collapse_watch_paths(roots),
            patterns,
            exclusions,
        })
    }

    pub(crate) fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    pub(crate) fn matches(&self, path: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path(path))
            && !self.exclusions.iter().any(|p| p.matches_path(path))
    }

    pub(crate) fn is_relevant(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event.paths.iter().any(|path| self.matches(path))
    }
}

/// Settings for a [`WatchSession`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub root: Utf8PathBuf,
    /// Globs relative to `root` which should trigger a rebuild.
    pub watch: Vec<String>,
    /// Globs relative to `root` which must never trigger a rebuild.
    pub exclude: Vec<String>,
    pub debounce: Duration,
}

/// The live state of watch mode: the filesystem subscription, the debounce
/// timer and the plan of the tasks to re-run. Dropping the session ends the
/// subscription.
pub struct WatchSession {
    _watcher: Option<RecommendedWatcher>,
    events: Receiver<notify::Result<Event>>,
    filter: WatchFilter,
    debounce: Debounce,
    plan: ExecutionPlan,
}

impl WatchSession {
    pub fn start(options: &WatchOptions, plan: ExecutionPlan) -> Result<Self, WatchError> {
        let filter = WatchFilter::new(&options.root, &options.watch, &options.exclude)?;

        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        for path in filter.roots() {
            tracing::info!("watching {}", path);
            watcher.watch(path.as_std_path(), RecursiveMode::Recursive)?;
        }

        Ok(Self::with_receiver(
            Some(watcher),
            rx,
            filter,
            options.debounce,
            plan,
        ))
    }

    fn with_receiver(
        watcher: Option<RecommendedWatcher>,
        events: Receiver<notify::Result<Event>>,
        filter: WatchFilter,
        window: Duration,
        plan: ExecutionPlan,
    ) -> Self {
        let mut debounce = Debounce::new(window);
        debounce.start();

        Self {
            _watcher: watcher,
            events,
            filter,
            debounce,
            plan,
        }
    }

    pub fn state(&self) -> WatchState {
        self.debounce.state()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Ends the subscription.
    pub fn stop(self) {
        tracing::info!("watch session stopped");
    }

    /// Blocks until the quiet window after a relevant change elapses.
    /// Returns `false` once `cancel` has been triggered.
    fn next_trigger(&mut self, cancel: &CancelToken) -> Result<bool, WatchError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let now = Instant::now();
            if self.debounce.poll(now) {
                return Ok(true);
            }

            let timeout = self
                .debounce
                .remaining(now)
                .map_or(IDLE_POLL, |left| left.min(IDLE_POLL));

            match self.events.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    if self.filter.is_relevant(&event) {
                        tracing::debug!("change in {:?}", event.paths);
                        self.debounce.on_event(Instant::now());
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(WatchError::Disconnected),
            }
        }
    }
}

/// Runs the watch loop: waits for a debounced change, runs the session's
/// plan, reports, and goes back to watching.
pub struct WatchController {
    scheduler: Scheduler,
    session: WatchSession,
}

impl WatchController {
    pub fn new(scheduler: Scheduler, session: WatchSession) -> Self {
        Self { scheduler, session }
    }

    pub fn session(&self) -> &WatchSession {
        &self.session
    }

    /// Loops until the scheduler's cancel token is triggered or the
    /// subscription fails. Every run is reported through `on_report`,
    /// whatever its outcome.
    pub fn run<F>(&mut self, graph: &TaskGraph, mut on_report: F) -> Result<(), WatchError>
    where
        F: FnMut(&RunReport),
    {
        let cancel = self.scheduler.cancel_token().clone();

        while self.session.next_trigger(&cancel)? {
            tracing::info!("change detected, re-running tasks...");
            let report = self.scheduler.run(graph, &self.session.plan);
            on_report(&report);
            self.session.debounce.finish(Instant::now());
            tracing::info!("watching for changes...");
        }

        Ok(())
    }

    pub fn into_session(self) -> WatchSession {
        self.session
    }
}

/// Splits a glob relative to `root` into a static directory (for watching)
/// and an absolute pattern (for matching).
fn resolve_watch_path(root: &Utf8Path, glob: &str) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = Utf8Path::new(glob);

    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let absolute = root.join(root_part).canonicalize_utf8()?;

    let (watch_root, pattern) = if !suffix_part.as_str().is_empty() {
        // "src/**/*.js" -> watch "src", match the whole glob
        (absolute.clone(), absolute_pattern(&absolute, suffix_part.as_str())?)
    } else if absolute.is_file() {
        // "package.json" -> watch the parent so atomic saves are seen
        let parent = absolute.parent().unwrap_or(&absolute).to_path_buf();
        (parent, Pattern::new(&Pattern::escape(absolute.as_str()))?)
    } else {
        // "src" -> watch and match everything below it
        (absolute.clone(), absolute_pattern(&absolute, "**")?)
    };

    Ok((watch_root, pattern))
}

/// Anchors a relative glob at `dir`, which is matched literally.
fn absolute_pattern(dir: &Utf8Path, glob: &str) -> Result<Pattern, glob::PatternError> {
    Pattern::new(&format!("{}/{}", Pattern::escape(dir.as_str()), glob))
}

/// Anchors an exclusion glob the way events report paths: absolute globs
/// are kept, relative ones are joined to `root`, `.` components are dropped
/// and a literal path is canonicalized when it exists.
fn exclusion_pattern(root: &Utf8Path, glob: &str) -> Result<Pattern, glob::PatternError> {
    let path: Utf8PathBuf = Utf8Path::new(glob)
        .components()
        .filter(|c| !matches!(c, Utf8Component::CurDir))
        .collect();

    if path.is_absolute() {
        let literal = !glob.contains(['*', '?', '[']);
        let path = match path.canonicalize_utf8() {
            Ok(canonical) if literal => canonical,
            _ => path,
        };
        return Pattern::new(path.as_str());
    }

    absolute_pattern(root, path.as_str())
}

/// Reduces a set of paths to the minimal set of recursive watch roots.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
