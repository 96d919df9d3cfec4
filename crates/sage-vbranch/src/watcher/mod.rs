//! Working-tree watcher: forwards file changes to the active virtual branch.
//!
//! Directories are registered one by one (non-recursively) so ignored trees
//! like `node_modules` or `target` never get a watch. Events flow through a
//! bounded channel to a single worker thread; when the worker falls behind,
//! the notify callback blocks instead of dropping events.
//!
//! Adding a watch waits on notify's event thread, which may itself be parked
//! in the callback on a full channel. Watches for new directories are
//! therefore added by a separate registrar thread, never by the worker.

mod handler;
mod ignore;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use sage_core::config::WatcherConfig;

use crate::branch::BranchOps;
use crate::git::GitService;
use handler::{ActiveBranch, EventAction, EventHandler, classify};
pub use ignore::IgnoreMatcher;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Failed to walk {path}: {message}")]
    Walk { path: String, message: String },

    #[error("Invalid ignore pattern {pattern}: {message}")]
    Glob { pattern: String, message: String },

    #[error("Watcher already started")]
    AlreadyStarted,

    #[error("Failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<walkdir::Error> for WatchError {
    fn from(e: walkdir::Error) -> Self {
        Self::Walk {
            path: e
                .path()
                .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string()),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Glob patterns matched against single path components.
    pub ignore: Vec<String>,
    pub channel_capacity: usize,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self::from(&WatcherConfig::default())
    }
}

impl From<&WatcherConfig> for WatcherOptions {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            ignore: config.ignore_patterns(),
            channel_capacity: config.channel_capacity,
        }
    }
}

enum WatchMessage {
    Event(Event),
    Error(notify::Error),
    Stop,
}

struct Running {
    tx: SyncSender<WatchMessage>,
    worker: JoinHandle<()>,
    registrar: JoinHandle<()>,
}

/// Watches a repository working tree and records every modification on the
/// currently active virtual branch.
pub struct BranchWatcher {
    root: PathBuf,
    git: Arc<dyn GitService>,
    branches: Arc<dyn BranchOps>,
    ignore: IgnoreMatcher,
    capacity: usize,
    active: ActiveBranch,
    running: Option<Running>,
}

impl BranchWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        git: Arc<dyn GitService>,
        branches: Arc<dyn BranchOps>,
        options: WatcherOptions,
    ) -> Result<Self, WatchError> {
        let ignore = IgnoreMatcher::new(&options.ignore)?;
        Ok(Self {
            root: root.into(),
            git,
            branches,
            ignore,
            capacity: options.channel_capacity.max(1),
            active: Arc::new(Mutex::new(None)),
            running: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Register every non-ignored directory and start the worker threads.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.running.is_some() {
            return Err(WatchError::AlreadyStarted);
        }

        let (tx, rx) = sync_channel(self.capacity);
        let event_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let msg = match res {
                    Ok(event) => WatchMessage::Event(event),
                    Err(e) => WatchMessage::Error(e),
                };
                // Fails only once the worker has exited
                let _ = event_tx.send(msg);
            },
            notify::Config::default(),
        )?;

        // The worker must be draining before the first watch is added.
        let (dir_tx, dir_rx) = mpsc::channel();
        let handler = EventHandler::new(
            &self.root,
            self.ignore.clone(),
            Arc::clone(&self.git),
            Arc::clone(&self.branches),
            Arc::clone(&self.active),
        );
        let worker = spawn("sage-watcher", move || run_worker(&rx, &handler, &dir_tx))?;

        let dirs = match register_tree(&mut watcher, &self.root, &self.ignore, |_| {}) {
            Ok(dirs) => dirs,
            Err(e) => {
                stop_worker(&tx, worker);
                return Err(e);
            }
        };

        let registrar = Registrar {
            watcher,
            ignore: self.ignore.clone(),
            replay: tx.clone(),
        };
        let registrar = match spawn("sage-watch-dirs", move || registrar.run(&dir_rx)) {
            Ok(handle) => handle,
            Err(e) => {
                stop_worker(&tx, worker);
                return Err(e);
            }
        };

        info!(root = %self.root.display(), dirs, "Watching working tree");
        self.running = Some(Running {
            tx,
            worker,
            registrar,
        });
        Ok(())
    }

    /// Stop watching. Events already queued are processed first. Safe to
    /// call more than once or before `start`.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        stop_worker(&running.tx, running.worker);
        // The worker held the registrar's only sender
        if running.registrar.join().is_err() {
            warn!("Directory registrar panicked");
        }
        info!(root = %self.root.display(), "Stopped watching");
    }

    /// Set the branch that receives changes; `None` drops events until set.
    pub fn set_active_branch(&self, name: Option<&str>) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_deref() != name {
            debug!(from = ?active.as_deref(), to = ?name, "Watcher target changed");
            *active = name.map(str::to_string);
        }
    }

    pub fn active_branch(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for BranchWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>, WatchError> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(WatchError::Spawn)
}

fn stop_worker(tx: &SyncSender<WatchMessage>, worker: JoinHandle<()>) {
    let _ = tx.send(WatchMessage::Stop);
    if worker.join().is_err() {
        warn!("Watcher thread panicked");
    }
}

/// Add a non-recursive watch on `dir` and every non-ignored directory below
/// it, passing each file found to `on_file`. A directory is watched before
/// its entries are listed, so a file is either listed or reported by notify.
fn register_tree(
    watcher: &mut RecommendedWatcher,
    dir: &Path,
    ignore: &IgnoreMatcher,
    mut on_file: impl FnMut(&Path),
) -> Result<usize, WatchError> {
    let mut count = 0;
    let walker = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !ignore.is_ignored_name(e.path()));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            watcher.watch(entry.path(), RecursiveMode::NonRecursive)?;
            count += 1;
        } else if entry.file_type().is_file() {
            on_file(entry.path());
        }
    }
    Ok(count)
}

fn run_worker(rx: &Receiver<WatchMessage>, handler: &EventHandler, new_dirs: &Sender<PathBuf>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            WatchMessage::Stop => break,
            WatchMessage::Error(e) => warn!(error = %e, "File watcher reported an error"),
            WatchMessage::Event(event) => {
                if classify(&event.kind) == EventAction::Register {
                    for path in event.paths.iter().filter(|p| p.is_dir()) {
                        if !handler.ignore().is_ignored_name(path) {
                            let _ = new_dirs.send(path.clone());
                        }
                    }
                }
                handler.handle(&event);
            }
        }
    }
    debug!("Watcher worker exiting");
}

/// Owns the notify watcher and adds watches for directories created after
/// start. Files already inside such a directory were written before any
/// watch could see them, so they are replayed to the worker as modifications.
struct Registrar {
    watcher: RecommendedWatcher,
    ignore: IgnoreMatcher,
    replay: SyncSender<WatchMessage>,
}

impl Registrar {
    fn run(mut self, new_dirs: &Receiver<PathBuf>) {
        while let Ok(dir) = new_dirs.recv() {
            let mut files = Vec::new();
            match register_tree(&mut self.watcher, &dir, &self.ignore, |f| {
                files.push(f.to_path_buf());
            }) {
                Ok(dirs) => {
                    debug!(path = %dir.display(), dirs, files = files.len(), "Watching new directory");
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to watch new directory");
                }
            }
            for file in files {
                let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(file);
                if self.replay.send(WatchMessage::Event(event)).is_err() {
                    return;
                }
            }
        }
        debug!("Directory registrar exiting");
    }
}
