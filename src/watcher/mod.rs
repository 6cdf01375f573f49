//! The local file-watching and diffing pipeline.
//!
//! Watches a project directory recursively, debounces bursts of writes per
//! path, waits for a file to stop changing before reading it, classifies
//! binary vs. text by extension, and emits [`FileChange`] records the agent
//! forwards to the relay. Grounded in the same `notify`-crate idiom used
//! elsewhere in the pack: a closure-based watcher feeding a channel rather
//! than a polling loop.

mod diff;
mod ignore;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::error::WatcherError;
use crate::ids::now_ms;
use crate::protocol::{ChangeType, FileChange};

const DEBOUNCE_MS: u64 = 300;
const STABILITY_WAIT_MS: u64 = 200;
const STABILITY_POLL_MS: u64 = 50;
const STABILITY_MAX_POLLS: u32 = 40;
const CACHE_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy)]
enum RawKind {
    Add,
    Modify,
    Remove,
}

/// Bounded, insertion-order content cache so large trees don't grow the
/// watcher's memory footprint without limit.
struct ContentCache {
    order: VecDeque<PathBuf>,
    content: HashMap<PathBuf, String>,
}

impl ContentCache {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            content: HashMap::new(),
        }
    }

    fn get(&self, path: &Path) -> Option<&String> {
        self.content.get(path)
    }

    fn insert(&mut self, path: PathBuf, content: String) {
        if !self.content.contains_key(&path) {
            self.order.push_back(path.clone());
            if self.order.len() > CACHE_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.content.remove(&oldest);
                }
            }
        }
        self.content.insert(path, content);
    }

    fn remove(&mut self, path: &Path) -> Option<String> {
        self.order.retain(|p| p != path);
        self.content.remove(path)
    }
}

/// Watches one project root and reports changes through an unbounded
/// channel. Construct with [`FileWatcher::new`], then call [`FileWatcher::start`].
pub struct FileWatcher {
    root: PathBuf,
    author: String,
    device_id: String,
    cache: Mutex<ContentCache>,
    debounce: Mutex<HashMap<PathBuf, JoinHandle<()>>>,
    watcher: StdMutex<Option<RecommendedWatcher>>,
    on_change: mpsc::UnboundedSender<FileChange>,
}

impl FileWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        author: String,
        device_id: String,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FileChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Arc::new(Self {
            root: root.into(),
            author,
            device_id,
            cache: Mutex::new(ContentCache::new()),
            debounce: Mutex::new(HashMap::new()),
            watcher: StdMutex::new(None),
            on_change: tx,
        });
        (watcher, rx)
    }

    /// Performs the initial recursive scan (populating the content cache
    /// without emitting any changes), then installs the live watcher.
    /// Nothing is reported for files that already existed before this
    /// call resolved.
    pub async fn start(self: &Arc<Self>) -> Result<(), WatcherError> {
        let root = self.root.clone();
        self.initial_scan(&root).await;
        let raw_rx = self.spawn_watcher()?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_raw_loop(raw_rx).await;
        });
        Ok(())
    }

    async fn initial_scan(&self, root: &Path) {
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    eprintln!("⚠️  watcher: cannot read {}: {err}", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if ignore::is_ignored(&path) {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                } else if !ignore::is_binary_path(&path) {
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        self.cache.lock().await.insert(path, content);
                    }
                }
            }
        }
    }

    fn spawn_watcher(
        self: &Arc<Self>,
    ) -> Result<mpsc::UnboundedReceiver<notify::Event>, WatcherError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        *self.watcher.lock().unwrap() = Some(watcher);
        Ok(raw_rx)
    }

    async fn run_raw_loop(self: Arc<Self>, mut raw_rx: mpsc::UnboundedReceiver<notify::Event>) {
        while let Some(event) = raw_rx.recv().await {
            self.on_raw_event(event).await;
        }
    }

    async fn on_raw_event(self: &Arc<Self>, event: notify::Event) {
        let kind = match event.kind {
            notify::EventKind::Create(_) => RawKind::Add,
            notify::EventKind::Modify(_) => RawKind::Modify,
            notify::EventKind::Remove(_) => RawKind::Remove,
            _ => return,
        };
        for path in event.paths {
            if ignore::is_ignored(&path) {
                continue;
            }
            self.schedule(path, kind).await;
        }
    }

    /// Replaces any pending timer for this path — only the latest event
    /// kind for a path survives the debounce window.
    async fn schedule(self: &Arc<Self>, path: PathBuf, kind: RawKind) {
        let mut debounce = self.debounce.lock().await;
        if let Some(handle) = debounce.remove(&path) {
            handle.abort();
        }
        let this = Arc::clone(self);
        let debounce_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
            this.process(debounce_path, kind).await;
        });
        debounce.insert(path, handle);
    }

    async fn process(self: &Arc<Self>, path: PathBuf, kind: RawKind) {
        self.debounce.lock().await.remove(&path);
        let rel = path
            .strip_prefix(&self.root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let binary = ignore::is_binary_path(&path);

        let change = match kind {
            RawKind::Remove => self.build_remove(&path, &rel, binary).await,
            RawKind::Add | RawKind::Modify => {
                if !wait_stable(&path).await {
                    return;
                }
                if binary {
                    self.build_binary_change(&path, &rel, kind).await
                } else {
                    self.build_text_change(&path, &rel).await
                }
            }
        };

        if let Some(change) = change {
            let _ = self.on_change.send(change);
        }
    }

    async fn build_remove(&self, path: &Path, rel: &str, binary: bool) -> Option<FileChange> {
        let lines_removed = if binary {
            self.cache.lock().await.remove(path);
            0
        } else {
            self.cache
                .lock()
                .await
                .remove(path)
                .map(|content| content.split('\n').count() as u32)
                .unwrap_or(0)
        };

        Some(FileChange {
            path: rel.to_string(),
            change_type: ChangeType::Unlink,
            author: self.author.clone(),
            device_id: self.device_id.clone(),
            timestamp: now_ms(),
            diff: None,
            lines_added: 0,
            lines_removed,
            size_before: None,
            size_after: None,
        })
    }

    async fn build_binary_change(
        &self,
        path: &Path,
        rel: &str,
        kind: RawKind,
    ) -> Option<FileChange> {
        let size = tokio::fs::metadata(path).await.ok()?.len();
        self.cache.lock().await.remove(path);
        Some(FileChange {
            path: rel.to_string(),
            change_type: if matches!(kind, RawKind::Add) {
                ChangeType::Add
            } else {
                ChangeType::Change
            },
            author: self.author.clone(),
            device_id: self.device_id.clone(),
            timestamp: now_ms(),
            diff: None,
            lines_added: 0,
            lines_removed: 0,
            size_before: None,
            size_after: Some(size),
        })
    }

    async fn build_text_change(&self, path: &Path, rel: &str) -> Option<FileChange> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let previous = {
            let mut cache = self.cache.lock().await;
            let previous = cache.get(path).cloned();
            cache.insert(path.to_path_buf(), content.clone());
            previous
        };

        let (change_type, diff_text, lines_added, lines_removed) = match previous {
            None => {
                let lines_added = content.split('\n').count() as u32;
                (ChangeType::Add, None, lines_added, 0)
            }
            Some(previous) => {
                let result = diff::diff_lines(&previous, &content);
                (
                    ChangeType::Change,
                    result.diff,
                    result.lines_added,
                    result.lines_removed,
                )
            }
        };

        Some(FileChange {
            path: rel.to_string(),
            change_type,
            author: self.author.clone(),
            device_id: self.device_id.clone(),
            timestamp: now_ms(),
            diff: diff_text,
            lines_added,
            lines_removed,
            size_before: None,
            size_after: None,
        })
    }
}

/// Polls file size until it stops changing for [`STABILITY_WAIT_MS`], or
/// gives up after [`STABILITY_MAX_POLLS`] rounds and reads whatever is
/// there. Returns `false` if the file vanished before it could settle.
async fn wait_stable(path: &Path) -> bool {
    let mut last_size = None;
    let mut stable_since = Instant::now();

    for _ in 0..STABILITY_MAX_POLLS {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        let size = meta.len();
        if Some(size) == last_size {
            if stable_since.elapsed() >= Duration::from_millis(STABILITY_WAIT_MS) {
                return true;
            }
        } else {
            last_size = Some(size);
            stable_since = Instant::now();
        }
        tokio::time::sleep(Duration::from_millis(STABILITY_POLL_MS)).await;
    }
    last_size.is_some()
}
