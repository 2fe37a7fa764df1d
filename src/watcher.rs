use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared in the watched directory.
    Created(PathBuf),
    Error(String),
}

/// Keeps the OS watch alive; events stop when this is dropped.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    pub fn start(dir: &Path) -> notify::Result<(Self, UnboundedReceiver<WatchEvent>)> {
        let (tx, rx) = unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for path in arrived_paths(&event) {
                        let _ = tx.send(WatchEvent::Created(path));
                    }
                }
                Err(err) => {
                    let _ = tx.send(WatchEvent::Error(err.to_string()));
                }
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok((Self { _watcher: watcher }, rx))
    }
}

/// Files created in place, plus files renamed into the directory by writers
/// that stage elsewhere and move the finished dump in.
///
/// A rename yields exactly one arrival: inotify reports `To` for every rename
/// that lands here and follows it with a paired `Both`, which is skipped.
/// Backends that only report `Name(Any)` give no direction, so the path counts
/// only if it is still there.
fn arrived_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .iter()
            .filter(|path| path.is_file())
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}
