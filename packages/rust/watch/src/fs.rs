//! Filesystem event source backed by `notify`.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use assetforge_shared::{ForgeError, Result, WatchEvent, WatchEventKind};

use crate::matcher::GlobSet;

/// Decides which absolute paths are reported, and as what.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    ignore: GlobSet,
    /// Project-relative directories whose contents are never reported.
    ignored_dirs: Vec<PathBuf>,
}

impl PathFilter {
    /// `ignore` are project-relative globs; `output_roots` are the build
    /// outputs, which would otherwise trigger rebuilds of themselves.
    pub fn new(root: &Path, ignore: &[String], output_roots: &[PathBuf]) -> Result<Self> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let ignored_dirs = output_roots
            .iter()
            .map(|dir| dir.strip_prefix(&root).unwrap_or(dir).to_path_buf())
            .collect();
        Ok(Self {
            ignore: GlobSet::new(ignore, &[] as &[String])?,
            ignored_dirs,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The project-relative form of `path`, or `None` when it is ignored.
    pub fn relativize(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        if self.ignored_dirs.iter().any(|dir| relative.starts_with(dir)) {
            return None;
        }
        if self.ignore.matches(relative) {
            return None;
        }
        Some(relative.to_path_buf())
    }
}

/// Translate a notify event into zero or more watch events.
pub fn translate(event: &Event, filter: &PathFilter) -> Vec<WatchEvent> {
    let kind = match event.kind {
        // Paths are `[from, to]`.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            return [WatchEventKind::Delete, WatchEventKind::Add]
                .into_iter()
                .zip(&event.paths)
                .filter_map(|(kind, path)| {
                    filter.relativize(path).map(|p| WatchEvent::new(p, kind))
                })
                .collect();
        }
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            WatchEventKind::Add
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            WatchEventKind::Delete
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => WatchEventKind::Change,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|path| filter.relativize(path).map(|p| WatchEvent::new(p, kind)))
        .collect()
}

/// Keeps the OS watcher alive; dropping it stops event delivery.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Watch the filter's root recursively, forwarding events to `tx`.
    pub fn start(filter: PathFilter, tx: mpsc::Sender<WatchEvent>) -> Result<Self> {
        let root = filter.root().to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in translate(&event, &filter) {
                    // Runs on notify's own thread, outside the runtime.
                    if tx.blocking_send(change).is_err() {
                        debug!("watch receiver dropped");
                        return;
                    }
                }
            }
            Err(err) => warn!(error = %err, "file watcher error"),
        })
        .map_err(|e| ForgeError::Watch(format!("failed to initialize file watcher: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ForgeError::Watch(format!("failed to watch {}: {e}", root.display())))?;

        debug!(root = %root.display(), "file watcher started");
        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("af-fs-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.canonicalize().unwrap()
    }

    fn filter(root: &Path) -> PathFilter {
        PathFilter::new(
            root,
            &["node_modules/**".to_string(), "**/*.swp".to_string()],
            &[root.join("public"), root.join("dist")],
        )
        .unwrap()
    }

    fn event(kind: EventKind, paths: &[PathBuf]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(p.clone());
        }
        event
    }

    #[test]
    fn paths_are_made_project_relative() {
        let root = temp_root();
        let filter = filter(&root);
        assert_eq!(
            filter.relativize(&root.join("src/app.js")),
            Some(PathBuf::from("src/app.js"))
        );
        assert_eq!(filter.relativize(Path::new("/elsewhere/x.js")), None);
    }

    #[test]
    fn outputs_and_ignored_globs_are_dropped() {
        let root = temp_root();
        let filter = filter(&root);
        assert_eq!(filter.relativize(&root.join("public/js/app.js")), None);
        assert_eq!(filter.relativize(&root.join("dist/index.html")), None);
        assert_eq!(filter.relativize(&root.join("node_modules/x/index.js")), None);
        assert_eq!(filter.relativize(&root.join("src/.app.js.swp")), None);
        assert!(filter.relativize(&root.join("src/public.js")).is_some());
    }

    #[test]
    fn event_kinds_are_translated() {
        let root = temp_root();
        let filter = filter(&root);
        let file = root.join("src/app.js");

        let created = translate(&event(EventKind::Create(CreateKind::File), &[file.clone()]), &filter);
        assert_eq!(created[0].kind, WatchEventKind::Add);

        let modified = translate(
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[file.clone()]),
            &filter,
        );
        assert_eq!(modified[0].kind, WatchEventKind::Change);
        assert_eq!(modified[0].path, PathBuf::from("src/app.js"));

        let removed = translate(&event(EventKind::Remove(RemoveKind::File), &[file.clone()]), &filter);
        assert_eq!(removed[0].kind, WatchEventKind::Delete);

        let touched = translate(
            &event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)), &[file.clone()]),
            &filter,
        );
        assert!(touched.is_empty());
    }

    #[test]
    fn rename_reports_delete_then_add() {
        let root = temp_root();
        let filter = filter(&root);
        let renamed = translate(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &[root.join("src/old.js"), root.join("src/new.js")],
            ),
            &filter,
        );
        let got: Vec<_> = renamed.iter().map(|e| (e.path.clone(), e.kind)).collect();
        assert_eq!(
            got,
            vec![
                (PathBuf::from("src/old.js"), WatchEventKind::Delete),
                (PathBuf::from("src/new.js"), WatchEventKind::Add),
            ]
        );
    }

    #[tokio::test]
    async fn watcher_forwards_real_changes() {
        let root = temp_root();
        std::fs::create_dir_all(root.join("src")).unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _watcher = FsWatcher::start(filter(&root), tx).unwrap();

        std::fs::write(root.join("src/app.js"), "var a;").unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("an event within 5s")
            .unwrap();
        assert_eq!(event.path, PathBuf::from("src/app.js"));
    }
}
