//! File watching.
//!
//! The `notify` callback only filters events and enqueues paths; rebuilds
//! happen on the consumer side of the [`ChangeQueue`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, info};

use super::queue::ChangeQueue;

/// Directory names never watched.
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "target"];

/// Whether `event` can change build input.
#[must_use]
pub fn should_process_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Whether `path` is outside the build's interest: dependency and VCS dirs,
/// hidden files, and anything under `ignored` (the output dir).
#[must_use]
pub fn should_ignore(path: &Path, ignored: &[PathBuf]) -> bool {
    if ignored.iter().any(|dir| path.starts_with(dir)) {
        return true;
    }
    if path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        IGNORED_DIRS.contains(&name.as_ref())
    }) {
        return true;
    }
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Watch `root` recursively and feed relevant paths into `queue`.
///
/// The returned watcher must be kept alive for as long as events are wanted.
pub fn spawn_watcher(
    root: &Path,
    ignored: Vec<PathBuf>,
    queue: ChangeQueue,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !should_process_event(&event) {
                    return;
                }
                let paths: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| !should_ignore(p, &ignored))
                    .collect();
                if !paths.is_empty() {
                    queue.enqueue(paths);
                }
            }
            Err(e) => error!(error = %e, "watch error"),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "watching directory");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};

    #[test]
    fn test_should_ignore() {
        let out = vec![PathBuf::from("/app/build")];
        assert!(should_ignore(Path::new("/app/build/bundle.js"), &out));
        assert!(should_ignore(Path::new("/app/node_modules/react/index.js"), &out));
        assert!(should_ignore(Path::new("/app/.git/HEAD"), &out));
        assert!(should_ignore(Path::new("/app/src/.index.js.swp"), &out));
        assert!(!should_ignore(Path::new("/app/src/index.js"), &out));
        assert!(!should_ignore(Path::new("/app/builder/x.js"), &out));
    }

    #[test]
    fn test_event_filter() {
        let create = Event::new(EventKind::Create(CreateKind::File));
        let access = Event::new(EventKind::Access(AccessKind::Any));
        assert!(should_process_event(&create));
        assert!(!should_process_event(&access));
    }
}
