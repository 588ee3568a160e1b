//! Dev server orchestration.
//!
//! `Idle → Watching → Rebuilding → Watching | Failed`. A single task drains
//! the [`queue`] and applies batches through [`Orchestrator::handle_changes`],
//! so at most one rebuild is ever in flight. Outcomes are pushed to live
//! reload clients over a broadcast channel.

pub mod queue;
pub mod route;
pub mod watch;

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::bundler::Bundler;
use crate::emit::Artifact;
use crate::error::Error;
use crate::graph::BuildGraph;
use crate::plugin::inject_before_body_end;
use queue::ChangeReceiver;
use route::{ArtifactSet, Route};

/// Websocket endpoint for live reload.
pub const LIVE_RELOAD_PATH: &str = "/__packwright/livereload";

/// Endpoint serving [`LIVE_RELOAD_CLIENT`].
pub const CLIENT_PATH: &str = "/__packwright/client.js";

/// Browser side of the live reload channel.
pub const LIVE_RELOAD_CLIENT: &str = r#"(function () {
  var protocol = location.protocol === "https:" ? "wss:" : "ws:";
  var socket = new WebSocket(protocol + "//" + location.host + "/__packwright/livereload");
  socket.addEventListener("message", function (event) {
    var msg = JSON.parse(event.data);
    if (msg.type === "reload") {
      location.reload();
    } else if (msg.type === "error") {
      console.error("[packwright] build failed:\n" + msg.message);
    }
  });
  socket.addEventListener("close", function () {
    console.warn("[packwright] lost connection to dev server");
  });
})();
"#;

/// Add the live reload client to an HTML document.
#[must_use]
pub fn inject_client_script(html: &str) -> String {
    if html.contains(CLIENT_PATH) {
        return html.to_string();
    }
    inject_before_body_end(html, &format!("<script src=\"{CLIENT_PATH}\"></script>"))
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevStatus {
    Idle,
    Watching,
    Rebuilding,
    Failed,
}

/// Message on the live reload channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveReloadEvent {
    Connected,
    Reload,
    Error { message: String },
}

impl LiveReloadEvent {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What a change batch led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Nothing in the batch affects the build.
    Ignored,
    /// Only static files changed; clients were told to reload.
    StaticReload,
    Rebuilt { modules: usize, invalidated: usize },
    /// The rebuild failed; the previous artifacts are still served.
    Failed(String),
}

struct DevState {
    status: DevStatus,
    /// Graph of the last successful build.
    graph: Option<BuildGraph>,
    /// Last-known-good artifacts.
    artifacts: Arc<ArtifactSet>,
}

/// Watch → rebuild → notify loop around a [`Bundler`].
pub struct Orchestrator {
    bundler: Bundler,
    state: RwLock<DevState>,
    events: broadcast::Sender<LiveReloadEvent>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(bundler: Bundler) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            bundler,
            state: RwLock::new(DevState {
                status: DevStatus::Idle,
                graph: None,
                artifacts: Arc::new(ArtifactSet::default()),
            }),
            events,
        }
    }

    #[must_use]
    pub fn bundler(&self) -> &Bundler {
        &self.bundler
    }

    #[must_use]
    pub fn status(&self) -> DevStatus {
        self.state.read().unwrap().status
    }

    /// Artifacts currently served.
    #[must_use]
    pub fn artifacts(&self) -> Arc<ArtifactSet> {
        Arc::clone(&self.state.read().unwrap().artifacts)
    }

    /// Module count of the last successful build.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .graph
            .as_ref()
            .map_or(0, BuildGraph::len)
    }

    /// Live reload events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LiveReloadEvent> {
        self.events.subscribe()
    }

    /// Route a request against the current artifacts.
    #[must_use]
    pub fn route(&self, request: &str) -> Route {
        route::route(request, self.bundler.config(), &self.artifacts())
    }

    /// Initial full build. On failure the orchestrator is `Failed` with
    /// nothing to serve until a change fixes the build.
    pub fn start(&self) -> Result<usize, Error> {
        match self.full_build() {
            Ok((graph, artifacts)) => {
                let modules = graph.len();
                self.succeed(graph, artifacts);
                Ok(modules)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Apply a batch of changed paths.
    pub fn handle_changes(&self, changed: &BTreeSet<PathBuf>) -> ChangeOutcome {
        let config = self.bundler.config();
        let static_changed = config
            .dev_server
            .static_dir
            .as_ref()
            .is_some_and(|dir| changed.iter().any(|p| p.starts_with(dir)));

        let (status, affected) = {
            let state = self.state.read().unwrap();
            let affected = changed
                .iter()
                .any(|p| state.graph.as_ref().is_some_and(|g| g.contains(p)));
            (state.status, affected)
        };

        // A failed build may be fixed by any change, e.g. creating a missing file
        if status != DevStatus::Failed && !affected {
            if static_changed {
                info!("static files changed");
                self.publish(LiveReloadEvent::Reload);
                return ChangeOutcome::StaticReload;
            }
            debug!(paths = changed.len(), "changes outside the graph ignored");
            return ChangeOutcome::Ignored;
        }

        self.state.write().unwrap().status = DevStatus::Rebuilding;
        let start = Instant::now();
        let result = if status == DevStatus::Failed {
            self.full_build().map(|(graph, artifacts)| (graph, artifacts, 0))
        } else {
            self.incremental_build(changed)
        };

        match result {
            Ok((graph, artifacts, invalidated)) => {
                let modules = graph.len();
                info!(
                    modules,
                    invalidated,
                    elapsed_ms = start.elapsed().as_millis(),
                    "rebuilt"
                );
                self.succeed(graph, artifacts);
                ChangeOutcome::Rebuilt {
                    modules,
                    invalidated,
                }
            }
            Err(e) => {
                self.fail(&e);
                ChangeOutcome::Failed(e.to_string())
            }
        }
    }

    fn full_build(&self) -> Result<(BuildGraph, Vec<Artifact>), Error> {
        self.bundler.resolver().clear_cache();
        let output = self.bundler.run()?;
        self.bundler.write(&output.artifacts)?;
        Ok((output.graph, output.artifacts))
    }

    fn incremental_build(
        &self,
        changed: &BTreeSet<PathBuf>,
    ) -> Result<(BuildGraph, Vec<Artifact>, usize), Error> {
        let previous = self.state.read().unwrap().graph.clone();
        let Some(previous) = previous else {
            return self.full_build().map(|(g, a)| (g, a, 0));
        };

        let invalidated: HashSet<PathBuf> =
            previous.invalidation_set(changed.iter().map(PathBuf::as_path));
        let graph = self.bundler.rebuild_graph(&previous, &invalidated)?;
        let artifacts = self.bundler.emit(&graph)?;
        self.bundler.write(&artifacts)?;
        Ok((graph, artifacts, invalidated.len()))
    }

    fn succeed(&self, graph: BuildGraph, artifacts: Vec<Artifact>) {
        {
            let mut state = self.state.write().unwrap();
            state.status = DevStatus::Watching;
            state.graph = Some(graph);
            state.artifacts = Arc::new(ArtifactSet::new(artifacts));
        }
        self.publish(LiveReloadEvent::Reload);
    }

    fn fail(&self, e: &Error) {
        error!(code = e.code(), "build failed: {e}");
        self.state.write().unwrap().status = DevStatus::Failed;
        self.publish(LiveReloadEvent::Error {
            message: e.to_string(),
        });
    }

    fn publish(&self, event: LiveReloadEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Drain `receiver` until it closes, applying each batch on a blocking
/// thread.
pub async fn run(orchestrator: Arc<Orchestrator>, mut receiver: ChangeReceiver) {
    while let Some(batch) = receiver.next_batch().await {
        debug!(paths = batch.len(), "change batch");
        let orch = Arc::clone(&orchestrator);
        match tokio::task::spawn_blocking(move || orch.handle_changes(&batch)).await {
            Ok(ChangeOutcome::Failed(message)) => debug!(%message, "rebuild failed"),
            Ok(outcome) => debug!(?outcome, "change batch applied"),
            Err(e) => error!(error = %e, "rebuild task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{config_from_json, TempProject};

    fn orchestrator(project: &TempProject, json: serde_json::Value) -> Orchestrator {
        Orchestrator::new(Bundler::new(config_from_json(project, json)).unwrap())
    }

    fn batch(paths: &[PathBuf]) -> BTreeSet<PathBuf> {
        paths.iter().cloned().collect()
    }

    fn bundle_text(orch: &Orchestrator) -> String {
        String::from_utf8(orch.artifacts().get("bundle.js").unwrap().bytes.clone()).unwrap()
    }

    #[test]
    fn test_change_outside_graph_is_ignored() {
        let project = TempProject::new();
        project.write("src/index.js", "console.log(1);");
        project.write("notes.md", "# notes");
        let orch = orchestrator(&project, serde_json::json!({}));
        assert_eq!(orch.start().unwrap(), 1);
        assert_eq!(orch.status(), DevStatus::Watching);

        let mut events = orch.subscribe();
        let before = orch.artifacts();
        let outcome = orch.handle_changes(&batch(&[project.path("notes.md")]));
        assert_eq!(outcome, ChangeOutcome::Ignored);
        assert_eq!(orch.status(), DevStatus::Watching);
        assert!(Arc::ptr_eq(&before, &orch.artifacts()));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_change_rebuilds_and_notifies() {
        let project = TempProject::new();
        project.write("src/index.js", "import './a';");
        project.write("src/a.js", "console.log('one');");
        let orch = orchestrator(&project, serde_json::json!({}));
        orch.start().unwrap();
        let mut events = orch.subscribe();

        project.write("src/a.js", "console.log('two');");
        let outcome = orch.handle_changes(&batch(&[project.path("src/a.js")]));
        assert_eq!(
            outcome,
            ChangeOutcome::Rebuilt {
                modules: 2,
                invalidated: 2
            }
        );
        assert_eq!(events.try_recv().unwrap(), LiveReloadEvent::Reload);
        assert!(bundle_text(&orch).contains("console.log('two');"));
        let written = std::fs::read_to_string(project.path("build/bundle.js")).unwrap();
        assert!(written.contains("console.log('two');"));
    }

    #[test]
    fn test_failure_keeps_last_known_good() {
        let project = TempProject::new();
        project.write("src/index.js", "import './a';");
        project.write("src/a.js", "console.log('good');");
        let orch = orchestrator(&project, serde_json::json!({}));
        orch.start().unwrap();
        let mut events = orch.subscribe();

        project.write("src/a.js", "import './missing';");
        let outcome = orch.handle_changes(&batch(&[project.path("src/a.js")]));
        assert!(matches!(outcome, ChangeOutcome::Failed(ref m) if m.contains("./missing")));
        assert_eq!(orch.status(), DevStatus::Failed);
        assert!(matches!(events.try_recv().unwrap(), LiveReloadEvent::Error { .. }));
        assert!(bundle_text(&orch).contains("console.log('good');"));

        // Creating the missing file fixes the build
        project.write("src/missing.js", "");
        let outcome = orch.handle_changes(&batch(&[project.path("src/missing.js")]));
        assert!(matches!(outcome, ChangeOutcome::Rebuilt { modules: 3, .. }));
        assert_eq!(orch.status(), DevStatus::Watching);
    }

    #[test]
    fn test_failed_start_has_nothing_to_serve() {
        let project = TempProject::new();
        let orch = orchestrator(&project, serde_json::json!({}));
        assert!(orch.start().is_err());
        assert_eq!(orch.status(), DevStatus::Failed);
        assert!(orch.artifacts().is_empty());
    }

    #[test]
    fn test_static_change_reloads_without_rebuild() {
        let project = TempProject::new();
        project.write("src/index.js", "");
        project.write("public/robots.txt", "");
        let orch = orchestrator(&project, serde_json::json!({ "devServer": { "static": "public" } }));
        orch.start().unwrap();
        let mut events = orch.subscribe();

        let outcome = orch.handle_changes(&batch(&[project.path("public/robots.txt")]));
        assert_eq!(outcome, ChangeOutcome::StaticReload);
        assert_eq!(events.try_recv().unwrap(), LiveReloadEvent::Reload);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_drains_queue() {
        let project = TempProject::new();
        project.write("src/index.js", "console.log(1);");
        let orch = Arc::new(orchestrator(&project, serde_json::json!({})));
        orch.start().unwrap();
        let mut events = orch.subscribe();

        let (queue, receiver) = queue::change_queue(std::time::Duration::ZERO);
        let task = tokio::spawn(run(Arc::clone(&orch), receiver));

        project.write("src/index.js", "console.log(2);");
        queue.enqueue([project.path("src/index.js")]);
        assert_eq!(events.recv().await.unwrap(), LiveReloadEvent::Reload);

        drop(queue);
        task.await.unwrap();
        assert!(bundle_text(&orch).contains("console.log(2);"));
    }

    #[test]
    fn test_event_json() {
        assert_eq!(LiveReloadEvent::Connected.to_json(), r#"{"type":"connected"}"#);
        assert_eq!(
            LiveReloadEvent::Error {
                message: "boom".to_string()
            }
            .to_json(),
            r#"{"type":"error","message":"boom"}"#
        );
    }

    #[test]
    fn test_client_injection() {
        let html = inject_client_script("<html><body></body></html>");
        assert!(html.contains("<script src=\"/__packwright/client.js\"></script>\n</body>"));
        assert_eq!(inject_client_script(&html), html);
    }
}
