//! Module dependency graph.
//!
//! The graph is built breadth-first from the entry, one level at a time.
//! Modules of a level are read, transformed and resolved in parallel; their
//! results are merged in the level's discovery order so node order, warnings
//! and errors do not depend on thread scheduling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BuildConfig;
use crate::pipeline::{Dependency, Pipeline, TransformError};
use crate::resolver::{ResolveError, Resolver};

/// What a module node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Transformed code, bundled.
    Code,
    /// Copied verbatim; its module body exposes the public URL.
    Asset,
}

/// A resolved dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Specifier as written in the importer.
    pub specifier: String,
    /// Resolved path; a key of the graph.
    pub target: PathBuf,
    pub lazy: bool,
}

/// A module in the dependency graph.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Absolute path to the module.
    pub path: PathBuf,
    /// BLAKE3 hex digest of the raw file content.
    pub hash: String,
    pub kind: ModuleKind,
    /// Transformed module body.
    pub content: String,
    /// Bytes as read from disk.
    pub raw: Arc<[u8]>,
    /// Dependencies as discovered by the transformers.
    pub dependencies: Vec<Dependency>,
    /// Dependencies that resolved, in discovery order.
    pub edges: Vec<Edge>,
}

/// Non-fatal problems found while building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphWarning {
    /// A lazy (`import()`) dependency could not be resolved.
    MissingLazy {
        from: PathBuf,
        specifier: String,
        reason: String,
    },
    /// An edge closes an import cycle; `to` is still being imported above `from`.
    CycleGuard { from: PathBuf, to: PathBuf },
}

impl std::fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingLazy {
                from,
                specifier,
                reason,
            } => write!(
                f,
                "lazy import '{specifier}' in {} is missing: {reason}",
                from.display()
            ),
            Self::CycleGuard { from, to } => write!(
                f,
                "circular import: {} -> {}",
                from.display(),
                to.display()
            ),
        }
    }
}

/// What stopped a build.
#[derive(Debug, Clone, Error)]
pub enum FatalCause {
    #[error(transparent)]
    Resolve(ResolveError),

    #[error(transparent)]
    Transform(TransformError),

    #[error("Failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
}

/// Build failure.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("Entry not found: {}", .0.display())]
    EntryNotFound(PathBuf),

    /// `chain` runs from the entry to the module where the failure happened
    /// (the importer for resolution failures).
    #[error("{cause}\n  import chain: {}", format_chain(chain))]
    Fatal { chain: Vec<PathBuf>, cause: FatalCause },
}

impl BuildError {
    #[must_use]
    pub fn chain(&self) -> &[PathBuf] {
        match self {
            Self::EntryNotFound(_) => &[],
            Self::Fatal { chain, .. } => chain,
        }
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// The module dependency graph.
#[derive(Debug, Clone)]
pub struct BuildGraph {
    entry: PathBuf,
    /// Discovery order.
    nodes: Vec<Arc<ModuleNode>>,
    index: FxHashMap<PathBuf, usize>,
    warnings: Vec<GraphWarning>,
}

impl BuildGraph {
    /// A graph with no modules.
    #[must_use]
    pub fn empty(entry: PathBuf) -> Self {
        Self {
            entry,
            nodes: Vec::new(),
            index: FxHashMap::default(),
            warnings: Vec::new(),
        }
    }

    fn insert(&mut self, node: Arc<ModuleNode>) {
        self.index.insert(node.path.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    #[must_use]
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Arc<ModuleNode>> {
        self.index.get(path).map(|&i| &self.nodes[i])
    }

    /// Nodes in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModuleNode>> {
        self.nodes.iter()
    }

    #[must_use]
    pub fn warnings(&self) -> &[GraphWarning] {
        &self.warnings
    }

    /// Modules with an edge to `path`.
    #[must_use]
    pub fn importers_of(&self, path: &Path) -> Vec<&Path> {
        self.nodes
            .iter()
            .filter(|n| n.edges.iter().any(|e| e.target.as_path() == path))
            .map(|n| n.path.as_path())
            .collect()
    }

    /// `changed` graph members plus every module that transitively imports
    /// one of them. Paths outside the graph are ignored.
    #[must_use]
    pub fn invalidation_set<'a>(&self, changed: impl IntoIterator<Item = &'a Path>) -> HashSet<PathBuf> {
        let mut reverse: FxHashMap<&Path, Vec<&Path>> = FxHashMap::default();
        for node in &self.nodes {
            for edge in &node.edges {
                reverse
                    .entry(edge.target.as_path())
                    .or_default()
                    .push(node.path.as_path());
            }
        }

        let mut set = HashSet::new();
        let mut stack: Vec<&Path> = changed.into_iter().filter(|p| self.contains(p)).collect();
        while let Some(path) = stack.pop() {
            if !set.insert(path.to_path_buf()) {
                continue;
            }
            if let Some(importers) = reverse.get(path) {
                stack.extend(importers.iter().copied());
            }
        }
        set
    }
}

/// Paths already scheduled in this build. Check-and-insert is atomic.
#[derive(Debug, Default)]
pub struct VisitedSet {
    inner: Mutex<FxHashSet<PathBuf>>,
}

impl VisitedSet {
    /// `true` if `path` was not yet visited; it is marked visited either way.
    pub fn claim(&self, path: &Path) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains(path) {
            return false;
        }
        inner.insert(path.to_path_buf());
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A processed module with the warnings it produced.
struct Processed {
    node: Arc<ModuleNode>,
    warnings: Vec<GraphWarning>,
}

/// Builds [`BuildGraph`]s for one configuration.
pub struct GraphBuilder<'a> {
    config: &'a BuildConfig,
    resolver: &'a Resolver,
    pipeline: &'a Pipeline,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(config: &'a BuildConfig, resolver: &'a Resolver, pipeline: &'a Pipeline) -> Self {
        Self {
            config,
            resolver,
            pipeline,
        }
    }

    /// Full build from the entry.
    pub fn build(&self) -> Result<BuildGraph, BuildError> {
        self.traverse(None, &HashSet::new())
    }

    /// Incremental build: nodes of `previous` outside `invalidated` are
    /// reused as-is; modules no longer reachable are dropped.
    pub fn rebuild(
        &self,
        previous: &BuildGraph,
        invalidated: &HashSet<PathBuf>,
    ) -> Result<BuildGraph, BuildError> {
        self.traverse(Some(previous), invalidated)
    }

    fn traverse(
        &self,
        previous: Option<&BuildGraph>,
        invalidated: &HashSet<PathBuf>,
    ) -> Result<BuildGraph, BuildError> {
        let entry = &self.config.entry;
        if !entry.is_file() {
            return Err(BuildError::EntryNotFound(entry.clone()));
        }
        let entry = dunce::canonicalize(entry).unwrap_or_else(|_| entry.clone());

        let visited = VisitedSet::default();
        visited.claim(&entry);
        // BFS tree parent of every scheduled module
        let mut parents: FxHashMap<PathBuf, Option<PathBuf>> = FxHashMap::default();
        parents.insert(entry.clone(), None);

        let mut graph = BuildGraph::empty(entry.clone());
        let mut frontier = vec![entry];
        let mut level = 0;

        while !frontier.is_empty() {
            debug!(level, modules = frontier.len(), "processing level");
            let results: Vec<Result<Processed, FatalCause>> = frontier
                .par_iter()
                .map(|path| self.process(path, previous, invalidated))
                .collect();

            let mut next = Vec::new();
            for (path, result) in frontier.iter().zip(results) {
                let processed = result.map_err(|cause| BuildError::Fatal {
                    chain: chain_to(&parents, path),
                    cause,
                })?;

                for edge in &processed.node.edges {
                    if visited.claim(&edge.target) {
                        parents.insert(edge.target.clone(), Some(path.clone()));
                        next.push(edge.target.clone());
                    }
                }

                for warning in &processed.warnings {
                    warn!("{warning}");
                }
                graph.warnings.extend(processed.warnings);
                graph.insert(processed.node);
            }

            frontier = next;
            level += 1;
        }

        let cycles = back_edges(&graph);
        graph.warnings.extend(cycles);
        Ok(graph)
    }

    fn process(
        &self,
        path: &Path,
        previous: Option<&BuildGraph>,
        invalidated: &HashSet<PathBuf>,
    ) -> Result<Processed, FatalCause> {
        if !invalidated.contains(path) {
            if let Some(node) = previous.and_then(|g| g.get(path)) {
                return Ok(self.reuse(node));
            }
        }

        let bytes = std::fs::read(path).map_err(|e| FatalCause::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let hash = packwright_util::hash::blake3_bytes(&bytes);

        if self.config.is_asset(path) {
            let output = self
                .pipeline
                .transform_asset(path)
                .map_err(FatalCause::Transform)?;
            let node = ModuleNode {
                path: path.to_path_buf(),
                hash,
                kind: ModuleKind::Asset,
                content: output.content,
                raw: Arc::from(bytes),
                dependencies: Vec::new(),
                edges: Vec::new(),
            };
            return Ok(Processed {
                node: Arc::new(node),
                warnings: Vec::new(),
            });
        }

        let source = String::from_utf8_lossy(&bytes).into_owned();
        let output = self
            .pipeline
            .transform(path, source)
            .map_err(FatalCause::Transform)?;

        let (edges, warnings) = self.resolve_dependencies(path, &output.dependencies)?;
        let node = ModuleNode {
            path: path.to_path_buf(),
            hash,
            kind: ModuleKind::Code,
            content: output.content,
            raw: Arc::from(bytes),
            dependencies: output.dependencies,
            edges,
        };
        Ok(Processed {
            node: Arc::new(node),
            warnings,
        })
    }

    /// Reuse an unchanged node. Lazy dependencies that were missing are
    /// retried since the file may exist now.
    fn reuse(&self, node: &Arc<ModuleNode>) -> Processed {
        let missing: Vec<&Dependency> = node
            .dependencies
            .iter()
            .filter(|d| !node.edges.iter().any(|e| e.specifier == d.specifier))
            .collect();
        if missing.is_empty() {
            return Processed {
                node: Arc::clone(node),
                warnings: Vec::new(),
            };
        }

        let from_dir = node.path.parent().unwrap_or(Path::new("/"));
        let mut edges = node.edges.clone();
        let mut warnings = Vec::new();
        for dep in missing {
            match self.resolver.resolve(&dep.specifier, from_dir) {
                Ok(target) => edges.push(Edge {
                    specifier: dep.specifier.clone(),
                    target,
                    lazy: dep.lazy,
                }),
                Err(e) => warnings.push(GraphWarning::MissingLazy {
                    from: node.path.clone(),
                    specifier: dep.specifier.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        // Keep discovery order
        edges.sort_by_key(|e| {
            node.dependencies
                .iter()
                .position(|d| d.specifier == e.specifier)
        });

        let mut updated = ModuleNode::clone(node);
        updated.edges = edges;
        Processed {
            node: Arc::new(updated),
            warnings,
        }
    }

    fn resolve_dependencies(
        &self,
        path: &Path,
        dependencies: &[Dependency],
    ) -> Result<(Vec<Edge>, Vec<GraphWarning>), FatalCause> {
        let from_dir = path.parent().unwrap_or(Path::new("/"));
        let mut edges = Vec::with_capacity(dependencies.len());
        let mut warnings = Vec::new();

        for dep in dependencies {
            match self.resolver.resolve(&dep.specifier, from_dir) {
                Ok(target) => edges.push(Edge {
                    specifier: dep.specifier.clone(),
                    target,
                    lazy: dep.lazy,
                }),
                Err(e) if dep.lazy => warnings.push(GraphWarning::MissingLazy {
                    from: path.to_path_buf(),
                    specifier: dep.specifier.clone(),
                    reason: e.to_string(),
                }),
                Err(e) => return Err(FatalCause::Resolve(e)),
            }
        }
        Ok((edges, warnings))
    }
}

/// Entry → … → `path` along BFS tree parents.
fn chain_to(parents: &FxHashMap<PathBuf, Option<PathBuf>>, path: &Path) -> Vec<PathBuf> {
    let mut chain = vec![path.to_path_buf()];
    let mut current = parents.get(path).cloned().flatten();
    while let Some(parent) = current {
        current = parents.get(&parent).cloned().flatten();
        chain.push(parent);
    }
    chain.reverse();
    chain
}

/// One `CycleGuard` per edge that closes a cycle: a depth-first walk from
/// the entry, in edge order, flags every edge into a module still on the
/// walk's stack.
fn back_edges(graph: &BuildGraph) -> Vec<GraphWarning> {
    let mut warnings = Vec::new();
    let Some(entry) = graph.get(graph.entry()) else {
        return warnings;
    };

    // false while on the stack, true once finished
    let mut finished: FxHashMap<&Path, bool> = FxHashMap::default();
    finished.insert(&entry.path, false);
    let mut stack: Vec<(&ModuleNode, usize)> = vec![(&**entry, 0)];

    while let Some(top) = stack.last_mut() {
        let node = top.0;
        let Some(edge) = node.edges.get(top.1) else {
            finished.insert(&node.path, true);
            stack.pop();
            continue;
        };
        top.1 += 1;

        match finished.get(edge.target.as_path()) {
            Some(false) => warnings.push(GraphWarning::CycleGuard {
                from: node.path.clone(),
                to: edge.target.clone(),
            }),
            Some(true) => {}
            None => {
                if let Some(target) = graph.get(&edge.target) {
                    finished.insert(&target.path, false);
                    stack.push((&**target, 0));
                }
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{TransformFailure, TransformInput, TransformOutput, Transformer, TransformerRegistry};
    use crate::plugin::PluginPipeline;
    use crate::testutil::{config_from_json, TempProject};
    use crate::Bundler;

    fn bundler(project: &TempProject, json: serde_json::Value) -> Bundler {
        Bundler::new(config_from_json(project, json)).unwrap()
    }

    #[test]
    fn test_discovery_order_is_breadth_first() {
        let project = TempProject::new();
        project.write("src/index.js", "import './a';\nimport './b';");
        project.write("src/a.js", "import './c';");
        project.write("src/b.js", "");
        project.write("src/c.js", "");

        let graph = bundler(&project, serde_json::json!({})).build_graph().unwrap();
        let order: Vec<PathBuf> = graph.iter().map(|n| n.path.clone()).collect();
        assert_eq!(
            order,
            vec![
                project.path("src/index.js"),
                project.path("src/a.js"),
                project.path("src/b.js"),
                project.path("src/c.js"),
            ]
        );
        let a = project.path("src/a.js");
        assert_eq!(graph.entry(), project.path("src/index.js").as_path());
        assert_eq!(graph.importers_of(&project.path("src/c.js")), vec![a.as_path()]);
    }

    struct Counting {
        counts: Arc<Mutex<FxHashMap<PathBuf, usize>>>,
    }

    impl Transformer for Counting {
        fn name(&self) -> &str {
            "count"
        }

        fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
            *self
                .counts
                .lock()
                .unwrap()
                .entry(input.path.to_path_buf())
                .or_default() += 1;
            Ok(TransformOutput::unchanged(input.content.to_string()))
        }
    }

    #[test]
    fn test_shared_module_transformed_once() {
        let project = TempProject::new();
        project.write("src/index.js", "import './b';\nimport './c';");
        project.write("src/b.js", "import './d';");
        project.write("src/c.js", "import './d';");
        project.write("src/d.js", "export const d = 1;");

        let config = config_from_json(
            &project,
            serde_json::json!({ "rules": [{ "test": "\\.js$", "use": ["script", "count"] }] }),
        );
        let counts = Arc::new(Mutex::new(FxHashMap::default()));
        let mut registry = TransformerRegistry::default();
        registry.register(Counting {
            counts: Arc::clone(&counts),
        });
        let plugins = PluginPipeline::from_config(&config);
        let bundler = Bundler::with_parts(config, &registry, plugins).unwrap();

        let graph = bundler.build_graph().unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(counts.lock().unwrap()[&project.path("src/d.js")], 1);
        assert!(counts.lock().unwrap().values().all(|&c| c == 1));
    }

    #[test]
    fn test_cycle_terminates_with_warning() {
        let project = TempProject::new();
        project.write("src/index.js", "import './b';");
        project.write("src/b.js", "import './index';");

        let graph = bundler(&project, serde_json::json!({})).build_graph().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph.warnings(),
            &[GraphWarning::CycleGuard {
                from: project.path("src/b.js"),
                to: project.path("src/index.js"),
            }]
        );
    }

    #[test]
    fn test_cycle_between_siblings_is_reported() {
        let project = TempProject::new();
        project.write("src/index.js", "import './a';\nimport './b';");
        project.write("src/a.js", "import './b';");
        project.write("src/b.js", "import './a';");

        let graph = bundler(&project, serde_json::json!({})).build_graph().unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.warnings(),
            &[GraphWarning::CycleGuard {
                from: project.path("src/b.js"),
                to: project.path("src/a.js"),
            }]
        );
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let project = TempProject::new();
        project.write("src/index.js", "import './b';\nimport './c';");
        project.write("src/b.js", "import './c';");
        project.write("src/c.js", "");

        let graph = bundler(&project, serde_json::json!({})).build_graph().unwrap();
        assert_eq!(graph.len(), 3);
        assert!(graph.warnings().is_empty());
    }

    #[test]
    fn test_missing_lazy_is_warning() {
        let project = TempProject::new();
        project.write("src/index.js", "const p = import('./missing');");

        let graph = bundler(&project, serde_json::json!({})).build_graph().unwrap();
        assert_eq!(graph.len(), 1);
        assert!(matches!(
            &graph.warnings()[0],
            GraphWarning::MissingLazy { specifier, .. } if specifier == "./missing"
        ));
    }

    #[test]
    fn test_missing_required_is_fatal_with_chain() {
        let project = TempProject::new();
        project.write("src/index.js", "import './a';");
        project.write("src/a.js", "import './missing';");

        let err = bundler(&project, serde_json::json!({})).build_graph().unwrap_err();
        match err {
            BuildError::Fatal {
                chain,
                cause: FatalCause::Resolve(e),
            } => {
                assert_eq!(chain, vec![project.path("src/index.js"), project.path("src/a.js")]);
                assert_eq!(e.specifier(), Some("./missing"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_entry_not_found() {
        let project = TempProject::new();
        let err = bundler(&project, serde_json::json!({})).build_graph().unwrap_err();
        assert!(matches!(err, BuildError::EntryNotFound(_)));
    }

    #[test]
    fn test_asset_nodes_keep_raw_bytes() {
        let project = TempProject::new();
        project.write("src/index.js", "import logo from './logo.png';");
        project.write("src/logo.png", "PNGDATA");

        let graph = bundler(&project, serde_json::json!({})).build_graph().unwrap();
        let logo = graph.get(&project.path("src/logo.png")).unwrap();
        assert_eq!(logo.kind, ModuleKind::Asset);
        assert_eq!(&*logo.raw, b"PNGDATA");
        assert_eq!(logo.content, "module.exports = \"/logo.png\";\n");
    }

    #[test]
    fn test_invalidation_set_includes_importers() {
        let project = TempProject::new();
        project.write("src/index.js", "import './a';\nimport './b';");
        project.write("src/a.js", "import './c';");
        project.write("src/b.js", "");
        project.write("src/c.js", "");

        let graph = bundler(&project, serde_json::json!({})).build_graph().unwrap();
        let c = project.path("src/c.js");
        let outside = project.path("README.md");
        let set = graph.invalidation_set([c.as_path(), outside.as_path()]);
        let expected: HashSet<PathBuf> = [
            project.path("src/c.js"),
            project.path("src/a.js"),
            project.path("src/index.js"),
        ]
        .into_iter()
        .collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_rebuild_reuses_untouched_nodes_and_drops_unreachable() {
        let project = TempProject::new();
        project.write("src/index.js", "import './a';\nimport './b';");
        project.write("src/a.js", "export const a = 1;");
        project.write("src/b.js", "export const b = 1;");

        let bundler = bundler(&project, serde_json::json!({}));
        let first = bundler.build_graph().unwrap();

        project.write("src/index.js", "import './a';");
        let index = project.path("src/index.js");
        let invalidated = first.invalidation_set([index.as_path()]);
        let second = bundler.rebuild_graph(&first, &invalidated).unwrap();

        assert_eq!(second.len(), 2);
        assert!(!second.contains(&project.path("src/b.js")));
        let a = project.path("src/a.js");
        assert!(Arc::ptr_eq(first.get(&a).unwrap(), second.get(&a).unwrap()));
        assert!(!Arc::ptr_eq(first.get(&index).unwrap(), second.get(&index).unwrap()));
    }

    #[test]
    fn test_visited_set_claims_once() {
        let visited = VisitedSet::default();
        assert!(visited.claim(Path::new("/a")));
        assert!(!visited.claim(Path::new("/a")));
        assert_eq!(visited.len(), 1);
    }
}
