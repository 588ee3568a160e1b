//! Output emission.
//!
//! Turns a [`BuildGraph`] into [`Artifact`]s: the bundle, its source map,
//! copied assets and whatever post-emit plugins add. Emission is a pure
//! function of the graph and config; writing is a separate step
//! ([`write_artifacts`]) that only runs after a successful emit.

pub mod sourcemap;

use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::BuildConfig;
use crate::graph::{BuildGraph, ModuleKind, ModuleNode};
use crate::plugin::{EmitContext, PluginError, PluginPipeline};
use sourcemap::SourceMapBuilder;

/// A file produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Path relative to the output directory, `/`-separated.
    pub path: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// BLAKE3 hex digest of `bytes`.
    pub hash: String,
}

impl Artifact {
    #[must_use]
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let hash = packwright_util::hash::blake3_bytes(&bytes);
        Self {
            path: path.into(),
            bytes,
            hash,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Emission and writing failures.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Entry {} is not part of the graph", .0.display())]
    MissingEntry(PathBuf),

    #[error("Assets {} and {} would both be written as '{name}'", first.display(), second.display())]
    DuplicateAsset {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("Refusing to clean {}: it contains {}", dir.display(), root.display())]
    UnsafeClean { dir: PathBuf, root: PathBuf },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Registry prelude. `__require` instantiates modules lazily and caches
/// their `module.exports`; each module gets a `require` bound to its own
/// specifier map.
const RUNTIME: &str = r#"var __modules = {};
var __cache = {};
function __default(m) {
  return m && m.__esModule ? m["default"] : m;
}
function __reexport(target, source) {
  Object.keys(source).forEach(function (key) {
    if (key === "default" || key in target) return;
    Object.defineProperty(target, key, { enumerable: true, get: function () { return source[key]; } });
  });
}
function __require(id) {
  var cached = __cache[id];
  if (cached) return cached.exports;
  var record = __modules[id];
  if (!record) throw new Error("Cannot find module '" + id + "'");
  var module = (__cache[id] = { exports: {} });
  var map = record[1];
  var require = function (spec) {
    if (!Object.prototype.hasOwnProperty.call(map, spec)) {
      throw new Error("Cannot find module '" + spec + "' from '" + id + "'");
    }
    return __require(map[spec]);
  };
  require.lazy = function (spec) {
    return Promise.resolve().then(function () { return require(spec); });
  };
  record[0].call(module.exports, module, module.exports, require);
  return module.exports;
}"#;

/// Modules in emission order: depth-first post-order from the entry,
/// following edges in discovery order. Cycles are broken at the first
/// revisit.
#[must_use]
pub fn module_order(graph: &BuildGraph) -> Vec<&ModuleNode> {
    let mut order = Vec::with_capacity(graph.len());
    let mut seen: FxHashSet<&Path> = FxHashSet::default();
    let Some(entry) = graph.get(graph.entry()) else {
        return order;
    };

    // (node, next edge index)
    let mut stack: Vec<(&ModuleNode, usize)> = vec![(entry.as_ref(), 0)];
    seen.insert(entry.path.as_path());

    while let Some((node, next)) = stack.pop() {
        if let Some(edge) = node.edges.get(next) {
            stack.push((node, next + 1));
            if let Some(child) = graph.get(&edge.target) {
                if seen.insert(child.path.as_path()) {
                    stack.push((child.as_ref(), 0));
                }
            }
        } else {
            order.push(node);
        }
    }
    order
}

/// Emit all artifacts for `graph`.
pub fn emit(
    graph: &BuildGraph,
    config: &BuildConfig,
    plugins: &PluginPipeline,
) -> Result<Vec<Artifact>, EmitError> {
    if !graph.contains(graph.entry()) {
        return Err(EmitError::MissingEntry(graph.entry().to_path_buf()));
    }

    let order = module_order(graph);
    let mut artifacts = render_bundle(graph, config, &order);
    artifacts.extend(collect_assets(&order, config)?);

    plugins.post_emit(&EmitContext { config, graph }, &mut artifacts)?;
    debug!(artifacts = artifacts.len(), "emit complete");
    Ok(artifacts)
}

fn render_bundle(graph: &BuildGraph, config: &BuildConfig, order: &[&ModuleNode]) -> Vec<Artifact> {
    let development = config.mode.is_development();
    let filename = &config.output.filename;
    let mut out = String::new();
    let mut line: u32 = 0;
    let mut map = SourceMapBuilder::new();

    push_line(&mut out, "(function () {", &mut line);
    push_line(&mut out, "\"use strict\";", &mut line);
    for runtime_line in RUNTIME.lines() {
        push_line(&mut out, runtime_line, &mut line);
    }

    for node in order {
        let id = config.display_path(&node.path);
        let specifier_map: FxHashMap<&str, String> = node
            .edges
            .iter()
            .map(|e| (e.specifier.as_str(), config.display_path(&e.target)))
            .collect();
        // Sorted for byte-stable output
        let mut entries: Vec<(&str, String)> = specifier_map.into_iter().collect();
        entries.sort();
        let map_json = format!(
            "{{{}}}",
            entries
                .iter()
                .map(|(spec, target)| format!("{}: {}", js_string(spec), js_string(target)))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if development {
            push_line(&mut out, "", &mut line);
            push_line(&mut out, &format!("// {id}"), &mut line);
        }
        push_line(
            &mut out,
            &format!("__modules[{}] = [function (module, exports, require) {{", js_string(&id)),
            &mut line,
        );

        let source_content = match node.kind {
            ModuleKind::Code => String::from_utf8_lossy(&node.raw).into_owned(),
            ModuleKind::Asset => String::new(),
        };
        let source_lines = u32::try_from(source_content.lines().count()).unwrap_or(u32::MAX);
        let source_idx = map.add_source(&id, &source_content);

        for (idx, body_line) in node.content.lines().enumerate() {
            if !development && body_line.trim().is_empty() {
                continue;
            }
            let idx = u32::try_from(idx).unwrap_or(u32::MAX);
            if node.kind == ModuleKind::Code && idx < source_lines {
                map.map_line(line, source_idx, idx);
            }
            push_line(&mut out, body_line, &mut line);
        }
        push_line(&mut out, &format!("}}, {map_json}];"), &mut line);
    }

    let entry_id = config.display_path(graph.entry());
    push_line(&mut out, &format!("__require({});", js_string(&entry_id)), &mut line);
    push_line(&mut out, "})();", &mut line);

    let source_map = map.build(filename);
    let mut artifacts = Vec::with_capacity(2);
    if development {
        out.push_str(&format!("//# sourceMappingURL={}\n", source_map.to_data_url()));
        artifacts.push(Artifact::new(filename.clone(), out.into_bytes()));
    } else {
        let map_name = format!("{filename}.map");
        out.push_str(&format!("//# sourceMappingURL={map_name}\n"));
        artifacts.push(Artifact::new(filename.clone(), out.into_bytes()));
        artifacts.push(Artifact::new(map_name, source_map.to_json().into_bytes()));
    }
    artifacts
}

/// Asset nodes under their base name, sorted by name.
fn collect_assets(order: &[&ModuleNode], config: &BuildConfig) -> Result<Vec<Artifact>, EmitError> {
    let mut by_name: FxHashMap<String, &ModuleNode> = FxHashMap::default();
    let reserved = [
        config.output.filename.clone(),
        format!("{}.map", config.output.filename),
    ];

    for node in order.iter().filter(|n| n.kind == ModuleKind::Asset) {
        let name = node
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(existing) = by_name.get(&name) {
            if existing.hash == node.hash {
                continue;
            }
            return Err(EmitError::DuplicateAsset {
                name,
                first: existing.path.clone(),
                second: node.path.clone(),
            });
        }
        if reserved.contains(&name) {
            return Err(EmitError::DuplicateAsset {
                name,
                first: config.output.dir.join(&config.output.filename),
                second: node.path.clone(),
            });
        }
        by_name.insert(name, node);
    }

    let mut assets: Vec<Artifact> = by_name
        .into_iter()
        .map(|(name, node)| Artifact::new(name, node.raw.to_vec()))
        .collect();
    assets.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(assets)
}

fn push_line(out: &mut String, text: &str, line: &mut u32) {
    out.push_str(text);
    out.push('\n');
    *line += 1;
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Write `artifacts` into `out_dir`. With `clean`, everything already in
/// `out_dir` is removed first, unless `out_dir` is `root` or one of its
/// ancestors. Returns the number of files written.
pub fn write_artifacts(
    artifacts: &[Artifact],
    out_dir: &Path,
    clean: bool,
    root: &Path,
) -> Result<usize, EmitError> {
    if clean {
        let dir = packwright_util::fs::normalize_lexically(out_dir);
        if packwright_util::fs::normalize_lexically(root).starts_with(&dir) {
            return Err(EmitError::UnsafeClean {
                dir,
                root: root.to_path_buf(),
            });
        }
        let removed = packwright_util::fs::clear_dir(&dir).map_err(|source| EmitError::Write {
            path: dir.clone(),
            source,
        })?;
        debug!(removed, dir = %dir.display(), "cleaned output dir");
    }

    for artifact in artifacts {
        let path = out_dir.join(&artifact.path);
        packwright_util::fs::atomic_write(&path, &artifact.bytes)
            .map_err(|source| EmitError::Write { path, source })?;
    }
    Ok(artifacts.len())
}
