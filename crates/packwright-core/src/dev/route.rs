//! Dev server request routing.
//!
//! Order: emitted artifact, static dir file, proxy prefix, history fallback
//! document, not found.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::config::BuildConfig;
use crate::emit::Artifact;

/// Artifacts currently served, by output-relative path.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    by_path: BTreeMap<String, Artifact>,
}

impl ArtifactSet {
    #[must_use]
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        Self {
            by_path: artifacts.into_iter().map(|a| (a.path.clone(), a)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.by_path.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.by_path.values()
    }
}

/// Where a request is answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// An emitted artifact.
    Artifact(Artifact),
    /// A file in the static dir.
    Static(PathBuf),
    /// Forward unchanged to this URL.
    Proxy(String),
    /// History fallback: the HTML document for a client-side route.
    Document(Artifact),
    NotFound,
}

/// Route a request path (with optional query) against the current artifacts.
#[must_use]
pub fn route(request: &str, config: &BuildConfig, artifacts: &ArtifactSet) -> Route {
    let (raw_path, _query) = request.split_once('?').unwrap_or((request, ""));
    let decoded = percent_decode_str(raw_path).decode_utf8_lossy();
    let path = decoded.as_ref();
    let document_name = config
        .html
        .as_ref()
        .map_or("index.html", |html| html.filename.as_str());

    if let Some(rel) = strip_public_path(path, &config.output.public_path) {
        let rel = if rel.is_empty() || rel.ends_with('/') {
            format!("{rel}{document_name}")
        } else {
            rel.to_string()
        };
        if let Some(artifact) = artifacts.get(&rel) {
            return Route::Artifact(artifact.clone());
        }
    }

    if let Some(static_dir) = &config.dev_server.static_dir {
        if let Some(file) = static_file(static_dir, path, document_name) {
            return Route::Static(file);
        }
    }

    for (prefix, target) in &config.dev_server.proxy {
        if path == prefix || path.starts_with(&format!("{prefix}/")) {
            return Route::Proxy(format!("{target}{request}"));
        }
    }

    if config.dev_server.history_api_fallback && !has_extension(path) {
        if let Some(document) = artifacts.get(document_name) {
            return Route::Document(document.clone());
        }
        if let Some(static_dir) = &config.dev_server.static_dir {
            let index = static_dir.join(document_name);
            if index.is_file() {
                return Route::Static(index);
            }
        }
    }

    Route::NotFound
}

fn strip_public_path<'a>(path: &'a str, public_path: &str) -> Option<&'a str> {
    if let Some(rest) = path.strip_prefix(public_path) {
        return Some(rest);
    }
    // "/static" for public path "/static/"
    (path == public_path.trim_end_matches('/')).then_some("")
}

/// Static file for `path`, rejecting anything that escapes `dir`.
fn static_file(dir: &Path, path: &str, document_name: &str) -> Option<PathBuf> {
    let rel = Path::new(path.trim_start_matches('/'));
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    let mut file = dir.join(rel);
    if file.is_dir() {
        file = file.join(document_name);
    }
    file.is_file().then_some(file)
}

fn has_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|segment| segment.contains('.'))
}

/// `Content-Type` for a served file name.
#[must_use]
pub fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
