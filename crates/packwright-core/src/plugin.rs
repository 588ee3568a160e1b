//! Plugin stages.
//!
//! Plugins hook into three explicit stages, run in registration order:
//!
//! - [`Stage::PreTransform`]: rewrite raw module source before any rule
//!   transformer sees it (e.g. `define` replacement).
//! - [`Stage::Resolve`]: claim a specifier before alias / base-dir lookup
//!   (e.g. `resolve.fallback`). The first plugin returning a hook wins.
//! - [`Stage::PostEmit`]: add or rewrite artifacts after the bundle has been
//!   produced (e.g. the HTML document).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::BuildConfig;
use crate::emit::Artifact;
use crate::graph::BuildGraph;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin.
#[derive(Debug, Clone, Error)]
#[error("[{plugin}] {stage}: {message}")]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Stage that failed.
    pub stage: &'static str,
    pub message: String,
}

/// The stage a plugin participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreTransform,
    Resolve,
    PostEmit,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreTransform => "pre-transform",
            Self::Resolve => "resolve",
            Self::PostEmit => "post-emit",
        }
    }
}

/// Outcome of a resolve-stage hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveHook {
    /// Final resolved file.
    Path(PathBuf),
    /// Replacement specifier, resolved by the regular algorithm.
    Specifier(String),
}

/// What post-emit plugins see.
pub struct EmitContext<'a> {
    pub config: &'a BuildConfig,
    pub graph: &'a BuildGraph,
}

/// A build plugin.
///
/// Only the hook matching [`Plugin::stage`] is ever called.
pub trait Plugin: Send + Sync {
    /// Plugin name for logs and error messages.
    fn name(&self) -> &str;

    fn stage(&self) -> Stage;

    /// Return `Some(code)` to replace the module source.
    fn pre_transform(&self, _path: &Path, _code: &str) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Return `Some(hook)` to claim the specifier.
    fn resolve(&self, _specifier: &str, _from_dir: &Path) -> HookResult<Option<ResolveHook>> {
        Ok(None)
    }

    /// Add or rewrite artifacts.
    fn post_emit(&self, _ctx: &EmitContext<'_>, _artifacts: &mut Vec<Artifact>) -> HookResult<()> {
        Ok(())
    }
}

/// Ordered plugin pipeline.
#[derive(Default, Clone)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name().to_string()))
            .finish()
    }
}

impl PluginPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in plugins implied by `config`:
    /// define, fallback, html, progress.
    #[must_use]
    pub fn from_config(config: &BuildConfig) -> Self {
        let mut pipeline = Self::new();
        if !config.define.is_empty() {
            pipeline.add(DefinePlugin::new(config.define.clone().into_iter().collect()));
        }
        if !config.resolve.fallback.is_empty() {
            pipeline.add(FallbackPlugin::new(
                config.resolve.fallback.clone().into_iter().collect(),
            ));
        }
        if config.html.is_some() {
            pipeline.add(HtmlPlugin);
        }
        pipeline.add(ProgressPlugin);
        pipeline
    }

    pub fn add<P: Plugin + 'static>(&mut self, plugin: P) -> &mut Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn at(&self, stage: Stage) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.iter().filter(move |p| p.stage() == stage)
    }

    /// Run every pre-transform plugin over `code`.
    pub fn pre_transform(&self, path: &Path, code: String) -> HookResult<String> {
        let mut code = code;
        for plugin in self.at(Stage::PreTransform) {
            if let Some(next) = plugin.pre_transform(path, &code)? {
                code = next;
            }
        }
        Ok(code)
    }

    /// First resolve-stage plugin that claims `specifier`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> HookResult<Option<ResolveHook>> {
        for plugin in self.at(Stage::Resolve) {
            if let Some(hook) = plugin.resolve(specifier, from_dir)? {
                return Ok(Some(hook));
            }
        }
        Ok(None)
    }

    pub fn post_emit(&self, ctx: &EmitContext<'_>, artifacts: &mut Vec<Artifact>) -> HookResult<()> {
        for plugin in self.at(Stage::PostEmit) {
            plugin.post_emit(ctx, artifacts)?;
        }
        Ok(())
    }
}

// ============================================================================
// Built-in plugins
// ============================================================================

/// Extensions `define` replacement applies to.
const SCRIPT_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// Replaces whole-identifier occurrences of each key with its value.
///
/// Keys may be dotted paths (`process.env.NODE_ENV`). An occurrence only
/// matches when it is not part of a longer identifier or member chain.
pub struct DefinePlugin {
    /// Longest key first so `process.env.A_B` wins over `process.env.A`.
    entries: Vec<(String, String)>,
}

impl DefinePlugin {
    #[must_use]
    pub fn new(mut entries: Vec<(String, String)>) -> Self {
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { entries }
    }

    /// Replace keys in code positions only. String literals, comments and
    /// template text are copied through; `${}` expressions are rewritten.
    fn replace(&self, code: &str) -> Option<String> {
        let bytes = code.as_bytes();
        let mut out = String::with_capacity(code.len());
        let mut changed = false;
        let mut i = 0;
        let mut copied = 0;
        // Brace depth at each open `${`, innermost last.
        let mut templates: Vec<u32> = Vec::new();
        let mut depth: u32 = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    i = find_byte(bytes, i + 2, b'\n');
                    continue;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = find_block_end(bytes, i + 2);
                    continue;
                }
                b'\'' | b'"' => {
                    i = skip_quoted(bytes, i);
                    continue;
                }
                b'`' => {
                    i = enter_template(bytes, i + 1, &mut templates, &mut depth);
                    continue;
                }
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if templates.last() == Some(&depth) {
                        templates.pop();
                        i = enter_template(bytes, i + 1, &mut templates, &mut depth);
                        continue;
                    }
                }
                _ => {}
            }

            let boundary_before = i == 0 || !is_ident_or_dot(bytes[i - 1]);
            if boundary_before {
                if let Some((key, value)) = self.entries.iter().find(|(key, _)| {
                    bytes[i..].starts_with(key.as_bytes())
                        && bytes
                            .get(i + key.len())
                            .map_or(true, |&b| !is_ident_byte(b))
                }) {
                    out.push_str(&code[copied..i]);
                    out.push_str(value);
                    i += key.len();
                    copied = i;
                    changed = true;
                    continue;
                }
            }
            i += 1;
        }

        if !changed {
            return None;
        }
        out.push_str(&code[copied..]);
        Some(out)
    }
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> usize {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map_or(bytes.len(), |p| from + p)
}

/// Position after the `*/` closing a block comment.
fn find_block_end(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Position after a `'` or `"` literal starting at `start`. An unterminated
/// literal ends at the newline.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Skip template text from `from` up to the closing backtick or the next
/// `${`. Entering an expression records it in `templates`.
fn enter_template(bytes: &[u8], from: usize, templates: &mut Vec<u32>, depth: &mut u32) -> usize {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return i + 1,
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                templates.push(*depth);
                *depth += 1;
                return i + 2;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn is_ident_or_dot(b: u8) -> bool {
    is_ident_byte(b) || b == b'.'
}

impl Plugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    fn stage(&self) -> Stage {
        Stage::PreTransform
    }

    fn pre_transform(&self, path: &Path, code: &str) -> HookResult<Option<String>> {
        let is_script = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SCRIPT_EXTENSIONS.contains(&e));
        if !is_script {
            return Ok(None);
        }
        Ok(self.replace(code))
    }
}

/// Maps bare specifiers (and their subpaths) to replacement specifiers.
pub struct FallbackPlugin {
    entries: Vec<(String, String)>,
}

impl FallbackPlugin {
    #[must_use]
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }
}

impl Plugin for FallbackPlugin {
    fn name(&self) -> &str {
        "fallback"
    }

    fn stage(&self) -> Stage {
        Stage::Resolve
    }

    fn resolve(&self, specifier: &str, _from_dir: &Path) -> HookResult<Option<ResolveHook>> {
        for (key, replacement) in &self.entries {
            if specifier == key {
                return Ok(Some(ResolveHook::Specifier(replacement.clone())));
            }
            if let Some(rest) = specifier.strip_prefix(key.as_str()) {
                if rest.starts_with('/') {
                    return Ok(Some(ResolveHook::Specifier(format!("{replacement}{rest}"))));
                }
            }
        }
        Ok(None)
    }
}

/// Writes the HTML document with a `<script>` tag for the bundle.
pub struct HtmlPlugin;

impl HtmlPlugin {
    fn default_document(title: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n  <head>\n    <meta charset=\"utf-8\" />\n    \
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n    \
             <title>{title}</title>\n  </head>\n  <body>\n    <div id=\"root\"></div>\n  </body>\n</html>\n"
        )
    }
}

/// Insert `tag` before `</body>`, or append it when there is none.
#[must_use]
pub fn inject_before_body_end(html: &str, tag: &str) -> String {
    match html.rfind("</body>") {
        Some(pos) => format!("{}{tag}\n{}", &html[..pos], &html[pos..]),
        None => format!("{html}{tag}\n"),
    }
}

impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        "html"
    }

    fn stage(&self) -> Stage {
        Stage::PostEmit
    }

    fn post_emit(&self, ctx: &EmitContext<'_>, artifacts: &mut Vec<Artifact>) -> HookResult<()> {
        let Some(html) = &ctx.config.html else {
            return Ok(());
        };

        let document = match &html.template {
            Some(template) => std::fs::read_to_string(template).map_err(|e| PluginError {
                plugin: self.name().to_string(),
                stage: Stage::PostEmit.as_str(),
                message: format!("cannot read template {}: {e}", template.display()),
            })?,
            None => Self::default_document(&html.title),
        };

        let public_path = &ctx.config.output.public_path;
        let document = document.replace("%PUBLIC_URL%", public_path.trim_end_matches('/'));
        let tag = format!(
            "    <script src=\"{public_path}{}\"></script>",
            ctx.config.output.filename
        );
        let document = inject_before_body_end(&document, &tag);

        artifacts.retain(|a| a.path != html.filename);
        artifacts.push(Artifact::new(html.filename.clone(), document.into_bytes()));
        Ok(())
    }
}

/// Logs a one-line summary of every emit.
pub struct ProgressPlugin;

impl Plugin for ProgressPlugin {
    fn name(&self) -> &str {
        "progress"
    }

    fn stage(&self) -> Stage {
        Stage::PostEmit
    }

    fn post_emit(&self, ctx: &EmitContext<'_>, artifacts: &mut Vec<Artifact>) -> HookResult<()> {
        let label = if ctx.config.mode.is_development() {
            "dev"
        } else {
            "build"
        };
        let bytes: usize = artifacts.iter().map(|a| a.bytes.len()).sum();
        info!(
            label,
            modules = ctx.graph.len(),
            artifacts = artifacts.len(),
            bytes,
            "emitted"
        );
        Ok(())
    }
}
