//! Named transformers.
//!
//! A transformer turns a file's content into module code plus the
//! specifiers it depends on. Rules in the config refer to transformers by
//! registry name; compilers that live outside this crate plug in through
//! [`TransformerRegistry::register`].

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::lower::lower_module_syntax;
use super::scan::{scan_css, scan_script};
use crate::config::Mode;

/// A specifier discovered by a transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub specifier: String,
    /// Lazy edges (`import()`) may be missing without failing the build.
    pub lazy: bool,
}

impl Dependency {
    #[must_use]
    pub fn required(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            lazy: false,
        }
    }

    #[must_use]
    pub fn lazy(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            lazy: true,
        }
    }
}

/// Result of a transform step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutput {
    pub content: String,
    pub dependencies: Vec<Dependency>,
}

impl TransformOutput {
    #[must_use]
    pub fn unchanged(content: String) -> Self {
        Self {
            content,
            dependencies: Vec::new(),
        }
    }
}

/// Build-wide facts a transformer may depend on.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub mode: Mode,
    pub public_path: &'a str,
    pub root: &'a Path,
}

/// Input to one transform step.
#[derive(Debug, Clone, Copy)]
pub struct TransformInput<'a> {
    pub path: &'a Path,
    /// Output of the previous step (raw source for the first one).
    pub content: &'a str,
    pub ctx: TransformContext<'a>,
}

/// A transformer rejected its input.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransformFailure(pub String);

/// A named transform step.
pub trait Transformer: Send + Sync {
    /// Registry name used in rule `use` lists.
    fn name(&self) -> &str;

    fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure>;
}

/// Transformers by name.
#[derive(Clone)]
pub struct TransformerRegistry {
    transformers: FxHashMap<String, Arc<dyn Transformer>>,
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.transformers.keys().collect();
        names.sort();
        f.debug_struct("TransformerRegistry")
            .field("transformers", &names)
            .finish()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(PassthroughTransformer)
            .register(ScriptTransformer)
            .register(StyleTransformer)
            .register(JsonTransformer)
            .register(AssetTransformer);
        registry
    }
}

impl TransformerRegistry {
    /// Registry without the built-in transformers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            transformers: FxHashMap::default(),
        }
    }

    /// Register (or replace) a transformer under its own name.
    pub fn register<T: Transformer + 'static>(&mut self, transformer: T) -> &mut Self {
        self.register_arc(Arc::new(transformer))
    }

    pub fn register_arc(&mut self, transformer: Arc<dyn Transformer>) -> &mut Self {
        self.transformers
            .insert(transformer.name().to_string(), transformer);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(name).cloned()
    }
}

// ============================================================================
// Built-ins
// ============================================================================

/// Identity.
pub struct PassthroughTransformer;

impl Transformer for PassthroughTransformer {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
        Ok(TransformOutput::unchanged(input.content.to_string()))
    }
}

/// Discovers script dependencies and lowers module syntax to the bundle
/// runtime's `require` form.
pub struct ScriptTransformer;

impl Transformer for ScriptTransformer {
    fn name(&self) -> &str {
        "script"
    }

    fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
        let dependencies = scan_script(input.content)
            .into_iter()
            .map(|import| Dependency {
                specifier: import.specifier,
                lazy: import.kind.is_lazy(),
            })
            .collect();

        Ok(TransformOutput {
            content: lower_module_syntax(input.content),
            dependencies,
        })
    }
}

/// Wraps a stylesheet in a module that injects a `<style>` element.
///
/// `@import`ed stylesheets become required dependencies and are injected
/// first; the `@import` lines are dropped from the injected text.
pub struct StyleTransformer;

impl Transformer for StyleTransformer {
    fn name(&self) -> &str {
        "style"
    }

    fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
        let imports = scan_css(input.content);
        let import_lines: Vec<usize> = imports.iter().map(|i| i.line as usize).collect();

        let css: String = input
            .content
            .lines()
            .enumerate()
            .filter(|(idx, _)| !import_lines.contains(&(idx + 1)))
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n");

        let mut content = String::new();
        for import in &imports {
            content.push_str(&format!("require({});\n", js_string(&import.specifier)));
        }
        content.push_str(&format!("var css = {};\n", js_string(&css)));
        content.push_str("if (typeof document !== \"undefined\") {\n");
        content.push_str("  var style = document.createElement(\"style\");\n");
        content.push_str("  style.textContent = css;\n");
        content.push_str("  document.head.appendChild(style);\n");
        content.push_str("}\n");
        content.push_str("module.exports = css;\n");

        Ok(TransformOutput {
            content,
            dependencies: imports
                .into_iter()
                .map(|i| Dependency::required(i.specifier))
                .collect(),
        })
    }
}

/// Validates JSON and exposes it as the module value.
pub struct JsonTransformer;

impl Transformer for JsonTransformer {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
        serde_json::from_str::<serde_json::Value>(input.content).map_err(|e| {
            TransformFailure(format!(
                "invalid JSON at line {} column {}: {e}",
                e.line(),
                e.column()
            ))
        })?;

        Ok(TransformOutput::unchanged(format!(
            "module.exports = {};\n",
            input.content.trim()
        )))
    }
}

/// Exposes the public URL an asset is served under.
pub struct AssetTransformer;

impl Transformer for AssetTransformer {
    fn name(&self) -> &str {
        "asset"
    }

    fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
        let file_name = input
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransformFailure("asset path has no file name".to_string()))?;

        let url = format!("{}{file_name}", input.ctx.public_path);
        Ok(TransformOutput::unchanged(format!(
            "module.exports = {};\n",
            js_string(&url)
        )))
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(transformer: &dyn Transformer, path: &str, content: &str) -> Result<TransformOutput, TransformFailure> {
        transformer.transform(TransformInput {
            path: Path::new(path),
            content,
            ctx: TransformContext {
                mode: Mode::Development,
                public_path: "/static/",
                root: Path::new("/app"),
            },
        })
    }

    #[test]
    fn test_registry_has_builtins() {
        let registry = TransformerRegistry::default();
        for name in ["passthrough", "script", "style", "json", "asset"] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(registry.get("babel").is_none());
        assert!(TransformerRegistry::empty().get("script").is_none());
    }

    #[test]
    fn test_script_dependencies_and_lowering() {
        let out = run(
            &ScriptTransformer,
            "/app/src/index.js",
            "import App from './App';\nconst About = () => import('./About');\n",
        )
        .unwrap();

        assert_eq!(
            out.dependencies,
            vec![Dependency::required("./App"), Dependency::lazy("./About")]
        );
        assert!(out.content.starts_with("const App = __default(require(\"./App\"));"));
        assert!(out.content.contains("require.lazy('./About')"));
    }

    #[test]
    fn test_style_wraps_css() {
        let out = run(
            &StyleTransformer,
            "/app/src/app.css",
            "@import \"./base.css\";\nbody { color: red; }",
        )
        .unwrap();

        assert_eq!(out.dependencies, vec![Dependency::required("./base.css")]);
        assert!(out.content.starts_with("require(\"./base.css\");\n"));
        assert!(out.content.contains("var css = \"body { color: red; }\";"));
        assert!(out.content.contains("document.head.appendChild(style)"));
    }

    #[test]
    fn test_json_validates() {
        let out = run(&JsonTransformer, "/app/data.json", "{ \"a\": 1 }\n").unwrap();
        assert_eq!(out.content, "module.exports = { \"a\": 1 };\n");

        let err = run(&JsonTransformer, "/app/data.json", "{ a: 1 }").unwrap_err();
        assert!(err.0.contains("invalid JSON at line 1"));
    }

    #[test]
    fn test_asset_exposes_url() {
        let out = run(&AssetTransformer, "/app/src/img/logo.png", "").unwrap();
        assert_eq!(out.content, "module.exports = \"/static/logo.png\";\n");
        assert!(out.dependencies.is_empty());
    }
}
