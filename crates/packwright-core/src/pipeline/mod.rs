//! Transform pipeline.
//!
//! Every file runs through the pre-transform plugins, then through the
//! concatenated `use` chains of all matching rules, in configuration order.
//! Files no rule matches pass through unchanged.

mod lower;
pub mod scan;
pub mod transformers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

pub use transformers::{
    Dependency, TransformContext, TransformFailure, TransformInput, TransformOutput, Transformer,
    TransformerRegistry,
};

use crate::config::{BuildConfig, ConfigError, MatchRule, Mode};
use crate::plugin::PluginPipeline;
use transformers::AssetTransformer;

/// A transform step failed. Aborts only the file it was applied to.
#[derive(Debug, Clone, Error)]
#[error("{transformer} failed on {}: {message}", path.display())]
pub struct TransformError {
    pub path: PathBuf,
    /// Index of the rule the failing transformer came from; `None` for
    /// pre-transform plugins.
    pub rule_index: Option<usize>,
    pub transformer: String,
    pub message: String,
}

struct CompiledRule {
    index: usize,
    rule: MatchRule,
    chain: Vec<Arc<dyn Transformer>>,
}

/// Rules with their transformer chains resolved.
pub struct Pipeline {
    rules: Vec<CompiledRule>,
    asset: Arc<dyn Transformer>,
    plugins: Arc<PluginPipeline>,
    mode: Mode,
    public_path: String,
    root: PathBuf,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("rules", &self.rules.len())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Resolve every rule's transformer names against `registry`.
    pub fn new(
        config: &BuildConfig,
        registry: &TransformerRegistry,
        plugins: Arc<PluginPipeline>,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for (index, rule) in config.rules.iter().enumerate() {
            let chain = rule
                .uses
                .iter()
                .map(|name| {
                    registry
                        .get(name)
                        .ok_or_else(|| ConfigError::UnknownTransformer {
                            rule_index: index,
                            name: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(CompiledRule {
                index,
                rule: rule.clone(),
                chain,
            });
        }

        Ok(Self {
            rules,
            asset: registry
                .get("asset")
                .unwrap_or_else(|| Arc::new(AssetTransformer)),
            plugins,
            mode: config.mode,
            public_path: config.output.public_path.clone(),
            root: config.root.clone(),
        })
    }

    fn context(&self) -> TransformContext<'_> {
        TransformContext {
            mode: self.mode,
            public_path: &self.public_path,
            root: &self.root,
        }
    }

    /// Indices of the rules that apply to `path`.
    #[must_use]
    pub fn matching_rules(&self, path: &Path) -> Vec<usize> {
        self.rules
            .iter()
            .filter(|r| r.rule.matches(path))
            .map(|r| r.index)
            .collect()
    }

    /// Run pre-transform plugins and every matching rule chain over `content`.
    pub fn transform(&self, path: &Path, content: String) -> Result<TransformOutput, TransformError> {
        let mut content = self
            .plugins
            .pre_transform(path, content)
            .map_err(|e| TransformError {
                path: path.to_path_buf(),
                rule_index: None,
                transformer: e.plugin.clone(),
                message: e.message,
            })?;

        let mut dependencies: Vec<Dependency> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.rule.matches(path)) {
            for transformer in &rule.chain {
                trace!(path = %path.display(), transformer = transformer.name(), "transform");
                let output = transformer
                    .transform(TransformInput {
                        path,
                        content: &content,
                        ctx: self.context(),
                    })
                    .map_err(|e| TransformError {
                        path: path.to_path_buf(),
                        rule_index: Some(rule.index),
                        transformer: transformer.name().to_string(),
                        message: e.0,
                    })?;
                content = output.content;
                merge_dependencies(&mut dependencies, output.dependencies);
            }
        }

        Ok(TransformOutput {
            content,
            dependencies,
        })
    }

    /// Module body for an asset file.
    pub fn transform_asset(&self, path: &Path) -> Result<TransformOutput, TransformError> {
        self.asset
            .transform(TransformInput {
                path,
                content: "",
                ctx: self.context(),
            })
            .map_err(|e| TransformError {
                path: path.to_path_buf(),
                rule_index: None,
                transformer: self.asset.name().to_string(),
                message: e.0,
            })
    }
}

/// Deduplicate by specifier, keeping first-seen order. A specifier that is
/// required anywhere is required.
fn merge_dependencies(into: &mut Vec<Dependency>, new: Vec<Dependency>) {
    for dep in new {
        match into.iter_mut().find(|d| d.specifier == dep.specifier) {
            Some(existing) => existing.lazy &= dep.lazy,
            None => into.push(dep),
        }
    }
}
