//! The build orchestrator.
//!
//! ## Usage
//!
//! ```ignore
//! use packwright_core::{load_config, Bundler, LoadOptions};
//!
//! let config = load_config(&cwd, &LoadOptions::default())?;
//! let bundler = Bundler::new(config)?;
//! let output = bundler.run()?;
//! bundler.write(&output.artifacts)?;
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::{BuildConfig, ConfigError};
use crate::emit::{self, Artifact, EmitError};
use crate::error::Error;
use crate::graph::{BuildError, BuildGraph, GraphBuilder};
use crate::pipeline::{Pipeline, TransformerRegistry};
use crate::plugin::PluginPipeline;
use crate::resolver::Resolver;

/// A successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub graph: BuildGraph,
    pub artifacts: Vec<Artifact>,
}

/// Config, plugins, resolver and transform pipeline for one build
/// configuration.
#[derive(Debug)]
pub struct Bundler {
    config: Arc<BuildConfig>,
    plugins: Arc<PluginPipeline>,
    resolver: Resolver,
    pipeline: Pipeline,
}

impl Bundler {
    /// Bundler with the built-in transformers and the plugins implied by
    /// `config`.
    pub fn new(config: BuildConfig) -> Result<Self, ConfigError> {
        let plugins = PluginPipeline::from_config(&config);
        Self::with_parts(config, &TransformerRegistry::default(), plugins)
    }

    /// Bundler with a caller-supplied registry and plugin pipeline.
    pub fn with_parts(
        config: BuildConfig,
        registry: &TransformerRegistry,
        plugins: PluginPipeline,
    ) -> Result<Self, ConfigError> {
        let config = Arc::new(config);
        let plugins = Arc::new(plugins);
        let pipeline = Pipeline::new(&config, registry, Arc::clone(&plugins))?;
        let resolver = Resolver::new(Arc::clone(&config), Arc::clone(&plugins));
        Ok(Self {
            config,
            plugins,
            resolver,
            pipeline,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    fn graph_builder(&self) -> GraphBuilder<'_> {
        GraphBuilder::new(&self.config, &self.resolver, &self.pipeline)
    }

    /// Build the full graph from the entry.
    pub fn build_graph(&self) -> Result<BuildGraph, BuildError> {
        self.graph_builder().build()
    }

    /// Rebuild after `invalidated` changed, reusing every other node of
    /// `previous`. Resolutions are recomputed since files may have been
    /// added or removed.
    pub fn rebuild_graph(
        &self,
        previous: &BuildGraph,
        invalidated: &HashSet<PathBuf>,
    ) -> Result<BuildGraph, BuildError> {
        self.resolver.clear_cache();
        self.graph_builder().rebuild(previous, invalidated)
    }

    /// Produce artifacts for `graph`.
    pub fn emit(&self, graph: &BuildGraph) -> Result<Vec<Artifact>, EmitError> {
        emit::emit(graph, &self.config, &self.plugins)
    }

    /// Build and emit, without touching the output directory.
    pub fn run(&self) -> Result<BuildOutput, Error> {
        let start = Instant::now();
        let graph = self.build_graph()?;
        debug!(modules = graph.len(), "graph built");
        let artifacts = self.emit(&graph)?;
        info!(
            mode = self.config.mode.as_str(),
            modules = graph.len(),
            artifacts = artifacts.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "build finished"
        );
        Ok(BuildOutput { graph, artifacts })
    }

    /// Write artifacts to the configured output directory.
    pub fn write(&self, artifacts: &[Artifact]) -> Result<usize, EmitError> {
        emit::write_artifacts(
            artifacts,
            &self.config.output.dir,
            self.config.output.clean,
            &self.config.root,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FatalCause;
    use crate::pipeline::{TransformFailure, TransformInput, TransformOutput, Transformer};
    use crate::testutil::{config_from_json, TempProject};

    struct Reject;

    impl Transformer for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure> {
            Err(TransformFailure(format!(
                "unsupported syntax in {}",
                input.path.display()
            )))
        }
    }

    #[test]
    fn test_transform_failure_aborts_without_writing() {
        let project = TempProject::new();
        project.write("src/index.js", "import './style.css';\nimport './app.ts';");
        project.write("src/style.css", "body {}");
        project.write("src/app.ts", "let x: number = 1;");

        let config = config_from_json(
            &project,
            serde_json::json!({
                "rules": [
                    { "test": "\\.js$", "use": ["script"] },
                    { "test": "\\.css$", "use": ["passthrough"] },
                    { "test": "\\.ts$", "use": ["reject"] }
                ]
            }),
        );
        let mut registry = TransformerRegistry::default();
        registry.register(Reject);
        let plugins = PluginPipeline::from_config(&config);
        let bundler = Bundler::with_parts(config, &registry, plugins).unwrap();

        let err = bundler.run().unwrap_err();
        match err {
            Error::Build(BuildError::Fatal {
                chain,
                cause: FatalCause::Transform(e),
            }) => {
                assert_eq!(chain, vec![project.path("src/index.js"), project.path("src/app.ts")]);
                assert_eq!(e.rule_index, Some(2));
                assert_eq!(e.transformer, "reject");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!project.path("build").exists());
    }

    #[test]
    fn test_alias_end_to_end() {
        let project = TempProject::new();
        project.write("src/index.js", "import foo from '@/foo';\nconsole.log(foo);\n");
        project.write("src/foo.ts", "export default 42;\n");

        let bundler = Bundler::new(config_from_json(
            &project,
            serde_json::json!({ "resolve": { "alias": { "@": "src" } } }),
        ))
        .unwrap();

        let output = bundler.run().unwrap();
        assert!(output.graph.contains(&project.path("src/foo.ts")));

        assert_eq!(bundler.write(&output.artifacts).unwrap(), 2);
        let bundle = std::fs::read_to_string(project.path("build/bundle.js")).unwrap();
        assert!(bundle.contains("{\"@/foo\": \"src/foo.ts\"}"));
        assert!(bundle.contains("exports.default = 42;"));
        assert!(project.path("build/bundle.js.map").is_file());
    }

    #[test]
    fn test_unknown_transformer_fails_construction() {
        let project = TempProject::new();
        let config = config_from_json(
            &project,
            serde_json::json!({ "rules": [{ "test": "\\.js$", "use": ["babel"] }] }),
        );
        assert!(matches!(
            Bundler::new(config).unwrap_err(),
            ConfigError::UnknownTransformer { rule_index: 0, .. }
        ));
    }
}
