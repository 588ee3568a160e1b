#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]

//! Build-pipeline orchestration for web applications.
//!
//! ## Architecture
//!
//! 1. **Config** - typed build intent loaded from `packwright.json`
//! 2. **Resolve** - map import specifiers to files (aliases, base dirs, extensions)
//! 3. **Transform** - ordered rule chains of named transformers per file
//! 4. **Graph** - breadth-first traversal from the entry, memoized per path
//! 5. **Emit** - bundle, source map, assets, post-emit plugin output
//! 6. **Dev** - watch, rebuild the invalidated subset, notify live-reload clients

pub mod bundler;
pub mod codes;
pub mod config;
pub mod dev;
pub mod emit;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod plugin;
pub mod resolver;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;

pub use bundler::{BuildOutput, Bundler};
pub use config::{load_config, BuildConfig, LoadOptions, Mode};
pub use emit::{write_artifacts, Artifact};
pub use error::Error;
pub use graph::{BuildError, BuildGraph, GraphWarning, ModuleNode};
pub use pipeline::{Dependency, Transformer, TransformerRegistry, TransformError, TransformOutput};
pub use resolver::{ResolveError, Resolver};
pub use version::VERSION;
