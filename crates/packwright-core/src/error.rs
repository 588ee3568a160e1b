//! Top-level error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::codes;
use crate::config::ConfigError;
use crate::emit::EmitError;
use crate::graph::{BuildError, FatalCause};
use crate::resolver::ResolveError;

/// Any failure of a build run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl Error {
    /// Stable code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(ConfigError::Read { .. }) => codes::CONFIG_READ_ERROR,
            Self::Config(ConfigError::Parse { .. }) => codes::CONFIG_PARSE_ERROR,
            Self::Config(_) => codes::CONFIG_INVALID,
            Self::Build(BuildError::EntryNotFound(_)) => codes::BUILD_ENTRY_NOT_FOUND,
            Self::Build(BuildError::Fatal { cause, .. }) => match cause {
                FatalCause::Resolve(ResolveError::Plugin(_)) => codes::BUILD_PLUGIN_ERROR,
                FatalCause::Resolve(_) => codes::BUILD_RESOLVE_ERROR,
                FatalCause::Transform(e) if e.rule_index.is_none() => codes::BUILD_PLUGIN_ERROR,
                FatalCause::Transform(_) => codes::BUILD_TRANSFORM_ERROR,
                FatalCause::Read { .. } => codes::BUILD_READ_ERROR,
            },
            Self::Emit(EmitError::Plugin(_)) => codes::BUILD_PLUGIN_ERROR,
            Self::Emit(_) => codes::BUILD_EMIT_ERROR,
        }
    }

    /// Import chain from the entry to the failing module, if any.
    #[must_use]
    pub fn chain(&self) -> &[PathBuf] {
        match self {
            Self::Build(e) => e.chain(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TransformError;
    use crate::plugin::PluginError;

    fn transform_error(rule_index: Option<usize>) -> Error {
        Error::Build(BuildError::Fatal {
            chain: vec![PathBuf::from("/app/src/index.js")],
            cause: FatalCause::Transform(TransformError {
                path: PathBuf::from("/app/src/index.js"),
                rule_index,
                transformer: "script".to_string(),
                message: "bad".to_string(),
            }),
        })
    }

    #[test]
    fn test_codes() {
        assert_eq!(transform_error(Some(0)).code(), codes::BUILD_TRANSFORM_ERROR);
        assert_eq!(transform_error(None).code(), codes::BUILD_PLUGIN_ERROR);
        assert_eq!(
            Error::Build(BuildError::EntryNotFound(PathBuf::from("/x"))).code(),
            codes::BUILD_ENTRY_NOT_FOUND
        );
        let plugin = PluginError {
            plugin: "html".to_string(),
            stage: "post-emit",
            message: "missing template".to_string(),
        };
        assert_eq!(Error::Emit(EmitError::Plugin(plugin)).code(), codes::BUILD_PLUGIN_ERROR);
        assert_eq!(
            Error::Config(ConfigError::UnknownTransformer {
                rule_index: 0,
                name: "babel".to_string()
            })
            .code(),
            codes::CONFIG_INVALID
        );
    }

    #[test]
    fn test_chain_exposed() {
        assert_eq!(transform_error(Some(0)).chain().len(), 1);
        assert!(Error::Build(BuildError::EntryNotFound(PathBuf::from("/x")))
            .chain()
            .is_empty());
    }
}
