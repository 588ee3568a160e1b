//! `packwright resolve` command implementation.

use miette::{IntoDiagnostic, Result};
use packwright_core::plugin::PluginPipeline;
use packwright_core::{Mode, ResolveError, Resolver};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Serialize)]
struct ResolveReport {
    ok: bool,
    specifier: String,
    from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tried: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Resolve `specifier` from `from` (default: the project root) and print the
/// result.
pub fn run(
    cwd: &Path,
    specifier: &str,
    from: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = super::load(cwd, config, None, Mode::Development)?;
    let from_dir = match from {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => cwd.join(dir),
        None => config.root.clone(),
    };
    let from_dir = dunce::canonicalize(&from_dir).unwrap_or(from_dir);

    let plugins = Arc::new(PluginPipeline::from_config(&config));
    let resolver = Resolver::new(Arc::new(config), plugins);
    let result = resolver.resolve(specifier, &from_dir);

    if json {
        let tried = match &result {
            Err(ResolveError::NotFound { tried, .. }) => {
                tried.iter().map(|p| p.display().to_string()).collect()
            }
            _ => Vec::new(),
        };
        let report = ResolveReport {
            ok: result.is_ok(),
            specifier: specifier.to_string(),
            from: from_dir.display().to_string(),
            resolved: result.as_ref().ok().map(|p| p.display().to_string()),
            tried,
            error: result.as_ref().err().map(ToString::to_string),
        };
        println!("{}", serde_json::to_string(&report).into_diagnostic()?);
        if result.is_err() {
            std::process::exit(1);
        }
        return Ok(());
    }

    match result {
        Ok(path) => {
            println!("{}", path.display());
            Ok(())
        }
        Err(ResolveError::NotFound { tried, .. }) if tracing::enabled!(tracing::Level::DEBUG) => {
            for candidate in &tried {
                eprintln!("  tried {}", candidate.display());
            }
            Err(miette::miette!("cannot resolve '{specifier}'"))
        }
        Err(e) => Err(e).into_diagnostic(),
    }
}
