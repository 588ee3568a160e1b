//! `packwright build` command implementation.

use miette::{IntoDiagnostic, Result};
use packwright_core::version::REPORT_SCHEMA_VERSION;
use packwright_core::{load_config, BuildOutput, Bundler, Error, GraphWarning, LoadOptions, Mode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
    pub config: Option<PathBuf>,
    pub mode: Option<Mode>,
}

/// `--json` report. Printed as a single object on stdout.
#[derive(Serialize)]
struct BuildReport {
    schema_version: u32,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    out_dir: Option<String>,
    artifacts: Vec<ArtifactJson>,
    modules: usize,
    warnings: Vec<GraphWarning>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<BuildErrorJson>,
}

#[derive(Serialize)]
struct ArtifactJson {
    path: String,
    size: usize,
    hash: String,
}

#[derive(Serialize)]
struct BuildErrorJson {
    code: &'static str,
    message: String,
    chain: Vec<String>,
}

impl BuildReport {
    fn failed(mode: Option<Mode>, error: &Error, duration_ms: u64) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            ok: false,
            mode,
            out_dir: None,
            artifacts: Vec::new(),
            modules: 0,
            warnings: Vec::new(),
            duration_ms,
            error: Some(BuildErrorJson {
                code: error.code(),
                message: error.to_string(),
                chain: error
                    .chain()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            }),
        }
    }
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let start = Instant::now();
    let result = build(&action);
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok((mode, out_dir, output)) => {
            if json {
                let report = BuildReport {
                    schema_version: REPORT_SCHEMA_VERSION,
                    ok: true,
                    mode: Some(mode),
                    out_dir: Some(out_dir.display().to_string()),
                    artifacts: output
                        .artifacts
                        .iter()
                        .map(|a| ArtifactJson {
                            path: a.path.clone(),
                            size: a.size(),
                            hash: a.hash.clone(),
                        })
                        .collect(),
                    modules: output.graph.len(),
                    warnings: output.graph.warnings().to_vec(),
                    duration_ms,
                    error: None,
                };
                println!("{}", serde_json::to_string(&report).into_diagnostic()?);
            } else {
                print_human_output(&out_dir, &output, duration_ms);
            }
            Ok(())
        }
        Err((mode, error)) => {
            if json {
                let report = BuildReport::failed(mode, &error, duration_ms);
                println!("{}", serde_json::to_string(&report).into_diagnostic()?);
                std::process::exit(1);
            }
            Err(error).into_diagnostic()
        }
    }
}

type BuildResult = std::result::Result<(Mode, PathBuf, BuildOutput), (Option<Mode>, Error)>;

fn build(action: &BuildAction) -> BuildResult {
    let config = load_config(
        &action.cwd,
        &LoadOptions {
            config_path: action.config.clone(),
            mode: action.mode,
            default_mode: Mode::Production,
        },
    )
    .map_err(|e| (action.mode, Error::from(e)))?;

    let mode = config.mode;
    let out_dir = config.output.dir.clone();
    let bundler = Bundler::new(config).map_err(|e| (Some(mode), Error::from(e)))?;
    let output = bundler.run().map_err(|e| (Some(mode), e))?;
    bundler
        .write(&output.artifacts)
        .map_err(|e| (Some(mode), Error::from(e)))?;
    Ok((mode, out_dir, output))
}

fn print_human_output(out_dir: &Path, output: &BuildOutput, duration_ms: u64) {
    for warning in output.graph.warnings() {
        eprintln!("warning: {warning}");
    }
    for artifact in &output.artifacts {
        println!(
            "  {}  {}",
            out_dir.join(&artifact.path).display(),
            format_size(artifact.size())
        );
    }
    println!();
    println!(
        "Built {} modules into {} artifacts ({duration_ms}ms)",
        output.graph.len(),
        output.artifacts.len()
    );
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
