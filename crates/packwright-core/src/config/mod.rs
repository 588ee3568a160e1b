//! Build configuration.
//!
//! `packwright.json` is deserialized into [`RawConfig`] (every field optional)
//! and validated into an immutable [`BuildConfig`]. Paths are made absolute
//! against the project root, patterns are compiled, and the mode is fixed so
//! nothing downstream consults the process environment.
//!
//! ```json
//! {
//!   "entry": "./src/index.tsx",
//!   "output": { "dir": "build", "filename": "bundle.js", "publicPath": "/" },
//!   "resolve": { "alias": { "@": "src" }, "extensions": [".ts", ".tsx"] },
//!   "rules": [{ "test": "\\.tsx?$", "exclude": "node_modules", "use": ["script"] }],
//!   "devServer": { "port": 4000, "proxy": { "/api": "http://localhost:3000" } }
//! }
//! ```

pub mod env;

use packwright_util::fs::normalize_lexically;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Config file looked up in the project root.
pub const CONFIG_FILE: &str = "packwright.json";

/// Build mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::Invalid {
                field: "mode",
                message: format!("unknown mode '{other}' (expected development or production)"),
            }),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid pattern in {field}: {pattern}: {message}")]
    Pattern {
        field: &'static str,
        pattern: String,
        message: String,
    },

    #[error("Rule {rule_index} uses unknown transformer '{name}'")]
    UnknownTransformer { rule_index: usize, name: String },

    #[error("Invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

// ============================================================================
// Raw (deserialized) model
// ============================================================================

/// `packwright.json` as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConfig {
    pub mode: Option<Mode>,
    pub entry: Option<String>,
    pub output: RawOutput,
    pub resolve: RawResolve,
    pub rules: Option<Vec<RawRule>>,
    pub assets: Option<Vec<RawRule>>,
    pub define: BTreeMap<String, String>,
    pub html: Option<RawHtml>,
    pub dev_server: RawDevServer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawOutput {
    pub dir: Option<String>,
    pub filename: Option<String>,
    pub public_path: Option<String>,
    pub clean: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawResolve {
    pub alias: BTreeMap<String, String>,
    pub extensions: Option<Vec<String>>,
    pub modules: Option<Vec<String>>,
    pub fallback: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    pub test: String,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default, rename = "use")]
    pub uses: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawHtml {
    pub template: Option<String>,
    pub filename: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawDevServer {
    pub port: Option<u16>,
    pub host: Option<String>,
    #[serde(rename = "static")]
    pub static_dir: Option<String>,
    pub proxy: BTreeMap<String, String>,
    pub history_api_fallback: Option<bool>,
    pub live_reload: Option<bool>,
}

// ============================================================================
// Validated model
// ============================================================================

/// Output location and naming.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Absolute output directory.
    pub dir: PathBuf,
    /// Bundle file name inside `dir`.
    pub filename: String,
    /// URL prefix the output is served under (always ends with `/`).
    pub public_path: String,
    /// Empty `dir` before writing.
    pub clean: bool,
}

/// A base directory searched for bare specifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleDir {
    /// Absolute directory, searched directly.
    Absolute(PathBuf),
    /// Directory name looked up in every ancestor of the importer up to the root.
    Hierarchical(String),
}

/// Module resolution settings.
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    /// Alias prefix → absolute target, longest prefix first.
    pub alias: Vec<(String, PathBuf)>,
    /// Extensions tried in order (with leading dot).
    pub extensions: Vec<String>,
    /// Base directories for bare specifiers, in search order.
    pub modules: Vec<ModuleDir>,
    /// Bare specifier → replacement specifier.
    pub fallback: BTreeMap<String, String>,
}

/// A compiled match rule.
#[derive(Debug, Clone)]
pub struct MatchRule {
    /// Predicate over the module path.
    pub test: Regex,
    /// Matching paths skip the rule entirely.
    pub exclude: Option<Regex>,
    /// Transformer names applied in order.
    pub uses: Vec<String>,
}

impl MatchRule {
    /// Whether the rule applies to `path`. A matching exclusion wins.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let path = normalize_for_match(path);
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(&path) {
                return false;
            }
        }
        self.test.is_match(&path)
    }
}

/// HTML document generation.
#[derive(Debug, Clone)]
pub struct HtmlConfig {
    /// Absolute template path; a minimal document is generated when absent.
    pub template: Option<PathBuf>,
    /// Output file name inside the output dir.
    pub filename: String,
    /// `<title>` for the generated document.
    pub title: String,
}

/// Dev server settings.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    pub port: u16,
    pub host: String,
    /// Absolute static directory served next to the artifacts.
    pub static_dir: Option<PathBuf>,
    /// Path prefix → target origin, longest prefix first.
    pub proxy: Vec<(String, String)>,
    /// Serve the entry document for unmatched extension-less paths.
    pub history_api_fallback: bool,
    /// Push reload/error notifications to connected clients.
    pub live_reload: bool,
}

/// Immutable, validated build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub mode: Mode,
    /// Absolute project root.
    pub root: PathBuf,
    /// Absolute entry path.
    pub entry: PathBuf,
    pub output: OutputConfig,
    pub resolve: ResolveConfig,
    pub rules: Vec<MatchRule>,
    /// Paths copied verbatim as assets.
    pub assets: Vec<MatchRule>,
    /// Identifier → replacement text applied before rule transformers.
    pub define: BTreeMap<String, String>,
    pub html: Option<HtmlConfig>,
    pub dev_server: DevServerConfig,
}

/// Rules used when the config has no `rules` key.
const DEFAULT_RULES: &[(&str, Option<&str>, &str)] = &[
    (r"\.[jt]sx?$", Some("node_modules"), "script"),
    (r"\.css$", Some("node_modules"), "style"),
    (r"\.json$", None, "json"),
];

/// Asset pattern used when the config has no `assets` key.
const DEFAULT_ASSET_PATTERN: &str = r"(?i)\.(png|jpe?g|gif|ico|svg|webp|woff2?|txt)$";

const DEFAULT_EXTENSIONS: &[&str] = &[".js", ".jsx", ".ts", ".tsx"];

impl BuildConfig {
    /// Validate a raw config.
    ///
    /// `env` supplies the variables exposed through `define` (see
    /// [`env::define_entries`]); explicit `define` entries win.
    pub fn from_raw(
        root: &Path,
        raw: RawConfig,
        mode: Mode,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

        let entry = normalize_lexically(&root.join(raw.entry.as_deref().unwrap_or("src/index.js")));

        let public_path = normalize_public_path(raw.output.public_path.as_deref().unwrap_or("/"));
        let filename = raw
            .output
            .filename
            .unwrap_or_else(|| "bundle.js".to_string());
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "output.filename",
                message: format!("'{filename}' must be a plain file name"),
            });
        }
        let out_dir = normalize_lexically(&root.join(raw.output.dir.as_deref().unwrap_or("build")));
        if raw.output.clean && (root.starts_with(&out_dir) || entry.starts_with(&out_dir)) {
            return Err(ConfigError::Invalid {
                field: "output.dir",
                message: format!(
                    "'{}' contains the project sources and cannot be cleaned",
                    out_dir.display()
                ),
            });
        }
        let output = OutputConfig {
            dir: out_dir,
            filename,
            public_path,
            clean: raw.output.clean,
        };

        let mut alias: Vec<(String, PathBuf)> = raw
            .resolve
            .alias
            .into_iter()
            .map(|(key, target)| (key, root.join(target)))
            .collect();
        alias.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let extensions = raw
            .resolve
            .extensions
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect())
            .into_iter()
            .map(|ext| {
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .collect();

        let modules = raw
            .resolve
            .modules
            .unwrap_or_else(|| vec!["node_modules".to_string()])
            .into_iter()
            .map(|dir| {
                let is_path = Path::new(&dir).is_absolute() || dir.contains(['/', '\\']);
                if is_path || (root.join(&dir).is_dir() && dir != "node_modules") {
                    ModuleDir::Absolute(root.join(dir))
                } else {
                    ModuleDir::Hierarchical(dir)
                }
            })
            .collect();

        let rules = match raw.rules {
            Some(rules) => rules
                .into_iter()
                .map(|r| compile_rule(r, "rules"))
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_RULES
                .iter()
                .map(|(test, exclude, uses)| {
                    compile_rule(
                        RawRule {
                            test: (*test).to_string(),
                            exclude: exclude.map(ToString::to_string),
                            uses: vec![(*uses).to_string()],
                        },
                        "rules",
                    )
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let assets = match raw.assets {
            Some(assets) => assets
                .into_iter()
                .map(|r| compile_rule(r, "assets"))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![compile_rule(
                RawRule {
                    test: DEFAULT_ASSET_PATTERN.to_string(),
                    exclude: None,
                    uses: Vec::new(),
                },
                "assets",
            )?],
        };

        let mut define = env::define_entries(env, mode);
        define.extend(raw.define);

        let html = raw.html.map(|html| HtmlConfig {
            template: html.template.map(|t| root.join(t)),
            filename: html.filename.unwrap_or_else(|| "index.html".to_string()),
            title: html.title.unwrap_or_else(|| "packwright".to_string()),
        });

        let mut proxy = Vec::with_capacity(raw.dev_server.proxy.len());
        for (prefix, target) in raw.dev_server.proxy {
            let parsed = url::Url::parse(&target).map_err(|e| ConfigError::Invalid {
                field: "devServer.proxy",
                message: format!("'{target}' for '{prefix}': {e}"),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    field: "devServer.proxy",
                    message: format!("'{target}' must be an http(s) URL"),
                });
            }
            let prefix = if prefix.starts_with('/') {
                prefix
            } else {
                format!("/{prefix}")
            };
            proxy.push((prefix, target.trim_end_matches('/').to_string()));
        }
        proxy.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let dev_server = DevServerConfig {
            port: raw.dev_server.port.unwrap_or(8080),
            host: raw
                .dev_server
                .host
                .unwrap_or_else(|| "localhost".to_string()),
            static_dir: raw.dev_server.static_dir.map(|d| root.join(d)),
            proxy,
            history_api_fallback: raw.dev_server.history_api_fallback.unwrap_or(true),
            live_reload: raw.dev_server.live_reload.unwrap_or(true),
        };

        Ok(Self {
            mode,
            root,
            entry,
            output,
            resolve: ResolveConfig {
                alias,
                extensions,
                modules,
                fallback: raw.resolve.fallback,
            },
            rules,
            assets,
            define,
            html,
            dev_server,
        })
    }

    /// Whether `path` is copied verbatim as an asset.
    #[must_use]
    pub fn is_asset(&self, path: &Path) -> bool {
        self.assets.iter().any(|rule| rule.matches(path))
    }

    /// Path relative to the root with `/` separators, or the full path when
    /// outside the root. Used as the stable module id in emitted output.
    #[must_use]
    pub fn display_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        normalize_for_match(rel)
    }
}

fn compile_rule(raw: RawRule, field: &'static str) -> Result<MatchRule, ConfigError> {
    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|e| ConfigError::Pattern {
            field,
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
    };
    Ok(MatchRule {
        test: compile(&raw.test)?,
        exclude: raw.exclude.as_deref().map(compile).transpose()?,
        uses: raw.uses,
    })
}

fn normalize_public_path(path: &str) -> String {
    let mut out = String::from(path);
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Path string with `/` separators so patterns behave the same on every OS.
fn normalize_for_match(path: &Path) -> String {
    let mut out = String::new();
    for (i, component) in path.components().enumerate() {
        match component {
            Component::RootDir => out.push('/'),
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            other => {
                if i > 0 && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

// ============================================================================
// Loading
// ============================================================================

/// How to locate and interpret the config.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config path (relative to the root when not absolute).
    pub config_path: Option<PathBuf>,
    /// Mode from the command line; wins over everything else.
    pub mode: Option<Mode>,
    /// Mode used when neither the flag, `NODE_ENV` nor the file sets one.
    pub default_mode: Mode,
}

/// Find the config file in `root`.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    let path = root.join(CONFIG_FILE);
    path.is_file().then_some(path)
}

/// Read and deserialize a config file.
pub fn read_raw_config(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the build configuration for `root`.
///
/// Mode precedence: `options.mode`, then `NODE_ENV` (process environment,
/// then `.env`), then the file's `mode`, then `options.default_mode`. This is
/// the only place the process environment is consulted.
pub fn load_config(root: &Path, options: &LoadOptions) -> Result<BuildConfig, ConfigError> {
    let config_path = match &options.config_path {
        Some(path) => {
            let abs = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            Some(abs)
        }
        None => find_config_file(root),
    };

    let raw = match &config_path {
        Some(path) => read_raw_config(path)?,
        None => RawConfig::default(),
    };

    let base_env = env::with_process_env(env::load_env_files(root, "base"));
    // Unrecognized NODE_ENV values (e.g. "test") fall through to the file.
    let mode = options
        .mode
        .or_else(|| base_env.get("NODE_ENV").and_then(|v| v.parse().ok()))
        .or(raw.mode)
        .unwrap_or(options.default_mode);

    let env = env::with_process_env(env::load_env_files(root, mode.as_str()));
    BuildConfig::from_raw(root, raw, mode, &env)
}
