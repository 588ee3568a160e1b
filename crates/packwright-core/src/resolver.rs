//! Import specifier resolution.
//!
//! Resolves import specifiers to absolute file paths.
//!
//! ## Order
//!
//! 1. Resolve-stage plugins (`resolve.fallback` among them)
//! 2. Aliases, longest prefix first
//! 3. Relative (`./utils`, `../lib/foo`) and absolute specifiers
//! 4. Bare specifiers (`lodash`, `@scope/pkg/sub`) in each `resolve.modules` dir
//!
//! Every candidate base path is tried as an exact file, then with each
//! configured extension, then as a package directory (`package.json` entry
//! fields) and finally as a directory with an `index` file.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::trace;

use crate::config::{BuildConfig, ModuleDir};
use crate::plugin::{PluginError, PluginPipeline, ResolveHook};

/// Error during resolution.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Cannot resolve '{specifier}' from '{}' (tried {} candidates)", from.display(), tried.len())]
    NotFound {
        specifier: String,
        from: PathBuf,
        /// Candidate files checked, in order.
        tried: Vec<PathBuf>,
    },

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl ResolveError {
    #[must_use]
    pub fn specifier(&self) -> Option<&str> {
        match self {
            Self::NotFound { specifier, .. } => Some(specifier),
            Self::Plugin(_) => None,
        }
    }
}

/// Import resolver.
///
/// Resolution is a pure function of (specifier, from_dir, config, file
/// system), so results are cached until [`Resolver::clear_cache`].
pub struct Resolver {
    config: Arc<BuildConfig>,
    plugins: Arc<PluginPipeline>,
    cache: RwLock<HashMap<(String, PathBuf), PathBuf>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("root", &self.config.root)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    #[must_use]
    pub fn new(config: Arc<BuildConfig>, plugins: Arc<PluginPipeline>) -> Self {
        Self {
            config,
            plugins,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `specifier` as written in a module inside `from_dir`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        let cache_key = (specifier.to_string(), from_dir.to_path_buf());
        if let Some(cached) = self.cache.read().unwrap().get(&cache_key) {
            return Ok(cached.clone());
        }

        let resolved = self.resolve_uncached(specifier, from_dir)?;
        trace!(specifier, resolved = %resolved.display(), "resolved");

        self.cache
            .write()
            .unwrap()
            .insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    /// Forget every cached resolution.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    fn resolve_uncached(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        let specifier = match self.plugins.resolve(specifier, from_dir)? {
            Some(ResolveHook::Path(path)) => return Ok(path),
            Some(ResolveHook::Specifier(replacement)) => replacement,
            None => specifier.to_string(),
        };

        let mut tried = Vec::new();
        for base in self.candidate_bases(&specifier, from_dir) {
            if let Some(found) = self.resolve_file_or_directory(&base, &mut tried) {
                return Ok(dunce::canonicalize(&found).unwrap_or(found));
            }
        }

        Err(ResolveError::NotFound {
            specifier,
            from: from_dir.to_path_buf(),
            tried,
        })
    }

    /// Base paths to probe for `specifier`, in priority order.
    fn candidate_bases(&self, specifier: &str, from_dir: &Path) -> Vec<PathBuf> {
        if let Some(base) = self.apply_alias(specifier) {
            return vec![base];
        }

        if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".." {
            return vec![normalize(&from_dir.join(specifier))];
        }

        if Path::new(specifier).is_absolute() {
            return vec![PathBuf::from(specifier)];
        }

        let mut bases = Vec::new();
        for module_dir in &self.config.resolve.modules {
            match module_dir {
                ModuleDir::Absolute(dir) => bases.push(dir.join(specifier)),
                ModuleDir::Hierarchical(name) => {
                    let mut current = Some(from_dir);
                    while let Some(dir) = current {
                        bases.push(dir.join(name).join(specifier));
                        // Stop at project root
                        if dir == self.config.root {
                            break;
                        }
                        current = dir.parent();
                    }
                }
            }
        }
        bases
    }

    fn apply_alias(&self, specifier: &str) -> Option<PathBuf> {
        self.config.resolve.alias.iter().find_map(|(key, target)| {
            if specifier == key {
                return Some(target.clone());
            }
            let rest = specifier.strip_prefix(key.as_str())?.strip_prefix('/')?;
            Some(normalize(&target.join(rest)))
        })
    }

    fn resolve_file_or_directory(&self, base: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if let Some(found) = self.try_file(base, tried) {
            return Some(found);
        }

        if base.is_dir() {
            if let Some(entry) = package_entry(base) {
                let entry = normalize(&base.join(entry));
                if let Some(found) = self.try_file(&entry, tried) {
                    return Some(found);
                }
            }

            for ext in &self.config.resolve.extensions {
                let index = base.join(format!("index{ext}"));
                if probe(&index, tried) {
                    return Some(index);
                }
            }
        }

        None
    }

    /// Exact file, then each extension appended.
    fn try_file(&self, base: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if probe(base, tried) {
            return Some(base.to_path_buf());
        }
        for ext in &self.config.resolve.extensions {
            let mut with_ext = base.as_os_str().to_os_string();
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if probe(&with_ext, tried) {
                return Some(with_ext);
            }
        }
        None
    }
}

fn probe(path: &Path, tried: &mut Vec<PathBuf>) -> bool {
    tried.push(path.to_path_buf());
    path.is_file()
}

/// `browser`, `module` or `main` from a package directory's `package.json`.
fn package_entry(dir: &Path) -> Option<String> {
    let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let json: serde_json::Value = serde_json::from_str(&content).ok()?;
    ["browser", "module", "main"]
        .iter()
        .find_map(|field| json.get(field).and_then(|v| v.as_str()))
        .map(ToString::to_string)
}

/// Lexically collapse `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
