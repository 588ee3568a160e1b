//! `.env` file loading.
//!
//! Files are read in order `.env`, `.env.local`, `.env.<mode>`,
//! `.env.<mode>.local`; later files override earlier ones. Variables already
//! present in the process environment win over file values.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::Mode;

/// Prefix a variable needs to be exposed to bundled code.
pub const CLIENT_ENV_PREFIX: &str = "PACKWRIGHT_";

/// Parse `.env` contents into key/value pairs.
///
/// Handles `KEY=value`, `export KEY=value`, double quotes with `\n`, `\t`,
/// `\"` and `\\` escapes, literal single quotes, `#` comment lines and
/// ` #` trailing comments on unquoted values.
#[must_use]
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let key = key.strip_prefix("export ").unwrap_or(key).trim();
        if key.is_empty() {
            continue;
        }

        env.insert(key.to_string(), unquote(raw_value.trim()));
    }

    env
}

fn unquote(raw: &str) -> String {
    if let Some(inner) = raw.strip_prefix('"') {
        let mut value = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => break,
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other @ ('"' | '\\')) => value.push(other),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => value.push('\\'),
                },
                _ => value.push(c),
            }
        }
        value
    } else if let Some(inner) = raw.strip_prefix('\'') {
        inner.split('\'').next().unwrap_or_default().to_string()
    } else {
        match raw.find(" #") {
            Some(pos) => raw[..pos].trim_end().to_string(),
            None => raw.to_string(),
        }
    }
}

/// Load the `.env` files of `root` for `mode`, without consulting the
/// process environment.
#[must_use]
pub fn load_env_files(root: &Path, mode: &str) -> HashMap<String, String> {
    let files = [
        root.join(".env"),
        root.join(".env.local"),
        root.join(format!(".env.{mode}")),
        root.join(format!(".env.{mode}.local")),
    ];

    let mut env = HashMap::new();
    for file in &files {
        if let Ok(content) = std::fs::read_to_string(file) {
            env.extend(parse_env_file(&content));
        }
    }
    env
}

/// Overlay the process environment on top of file values.
#[must_use]
pub fn with_process_env(mut env: HashMap<String, String>) -> HashMap<String, String> {
    for (key, value) in std::env::vars() {
        if env.contains_key(&key) || key.starts_with(CLIENT_ENV_PREFIX) || key == "NODE_ENV" {
            env.insert(key, value);
        }
    }
    env
}

/// `process.env.*` replacements exposed to bundled code.
///
/// Always defines `process.env.NODE_ENV` from `mode`; other variables only
/// when prefixed with [`CLIENT_ENV_PREFIX`].
#[must_use]
pub fn define_entries(env: &HashMap<String, String>, mode: Mode) -> BTreeMap<String, String> {
    let mut define = BTreeMap::new();
    define.insert(
        "process.env.NODE_ENV".to_string(),
        json_quote(mode.as_str()),
    );

    for (key, value) in env {
        if key.starts_with(CLIENT_ENV_PREFIX) {
            define.insert(format!("process.env.{key}"), json_quote(value));
        }
    }
    define
}

fn json_quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_basic_and_export() {
        let env = parse_env_file("KEY=value\nexport OTHER=123\n# comment\n\nBROKEN");
        assert_eq!(env.get("KEY").unwrap(), "value");
        assert_eq!(env.get("OTHER").unwrap(), "123");
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_parse_quoting() {
        let env = parse_env_file(
            "A=\"hello\\nworld\"\nB='raw \\n value'\nC=plain # trailing\nD=\"say \\\"hi\\\"\"",
        );
        assert_eq!(env.get("A").unwrap(), "hello\nworld");
        assert_eq!(env.get("B").unwrap(), "raw \\n value");
        assert_eq!(env.get("C").unwrap(), "plain");
        assert_eq!(env.get("D").unwrap(), "say \"hi\"");
    }

    #[test]
    fn test_load_env_files_mode_overrides() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "A=base\nB=base").unwrap();
        std::fs::write(dir.path().join(".env.development"), "A=dev").unwrap();
        std::fs::write(dir.path().join(".env.production"), "A=prod").unwrap();

        let env = load_env_files(dir.path(), "development");
        assert_eq!(env.get("A").unwrap(), "dev");
        assert_eq!(env.get("B").unwrap(), "base");
    }

    #[test]
    fn test_define_entries_filters_prefix() {
        let mut env = HashMap::new();
        env.insert("PACKWRIGHT_API".to_string(), "http://x".to_string());
        env.insert("SECRET".to_string(), "hidden".to_string());

        let define = define_entries(&env, Mode::Development);
        assert_eq!(define.get("process.env.NODE_ENV").unwrap(), "\"development\"");
        assert_eq!(define.get("process.env.PACKWRIGHT_API").unwrap(), "\"http://x\"");
        assert!(!define.contains_key("process.env.SECRET"));
    }
}
