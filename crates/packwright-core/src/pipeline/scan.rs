//! Dependency scanners.
//!
//! Finds import specifiers in script and stylesheet source without a full
//! parse. Comments and ordinary string literals are skipped so that
//! `"require('x')"` inside a string is not reported.

/// How a specifier was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import x from "…"` / `import "…"`
    Import,
    /// `export … from "…"`
    Export,
    /// `require("…")`
    Require,
    /// `import("…")`
    Dynamic,
}

impl ImportKind {
    /// Dynamic imports may be missing without failing the build.
    #[must_use]
    pub fn is_lazy(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

/// A specifier found in source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedImport {
    pub specifier: String,
    pub kind: ImportKind,
    /// 1-indexed, best-effort.
    pub line: u32,
}

/// Scan script source for import / export / require / dynamic import
/// specifiers, in order of appearance.
#[must_use]
pub fn scan_script(source: &str) -> Vec<ScannedImport> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut results = Vec::new();
    let mut line: u32 = 1;
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            i += 2;
            continue;
        }

        if is_quote(c) {
            let (_, end) = read_string(&chars, i, &mut line);
            i = end;
            continue;
        }

        if matches_keyword(&chars, i, "import") {
            let start_line = line;
            if let Some((specifier, kind, end)) = scan_import(&chars, i + 6, &mut line) {
                results.push(ScannedImport {
                    specifier,
                    kind,
                    line: start_line,
                });
                i = end;
                continue;
            }
        } else if matches_keyword(&chars, i, "export") {
            let start_line = line;
            if let Some((specifier, end)) = scan_from_clause(&chars, i + 6, &mut line) {
                results.push(ScannedImport {
                    specifier,
                    kind: ImportKind::Export,
                    line: start_line,
                });
                i = end;
                continue;
            }
        } else if matches_keyword(&chars, i, "require") {
            if let Some((specifier, end)) = scan_call_argument(&chars, i + 7, &mut line) {
                results.push(ScannedImport {
                    specifier,
                    kind: ImportKind::Require,
                    line,
                });
                i = end;
                continue;
            }
        }

        i += 1;
    }

    results
}

/// Scan stylesheet source for `@import "…"` and `@import url(…)` specifiers.
///
/// Remote (`http:`, `https:`, `//`) and `data:` URLs are left to the browser.
#[must_use]
pub fn scan_css(source: &str) -> Vec<ScannedImport> {
    let mut results = Vec::new();
    let mut in_comment = false;

    for (idx, raw_line) in source.lines().enumerate() {
        let mut rest = raw_line;
        let line = u32::try_from(idx + 1).unwrap_or(u32::MAX);

        loop {
            if in_comment {
                match rest.find("*/") {
                    Some(end) => {
                        rest = &rest[end + 2..];
                        in_comment = false;
                    }
                    None => break,
                }
            }

            let comment = rest.find("/*");
            let import = rest.find("@import");
            match (comment, import) {
                (Some(c), Some(i)) if c < i => {
                    rest = &rest[c + 2..];
                    in_comment = true;
                }
                (Some(c), None) => {
                    rest = &rest[c + 2..];
                    in_comment = true;
                }
                (_, Some(i)) => {
                    let after = rest[i + 7..].trim_start();
                    let specifier = parse_css_import_target(after);
                    if let Some(specifier) = specifier {
                        if !is_external_url(&specifier) {
                            results.push(ScannedImport {
                                specifier,
                                kind: ImportKind::Import,
                                line,
                            });
                        }
                    }
                    rest = &rest[i + 7..];
                }
                (None, None) => break,
            }
        }
    }

    results
}

fn parse_css_import_target(after: &str) -> Option<String> {
    let inner = match after.strip_prefix("url(") {
        Some(rest) => &rest[..rest.find(')')?],
        None => after,
    };
    let inner = inner.trim();
    let quote = inner.chars().next()?;
    if quote == '"' || quote == '\'' {
        let body = &inner[1..];
        return Some(body[..body.find(quote)?].to_string());
    }
    if after.starts_with("url(") && !inner.is_empty() {
        return Some(inner.to_string());
    }
    None
}

fn is_external_url(specifier: &str) -> bool {
    specifier.starts_with("http:")
        || specifier.starts_with("https:")
        || specifier.starts_with("//")
        || specifier.starts_with("data:")
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\'' || c == '`'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Keyword at `pos` with identifier boundaries on both sides. A preceding
/// `.` also disqualifies it (`foo.require(…)`).
fn matches_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let mut end = pos;
    for k in keyword.chars() {
        if end >= chars.len() || chars[end] != k {
            return false;
        }
        end += 1;
    }
    if pos > 0 && (is_ident_char(chars[pos - 1]) || chars[pos - 1] == '.') {
        return false;
    }
    !(end < chars.len() && is_ident_char(chars[end]))
}

fn skip_whitespace(chars: &[char], mut i: usize, line: &mut u32) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        if chars[i] == '\n' {
            *line += 1;
        }
        i += 1;
    }
    i
}

/// Read the string literal starting at `start` (a quote). Returns its body
/// and the position after the closing quote.
fn read_string(chars: &[char], start: usize, line: &mut u32) -> (String, usize) {
    let quote = chars[start];
    let mut i = start + 1;
    let mut body = String::new();
    while i < chars.len() && chars[i] != quote {
        if chars[i] == '\\' && i + 1 < chars.len() {
            body.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if chars[i] == '\n' {
            // Unterminated literal; resume at the newline
            if quote != '`' {
                return (body, i);
            }
            *line += 1;
        }
        body.push(chars[i]);
        i += 1;
    }
    (body, (i + 1).min(chars.len()))
}

/// After `import`: dynamic call, side-effect import or `… from "…"`.
fn scan_import(chars: &[char], start: usize, line: &mut u32) -> Option<(String, ImportKind, usize)> {
    let i = skip_whitespace(chars, start, line);
    if i >= chars.len() {
        return None;
    }

    if chars[i] == '(' {
        let (specifier, end) = scan_call_argument(chars, i, line)?;
        return Some((specifier, ImportKind::Dynamic, end));
    }

    // `import.meta`
    if chars[i] == '.' {
        return None;
    }

    if is_quote(chars[i]) {
        let (specifier, end) = read_string(chars, i, line);
        return Some((specifier, ImportKind::Import, end));
    }

    let (specifier, end) = scan_from_clause(chars, i, line)?;
    Some((specifier, ImportKind::Import, end))
}

/// The `… from "…"` clause of an import / re-export. Only identifiers,
/// braces, commas and `*` may precede `from`; anything else means this is
/// not a module clause (`export const`, `export default {`).
fn scan_from_clause(chars: &[char], start: usize, line: &mut u32) -> Option<(String, usize)> {
    let len = chars.len();
    let mut local_line = *line;
    let mut depth = 0u32;
    let mut closed_brace = false;
    let mut i = start;

    while i < len {
        let c = chars[i];
        if c == '\n' {
            local_line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() || c == ',' || c == '*' {
            i += 1;
            continue;
        }
        if c == '{' {
            depth += 1;
            i += 1;
            continue;
        }
        if c == '}' {
            if depth == 0 {
                return None;
            }
            depth -= 1;
            closed_brace = depth == 0;
            i += 1;
            continue;
        }
        if depth == 0 && matches_keyword(chars, i, "from") {
            let j = skip_whitespace(chars, i + 4, &mut local_line);
            if j < len && is_quote(chars[j]) {
                *line = local_line;
                return Some(read_string(chars, j, line));
            }
            return None;
        }
        if is_ident_char(c) {
            if depth == 0
                && (closed_brace
                    || matches_keyword(chars, i, "import")
                    || matches_keyword(chars, i, "export"))
            {
                return None;
            }
            while i < len && is_ident_char(chars[i]) {
                i += 1;
            }
            continue;
        }
        return None;
    }

    None
}

/// `( "…" )` → specifier. Non-literal arguments are not dependencies.
fn scan_call_argument(chars: &[char], start: usize, line: &mut u32) -> Option<(String, usize)> {
    let mut local_line = *line;
    let mut i = skip_whitespace(chars, start, &mut local_line);
    if i >= chars.len() || chars[i] != '(' {
        return None;
    }
    i = skip_whitespace(chars, i + 1, &mut local_line);
    if i >= chars.len() || !is_quote(chars[i]) {
        return None;
    }
    let (specifier, end) = read_string(chars, i, &mut local_line);
    let close = skip_whitespace(chars, end, &mut local_line);
    if close >= chars.len() || chars[close] != ')' {
        return None;
    }
    if chars[i] == '`' && specifier.contains("${") {
        return None;
    }
    *line = local_line;
    Some((specifier, close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(imports: &[ScannedImport]) -> Vec<(&str, ImportKind)> {
        imports
            .iter()
            .map(|i| (i.specifier.as_str(), i.kind))
            .collect()
    }

    #[test]
    fn test_static_forms() {
        let source = r#"
import React from "react";
import { a, b as c } from './dep';
import * as ns from "./ns";
import "./polyfill";
export { x } from "./reexport";
export * from './star';
const cjs = require("./cjs");
"#;
        assert_eq!(
            specs(&scan_script(source)),
            vec![
                ("react", ImportKind::Import),
                ("./dep", ImportKind::Import),
                ("./ns", ImportKind::Import),
                ("./polyfill", ImportKind::Import),
                ("./reexport", ImportKind::Export),
                ("./star", ImportKind::Export),
                ("./cjs", ImportKind::Require),
            ]
        );
    }

    #[test]
    fn test_dynamic_import_is_lazy() {
        let imports = scan_script(r#"const page = () => import("./pages/About");"#);
        assert_eq!(specs(&imports), vec![("./pages/About", ImportKind::Dynamic)]);
        assert!(imports[0].kind.is_lazy());
    }

    #[test]
    fn test_multiline_import() {
        let source = "import {\n  a,\n  b,\n} from \"./multi\";\nimport c from './c';";
        let imports = scan_script(source);
        assert_eq!(specs(&imports), vec![("./multi", ImportKind::Import), ("./c", ImportKind::Import)]);
        assert_eq!(imports[0].line, 1);
        assert_eq!(imports[1].line, 5);
    }

    #[test]
    fn test_skips_comments_and_strings() {
        let source = r#"
// import a from "commented"
/* require("block") */
const s = "require('in-string')";
const t = `import("in-template")`;
export const value = 1;
import real from "./real";
"#;
        assert_eq!(specs(&scan_script(source)), vec![("./real", ImportKind::Import)]);
    }

    #[test]
    fn test_non_literal_require_ignored() {
        let source = "const m = require(name);\nobj.require('x');\nimport.meta.url;";
        assert!(scan_script(source).is_empty());
    }

    #[test]
    fn test_line_numbers() {
        let imports = scan_script("\nimport a from \"./a\";\n\nconst b = require('./b');\n");
        assert_eq!(imports[0].line, 2);
        assert_eq!(imports[1].line, 4);
    }

    #[test]
    fn test_css_imports() {
        let source = r#"
@import "./base.css";
@import url('theme.css');
@import url(reset.css);
/* @import "commented.css"; */
@import "https://fonts.example.com/font.css";
body { color: red; }
"#;
        assert_eq!(
            scan_css(source)
                .iter()
                .map(|i| i.specifier.as_str())
                .collect::<Vec<_>>(),
            vec!["./base.css", "theme.css", "reset.css"]
        );
    }
}
