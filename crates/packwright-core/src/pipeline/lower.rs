//! Module syntax lowering.
//!
//! Rewrites ES module statements into the `require` / `exports` form the
//! bundle runtime understands:
//!
//! - `import x from "./a"` → `const x = __default(require("./a"));`
//! - `import { a as b } from "./a"` → `const { a: b } = require("./a");`
//! - `import * as ns from "./a"` → `const ns = require("./a");`
//! - `export function f() {}` → declaration, `exports.f = f;` appended
//! - `export * from "./a"` → `__reexport(exports, require("./a"));`
//! - `import("./a")` → `require.lazy("./a")`
//!
//! Works line by line. A statement spanning several lines is collapsed onto
//! its first line and padded with blank lines so line numbers stay aligned
//! with the source.

/// Longest statement (in lines) that is collapsed.
const MAX_STATEMENT_LINES: usize = 64;

/// Lower ES module syntax in `source`.
#[must_use]
pub fn lower_module_syntax(source: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut pending_exports: Vec<String> = Vec::new();
    let mut temp = 0usize;
    let mut is_esm = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        if !is_module_statement(trimmed) {
            out.push(rewrite_dynamic_imports(line));
            i += 1;
            continue;
        }

        let mut stmt = trimmed.trim_end().to_string();
        let mut consumed = 1;
        while needs_more(&stmt) && i + consumed < lines.len() && consumed < MAX_STATEMENT_LINES {
            stmt.push(' ');
            stmt.push_str(lines[i + consumed].trim());
            consumed += 1;
        }

        let lowered = if needs_more(&stmt) {
            None
        } else {
            lower_statement(&stmt, &mut pending_exports, &mut temp)
        };

        match lowered {
            Some(lowered) => {
                is_esm = true;
                let indent = &line[..line.len() - trimmed.len()];
                if lowered.is_empty() {
                    out.push(String::new());
                } else {
                    out.push(format!("{indent}{lowered}"));
                }
                out.extend(std::iter::repeat(String::new()).take(consumed - 1));
            }
            None => {
                for original in &lines[i..i + consumed] {
                    out.push(rewrite_dynamic_imports(original));
                }
            }
        }
        i += consumed;
    }

    out.extend(pending_exports);
    if is_esm {
        out.push("Object.defineProperty(exports, \"__esModule\", { value: true });".to_string());
    }

    let mut result = out.join("\n");
    if source.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn is_module_statement(trimmed: &str) -> bool {
    if let Some(rest) = trimmed.strip_prefix("import") {
        return rest.starts_with([' ', '{', '"', '\'', '*']);
    }
    trimmed.starts_with("export ") || trimmed.starts_with("export{") || trimmed.starts_with("export*")
}

/// Whether a statement still lacks its closing `from "…"` or `}`.
fn needs_more(stmt: &str) -> bool {
    let body = stmt.trim_end_matches(';').trim_end();
    if let Some(rest) = body.strip_prefix("import") {
        let rest = rest.trim_start();
        return quoted(rest).is_none() && split_from(rest).is_none();
    }
    if let Some(rest) = body.strip_prefix("export") {
        let rest = rest.trim_start();
        if rest.starts_with('*') {
            return split_from(rest).is_none();
        }
        if rest.starts_with('{') {
            return rest.matches('{').count() > rest.matches('}').count();
        }
    }
    false
}

fn lower_statement(stmt: &str, pending: &mut Vec<String>, temp: &mut usize) -> Option<String> {
    let body = stmt.trim_end_matches(';').trim_end();

    if let Some(rest) = body.strip_prefix("import") {
        let rest = rest.trim_start();
        // TypeScript type-only import
        if rest.starts_with("type ") || rest.starts_with("type{") {
            return Some(String::new());
        }
        if let Some(spec) = quoted(rest) {
            return Some(format!("require({});", js_string(&spec)));
        }
        let (clause, spec) = split_from(rest)?;
        return lower_import_clause(clause, &spec, temp);
    }

    let rest = stmt.strip_prefix("export")?.trim_start();
    let rest_body = body.strip_prefix("export")?.trim_start();

    if let Some(star) = rest_body.strip_prefix('*') {
        let (_, spec) = split_from(rest_body)?;
        let req = format!("require({})", js_string(&spec));
        let star = star.trim_start();
        return match star.strip_prefix("as ") {
            Some(ns) => {
                let ns = ns.split_whitespace().next()?;
                Some(format!("exports.{ns} = {req};"))
            }
            None => Some(format!("__reexport(exports, {req});")),
        };
    }

    if rest_body.starts_with('{') {
        let close = rest_body.find('}')?;
        let names = parse_named_list(&rest_body[1..close]);
        if let Some((_, spec)) = split_from(rest_body) {
            *temp += 1;
            let module = format!("__m{temp}");
            let mut lowered = format!("const {module} = require({});", js_string(&spec));
            for (local, exported) in names {
                lowered.push_str(&format!(" exports.{exported} = {module}.{local};"));
            }
            return Some(lowered);
        }
        for (local, exported) in names {
            pending.push(format!("exports.{exported} = {local};"));
        }
        return Some(String::new());
    }

    if let Some(value) = rest.strip_prefix("default ") {
        let value = value.trim_start();
        if let Some(name) = declaration_name(value) {
            pending.push(format!("exports.default = {name};"));
            return Some(value.to_string());
        }
        return Some(format!("exports.default = {value}"));
    }

    if let Some(name) = declaration_name(rest) {
        pending.push(format!("exports.{name} = {name};"));
        return Some(rest.to_string());
    }

    for keyword in ["const ", "let ", "var "] {
        if let Some(decl) = rest.strip_prefix(keyword) {
            let name: String = decl
                .trim_start()
                .chars()
                .take_while(|&c| is_ident_char(c))
                .collect();
            if !name.is_empty() {
                pending.push(format!("exports.{name} = {name};"));
            }
            return Some(rest.to_string());
        }
    }

    // `export type`, `export interface`, … are left alone
    None
}

fn lower_import_clause(clause: &str, spec: &str, temp: &mut usize) -> Option<String> {
    let clause = clause.trim();
    let req = format!("require({})", js_string(spec));

    let (default, rest) = if clause.starts_with('{') || clause.starts_with('*') {
        (None, clause)
    } else {
        match clause.split_once(',') {
            Some((default, rest)) => (Some(default.trim()), rest.trim()),
            None => (Some(clause), ""),
        }
    };

    let mut parts = Vec::new();
    let source = if default.is_some() && !rest.is_empty() {
        *temp += 1;
        let module = format!("__m{temp}");
        parts.push(format!("const {module} = {req};"));
        module
    } else {
        req
    };

    if let Some(default) = default {
        parts.push(format!("const {default} = __default({source});"));
    }

    if let Some(ns) = rest.strip_prefix('*') {
        let ns = ns.trim().strip_prefix("as ")?.trim();
        parts.push(format!("const {ns} = {source};"));
    } else if let Some(inner) = rest.strip_prefix('{') {
        let inner = inner.strip_suffix('}')?;
        let bindings: Vec<String> = parse_named_list(inner)
            .into_iter()
            .map(|(imported, local)| {
                if imported == local {
                    local
                } else {
                    format!("{imported}: {local}")
                }
            })
            .collect();
        parts.push(format!("const {{ {} }} = {source};", bindings.join(", ")));
    }

    Some(parts.join(" "))
}

/// `a, b as c, type T` → `[(a, a), (b, c)]`.
fn parse_named_list(inner: &str) -> Vec<(String, String)> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.starts_with("type "))
        .map(|name| match name.split_once(" as ") {
            Some((from, to)) => (from.trim().to_string(), to.trim().to_string()),
            None => (name.to_string(), name.to_string()),
        })
        .collect()
}

/// Name of a `function` / `async function` / `class` declaration.
fn declaration_name(decl: &str) -> Option<String> {
    let rest = decl
        .strip_prefix("async function")
        .or_else(|| decl.strip_prefix("function"))
        .map(|r| r.trim_start().trim_start_matches('*'))
        .or_else(|| decl.strip_prefix("class "))?;
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|&c| is_ident_char(c))
        .collect();
    (!name.is_empty()).then_some(name)
}

/// Split `clause from "spec"` at the last `from` followed by a quoted string.
fn split_from(rest: &str) -> Option<(&str, String)> {
    let mut search = rest.len();
    while let Some(pos) = rest[..search].rfind("from") {
        let before_ok = pos == 0 || rest[..pos].ends_with([' ', '}', '*']);
        if before_ok {
            if let Some(spec) = quoted(rest[pos + 4..].trim_start()) {
                return Some((&rest[..pos], spec));
            }
        }
        search = pos;
    }
    None
}

/// The body of a string literal spanning all of `s`.
fn quoted(s: &str) -> Option<String> {
    let s = s.trim_end_matches(';').trim_end();
    let quote = s.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = s[1..].strip_suffix(quote)?;
    (!inner.contains(quote)).then(|| inner.to_string())
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `import(` → `require.lazy(`, outside string literals.
fn rewrite_dynamic_imports(line: &str) -> String {
    if !line.contains("import") {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + 8);
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut rest = line;

    while let Some(c) = rest.chars().next() {
        match quote {
            Some(q) => {
                if c == q && prev != Some('\\') {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' || c == '`' => quote = Some(c),
            None if rest.starts_with("//") => {
                out.push_str(rest);
                return out;
            }
            None if rest.starts_with("import")
                && prev.map_or(true, |p| !is_ident_char(p) && p != '.') =>
            {
                let after = rest[6..].trim_start();
                if after.starts_with('(') {
                    out.push_str("require.lazy");
                    rest = &rest[6..];
                    prev = Some('y');
                    continue;
                }
            }
            None => {}
        }
        out.push(c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_forms() {
        let source = "import React from \"react\";\n\
                      import { a, b as c } from './dep';\n\
                      import * as ns from \"./ns\";\n\
                      import \"./polyfill.css\";\n\
                      import Def, { x } from \"./both\";\n\
                      import type { T } from \"./types\";";
        let out = lower_module_syntax(source);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "const React = __default(require(\"react\"));");
        assert_eq!(lines[1], "const { a, b: c } = require(\"./dep\");");
        assert_eq!(lines[2], "const ns = require(\"./ns\");");
        assert_eq!(lines[3], "require(\"./polyfill.css\");");
        assert_eq!(
            lines[4],
            "const __m1 = require(\"./both\"); const Def = __default(__m1); const { x } = __m1;"
        );
        assert_eq!(lines[5], "");
        assert_eq!(
            lines.last().copied(),
            Some("Object.defineProperty(exports, \"__esModule\", { value: true });")
        );
    }

    #[test]
    fn test_export_forms() {
        let source = "export const answer = 42;\n\
                      export function greet(name) {\n  return name;\n}\n\
                      export default class App {}\n\
                      const local = 1;\n\
                      export { local as renamed };\n\
                      export * from \"./star\";\n\
                      export { y } from \"./other\";";
        let out = lower_module_syntax(source);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "const answer = 42;");
        assert_eq!(lines[1], "function greet(name) {");
        assert_eq!(lines[4], "class App {}");
        assert_eq!(lines[6], "");
        assert_eq!(lines[7], "__reexport(exports, require(\"./star\"));");
        assert_eq!(
            lines[8],
            "const __m1 = require(\"./other\"); exports.y = __m1.y;"
        );
        assert!(out.contains("exports.answer = answer;"));
        assert!(out.contains("exports.greet = greet;"));
        assert!(out.contains("exports.default = App;"));
        assert!(out.contains("exports.renamed = local;"));
    }

    #[test]
    fn test_export_default_expression() {
        let out = lower_module_syntax("export default {\n  a: 1,\n};\n");
        assert_eq!(out.lines().next(), Some("exports.default = {"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_multiline_import_keeps_line_count() {
        let source = "import {\n  a,\n  b,\n} from \"./multi\";\nconsole.log(a, b);";
        let out = lower_module_syntax(source);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "const { a, b } = require(\"./multi\");");
        assert_eq!(&lines[1..4], &["", "", ""]);
        assert_eq!(lines[4], "console.log(a, b);");
    }

    #[test]
    fn test_plain_commonjs_untouched() {
        let source = "const x = require(\"./x\");\nmodule.exports = x;";
        assert_eq!(lower_module_syntax(source), source);
    }

    #[test]
    fn test_dynamic_import_rewritten() {
        let out = lower_module_syntax("const p = import(\"./page\");\nconst s = \"import('no')\";");
        assert_eq!(
            out,
            "const p = require.lazy(\"./page\");\nconst s = \"import('no')\";"
        );
    }
}
