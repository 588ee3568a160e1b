//! Line-level V3 source maps.

use base64::Engine;
use serde::Serialize;

/// VLQ-encode a signed integer and append to output string.
fn vlq_encode(value: i64, out: &mut String) {
    const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20; // continuation bit
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Serialized form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    pub file: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    #[must_use]
    pub fn to_json(&self) -> String {
        // A struct of strings always serializes
        serde_json::to_string(self).unwrap_or_default()
    }

    /// `data:` URL for an inline `sourceMappingURL` comment.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!(
            "data:application/json;charset=utf-8;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(self.to_json())
        )
    }
}

/// Collects one mapping per generated line.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    sources_content: Vec<String>,
    /// Generated line → (source index, source line), both 0-based.
    lines: Vec<Option<(u32, u32)>>,
}

impl SourceMapBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file and return its index.
    pub fn add_source(&mut self, path: &str, content: &str) -> u32 {
        let idx = u32::try_from(self.sources.len()).unwrap_or(u32::MAX);
        self.sources.push(path.to_string());
        self.sources_content.push(content.to_string());
        idx
    }

    /// Map generated line `output_line` to `source_line` of `source`.
    pub fn map_line(&mut self, output_line: u32, source: u32, source_line: u32) {
        let idx = output_line as usize;
        if self.lines.len() <= idx {
            self.lines.resize(idx + 1, None);
        }
        self.lines[idx] = Some((source, source_line));
    }

    #[must_use]
    pub fn build(&self, file: &str) -> SourceMap {
        let mut mappings = String::new();
        let mut prev_source: i64 = 0;
        let mut prev_line: i64 = 0;

        for (i, mapping) in self.lines.iter().enumerate() {
            if i > 0 {
                mappings.push(';');
            }
            if let Some((source, line)) = mapping {
                // generated column, source, source line, source column
                vlq_encode(0, &mut mappings);
                vlq_encode(i64::from(*source) - prev_source, &mut mappings);
                vlq_encode(i64::from(*line) - prev_line, &mut mappings);
                vlq_encode(0, &mut mappings);
                prev_source = i64::from(*source);
                prev_line = i64::from(*line);
            }
        }

        SourceMap {
            version: 3,
            file: file.to_string(),
            sources: self.sources.clone(),
            sources_content: self.sources_content.clone(),
            names: Vec::new(),
            mappings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlq(value: i64) -> String {
        let mut out = String::new();
        vlq_encode(value, &mut out);
        out
    }

    #[test]
    fn test_vlq_encode() {
        assert_eq!(vlq(0), "A");
        assert_eq!(vlq(1), "C");
        assert_eq!(vlq(-1), "D");
        assert_eq!(vlq(16), "gB");
        assert_eq!(vlq(-17), "jB");
    }

    #[test]
    fn test_mappings_per_line() {
        let mut builder = SourceMapBuilder::new();
        let a = builder.add_source("src/a.js", "a\nb");
        let b = builder.add_source("src/b.js", "c");
        builder.map_line(1, a, 0);
        builder.map_line(2, a, 1);
        builder.map_line(4, b, 0);

        let map = builder.build("bundle.js");
        assert_eq!(map.mappings, ";AAAA;AACA;;ACDA");
        assert_eq!(map.sources, vec!["src/a.js", "src/b.js"]);

        let json: serde_json::Value = serde_json::from_str(&map.to_json()).unwrap();
        assert_eq!(json["version"], 3);
        assert_eq!(json["sourcesContent"][0], "a\nb");
    }

    #[test]
    fn test_data_url() {
        let map = SourceMapBuilder::new().build("bundle.js");
        assert!(map
            .to_data_url()
            .starts_with("data:application/json;charset=utf-8;base64,"));
    }
}
