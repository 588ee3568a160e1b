/// Crate version baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version of the `build --json` report.
/// Bump this when a field changes meaning or disappears.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// `packwright <version>`, followed by the commit hash when the build
/// environment set `PACKWRIGHT_BUILD_GIT_HASH`.
#[must_use]
pub fn version_string() -> String {
    match option_env!("PACKWRIGHT_BUILD_GIT_HASH") {
        Some(hash) => format!("packwright {VERSION} ({hash})"),
        None => format!("packwright {VERSION}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_names_tool() {
        let vs = version_string();
        assert!(vs.starts_with("packwright "));
        assert!(vs.contains(VERSION));
        assert_eq!(REPORT_SCHEMA_VERSION, 1);
    }
}
