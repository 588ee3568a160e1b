//! Stable error codes for `--json` output.
//!
//! All codes are SCREAMING_SNAKE_CASE and stable across versions.

/// Config file could not be read.
pub const CONFIG_READ_ERROR: &str = "CONFIG_READ_ERROR";

/// Config file is not valid JSON or has the wrong shape.
pub const CONFIG_PARSE_ERROR: &str = "CONFIG_PARSE_ERROR";

/// Config value failed validation (bad pattern, unknown transformer, bad URL).
pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

/// Entry point does not exist.
pub const BUILD_ENTRY_NOT_FOUND: &str = "BUILD_ENTRY_NOT_FOUND";

/// A required specifier could not be resolved.
pub const BUILD_RESOLVE_ERROR: &str = "BUILD_RESOLVE_ERROR";

/// A transformer rejected its input.
pub const BUILD_TRANSFORM_ERROR: &str = "BUILD_TRANSFORM_ERROR";

/// A module could not be read from disk.
pub const BUILD_READ_ERROR: &str = "BUILD_READ_ERROR";

/// A plugin stage failed.
pub const BUILD_PLUGIN_ERROR: &str = "BUILD_PLUGIN_ERROR";

/// Artifacts could not be produced or written.
pub const BUILD_EMIT_ERROR: &str = "BUILD_EMIT_ERROR";
