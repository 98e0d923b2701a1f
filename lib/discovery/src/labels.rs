//! Well known label names shared by every discovery mechanism.

/// Prefix for labels that are attached by service discovery and are
/// dropped after relabeling.
pub const META_LABEL_PREFIX: &str = "__meta_";

/// The host and port of the target to scrape.
pub const ADDRESS_LABEL: &str = "__address__";

/// The scheme to use when scraping the target.
pub const SCHEME_LABEL: &str = "__scheme__";

/// The HTTP path metrics are exposed on.
pub const METRICS_PATH_LABEL: &str = "__metrics_path__";

/// Identifies the scraped instance.
pub const INSTANCE_LABEL: &str = "instance";

#[inline]
const fn invalid_label_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_].
    !(c.is_ascii_alphanumeric() || c == '_')
}

/// Replaces every character that is not allowed in a label name with `_`.
///
/// The result only contains `[a-zA-Z0-9_]`, so sanitizing twice is the same
/// as sanitizing once.
pub fn sanitize_label_name(name: &str) -> String {
    name.replace(invalid_label_name_character, "_")
}
