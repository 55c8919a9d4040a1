/// Build mode used as the default cache key prefix.
pub const BUILD_MODE: &str = if cfg!(debug_assertions) {
    "development"
} else {
    "production"
};

pub const DEFAULT_KEY_KIND: &str = "method";

#[derive(Debug, Clone, Default)]
pub struct CacheKeyOptions<'a> {
    pub prefix: Option<&'a str>,
    pub kind: Option<&'a str>,
    pub suffix: Option<&'a str>,
}

/// Builds a `{prefix}-{kind}-{name}-{suffix}` cache key. Uniqueness is up to the caller.
pub fn make_cache_key(name: &str, options: CacheKeyOptions<'_>) -> String {
    format!(
        "{}-{}-{}-{}",
        options.prefix.unwrap_or(BUILD_MODE),
        options.kind.unwrap_or(DEFAULT_KEY_KIND),
        name,
        options.suffix.unwrap_or_default(),
    )
}
