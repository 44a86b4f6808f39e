//! Engine configuration.
//!
//! [`JitConfig`] selects the link strategy, the policy for symbol collisions
//! during registration, and whether the Cranelift IR verifier runs. Values
//! come from [`Default`], the `with_*` builders, or the environment via
//! [`JitConfig::from_env`].

/// Environment variable selecting [`LinkMode`] (`eager` or `deferred`).
pub const ENV_LINK_MODE: &str = "TEXPR_JIT_LINK_MODE";
/// Environment variable selecting [`DuplicateSymbolPolicy`] (`last-wins` or `reject`).
pub const ENV_DUPLICATE_SYMBOLS: &str = "TEXPR_JIT_DUPLICATE_SYMBOLS";
/// Environment variable toggling the IR verifier (`0` or `1`).
pub const ENV_VERIFY: &str = "TEXPR_JIT_VERIFY";

/// When added modules are linked into executable memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LinkMode {
    /// Compile and link at `add_module` time.
    #[default]
    Eager,
    /// Compile at `add_module` time, link on the next symbol lookup.
    Deferred,
}

impl LinkMode {
    /// Parses `eager` / `deferred` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eager" => Some(Self::Eager),
            "deferred" | "lazy" => Some(Self::Deferred),
            _ => None,
        }
    }
}

/// What happens when two registrar groups define the same symbol name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DuplicateSymbolPolicy {
    /// The later definition replaces the earlier one (a warning is logged).
    #[default]
    LastWins,
    /// Engine construction fails with a link error.
    Reject,
}

impl DuplicateSymbolPolicy {
    /// Parses `last-wins` / `reject` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last-wins" | "last_wins" | "lastwins" => Some(Self::LastWins),
            "reject" | "error" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Configuration for a [`CompilationEngine`](crate::engine::CompilationEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Link strategy for added modules.
    pub link_mode: LinkMode,
    /// Collision handling while the registrar fills the symbol space.
    pub duplicate_symbols: DuplicateSymbolPolicy,
    /// Run the Cranelift IR verifier on every function.
    ///
    /// Default: `true`. Malformed modules are then reported as compilation
    /// errors instead of producing undefined machine code.
    pub verify: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            link_mode: LinkMode::Eager,
            duplicate_symbols: DuplicateSymbolPolicy::LastWins,
            verify: true,
        }
    }
}

impl JitConfig {
    /// Sets the link strategy.
    #[must_use]
    pub const fn with_link_mode(mut self, link_mode: LinkMode) -> Self {
        self.link_mode = link_mode;
        self
    }

    /// Sets the duplicate-symbol policy.
    #[must_use]
    pub const fn with_duplicate_symbols(mut self, policy: DuplicateSymbolPolicy) -> Self {
        self.duplicate_symbols = policy;
        self
    }

    /// Enables or disables the IR verifier.
    #[must_use]
    pub const fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Builds a configuration from the defaults overridden by environment
    /// variables. Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from a key lookup (the environment in production).
    pub(crate) fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_LINK_MODE) {
            match LinkMode::parse(&raw) {
                Some(mode) => self.link_mode = mode,
                None => tracing::warn!(var = ENV_LINK_MODE, value = %raw, "Ignoring invalid link mode"),
            }
        }
        if let Some(raw) = lookup(ENV_DUPLICATE_SYMBOLS) {
            match DuplicateSymbolPolicy::parse(&raw) {
                Some(policy) => self.duplicate_symbols = policy,
                None => tracing::warn!(
                    var = ENV_DUPLICATE_SYMBOLS,
                    value = %raw,
                    "Ignoring invalid duplicate-symbol policy"
                ),
            }
        }
        if let Some(raw) = lookup(ENV_VERIFY) {
            match raw.trim() {
                "1" | "true" => self.verify = true,
                "0" | "false" => self.verify = false,
                _ => tracing::warn!(var = ENV_VERIFY, value = %raw, "Ignoring invalid verifier flag"),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_defaults() {
        let config = JitConfig::default();
        assert_eq!(config.link_mode, LinkMode::Eager);
        assert_eq!(config.duplicate_symbols, DuplicateSymbolPolicy::LastWins);
        assert!(config.verify);
    }

    #[test]
    fn config_builder() {
        let config = JitConfig::default()
            .with_link_mode(LinkMode::Deferred)
            .with_duplicate_symbols(DuplicateSymbolPolicy::Reject)
            .with_verify(false);
        assert_eq!(config.link_mode, LinkMode::Deferred);
        assert_eq!(config.duplicate_symbols, DuplicateSymbolPolicy::Reject);
        assert!(!config.verify);
    }

    #[test]
    fn overrides_applied() {
        let config = JitConfig::default().apply_overrides(lookup_from(&[
            (ENV_LINK_MODE, "Deferred"),
            (ENV_DUPLICATE_SYMBOLS, "reject"),
            (ENV_VERIFY, "0"),
        ]));
        assert_eq!(config.link_mode, LinkMode::Deferred);
        assert_eq!(config.duplicate_symbols, DuplicateSymbolPolicy::Reject);
        assert!(!config.verify);
    }

    #[test]
    fn invalid_overrides_ignored() {
        let config = JitConfig::default().apply_overrides(lookup_from(&[
            (ENV_LINK_MODE, "sometimes"),
            (ENV_DUPLICATE_SYMBOLS, "maybe"),
            (ENV_VERIFY, "yes please"),
        ]));
        assert_eq!(config, JitConfig::default());
    }

    #[test]
    fn link_mode_parse() {
        assert_eq!(LinkMode::parse(" eager "), Some(LinkMode::Eager));
        assert_eq!(LinkMode::parse("lazy"), Some(LinkMode::Deferred));
        assert_eq!(LinkMode::parse(""), None);
    }
}
