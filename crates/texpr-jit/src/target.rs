//! Target descriptor resolution.
//!
//! A [`TargetDescriptor`] names a compilation target by optional triple, CPU
//! and feature string. [`TargetDescriptor::resolve`] turns it into a
//! [`TargetConfig`] with host defaults filled in where appropriate, and
//! [`TargetConfig::build_isa`] produces the Cranelift [`TargetIsa`].
//!
//! # Defaults
//!
//! | triple | cpu | features |
//! |--------|-----|----------|
//! | absent | host ([`HOST_CPU`]) unless given | all host-detected features unless given |
//! | given  | only if given | only if given |
//!
//! Host CPU and feature strings are never applied to an explicit triple: they
//! may be meaningless for a foreign target.

use std::fmt;
use std::str::FromStr;

use cranelift_codegen::isa::{self, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable, SetError};
use target_lexicon::Triple;

use crate::backend;
use crate::error::{JitError, Result};

/// CPU name standing for "whatever the host is".
pub const HOST_CPU: &str = "native";

/// Identifies a compilation target. Equality of all three fields defines
/// cache identity; an absent field is distinct from an empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TargetDescriptor {
    triple: Option<String>,
    cpu: Option<String>,
    features: Option<String>,
}

impl TargetDescriptor {
    /// Creates a descriptor from its three optional fields.
    #[must_use]
    pub fn new(triple: Option<String>, cpu: Option<String>, features: Option<String>) -> Self {
        Self {
            triple,
            cpu,
            features,
        }
    }

    /// The host target with host CPU and features.
    #[must_use]
    pub fn host() -> Self {
        Self::default()
    }

    /// Sets the target triple.
    #[must_use]
    pub fn with_triple(mut self, triple: impl Into<String>) -> Self {
        self.triple = Some(triple.into());
        self
    }

    /// Sets the CPU name.
    #[must_use]
    pub fn with_cpu(mut self, cpu: impl Into<String>) -> Self {
        self.cpu = Some(cpu.into());
        self
    }

    /// Sets the feature string (`+avx2,-sse4.1`).
    #[must_use]
    pub fn with_features(mut self, features: impl Into<String>) -> Self {
        self.features = Some(features.into());
        self
    }

    /// Returns the triple, if given.
    #[must_use]
    pub fn triple(&self) -> Option<&str> {
        self.triple.as_deref()
    }

    /// Returns the CPU, if given.
    #[must_use]
    pub fn cpu(&self) -> Option<&str> {
        self.cpu.as_deref()
    }

    /// Returns the feature string, if given.
    #[must_use]
    pub fn features(&self) -> Option<&str> {
        self.features.as_deref()
    }

    /// Resolves the descriptor into a fully specified [`TargetConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`JitError::Configuration`] if the triple cannot be parsed.
    pub fn resolve(&self) -> Result<TargetConfig> {
        let features = self.features.as_deref().map(split_features);
        let config = match &self.triple {
            None => TargetConfig {
                triple: Triple::host(),
                host: true,
                cpu: Some(self.cpu.clone().unwrap_or_else(|| HOST_CPU.to_string())),
                features: features.map_or(FeatureSet::Host, FeatureSet::Explicit),
                opt_level: OptLevel::Balanced,
                fp_fusion: FpOpFusion::Fast,
            },
            Some(raw) => TargetConfig {
                triple: Triple::from_str(raw).map_err(|e| {
                    JitError::Configuration(format!("cannot parse target triple `{raw}`: {e}"))
                })?,
                host: false,
                cpu: self.cpu.clone(),
                features: FeatureSet::Explicit(features.unwrap_or_default()),
                opt_level: OptLevel::Balanced,
                fp_fusion: FpOpFusion::Fast,
            },
        };
        Ok(config)
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpu={} features={}",
            self.triple.as_deref().unwrap_or("<host>"),
            self.cpu.as_deref().unwrap_or("<default>"),
            self.features.as_deref().unwrap_or("<default>"),
        )
    }
}

/// One subtarget feature toggle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Feature {
    /// Feature name as written (`avx2`, `has_avx2`, `sse4.1`).
    pub name: String,
    /// `true` for `+name` or a bare name, `false` for `-name`.
    pub enabled: bool,
}

/// Splits a comma/plus-separated feature string into individual toggles.
///
/// `"+avx2,-sse4.1"`, `"avx2+fma"` and `"+avx2+fma,-bmi2"` are all accepted.
/// Empty tokens are skipped.
#[must_use]
pub fn split_features(raw: &str) -> Vec<Feature> {
    let mut out = Vec::new();
    for chunk in raw.split(',') {
        let mut enabled = true;
        let mut name = String::new();
        for ch in chunk.trim().chars() {
            match ch {
                '+' | '-' => {
                    if !name.is_empty() {
                        out.push(Feature {
                            name: std::mem::take(&mut name),
                            enabled,
                        });
                    }
                    enabled = ch == '+';
                }
                c if c.is_whitespace() => {}
                c => name.push(c),
            }
        }
        if !name.is_empty() {
            out.push(Feature { name, enabled });
        }
    }
    out
}

/// Source of the subtarget feature set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureSet {
    /// Every feature detected on the running CPU.
    Host,
    /// Exactly the listed toggles on top of the backend baseline.
    Explicit(Vec<Feature>),
}

/// Code generation optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimization.
    None,
    /// The default balance of compile time and code quality.
    Balanced,
    /// Like `Balanced`, additionally minimizing code size.
    SpeedAndSize,
}

impl OptLevel {
    fn setting(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Balanced => "speed",
            Self::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Floating-point operation fusion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOpFusion {
    /// Never fuse.
    Strict,
    /// Fuse only where the source language permits.
    Standard,
    /// Fuse multiply-add chains whenever profitable; results may differ
    /// from strict IEEE evaluation.
    Fast,
}

/// A fully specified target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Target triple.
    pub triple: Triple,
    /// `true` when the triple was defaulted from the host.
    pub host: bool,
    /// CPU preset; [`HOST_CPU`] means host detection, `None` the backend baseline.
    pub cpu: Option<String>,
    /// Subtarget features.
    pub features: FeatureSet,
    /// Optimization level (always [`OptLevel::Balanced`] from `resolve`).
    pub opt_level: OptLevel,
    /// FP fusion policy (always [`FpOpFusion::Fast`] from `resolve`).
    pub fp_fusion: FpOpFusion,
}

impl TargetConfig {
    /// Builds the Cranelift ISA for this target.
    ///
    /// # Errors
    ///
    /// Returns [`JitError::Configuration`] if the backends are not registered,
    /// the architecture has no backend, or a CPU/feature name is unknown.
    pub fn build_isa(&self, verify: bool) -> Result<OwnedTargetIsa> {
        // Validates registration and backend availability for every path.
        let mut builder = backend::isa_builder_for(&self.triple)?;

        if self.host {
            // Detected host features stay on unless an explicit list replaces them;
            // a CPU preset is applied on top.
            let infer = matches!(self.features, FeatureSet::Host);
            builder = cranelift_native::builder_with_options(infer).map_err(|e| {
                JitError::Configuration(format!("host target is not supported: {e}"))
            })?;
        }

        if let Some(cpu) = self.cpu.as_deref().filter(|cpu| *cpu != HOST_CPU) {
            builder.enable(cpu).map_err(|e| {
                JitError::Configuration(format!(
                    "unknown cpu `{cpu}` for `{}`: {e}",
                    self.triple
                ))
            })?;
        }

        if let FeatureSet::Explicit(features) = &self.features {
            for feature in features {
                apply_feature(&mut builder, feature).map_err(|e| {
                    JitError::Configuration(format!(
                        "cannot apply feature `{}` for `{}`: {e}",
                        feature.name, self.triple
                    ))
                })?;
            }
        }

        let mut flags = settings::builder();
        let set = |flags: &mut settings::Builder, name: &str, value: &str| {
            flags
                .set(name, value)
                .map_err(|e| JitError::Configuration(format!("flag {name}={value}: {e}")))
        };
        set(&mut flags, "opt_level", self.opt_level.setting())?;
        set(&mut flags, "is_pic", "false")?;
        set(&mut flags, "use_colocated_libcalls", "false")?;
        set(&mut flags, "enable_verifier", if verify { "true" } else { "false" })?;

        builder
            .finish(settings::Flags::new(flags))
            .map_err(|e| JitError::Configuration(format!("cannot finish target `{}`: {e}", self.triple)))
    }
}

/// Applies one feature toggle, accepting both Cranelift (`has_sse41`) and
/// LLVM (`sse4.1`) spellings.
fn apply_feature(builder: &mut isa::Builder, feature: &Feature) -> std::result::Result<(), SetError> {
    let value = if feature.enabled { "true" } else { "false" };
    let llvm_style = format!("has_{}", feature.name.replace(['.', '-'], ""));
    match builder.set(&feature.name, value) {
        Err(SetError::BadName(_)) => builder.set(&llvm_style, value),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_comma_and_plus() {
        let features = split_features("+avx2,-sse4.1");
        assert_eq!(
            features,
            vec![
                Feature { name: "avx2".into(), enabled: true },
                Feature { name: "sse4.1".into(), enabled: false },
            ]
        );

        let features = split_features("avx2+fma-bmi2");
        let names: Vec<_> = features.iter().map(|f| (f.name.as_str(), f.enabled)).collect();
        assert_eq!(names, vec![("avx2", true), ("fma", true), ("bmi2", false)]);
    }

    #[test]
    fn split_skips_empty_tokens() {
        assert!(split_features("").is_empty());
        assert!(split_features(" , ,+").is_empty());
        assert_eq!(split_features(" +fma ").len(), 1);
    }

    #[test]
    fn host_defaults() {
        let config = TargetDescriptor::host().resolve().unwrap();
        assert!(config.host);
        assert_eq!(config.triple, Triple::host());
        assert_eq!(config.cpu.as_deref(), Some(HOST_CPU));
        assert_eq!(config.features, FeatureSet::Host);
        assert_eq!(config.opt_level, OptLevel::Balanced);
        assert_eq!(config.fp_fusion, FpOpFusion::Fast);
    }

    #[test]
    fn host_with_explicit_features() {
        let config = TargetDescriptor::host().with_features("").resolve().unwrap();
        assert_eq!(config.features, FeatureSet::Explicit(Vec::new()));
        assert_eq!(config.cpu.as_deref(), Some(HOST_CPU));
    }

    #[test]
    fn explicit_triple_gets_no_host_defaults() {
        let config = TargetDescriptor::host()
            .with_triple("aarch64-unknown-linux-gnu")
            .resolve()
            .unwrap();
        assert!(!config.host);
        assert!(config.cpu.is_none());
        assert_eq!(config.features, FeatureSet::Explicit(Vec::new()));
    }

    #[test]
    fn malformed_triple_is_configuration_error() {
        let err = TargetDescriptor::host()
            .with_triple("definitely not a triple")
            .resolve()
            .unwrap_err();
        assert!(matches!(err, JitError::Configuration(_)));
    }

    #[test]
    fn host_isa_builds() {
        backend::initialize_targets();
        let isa = TargetDescriptor::host().resolve().unwrap().build_isa(true).unwrap();
        assert_eq!(isa.triple().architecture, Triple::host().architecture);
    }

    #[test]
    fn cross_isa_builds() {
        backend::initialize_targets();
        let isa = TargetDescriptor::host()
            .with_triple("aarch64-unknown-linux-gnu")
            .resolve()
            .unwrap()
            .build_isa(true)
            .unwrap();
        assert_eq!(isa.pointer_bytes(), 8);
    }

    #[test]
    fn unknown_feature_rejected() {
        backend::initialize_targets();
        let err = TargetDescriptor::host()
            .with_triple("x86_64-unknown-linux-gnu")
            .with_features("+no_such_feature")
            .resolve()
            .unwrap()
            .build_isa(true);
        let Err(err) = err else {
            panic!("unknown feature should not build");
        };
        assert!(err.to_string().contains("no_such_feature"));
    }

    #[test]
    fn llvm_feature_spelling_accepted() {
        backend::initialize_targets();
        let isa = TargetDescriptor::host()
            .with_triple("x86_64-unknown-linux-gnu")
            .with_features("+sse3,+ssse3,+sse4.1")
            .resolve()
            .unwrap()
            .build_isa(true);
        if let Err(e) = isa {
            panic!("LLVM-style feature names should map to Cranelift settings: {e}");
        }
    }

    #[test]
    fn unknown_cpu_rejected() {
        backend::initialize_targets();
        let err = TargetDescriptor::host()
            .with_triple("x86_64-unknown-linux-gnu")
            .with_cpu("pentium-9000")
            .resolve()
            .unwrap()
            .build_isa(true);
        let Err(err) = err else {
            panic!("unknown cpu should not build");
        };
        assert!(matches!(err, JitError::Configuration(_)));
    }

    #[test]
    fn host_cpu_preset_keeps_detected_features() {
        let config = TargetDescriptor::host().with_cpu("nehalem").resolve().unwrap();
        assert_eq!(config.features, FeatureSet::Host);
        assert_eq!(config.cpu.as_deref(), Some("nehalem"));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn host_cpu_preset_builds_on_top_of_host_features() {
        backend::initialize_targets();
        let enabled = |isa: &OwnedTargetIsa| -> Vec<&'static str> {
            isa.isa_flags()
                .into_iter()
                .filter(|v| v.as_bool() == Some(true))
                .map(|v| v.name)
                .collect()
        };
        let host = TargetDescriptor::host().resolve().unwrap().build_isa(true).unwrap();
        let preset = TargetDescriptor::host()
            .with_cpu("nehalem")
            .resolve()
            .unwrap()
            .build_isa(true)
            .unwrap();

        let preset_flags = enabled(&preset);
        for name in enabled(&host) {
            assert!(preset_flags.contains(&name), "`{name}` lost under a cpu preset");
        }
        assert!(preset_flags.contains(&"has_sse42"));
    }
}
