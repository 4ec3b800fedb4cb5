//! Available-feature computation.
//!
//! Tests are gated on string features (`REQUIRES:` / `UNSUPPORTED:` /
//! `XFAIL:` markers and header requirements). This module owns the feature
//! set container and the derivations that come from the compiler itself:
//! identity features, probed flag support, macro-table gaps, and the
//! `__config_site` macro mapping.

use std::collections::BTreeSet;

use crate::compiler::CxxCompiler;
use crate::error::Result;
use crate::target::{Deployment, TargetInfo};

/// Ordered set of available feature strings.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    set: BTreeSet<String>,
}

impl FeatureSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, feature: impl Into<String>) {
        self.set.insert(feature.into());
    }

    #[must_use]
    pub fn contains(&self, feature: &str) -> bool {
        self.set.contains(feature)
    }

    #[must_use]
    pub fn has_any(&self, features: &[&str]) -> bool {
        features.iter().any(|feature| self.set.contains(*feature))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.set.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.set.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            set: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Features derived from the compiler itself: identity, probed allocation
/// flags, language-feature macro gaps, the C library, and Objective-C++
/// support on Apple hosts.
pub fn add_compiler_features(
    cxx: &mut CxxCompiler,
    target: &TargetInfo,
    features: &mut FeatureSet,
) -> Result<()> {
    if let (Some(kind), Some(version)) = (cxx.kind, cxx.version.clone()) {
        features.add(kind.as_str());
        features.add(format!("{}-{}", kind.as_str(), version.major));
        features.add(format!(
            "{}-{}.{}",
            kind.as_str(),
            version.major,
            version.minor
        ));
    }

    if cxx.has_compile_flag(&["-fsized-deallocation".to_string()]) {
        features.add("fsized-deallocation");
    }
    if cxx.has_compile_flag(&["-faligned-allocation".to_string()]) {
        features.add("-faligned-allocation");
    } else {
        features.add("no-aligned-allocation");
    }

    if let Some(macros) = cxx.dump_macros(None, &[], None)? {
        if !macros.contains_key("__cpp_if_constexpr") {
            features.add("libcpp-no-if-constexpr");
        }
        if !macros.contains_key("__cpp_structured_bindings") {
            features.add("libcpp-no-structured-bindings");
        }
        if !macros.contains_key("__cpp_deduction_guides") {
            features.add("libcpp-no-deduction-guides");
        }
    }

    // Detect the C library by querying for __GLIBC__ through features.h.
    let glibc_flags = vec!["-include".to_string(), "features.h".to_string()];
    if let Some(macros) = cxx.dump_macros(None, &glibc_flags, None)?
        && let (Some(major), Some(minor)) =
            (macros.get("__GLIBC__"), macros.get("__GLIBC_MINOR__"))
    {
        features.add("glibc");
        features.add(format!("glibc-{major}"));
        features.add(format!("glibc-{major}.{minor}"));
    }

    if target.platform == "darwin"
        && target.is_host_macosx
        && cxx.has_compile_flag(&[
            "-x".to_string(),
            "objective-c++".to_string(),
            "-fobjc-arc".to_string(),
        ])
    {
        features.add("objective-c++");
    }

    Ok(())
}

/// Map one `__config_site` macro to its test feature.
///
/// `_LIBCPP_HAS_NO_THREADS` becomes `libcpp-has-no-threads`; the ABI version
/// macro becomes `libcpp-abi-version-v<value>`; visibility annotations carry
/// no feature.
pub fn add_config_site_feature(name: &str, value: &str, features: &mut FeatureSet) {
    if name == "_LIBCPP_DISABLE_VISIBILITY_ANNOTATIONS" {
        return;
    }
    if name == "_LIBCPP_ABI_VERSION" {
        features.add(format!("libcpp-abi-version-v{value}"));
        return;
    }
    let trimmed = name.strip_prefix('_').unwrap_or(name);
    features.add(trimmed.to_ascii_lowercase().replace('_', "-"));
}

/// Deployment-qualified feature variants: `<feature>=<arch>-<name>`,
/// `<feature>=<name>`, `<feature>=<name><version>`.
pub fn add_deployment_features(
    feature: &str,
    deployment: &Deployment,
    features: &mut FeatureSet,
) {
    features.add(format!("{feature}={}-{}", deployment.arch, deployment.name));
    features.add(format!("{feature}={}", deployment.name));
    features.add(format!(
        "{feature}={}{}",
        deployment.name, deployment.version
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_set_is_ordered_and_deduplicated() {
        let mut features = FeatureSet::new();
        features.add("b");
        features.add("a");
        features.add("b");
        assert_eq!(features.to_vec(), vec!["a", "b"]);
        assert!(features.contains("a"));
        assert!(!features.contains("c"));
        assert!(features.has_any(&["c", "b"]));
        assert!(!features.has_any(&["c", "d"]));
    }

    #[test]
    fn config_site_macros_map_to_features() {
        let mut features = FeatureSet::new();
        add_config_site_feature("_LIBCPP_HAS_NO_THREADS", "", &mut features);
        add_config_site_feature("_LIBCPP_HAS_NO_MONOTONIC_CLOCK", "", &mut features);
        add_config_site_feature("_LIBCPP_ABI_UNSTABLE", "", &mut features);
        assert!(features.contains("libcpp-has-no-threads"));
        assert!(features.contains("libcpp-has-no-monotonic-clock"));
        assert!(features.contains("libcpp-abi-unstable"));
    }

    #[test]
    fn config_site_abi_version_macro_is_special_cased() {
        let mut features = FeatureSet::new();
        add_config_site_feature("_LIBCPP_ABI_VERSION", "2", &mut features);
        assert!(features.contains("libcpp-abi-version-v2"));
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn visibility_annotation_macro_has_no_feature() {
        let mut features = FeatureSet::new();
        add_config_site_feature("_LIBCPP_DISABLE_VISIBILITY_ANNOTATIONS", "", &mut features);
        assert!(features.is_empty());
    }

    #[test]
    fn deployment_features_cover_all_granularities() {
        let mut features = FeatureSet::new();
        let deployment = Deployment {
            arch: "x86_64".to_string(),
            name: "macosx".to_string(),
            version: "10.12".to_string(),
        };
        add_deployment_features("availability", &deployment, &mut features);
        assert!(features.contains("availability=x86_64-macosx"));
        assert!(features.contains("availability=macosx"));
        assert!(features.contains("availability=macosx10.12"));
    }
}
