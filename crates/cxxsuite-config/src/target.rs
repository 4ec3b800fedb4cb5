//! Host/target platform knowledge: per-platform flags, locale features,
//! deployment targets, environment shaping.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::features::FeatureSet;
use crate::invoke;

/// Apple deployment tuple: architecture, platform name, version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub arch: String,
    pub name: String,
    pub version: String,
}

/// Platform-specific knowledge needed while configuring.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// Platform name as used in features ("linux", "darwin", "windows", ...).
    pub platform: String,
    pub is_host_macosx: bool,
    pub is_windows: bool,
}

impl TargetInfo {
    /// Detect the host platform.
    #[must_use]
    pub fn from_host() -> Self {
        let platform = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        Self::with_platform(platform)
    }

    /// Fixed-platform constructor (used by tests and cross configurations).
    #[must_use]
    pub fn with_platform(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            is_host_macosx: platform == "darwin",
            is_windows: platform == "windows",
        }
    }

    /// Platform-default compile flags.
    pub fn add_cxx_compile_flags(&self, flags: &mut Vec<String>) {
        if self.platform == "linux" {
            flags.extend(
                [
                    "-D__STDC_FORMAT_MACROS",
                    "-D__STDC_LIMIT_MACROS",
                    "-D__STDC_CONSTANT_MACROS",
                ]
                .map(String::from),
            );
        }
    }

    /// Platform-default link libraries.
    pub fn add_cxx_link_flags(&self, flags: &mut Vec<String>) {
        match self.platform.as_str() {
            "linux" => flags.extend(["-lm", "-lpthread", "-lrt"].map(String::from)),
            "freebsd" => flags.extend(["-lm", "-lpthread", "-lgcc_s"].map(String::from)),
            _ => {}
        }
    }

    /// Advertise the installed locales the suite knows about, by probing
    /// `locale -a`. Failure to probe just advertises nothing.
    pub fn add_locale_features(&self, features: &mut FeatureSet) {
        const KNOWN_LOCALES: &[&str] = &[
            "en_US.UTF-8",
            "cs_CZ.ISO8859-2",
            "fr_FR.UTF-8",
            "fr_CA.ISO8859-1",
            "ru_RU.UTF-8",
            "zh_CN.UTF-8",
        ];
        let Ok(output) = invoke::capture_stdout(&["locale".to_string(), "-a".to_string()]) else {
            return;
        };
        let installed: BTreeSet<String> = output
            .lines()
            .map(|line| line.trim().to_lowercase().replace('-', ""))
            .collect();
        for locale in KNOWN_LOCALES {
            if installed.contains(&locale.to_lowercase().replace('-', "")) {
                features.add(format!("locale.{locale}"));
            }
        }
    }

    /// A feature naming the requested sanitizer configuration.
    pub fn add_sanitizer_features(&self, sanitizer: &str, features: &mut FeatureSet) {
        features.add(format!("sanitizer={sanitizer}"));
    }

    #[must_use]
    pub fn allow_cxxabi_link(&self) -> bool {
        true
    }

    /// Whether script tests should run through a real shell by default.
    #[must_use]
    pub fn use_external_shell_default(&self) -> bool {
        !self.is_windows
    }

    /// Path-list separator for `PATH`-style environment variables.
    #[must_use]
    pub const fn path_separator(&self) -> char {
        if self.is_windows { ';' } else { ':' }
    }

    /// Shape the environment test binaries run under.
    pub fn configure_exec_env(
        &self,
        env: &mut BTreeMap<String, String>,
        runtime_root: Option<&Path>,
    ) {
        if self.platform == "darwin"
            && let Some(root) = runtime_root
        {
            let root = root.display().to_string();
            match env.get_mut("DYLD_LIBRARY_PATH") {
                Some(existing) => *existing = format!("{root}:{existing}"),
                None => {
                    env.insert("DYLD_LIBRARY_PATH".to_string(), root);
                }
            }
        }
    }

    /// The host deployment platform name and version (Darwin only).
    #[must_use]
    pub fn host_deployment_target(&self) -> Option<(String, String)> {
        if self.platform != "darwin" {
            return None;
        }
        let version =
            invoke::capture_stdout(&["sw_vers".to_string(), "-productVersion".to_string()]).ok()?;
        let mut parts = version.trim().split('.');
        let major = parts.next()?;
        let minor = parts.next().unwrap_or("0");
        Some(("macosx".to_string(), format!("{major}.{minor}")))
    }
}
