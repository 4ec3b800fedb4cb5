//! Test-suite parameter resolution.
//!
//! Parameters come from three places with fixed precedence: explicit
//! `--param name=value` pairs, then the JSON site configuration, then the
//! default supplied at the call site. Boolean parameters can additionally be
//! overridden from the environment, which wins over an explicit param (with a
//! warning).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diag::Diag;
use crate::error::{ConfigError, Result};

/// Site configuration file contents: an open key/value namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl SiteConfig {
    /// Load a site config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a site config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn get(&self, name: &str) -> Option<String> {
        match self.values.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Locate and load the site configuration.
///
/// An explicit path (param or `env_var`) that does not exist is fatal; no
/// path at all falls back to the default configuration with a warning.
pub fn load_site_config(explicit: Option<&Path>, env_var: &str, diag: &Diag) -> Result<SiteConfig> {
    let from_env = std::env::var_os(env_var).map(PathBuf::from);
    let path = explicit.map(Path::to_path_buf).or(from_env);
    match path {
        None => {
            diag.warning(
                "no site specific configuration file found, \
                 running the tests in the default configuration",
            );
            Ok(SiteConfig::default())
        }
        Some(path) if !path.is_file() => Err(ConfigError::Fatal(format!(
            "specified site configuration file does not exist: '{}'",
            path.display()
        ))),
        Some(path) => {
            diag.note(format!(
                "using site specific configuration at {}",
                path.display()
            ));
            SiteConfig::from_file(&path)
        }
    }
}

/// Ordered parameter lookup over explicit params, environment, and site
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct ParamResolver {
    params: BTreeMap<String, String>,
    site: SiteConfig,
    env: BTreeMap<String, String>,
}

impl ParamResolver {
    #[must_use]
    pub fn new(params: BTreeMap<String, String>, site: SiteConfig) -> Self {
        Self {
            params,
            site,
            env: std::env::vars().collect(),
        }
    }

    /// Replace the environment snapshot (used by tests).
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Parse a raw `name=value` pair as passed on the command line.
    pub fn parse_param(raw: &str) -> Result<(String, String)> {
        match raw.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                Ok((name.to_string(), value.to_string()))
            }
            _ => Err(ConfigError::Fatal(format!(
                "malformed parameter '{raw}', expected name=value"
            ))),
        }
    }

    #[must_use]
    pub fn get_conf(&self, name: &str) -> Option<String> {
        self.params
            .get(name)
            .cloned()
            .or_else(|| self.site.get(name))
    }

    #[must_use]
    pub fn get_conf_or(&self, name: &str, default: &str) -> String {
        self.get_conf(name)
            .unwrap_or_else(|| default.to_string())
    }

    #[must_use]
    pub fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    /// Boolean parameter with the suite's historical string semantics:
    /// `"1"`/`"true"` are true; `""`/`"0"`/`"false"` are false; anything else
    /// is a fatal error naming the parameter.
    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool> {
        Ok(self.get_bool_opt(name)?.unwrap_or(default))
    }

    /// Tri-state boolean: `None` when the parameter is not set anywhere.
    pub fn get_bool_opt(&self, name: &str) -> Result<Option<bool>> {
        match self.get_conf(name) {
            None => Ok(None),
            Some(value) => parse_bool_value(&value, name).map(Some),
        }
    }

    /// Boolean parameter where an environment variable overrides an explicit
    /// setting; the override warns when both are present.
    pub fn get_bool_env(
        &self,
        name: &str,
        default: bool,
        env_var: &str,
        diag: &Diag,
    ) -> Result<bool> {
        if let Some(env_value) = self.env.get(env_var) {
            if let Some(conf_value) = self.get_conf(name) {
                diag.warning(format!(
                    "environment variable {env_var}={env_value} is overriding \
                     explicit --param={name}={conf_value}"
                ));
            }
            return parse_bool_value(env_value, env_var);
        }
        self.get_bool(name, default)
    }
}

fn parse_bool_value(value: &str, var_name: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "" | "0" | "false" => Ok(false),
        _ => Err(ConfigError::Fatal(format!(
            "parameter '{var_name}' should be true or false"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(params: &[(&str, &str)], site_json: &str) -> ParamResolver {
        let params = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let site = SiteConfig::from_json(site_json).expect("valid site json");
        ParamResolver::new(params, site).with_env(BTreeMap::new())
    }

    #[test]
    fn explicit_param_wins_over_site_config() {
        let params = resolver(&[("std", "c++14")], r#"{"std": "c++11"}"#);
        assert_eq!(params.get_conf("std").as_deref(), Some("c++14"));
    }

    #[test]
    fn site_config_fills_in_missing_params() {
        let params = resolver(&[], r#"{"cxx_under_test": "/usr/bin/clang++"}"#);
        assert_eq!(
            params.get_conf("cxx_under_test").as_deref(),
            Some("/usr/bin/clang++")
        );
        assert_eq!(params.get_conf("missing"), None);
    }

    #[test]
    fn site_config_accepts_bools_and_numbers() {
        let params = resolver(&[], r#"{"enable_rtti": false, "debug_level": 1}"#);
        assert_eq!(params.get_conf("enable_rtti").as_deref(), Some("false"));
        assert_eq!(params.get_conf("debug_level").as_deref(), Some("1"));
    }

    #[test]
    fn bool_string_semantics() {
        let params = resolver(
            &[("a", "1"), ("b", "True"), ("c", ""), ("d", "0"), ("e", "FALSE")],
            "{}",
        );
        assert!(params.get_bool("a", false).unwrap());
        assert!(params.get_bool("b", false).unwrap());
        assert!(!params.get_bool("c", true).unwrap());
        assert!(!params.get_bool("d", true).unwrap());
        assert!(!params.get_bool("e", true).unwrap());
        assert!(params.get_bool("unset", true).unwrap());
    }

    #[test]
    fn malformed_bool_is_fatal() {
        let params = resolver(&[("flag", "maybe")], "{}");
        let err = params.get_bool("flag", false).unwrap_err();
        assert!(err.to_string().contains("flag"));
    }

    #[test]
    fn env_var_overrides_explicit_param() {
        let env = [("SUITE_ENABLE_X".to_string(), "1".to_string())]
            .into_iter()
            .collect();
        let params = resolver(&[("enable_x", "false")], "{}").with_env(env);
        let diag = Diag::new(true);
        assert!(params
            .get_bool_env("enable_x", false, "SUITE_ENABLE_X", &diag)
            .unwrap());
    }

    #[test]
    fn parse_param_splits_on_first_equals() {
        let (name, value) = ParamResolver::parse_param("compile_flags=-DX=1").unwrap();
        assert_eq!(name, "compile_flags");
        assert_eq!(value, "-DX=1");
        assert!(ParamResolver::parse_param("novalue").is_err());
        assert!(ParamResolver::parse_param("=x").is_err());
    }
}
