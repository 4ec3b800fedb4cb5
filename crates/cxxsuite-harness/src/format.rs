//! Test format: classification, requirement checks, and execution semantics
//! for the suite's naming conventions.
//!
//! Tests fall into three categories:
//! - `FOO.pass.cpp` — must compile, link, run, and exit 0
//! - `FOO.fail.cpp` — must fail to compile (with clang `-verify` when
//!   available, the expected-diagnostic comments are checked instead)
//! - `FOO.sh.cpp` — `// RUN:` lines are substituted and executed in order

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use cxxsuite_config::ConfigError;
use cxxsuite_config::Configuration;
use cxxsuite_config::invoke::{self, CommandOutput};

use crate::error::{HarnessError, Result};

/// Test category, derived from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    Pass,
    Fail,
    ShTest,
}

impl TestKind {
    /// Classify a file name by the suite's naming conventions.
    #[must_use]
    pub fn classify(file_name: &str) -> Option<Self> {
        if file_name.ends_with(".pass.cpp") {
            Some(Self::Pass)
        } else if file_name.ends_with(".fail.cpp") {
            Some(Self::Fail)
        } else if file_name.ends_with(".sh.cpp") {
            Some(Self::ShTest)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::ShTest => "sh",
        }
    }
}

/// Final classification of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    XFail,
    XPass,
    Unsupported,
}

impl Outcome {
    /// Whether this outcome fails the run. An expected failure does not; an
    /// unexpected pass does.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::XPass)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::XFail => "xfail",
            Self::XPass => "xpass",
            Self::Unsupported => "unsupported",
        }
    }
}

/// One discovered test file.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub source_path: PathBuf,
    /// Path relative to the test root, used for reporting and output layout.
    pub relative_path: PathBuf,
    pub kind: TestKind,
}

/// Requirements and script lines scanned out of a test source.
#[derive(Debug, Clone, Default)]
pub struct TestMarkers {
    pub requires: Vec<String>,
    pub unsupported: Vec<String>,
    pub xfail: Vec<String>,
    pub run_lines: Vec<String>,
    /// `header.<name>` requirements from `#include <...>` lines, with `/`
    /// replaced by `_`.
    pub required_headers: Vec<String>,
}

static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#include\s+<([^>]*)>").expect("include pattern is valid"));
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"//\s*(REQUIRES|UNSUPPORTED|XFAIL):(.*)").expect("marker pattern is valid")
});
static RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//\s*RUN:(.*)").expect("run pattern is valid"));

/// Scan a test source for includes, gating markers, and `RUN:` lines.
#[must_use]
pub fn scan_test_source(content: &str) -> TestMarkers {
    let mut markers = TestMarkers::default();
    for capture in INCLUDE_RE.captures_iter(content) {
        markers.required_headers.push(capture[1].replace('/', "_"));
    }
    let mut raw_run_lines = Vec::new();
    for line in content.lines() {
        if let Some(capture) = RUN_RE.captures(line) {
            raw_run_lines.push(capture[1].trim().to_string());
            continue;
        }
        if let Some(capture) = MARKER_RE.captures(line) {
            let entries = capture[2]
                .split(',')
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty());
            match &capture[1] {
                "REQUIRES" => markers.requires.extend(entries),
                "UNSUPPORTED" => markers.unsupported.extend(entries),
                "XFAIL" => markers.xfail.extend(entries),
                _ => {}
            }
        }
    }
    // A trailing backslash continues a RUN line onto the next one.
    for line in raw_run_lines {
        match markers.run_lines.last_mut() {
            Some(last) if last.ends_with('\\') => {
                last.pop();
                last.push(' ');
                last.push_str(&line);
            }
            _ => markers.run_lines.push(line),
        }
    }
    markers
}

/// Result of executing one test.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub outcome: Outcome,
    pub detail: Option<String>,
}

/// Executes tests against a resolved configuration.
pub struct TestFormat<'a> {
    config: &'a Configuration,
}

impl<'a> TestFormat<'a> {
    #[must_use]
    pub fn new(config: &'a Configuration) -> Self {
        Self { config }
    }

    /// Execute one test and classify the outcome.
    pub fn execute(&self, test: &TestCase) -> Result<TestResult> {
        let bytes = std::fs::read(&test.source_path)?;
        let content = String::from_utf8_lossy(&bytes);
        let markers = scan_test_source(&content);

        if test.kind != TestKind::ShTest && !markers.run_lines.is_empty() {
            return Err(HarnessError::Fatal(format!(
                "unsupported RUN line found in test {}",
                test.relative_path.display()
            )));
        }
        if test.kind == TestKind::ShTest && markers.run_lines.is_empty() {
            return Ok(TestResult {
                outcome: Outcome::Fail,
                detail: Some("script test has no RUN: lines".to_string()),
            });
        }

        if let Some(reason) = self.unsupported_reason(&markers) {
            return Ok(TestResult {
                outcome: Outcome::Unsupported,
                detail: Some(reason),
            });
        }

        let expected_failure = markers.xfail.iter().any(|entry| {
            entry == "*"
                || self.config.features.contains(entry)
                || self.config.target_triple.contains(entry.as_str())
        });

        let raw = match test.kind {
            TestKind::Pass => self.execute_pass_test(test)?,
            TestKind::Fail => self.execute_fail_test(test)?,
            TestKind::ShTest => self.execute_sh_test(test, &markers)?,
        };
        Ok(apply_expected_failure(raw, expected_failure))
    }

    fn unsupported_reason(&self, markers: &TestMarkers) -> Option<String> {
        if self.config.enforce_header_requirements {
            for header in &markers.required_headers {
                let feature = format!("header.{header}");
                if !self.config.features.contains(&feature) {
                    return Some(format!("required header <{header}> is not available"));
                }
            }
        }
        for entry in &markers.unsupported {
            if self.config.features.contains(entry)
                || self.config.target_triple.contains(entry.as_str())
            {
                return Some(format!("unsupported on '{entry}'"));
            }
        }
        for entry in &markers.requires {
            if !self.config.features.contains(entry) {
                return Some(format!("requires feature '{entry}'"));
            }
        }
        None
    }

    fn exec_dir(&self, test: &TestCase) -> PathBuf {
        let parent = test.relative_path.parent().unwrap_or_else(|| Path::new(""));
        self.config.paths.test_exec_root.join(parent)
    }

    fn tmp_base(&self, test: &TestCase) -> PathBuf {
        let name = test
            .relative_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("test");
        self.exec_dir(test).join(format!("{name}.tmp"))
    }

    fn execute_pass_test(&self, test: &TestCase) -> Result<TestResult> {
        let exec_dir = self.exec_dir(test);
        std::fs::create_dir_all(&exec_dir)?;
        let tmp_base = self.tmp_base(test);
        let exe_path = PathBuf::from(format!("{}.exe", tmp_base.display()));
        let object_path = PathBuf::from(format!("{}.o", tmp_base.display()));
        let source = test.source_path.display().to_string();

        let build = self.config.cxx.compile_link_two_steps(
            &source,
            &exe_path,
            Some(&object_path),
            &[],
            Some(&exec_dir),
        )?;
        let result = if build.success() {
            let mut cmd = self.config.executor_prefix.clone();
            cmd.push(exe_path.display().to_string());
            let run = run_with_etxtbsy_retry(&cmd, &self.config.exec_env, Some(&exec_dir))?;
            if run.success() {
                TestResult {
                    outcome: Outcome::Pass,
                    detail: None,
                }
            } else {
                TestResult {
                    outcome: Outcome::Fail,
                    detail: Some(format!(
                        "Command: {}\nExit code: {}\nStandard output:\n--\n{}--\nStandard error:\n--\n{}--\ncompiled test failed unexpectedly!",
                        cmd.join(" "),
                        run.exit_code,
                        run.stdout,
                        run.stderr
                    )),
                }
            }
        } else {
            TestResult {
                outcome: Outcome::Fail,
                detail: Some(format!("{}compilation failed unexpectedly!", build.report())),
            }
        };
        // Build products go away whatever the outcome.
        let _ = std::fs::remove_file(&object_path);
        let _ = std::fs::remove_file(&exe_path);
        Ok(result)
    }

    fn execute_fail_test(&self, test: &TestCase) -> Result<TestResult> {
        let source = test.source_path.display().to_string();
        let use_verify = self.config.use_clang_verify && !self.config.cxx.verify_flags.is_empty();
        let mut cxx = self.config.cxx.clone();
        if use_verify {
            cxx.set_use_verify(true);
        }
        let run = cxx.compile(&[source], Some(invoke::devnull()), &[], None)?;
        let passed = if use_verify {
            run.success()
        } else {
            !run.success()
        };
        if passed {
            Ok(TestResult {
                outcome: Outcome::Pass,
                detail: None,
            })
        } else if use_verify {
            Ok(TestResult {
                outcome: Outcome::Fail,
                detail: Some(format!("{}expected diagnostics did not match!", run.report())),
            })
        } else {
            Ok(TestResult {
                outcome: Outcome::Fail,
                detail: Some(format!("{}expected compilation to fail!", run.report())),
            })
        }
    }

    fn execute_sh_test(&self, test: &TestCase, markers: &TestMarkers) -> Result<TestResult> {
        let exec_dir = self.exec_dir(test);
        std::fs::create_dir_all(&exec_dir)?;
        let tmp_base = self.tmp_base(test);
        for (index, raw_line) in markers.run_lines.iter().enumerate() {
            let line = self.apply_substitutions(raw_line, test, &tmp_base, &exec_dir);
            let output = self.run_script_line(&line, &exec_dir)?;
            if !output.success() {
                return Ok(TestResult {
                    outcome: Outcome::Fail,
                    detail: Some(format!(
                        "RUN line {} failed\nCommand: {line}\nExit code: {}\nStandard output:\n--\n{}--\nStandard error:\n--\n{}--\n",
                        index + 1,
                        output.exit_code,
                        output.stdout,
                        output.stderr
                    )),
                });
            }
        }
        Ok(TestResult {
            outcome: Outcome::Pass,
            detail: None,
        })
    }

    /// Expand `%`-substitutions: the configuration table first (its values
    /// may themselves contain `%s`/`%t`), then the per-test names. `%T` must
    /// precede `%t` so the longer name is not clobbered.
    fn apply_substitutions(
        &self,
        line: &str,
        test: &TestCase,
        tmp_base: &Path,
        exec_dir: &Path,
    ) -> String {
        let mut result = line.to_string();
        for (name, value) in &self.config.substitutions {
            result = result.replace(name.as_str(), value);
        }
        result = result.replace("%s", &test.source_path.display().to_string());
        result = result.replace("%T", &exec_dir.display().to_string());
        result = result.replace("%t", &tmp_base.display().to_string());
        // `not ` inverts the line's exit status.
        if let Some(rest) = result.strip_prefix("not ") {
            result = format!("! {rest}");
        }
        result
    }

    fn run_script_line(&self, line: &str, cwd: &Path) -> Result<CommandOutput> {
        if self.config.execute_external {
            let argv = if cfg!(windows) {
                vec!["cmd".to_string(), "/C".to_string(), line.to_string()]
            } else {
                vec!["/bin/sh".to_string(), "-c".to_string(), line.to_string()]
            };
            Ok(invoke::run_command(
                &argv,
                Some(&self.config.exec_env),
                Some(cwd),
                None,
            )?)
        } else {
            // Internal runner: one plain command per line, with `!` prefix
            // inversion. Pipelines and redirections need the external shell.
            let mut words = invoke::split_shell_words(line);
            let mut invert = false;
            while words.first().map(String::as_str) == Some("!") {
                invert = !invert;
                words.remove(0);
            }
            if words.is_empty() {
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                });
            }
            let mut output =
                invoke::run_command(&words, Some(&self.config.exec_env), Some(cwd), None)?;
            if invert {
                output.exit_code = i32::from(output.exit_code == 0);
            }
            Ok(output)
        }
    }
}

fn apply_expected_failure(result: TestResult, expected_failure: bool) -> TestResult {
    if !expected_failure {
        return result;
    }
    match result.outcome {
        Outcome::Pass => TestResult {
            outcome: Outcome::XPass,
            detail: Some("test passed but was expected to fail".to_string()),
        },
        Outcome::Fail => TestResult {
            outcome: Outcome::XFail,
            detail: result.detail,
        },
        _ => result,
    }
}

const ETXTBSY: i32 = 26;

/// Run a just-linked binary, retrying while the kernel still considers the
/// text file busy.
fn run_with_etxtbsy_retry(
    cmd: &[String],
    env: &BTreeMap<String, String>,
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    let mut attempts = 0;
    loop {
        match invoke::run_command(cmd, Some(env), cwd, None) {
            Err(ConfigError::Spawn { ref source, .. })
                if source.raw_os_error() == Some(ETXTBSY) && attempts < 10 =>
            {
                attempts += 1;
                std::thread::sleep(Duration::from_millis(100));
            }
            other => return Ok(other?),
        }
    }
}
