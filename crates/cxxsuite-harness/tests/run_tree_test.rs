//! End-to-end harness tests: discover and run a small test tree against the
//! fake compiler.

#![cfg(unix)]

mod common;

use std::collections::BTreeMap;
use std::path::Path;

use cxxsuite_config::{Configuration, Diag, ParamResolver, SiteConfig, SuitePaths, TargetInfo};
use cxxsuite_harness::discovery::{DiscoveryOptions, discover_tests};
use cxxsuite_harness::report::ReportSummary;
use cxxsuite_harness::{Outcome, TestRunner};

struct Scaffold {
    _temp: tempfile::TempDir,
    config: Configuration,
    test_root: std::path::PathBuf,
}

fn write_test(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent dir")).expect("mkdir");
    std::fs::write(path, content).expect("write test file");
}

fn scaffold(tests: &[(&str, &str)]) -> Scaffold {
    let temp = tempfile::tempdir().expect("tempdir");
    let cxx_path = common::write_fake_cxx(temp.path());
    let suite_root = common::write_suite_tree(temp.path(), &["algorithm", "vector"]);
    let test_root = suite_root.join("test");
    for (relative, content) in tests {
        write_test(&test_root, relative, content);
    }
    let exec_root = temp.path().join("exec");
    std::fs::create_dir_all(&exec_root).expect("create exec root");

    let params: BTreeMap<String, String> = [
        ("cxx_under_test", cxx_path.display().to_string()),
        ("suite_src_root", suite_root.display().to_string()),
        (
            "cxx_headers",
            suite_root.join("include").display().to_string(),
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let config = Configuration::configure(
        ParamResolver::new(params, SiteConfig::default()),
        TargetInfo::with_platform("linux"),
        SuitePaths {
            test_source_root: test_root.clone(),
            test_exec_root: exec_root,
        },
        Diag::new(true),
    )
    .expect("configuration succeeds");

    Scaffold {
        config,
        test_root,
        _temp: temp,
    }
}

fn run_all(scaffold: &Scaffold) -> BTreeMap<String, Outcome> {
    let tests =
        discover_tests(&scaffold.test_root, &DiscoveryOptions::default()).expect("discover");
    let rows = TestRunner::new(&scaffold.config)
        .run(&tests)
        .expect("run tests");
    rows.into_iter().map(|row| (row.path, row.outcome)).collect()
}

#[test]
fn pass_test_compiles_links_and_runs() {
    let scaffold = scaffold(&[(
        "std/ok.pass.cpp",
        "#include <algorithm>\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/ok.pass.cpp"], Outcome::Pass);
}

#[test]
fn pass_test_fails_when_the_binary_exits_nonzero() {
    let scaffold = scaffold(&[(
        "std/crash.pass.cpp",
        "// RUNTIME_FAIL\nint main() { return 1; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/crash.pass.cpp"], Outcome::Fail);
}

#[test]
fn fail_test_passes_when_diagnostics_match() {
    let scaffold = scaffold(&[(
        "std/bad.fail.cpp",
        "#error bad\n// expected-error {{bad}}\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/bad.fail.cpp"], Outcome::Pass);
}

#[test]
fn fail_test_fails_when_it_compiles_cleanly() {
    let scaffold = scaffold(&[("std/notbad.fail.cpp", "int main() { return 0; }\n")]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/notbad.fail.cpp"], Outcome::Fail);
}

#[test]
fn requires_marker_gates_on_missing_features() {
    let scaffold = scaffold(&[(
        "std/gated.pass.cpp",
        "// REQUIRES: glibc-99\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/gated.pass.cpp"], Outcome::Unsupported);
}

#[test]
fn unsupported_marker_matches_platform_feature() {
    let scaffold = scaffold(&[(
        "std/unsup.pass.cpp",
        "// UNSUPPORTED: linux\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/unsup.pass.cpp"], Outcome::Unsupported);
}

#[test]
fn xfail_star_turns_a_failure_into_xfail() {
    let scaffold = scaffold(&[(
        "std/expected_fail.pass.cpp",
        "// XFAIL: *\n// RUNTIME_FAIL\nint main() { return 1; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/expected_fail.pass.cpp"], Outcome::XFail);
}

#[test]
fn xfail_on_a_passing_test_reports_xpass() {
    let scaffold = scaffold(&[(
        "std/surprise.pass.cpp",
        "// XFAIL: *\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/surprise.pass.cpp"], Outcome::XPass);
}

#[test]
fn missing_header_requirement_is_unsupported() {
    let scaffold = scaffold(&[(
        "std/missing_header.pass.cpp",
        "#include <experimental/fancy>\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/missing_header.pass.cpp"], Outcome::Unsupported);
}

#[test]
fn script_test_builds_and_runs_through_substitutions() {
    let scaffold = scaffold(&[(
        "script/build_and_run.sh.cpp",
        "// RUN: %cxx -o %t.exe %s %all_flags\n// RUN: %run\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["script/build_and_run.sh.cpp"], Outcome::Pass);
}

#[test]
fn script_test_fails_on_a_failing_run_line() {
    let scaffold = scaffold(&[(
        "script/failing.sh.cpp",
        "// RUN: true\n// RUN: false\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["script/failing.sh.cpp"], Outcome::Fail);
}

#[test]
fn not_prefix_inverts_a_run_line() {
    let scaffold = scaffold(&[(
        "script/inverted.sh.cpp",
        "// RUN: not false\nint main() { return 0; }\n",
    )]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["script/inverted.sh.cpp"], Outcome::Pass);
}

#[test]
fn run_line_in_a_pass_test_is_fatal() {
    let scaffold = scaffold(&[(
        "std/oops.pass.cpp",
        "// RUN: true\nint main() { return 0; }\n",
    )]);
    let tests =
        discover_tests(&scaffold.test_root, &DiscoveryOptions::default()).expect("discover");
    let err = TestRunner::new(&scaffold.config)
        .run(&tests)
        .expect_err("RUN line outside a script test");
    assert!(err.to_string().contains("RUN"));
}

#[test]
fn filter_restricts_the_run() {
    let scaffold = scaffold(&[
        ("std/one.pass.cpp", "int main() { return 0; }\n"),
        ("script/two.sh.cpp", "// RUN: true\nint main() { return 0; }\n"),
    ]);
    let tests =
        discover_tests(&scaffold.test_root, &DiscoveryOptions::default()).expect("discover");
    let rows = TestRunner::new(&scaffold.config)
        .with_filter(Some("script/".to_string()))
        .run(&tests)
        .expect("run tests");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path, "script/two.sh.cpp");
}

#[test]
fn summary_over_a_mixed_tree() {
    let scaffold = scaffold(&[
        ("std/ok.pass.cpp", "int main() { return 0; }\n"),
        ("std/crash.pass.cpp", "// RUNTIME_FAIL\nint main() { return 1; }\n"),
        ("std/bad.fail.cpp", "#error bad\n// expected-error {{bad}}\n"),
        ("std/gated.pass.cpp", "// REQUIRES: glibc-99\nint main() { return 0; }\n"),
        (
            "std/expected_fail.pass.cpp",
            "// XFAIL: *\n// RUNTIME_FAIL\nint main() { return 1; }\n",
        ),
    ]);
    let tests =
        discover_tests(&scaffold.test_root, &DiscoveryOptions::default()).expect("discover");
    let rows = TestRunner::new(&scaffold.config).run(&tests).expect("run");
    let summary = ReportSummary::from_rows(&rows);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.expected_failures, 1);
    assert_eq!(summary.unsupported, 1);
    assert!(!summary.all_passed());
}

#[test]
fn build_products_are_cleaned_up() {
    let scaffold = scaffold(&[("std/ok.pass.cpp", "int main() { return 0; }\n")]);
    let outcomes = run_all(&scaffold);
    assert_eq!(outcomes["std/ok.pass.cpp"], Outcome::Pass);
    let exec_dir = scaffold.config.paths.test_exec_root.join("std");
    let leftovers: Vec<_> = std::fs::read_dir(&exec_dir)
        .map(|entries| entries.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(
        leftovers.is_empty(),
        "expected no build products, found {leftovers:?}"
    );
}
