//! End-to-end configuration tests against the fake compiler.

#![cfg(unix)]

mod common;

use std::collections::BTreeMap;

use cxxsuite_config::{
    CompilerKind, Configuration, CxxCompiler, Diag, ParamResolver, SiteConfig, StdlibUnderTest,
    SuitePaths, TargetInfo,
};

fn params_with(pairs: &[(&str, &str)]) -> ParamResolver {
    let params: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    ParamResolver::new(params, SiteConfig::default())
}

struct Scaffold {
    _temp: tempfile::TempDir,
    cxx_path: std::path::PathBuf,
    suite_root: std::path::PathBuf,
    exec_root: std::path::PathBuf,
}

fn scaffold(headers: &[&str]) -> Scaffold {
    let temp = tempfile::tempdir().expect("create tempdir");
    let cxx_path = common::write_fake_cxx(temp.path());
    let suite_root = common::write_suite_tree(temp.path(), headers);
    let exec_root = temp.path().join("exec");
    std::fs::create_dir_all(&exec_root).expect("create exec root");
    Scaffold {
        cxx_path,
        suite_root,
        exec_root,
        _temp: temp,
    }
}

fn configure(scaffold: &Scaffold, extra_params: &[(&str, &str)]) -> Configuration {
    let cxx = scaffold.cxx_path.display().to_string();
    let src_root = scaffold.suite_root.display().to_string();
    let headers = scaffold.suite_root.join("include").display().to_string();
    let mut pairs = vec![
        ("cxx_under_test", cxx.as_str()),
        ("suite_src_root", src_root.as_str()),
        ("cxx_headers", headers.as_str()),
    ];
    pairs.extend_from_slice(extra_params);
    let paths = SuitePaths {
        test_source_root: scaffold.suite_root.join("test"),
        test_exec_root: scaffold.exec_root.clone(),
    };
    Configuration::configure(
        params_with(&pairs),
        TargetInfo::with_platform("linux"),
        paths,
        Diag::new(true),
    )
    .expect("configuration succeeds")
}

#[test]
fn detects_compiler_identity_from_macros() {
    let scaffold = scaffold(&["algorithm"]);
    let cxx = CxxCompiler::new(scaffold.cxx_path.clone());
    assert_eq!(cxx.kind, Some(CompilerKind::Clang));
    let version = cxx.version.expect("version detected");
    assert_eq!(version.major, "5");
    assert_eq!(version.minor, "0");
}

#[test]
fn default_configuration_selects_newest_dialect_and_libcxx() {
    let scaffold = scaffold(&["algorithm", "vector"]);
    let config = configure(&scaffold, &[]);

    assert_eq!(config.stdlib, StdlibUnderTest::Libcxx);
    assert_eq!(config.std_dialect.as_deref(), Some("c++1z"));
    assert!(config
        .cxx
        .compile_flags
        .contains(&"-std=c++1z".to_string()));
    assert_eq!(config.target_triple, "x86_64-unknown-linux-gnu");

    // Compiler identity and dialect features.
    for feature in ["clang", "clang-5", "clang-5.0", "c++1z", "libc++", "linux"] {
        assert!(config.features.contains(feature), "missing {feature}");
    }
    assert!(config.features.contains("long_tests"));
}

#[test]
fn header_layout_uses_local_headers() {
    let scaffold = scaffold(&["algorithm", "vector"]);
    let config = configure(&scaffold, &[]);

    assert!(config.cxx.compile_flags.contains(&"-nostdinc++".to_string()));
    let include_flag = format!("-I{}", scaffold.suite_root.join("include").display());
    assert!(config.cxx.compile_flags.contains(&include_flag));
    let support_flag = format!(
        "-I{}",
        scaffold.suite_root.join("test").join("support").display()
    );
    assert!(config.cxx.compile_flags.contains(&support_flag));
    // The scanned headers become requirable features.
    assert!(config.features.contains("header.algorithm"));
    assert!(config.features.contains("header.vector"));
    assert!(!config.features.contains("header.deque"));
}

#[test]
fn probed_features_follow_the_compiler() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[]);

    // Probes the fake compiler accepts.
    assert!(config.features.contains("fsized-deallocation"));
    assert!(config.features.contains("-faligned-allocation"));
    assert!(config.features.contains("thread-safety"));
    assert!(config.features.contains("verify-support"));
    assert!(config.features.contains("fcoroutines-ts"));
    // The macro table advertises C++17 language features.
    assert!(!config.features.contains("libcpp-no-if-constexpr"));
    assert!(!config.features.contains("libcpp-no-structured-bindings"));
    // -fmodules is rejected by the fake compiler.
    assert!(!config.features.contains("modules-support"));
    assert!(config.use_clang_verify);
}

#[test]
fn warning_probes_filter_the_flag_list() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[]);

    let warnings = &config.cxx.warning_flags;
    for expected in ["-Wall", "-Wextra", "-Werror", "-Wshadow", "-Wno-attributes"] {
        assert!(
            warnings.contains(&expected.to_string()),
            "missing {expected} in {warnings:?}"
        );
    }
    // Rejected outright by the probe.
    assert!(!warnings.contains(&"-Wuser-defined-warnings".to_string()));
    // -Wno- probe sees the flag echoed in stderr, so it is unsupported.
    assert!(!warnings.contains(&"-Wno-noexcept-type".to_string()));
    assert!(!config.features.contains("diagnose-if-support"));
}

#[test]
fn libcxx_link_layout() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[]);

    let link = &config.cxx.link_flags;
    assert!(link.contains(&"-nodefaultlibs".to_string()));
    assert!(link.contains(&"-lc++".to_string()));
    assert!(link.contains(&"-lc++abi".to_string()));
    // Platform libraries come last.
    assert!(link.contains(&"-lm".to_string()));
    assert!(link.contains(&"-lpthread".to_string()));
}

#[test]
fn libstdcxx_link_layout() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(
        &scaffold,
        &[("cxx_stdlib_under_test", "libstdc++"), ("cxx_headers", "")],
    );

    assert_eq!(config.stdlib, StdlibUnderTest::Libstdcxx);
    let link = &config.cxx.link_flags;
    assert!(!link.contains(&"-nodefaultlibs".to_string()));
    // Filesystem defaults on for libstdc++, pulling in its library.
    assert!(link.contains(&"-lstdc++fs".to_string()));
    assert!(link.contains(&"-lm".to_string()));
    assert!(link.contains(&"-pthread".to_string()));
    assert!(config.features.contains("c++experimental"));
}

#[test]
fn exceptions_and_rtti_switches() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(
        &scaffold,
        &[("enable_exceptions", "false"), ("enable_rtti", "false")],
    );

    assert!(config
        .cxx
        .compile_flags
        .contains(&"-fno-exceptions".to_string()));
    assert!(config.cxx.compile_flags.contains(&"-fno-rtti".to_string()));
    assert!(config
        .cxx
        .compile_flags
        .contains(&"-D_LIBCPP_NO_RTTI".to_string()));
    assert!(config.features.contains("libcpp-no-exceptions"));
    assert!(config.features.contains("libcpp-no-rtti"));
}

#[test]
fn abi_version_macro_only_when_non_default() {
    let scaffold = scaffold(&["algorithm"]);
    let default_abi = configure(&scaffold, &[("abi_version", "1")]);
    assert!(!default_abi
        .cxx
        .compile_flags
        .iter()
        .any(|flag| flag.starts_with("-D_LIBCPP_ABI_VERSION")));

    let versioned = configure(&scaffold, &[("abi_version", "2"), ("abi_unstable", "true")]);
    assert!(versioned
        .cxx
        .compile_flags
        .contains(&"-D_LIBCPP_ABI_VERSION=2".to_string()));
    assert!(versioned
        .cxx
        .compile_flags
        .contains(&"-D_LIBCPP_ABI_UNSTABLE".to_string()));
    assert!(versioned.features.contains("libcpp-abi-unstable"));
}

#[test]
fn address_sanitizer_configures_flags_env_and_features() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[("use_sanitizer", "Address")]);

    assert!(config.cxx.flags.contains(&"-fsanitize=address".to_string()));
    assert!(config.cxx.flags.contains(&"-g".to_string()));
    assert!(config
        .cxx
        .flags
        .contains(&"-fno-omit-frame-pointer".to_string()));
    assert!(config.cxx.compile_flags.contains(&"-O1".to_string()));
    assert_eq!(
        config.exec_env.get("ASAN_OPTIONS").map(String::as_str),
        Some("detect_odr_violation=0")
    );
    assert!(config.features.contains("asan"));
    assert!(config.features.contains("sanitizer-new-delete"));
    assert!(config.features.contains("sanitizer=Address"));
}

#[test]
fn combined_asan_ubsan_adds_both_feature_sets() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[("use_sanitizer", "Address;Undefined")]);
    assert!(config.features.contains("asan"));
    assert!(config.features.contains("ubsan"));
    assert_eq!(
        config.exec_env.get("UBSAN_OPTIONS").map(String::as_str),
        Some("print_stacktrace=1")
    );
}

#[test]
fn unknown_sanitizer_is_fatal() {
    let scaffold = scaffold(&["algorithm"]);
    let cxx = scaffold.cxx_path.display().to_string();
    let src_root = scaffold.suite_root.display().to_string();
    let paths = SuitePaths {
        test_source_root: scaffold.suite_root.join("test"),
        test_exec_root: scaffold.exec_root.clone(),
    };
    let result = Configuration::configure(
        params_with(&[
            ("cxx_under_test", cxx.as_str()),
            ("suite_src_root", src_root.as_str()),
            ("cxx_headers", ""),
            ("use_sanitizer", "Leak"),
        ]),
        TargetInfo::with_platform("linux"),
        paths,
        Diag::new(true),
    );
    let err = result.expect_err("Leak is not a supported sanitizer");
    assert!(err.to_string().contains("use_sanitizer"));
}

#[test]
fn coverage_adds_instrumentation_flags() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[("generate_coverage", "true")]);
    assert!(config.cxx.flags.contains(&"--coverage".to_string()));
    assert!(config.cxx.compile_flags.contains(&"-O0".to_string()));
}

#[test]
fn color_diagnostics_param_probes_the_flag() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[("color_diagnostics", "")]);
    assert!(config
        .cxx
        .flags
        .contains(&"-fdiagnostics-color=always".to_string()));
}

#[test]
fn debug_level_sets_the_debug_macro() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[("debug_level", "1")]);
    assert!(config
        .cxx
        .compile_flags
        .contains(&"-D_LIBCPP_DEBUG=1".to_string()));
}

#[test]
fn out_of_range_debug_level_is_fatal() {
    let scaffold = scaffold(&["algorithm"]);
    let cxx = scaffold.cxx_path.display().to_string();
    let src_root = scaffold.suite_root.display().to_string();
    let paths = SuitePaths {
        test_source_root: scaffold.suite_root.join("test"),
        test_exec_root: scaffold.exec_root.clone(),
    };
    let result = Configuration::configure(
        params_with(&[
            ("cxx_under_test", cxx.as_str()),
            ("suite_src_root", src_root.as_str()),
            ("cxx_headers", ""),
            ("debug_level", "2"),
        ]),
        TargetInfo::with_platform("linux"),
        paths,
        Diag::new(true),
    );
    let err = result.expect_err("debug_level 2 is out of range");
    assert!(err.to_string().contains("debug_level"));
}

#[test]
fn substitutions_cover_the_compile_shortcuts() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[]);
    let subs: BTreeMap<&str, &str> = config
        .substitutions
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();

    assert!(subs["%cxx"].contains("fake-cxx"));
    assert!(subs["%compile"].contains("-o %t.o %s -c"));
    assert!(subs["%link"].contains("-o %t.exe %t.o"));
    assert!(subs["%build"].contains("-o %t.exe %s"));
    assert_eq!(subs["%run"], "%t.exe");
    assert!(subs.contains_key("%verify"));
    // Order: the flag-list names must come before their shortcut prefixes.
    let names: Vec<&str> = config
        .substitutions
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    let position =
        |name: &str| names.iter().position(|n| *n == name).expect("substitution present");
    assert!(position("%compile_flags") < position("%compile"));
    assert!(position("%link_flags") < position("%link"));
}

#[test]
fn no_default_flags_still_adds_support_include() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(&scaffold, &[("no_default_flags", "true")]);
    assert!(!config
        .cxx
        .compile_flags
        .iter()
        .any(|flag| flag.starts_with("-std=")));
    let support_flag = format!(
        "-I{}",
        scaffold.suite_root.join("test").join("support").display()
    );
    assert!(config.cxx.compile_flags.contains(&support_flag));
}

#[test]
fn extra_compile_and_link_flags_are_shell_split() {
    let scaffold = scaffold(&["algorithm"]);
    let config = configure(
        &scaffold,
        &[
            ("compile_flags", "-DX=1 '-DNAME=two words'"),
            ("link_flags", "-L/opt/lib -lextra"),
        ],
    );
    assert!(config.cxx.compile_flags.contains(&"-DX=1".to_string()));
    assert!(config
        .cxx
        .compile_flags
        .contains(&"-DNAME=two words".to_string()));
    assert!(config.cxx.link_flags.contains(&"-L/opt/lib".to_string()));
    assert!(config.cxx.link_flags.contains(&"-lextra".to_string()));
}
