//! Configuration assembly: resolve the full compiler invocation matrix for a
//! standard library under test.
//!
//! [`Configuration::configure`] runs a fixed sequence of steps, each reading
//! parameters and appending to the compiler's flag lists, the available
//! feature set, the execution environment, or the substitution table. The
//! ordering matters: dialect selection feeds the warning defaults, include
//! layout feeds the header features, and the flag lists must be final before
//! the substitution table is rendered.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::compiler::{CompilerKind, CompilerVersion, CxxCompiler, make_compiler};
use crate::diag::Diag;
use crate::error::{ConfigError, Result};
use crate::features::{self, FeatureSet};
use crate::invoke::{self, shell_quote, split_shell_words};
use crate::params::ParamResolver;
use crate::target::{Deployment, TargetInfo};

/// Which C++ standard library the tests exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdlibUnderTest {
    #[default]
    Libcxx,
    Libstdcxx,
    Msvc,
    CxxDefault,
}

impl StdlibUnderTest {
    #[must_use]
    pub fn from_name(raw: &str) -> Option<Self> {
        match raw {
            "libc++" => Some(Self::Libcxx),
            "libstdc++" => Some(Self::Libstdcxx),
            "msvc" => Some(Self::Msvc),
            "cxx_default" => Some(Self::CxxDefault),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Libcxx => "libc++",
            Self::Libstdcxx => "libstdc++",
            Self::Msvc => "msvc",
            Self::CxxDefault => "cxx_default",
        }
    }
}

/// Whether tests link against the system C++ library.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SystemCxxLib {
    #[default]
    No,
    Yes,
    /// Link against the library in this directory.
    Dir(PathBuf),
}

impl SystemCxxLib {
    #[must_use]
    pub const fn enabled(&self) -> bool {
        !matches!(self, Self::No)
    }
}

/// Filesystem layout of the suite being run.
#[derive(Debug, Clone)]
pub struct SuitePaths {
    /// Root of the test tree.
    pub test_source_root: PathBuf,
    /// Scratch root for build products (module caches, test binaries).
    pub test_exec_root: PathBuf,
}

/// The fully resolved test-suite configuration.
#[derive(Debug)]
pub struct Configuration {
    pub params: ParamResolver,
    pub diag: Diag,
    pub target: TargetInfo,
    pub paths: SuitePaths,
    pub cxx: CxxCompiler,
    pub features: FeatureSet,
    /// Environment test binaries run under.
    pub exec_env: BTreeMap<String, String>,
    /// `%name` substitutions for script tests, applied in order.
    pub substitutions: Vec<(String, String)>,
    /// Wrapper command prefixed to test binary invocations.
    pub executor_prefix: Vec<String>,
    pub stdlib: StdlibUnderTest,
    pub src_root: PathBuf,
    pub project_obj_root: Option<PathBuf>,
    pub obj_root: Option<PathBuf>,
    pub cxx_library_root: Option<PathBuf>,
    pub cxx_runtime_root: Option<PathBuf>,
    pub abi_library_root: Option<PathBuf>,
    pub cxx_headers: Option<PathBuf>,
    pub link_shared: bool,
    pub debug_build: bool,
    pub use_target: bool,
    pub use_deployment: bool,
    pub deployment: Option<Deployment>,
    pub use_system_cxx_lib: SystemCxxLib,
    pub with_availability: bool,
    pub use_clang_verify: bool,
    /// Run script-test lines through a real shell.
    pub execute_external: bool,
    pub long_tests: bool,
    pub std_dialect: Option<String>,
    pub target_triple: String,
    /// Gate tests on `header.<name>` requirements. Only set when the header
    /// directory was actually scanned, so system-header runs are not gated
    /// on an incomplete universe.
    pub enforce_header_requirements: bool,
}

impl Configuration {
    /// Resolve the complete configuration. Steps run in a fixed order; see
    /// the module documentation.
    pub fn configure(
        params: ParamResolver,
        target: TargetInfo,
        paths: SuitePaths,
        diag: Diag,
    ) -> Result<Self> {
        let link_shared = params.get_bool("enable_shared", true)?;
        let debug_build = params.get_bool("debug_build", false)?;
        let mut exec_env: BTreeMap<String, String> = std::env::vars().collect();
        let cxx = make_compiler(&params, &diag, &mut exec_env, target.path_separator())?;

        let mut config = Self {
            params,
            diag,
            target,
            paths,
            cxx,
            features: FeatureSet::new(),
            exec_env,
            substitutions: Vec::new(),
            executor_prefix: Vec::new(),
            stdlib: StdlibUnderTest::default(),
            src_root: PathBuf::new(),
            project_obj_root: None,
            obj_root: None,
            cxx_library_root: None,
            cxx_runtime_root: None,
            abi_library_root: None,
            cxx_headers: None,
            link_shared,
            debug_build,
            use_target: false,
            use_deployment: false,
            deployment: None,
            use_system_cxx_lib: SystemCxxLib::default(),
            with_availability: false,
            use_clang_verify: false,
            execute_external: false,
            long_tests: true,
            std_dialect: None,
            target_triple: String::new(),
            enforce_header_requirements: false,
        };

        config.configure_executor();
        config.configure_use_system_cxx_lib()?;
        config.configure_triple()?;
        config.configure_deployment()?;
        config.configure_availability()?;
        config.configure_src_root();
        config.configure_obj_root();
        config.configure_cxx_stdlib_under_test()?;
        config.configure_cxx_library_root();
        config.configure_use_clang_verify()?;
        config.configure_use_thread_safety();
        config.configure_execute_external()?;
        config.configure_ccache()?;
        config.configure_compile_flags()?;
        config.configure_filesystem_compile_flags()?;
        config.configure_link_flags()?;
        config.configure_env();
        config.configure_color_diagnostics()?;
        config.configure_debug_mode()?;
        config.configure_warnings()?;
        config.configure_sanitizer()?;
        config.configure_coverage()?;
        config.configure_modules()?;
        config.configure_coroutines()?;
        config.configure_substitutions();
        config.configure_features()?;
        Ok(config)
    }

    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.target.is_windows
    }

    /// Full filename for a static library on this platform.
    #[must_use]
    pub fn static_lib_name(&self, name: &str) -> String {
        if self.is_windows() {
            format!("lib{name}.lib")
        } else {
            format!("lib{name}.a")
        }
    }

    fn enable_experimental(&self) -> Result<bool> {
        // libstdc++ runs enable the experimental library unless told not to.
        self.params
            .get_bool("enable_experimental", self.stdlib == StdlibUnderTest::Libstdcxx)
    }

    fn enable_filesystem(&self) -> Result<bool> {
        self.params
            .get_bool("enable_filesystem", self.stdlib == StdlibUnderTest::Libstdcxx)
    }

    fn configure_executor(&mut self) {
        if let Some(exec_str) = self.params.get_conf("executor") {
            self.executor_prefix = exec_str.split_whitespace().map(String::from).collect();
            self.diag.note(format!("using executor: {exec_str}"));
        }
    }

    fn configure_use_system_cxx_lib(&mut self) -> Result<()> {
        let value = self.params.get_conf("use_system_cxx_lib");
        self.use_system_cxx_lib = match value.as_deref() {
            None | Some("false") => SystemCxxLib::No,
            Some("true") => SystemCxxLib::Yes,
            Some(path) => {
                let dir = PathBuf::from(path);
                if !dir.is_dir() {
                    return Err(ConfigError::Fatal(format!(
                        "use_system_cxx_lib='{path}' is not a directory"
                    )));
                }
                SystemCxxLib::Dir(dir)
            }
        };
        self.diag.note(format!(
            "inferred use_system_cxx_lib as: {:?}",
            self.use_system_cxx_lib
        ));
        Ok(())
    }

    fn can_use_deployment(&self) -> bool {
        self.target.platform == "darwin"
            && self.target.is_host_macosx
            && self.cxx.kind.is_some_and(CompilerKind::is_clang)
    }

    fn configure_triple(&mut self) -> Result<()> {
        let param_triple = self.params.get_conf("target_triple");
        self.use_target = self.params.get_bool("use_target", false)?;
        if self.use_target && param_triple.is_none() {
            self.diag
                .warning("use_target is true but no triple is specified");
        }

        self.use_deployment = !self.use_target && self.can_use_deployment();
        if self.use_deployment {
            return Ok(());
        }

        if let Some(triple) = param_triple {
            if self.use_target && triple.contains("apple") {
                self.diag.warning(
                    "consider using arch and platform instead of target_triple on Apple platforms",
                );
            }
            self.target_triple = triple;
            return Ok(());
        }

        let triple = normalize_triple(&self.cxx.query_triple()?);
        self.diag
            .note(format!("inferred target_triple as: {triple:?}"));
        self.target_triple = triple;
        Ok(())
    }

    fn configure_deployment(&mut self) -> Result<()> {
        if !self.use_deployment {
            if self.params.get_conf("arch").is_some() {
                self.diag.warning("ignoring arch, using target_triple");
            }
            if self.params.get_conf("platform").is_some() {
                self.diag.warning("ignoring platform, using target_triple");
            }
            return Ok(());
        }

        // Pin the deployment explicitly so an SDK newer than the running
        // system cannot skew tests that use the system library.
        let arch = match self.params.get_conf("arch") {
            Some(arch) => arch,
            None => {
                let triple = self.cxx.query_triple()?;
                let arch = triple.split('-').next().unwrap_or_default().to_string();
                self.diag.note(format!("inferred arch as: {arch:?}"));
                arch
            }
        };
        let (name, version) = self.target.host_deployment_target().ok_or_else(|| {
            ConfigError::Fatal("unable to infer the deployment platform".to_string())
        })?;
        self.diag.note(format!("inferred platform as: {name}{version}"));
        self.target_triple = format!("{arch}-apple-{name}{version}");
        self.diag.note(format!(
            "computed target_triple as: {:?}",
            self.target_triple
        ));
        self.deployment = Some(Deployment { arch, name, version });
        Ok(())
    }

    fn configure_availability(&mut self) -> Result<()> {
        self.with_availability = self.params.get_bool("with_availability", false)?;
        self.diag.note(format!(
            "inferred with_availability as: {:?}",
            self.with_availability
        ));
        Ok(())
    }

    fn configure_src_root(&mut self) {
        self.src_root = self
            .params
            .get_conf("suite_src_root")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                self.paths
                    .test_source_root
                    .parent()
                    .unwrap_or(&self.paths.test_source_root)
                    .to_path_buf()
            });
    }

    fn configure_obj_root(&mut self) {
        self.project_obj_root = self.params.get_conf("project_obj_root").map(PathBuf::from);
        self.obj_root = self
            .params
            .get_conf("suite_obj_root")
            .map(PathBuf::from)
            .or_else(|| self.project_obj_root.clone());
    }

    fn configure_cxx_stdlib_under_test(&mut self) -> Result<()> {
        let name = self.params.get_conf_or("cxx_stdlib_under_test", "libc++");
        let stdlib = StdlibUnderTest::from_name(&name).ok_or_else(|| {
            ConfigError::Fatal(format!(
                "unsupported value for 'cxx_stdlib_under_test': {name}"
            ))
        })?;
        self.stdlib = stdlib;
        self.features.add(stdlib.as_str());
        Ok(())
    }

    fn configure_cxx_library_root(&mut self) {
        self.cxx_library_root = self
            .params
            .get_conf("cxx_library_root")
            .map(PathBuf::from)
            .or_else(|| self.obj_root.clone());
        self.cxx_runtime_root = self
            .params
            .get_conf("cxx_runtime_root")
            .map(PathBuf::from)
            .or_else(|| self.cxx_library_root.clone());
    }

    fn configure_use_clang_verify(&mut self) -> Result<()> {
        if self.with_availability {
            // Availability markup produces diagnostics -verify cannot model.
            self.use_clang_verify = false;
            return Ok(());
        }
        match self.params.get_bool_opt("use_clang_verify")? {
            Some(true) => {
                if !self.cxx.is_verify_supported() {
                    return Err(ConfigError::Fatal(
                        "use_clang_verify is enabled but the compiler does not support -verify"
                            .to_string(),
                    ));
                }
                self.use_clang_verify = true;
            }
            Some(false) => self.use_clang_verify = false,
            None => {
                self.use_clang_verify = self.cxx.is_verify_supported();
                self.diag.note(format!(
                    "inferred use_clang_verify as: {:?}",
                    self.use_clang_verify
                ));
            }
        }
        if self.use_clang_verify {
            self.features.add("verify-support");
        }
        Ok(())
    }

    fn configure_use_thread_safety(&mut self) {
        if self
            .cxx
            .has_compile_flag(&["-Werror=thread-safety".to_string()])
        {
            self.cxx
                .compile_flags
                .push("-Werror=thread-safety".to_string());
            self.features.add("thread-safety");
            self.diag.note("enabling thread-safety annotations");
        }
    }

    fn configure_execute_external(&mut self) -> Result<()> {
        let internal_default = match self.params.env_var("CXXSUITE_USE_INTERNAL_SHELL") {
            Some(value) => value != "0",
            None => !self.target.use_external_shell_default(),
        };
        let use_internal = self
            .params
            .get_bool("use_internal_shell", internal_default)?;
        self.execute_external = !use_internal;
        Ok(())
    }

    fn configure_ccache(&mut self) -> Result<()> {
        let default = self.params.env_var("CXXSUITE_USE_CCACHE").is_some();
        if self.params.get_bool("use_ccache", default)? {
            // CCACHE_CPP2 keeps comments through preprocessing; the -verify
            // expected-diagnostic comments must survive.
            self.cxx
                .compile_env
                .insert("CCACHE_CPP2".to_string(), "1".to_string());
            self.cxx.use_ccache = true;
            self.diag.note("enabling ccache");
        }
        Ok(())
    }

    fn configure_compile_flags(&mut self) -> Result<()> {
        if !self.params.get_bool("no_default_flags", false)? {
            self.configure_default_compile_flags()?;
        }
        // The support headers are needed even with no_default_flags.
        let support_path = self.src_root.join("test").join("support");
        self.cxx
            .compile_flags
            .push(format!("-I{}", support_path.display()));
        if let Some(extra) = self.params.get_conf("compile_flags") {
            self.cxx.compile_flags.extend(split_shell_words(&extra));
        }
        if self.is_windows() {
            self.cxx
                .compile_flags
                .push("-D_CRT_SECURE_NO_WARNINGS".to_string());
            // windows.h defines min/max macros unless told otherwise.
            self.cxx.compile_flags.push("-DNOMINMAX".to_string());
        }
        Ok(())
    }

    fn configure_default_compile_flags(&mut self) -> Result<()> {
        let std = match self.params.get_conf("std") {
            Some(std) => std,
            None => self.infer_std_dialect()?,
        };
        self.cxx.compile_flags.push(format!("-std={std}"));
        self.features.add(std.replace("gnu++", "c++"));
        self.std_dialect = Some(std);

        self.configure_compile_flags_header_includes()?;
        self.target.add_cxx_compile_flags(&mut self.cxx.compile_flags);
        self.configure_compile_flags_exceptions()?;
        self.configure_compile_flags_rtti()?;
        self.configure_compile_flags_abi_version()?;
        if self.params.get_bool("enable_32bit", false)? {
            self.cxx.flags.push("-m32".to_string());
        }
        // Verbose output gives better failure reports.
        self.cxx.flags.push("-v".to_string());
        if let Some(sysroot) = self.params.get_conf("sysroot") {
            self.cxx.flags.extend(["--sysroot".to_string(), sysroot]);
        }
        if let Some(toolchain) = self.params.get_conf("gcc_toolchain") {
            self.cxx
                .flags
                .extend(["-gcc-toolchain".to_string(), toolchain]);
        }
        // _DEBUG must precede the -target handling: the forced include used
        // by Windows debug builds requires it.
        if self.is_windows() && self.debug_build {
            self.cxx.compile_flags.push("-D_DEBUG".to_string());
        }
        if self.use_target {
            let target_flags = vec!["-target".to_string(), self.target_triple.clone()];
            if !self.cxx.add_flag_if_supported(&target_flags) {
                self.diag
                    .warning("use_target is true but -target is not supported by the compiler");
            }
        }
        if let Some(deployment) = self.deployment.clone() {
            self.cxx
                .flags
                .extend(["-arch".to_string(), deployment.arch]);
            self.cxx.flags.push(format!(
                "-m{}-version-min={}",
                deployment.name, deployment.version
            ));
        }
        if !self.with_availability {
            self.cxx
                .flags
                .push("-D_LIBCPP_DISABLE_AVAILABILITY".to_string());
        }
        Ok(())
    }

    /// Choose the newest language dialect the compiler accepts. Older GCC
    /// releases claim flags their library support cannot back, so they are
    /// filtered up front.
    fn infer_std_dialect(&mut self) -> Result<String> {
        let mut candidates = vec!["c++1z", "c++14", "c++11", "c++03"];
        if self.cxx.kind == Some(CompilerKind::Gcc)
            && let Some(major) = self
                .cxx
                .version
                .as_ref()
                .and_then(CompilerVersion::major_number)
        {
            if major < 7 {
                candidates.retain(|std| *std != "c++1z");
            }
            if major <= 6 {
                candidates.retain(|std| *std != "c++14");
            }
        }
        for std in &candidates {
            if self.cxx.has_compile_flag(&[format!("-std={std}")]) {
                self.diag
                    .note(format!("inferred language dialect as: {std}"));
                return Ok((*std).to_string());
            }
        }
        Err(ConfigError::Fatal(format!(
            "failed to infer a supported language dialect from one of {candidates:?}"
        )))
    }

    fn configure_compile_flags_header_includes(&mut self) -> Result<()> {
        let support_path = self.src_root.join("test").join("support");
        self.configure_config_site_header()?;
        if self.stdlib != StdlibUnderTest::Libstdcxx && !self.is_windows() {
            self.cxx.compile_flags.extend([
                "-include".to_string(),
                support_path.join("nasty_macros.hpp").display().to_string(),
            ]);
        }
        if self.stdlib == StdlibUnderTest::Msvc {
            self.cxx.compile_flags.extend([
                "-include".to_string(),
                support_path
                    .join("msvc_stdlib_force_include.hpp")
                    .display()
                    .to_string(),
            ]);
        }
        if self.is_windows() && self.debug_build && self.stdlib != StdlibUnderTest::Msvc {
            self.cxx.compile_flags.extend([
                "-include".to_string(),
                support_path
                    .join("set_windows_crt_report_mode.h")
                    .display()
                    .to_string(),
            ]);
        }

        let cxx_headers = self.params.get_conf("cxx_headers");
        if cxx_headers.as_deref() == Some("")
            || (cxx_headers.is_none() && self.stdlib != StdlibUnderTest::Libcxx)
        {
            self.diag.note("using the system cxx headers");
            return Ok(());
        }
        self.cxx.compile_flags.push("-nostdinc++".to_string());
        let headers_dir = cxx_headers
            .map(PathBuf::from)
            .unwrap_or_else(|| self.src_root.join("include"));
        if !headers_dir.is_dir() {
            return Err(ConfigError::Fatal(format!(
                "cxx_headers='{}' is not a directory",
                headers_dir.display()
            )));
        }
        self.cxx
            .compile_flags
            .push(format!("-I{}", headers_dir.display()));
        self.cxx_headers = Some(headers_dir);
        if let Some(obj_root) = &self.obj_root {
            let cxxabi_headers = obj_root.join("include").join("c++build");
            if cxxabi_headers.is_dir() {
                self.cxx
                    .compile_flags
                    .push(format!("-I{}", cxxabi_headers.display()));
            }
        }
        Ok(())
    }

    /// Pick up a generated `__config_site` header from the build directory,
    /// turning its macros into features before force-including it.
    fn configure_config_site_header(&mut self) -> Result<()> {
        let Some(obj_root) = self.obj_root.clone() else {
            return Ok(());
        };
        let header = obj_root.join("__config_site");
        if !header.is_file() {
            return Ok(());
        }
        let macro_names = self.parse_config_site_and_add_features(&header)?;
        self.diag.note(format!(
            "using __config_site header {} with macros: {macro_names:?}",
            header.display()
        ));
        self.cxx
            .compile_flags
            .extend(["-include".to_string(), header.display().to_string()]);
        Ok(())
    }

    /// The feature macros are the macro-table difference between a dump with
    /// the header force-included and the plain predefine dump.
    fn parse_config_site_and_add_features(&mut self, header: &Path) -> Result<Vec<String>> {
        let predefined = self.cxx.dump_macros(None, &[], None)?.unwrap_or_default();
        let with_header = self
            .cxx
            .dump_macros(Some(header), &[], None)?
            .unwrap_or_default();
        let mut names = Vec::new();
        for (name, value) in &with_header {
            if predefined.contains_key(name) || name == "_LIBCPP_CONFIG_SITE" {
                continue;
            }
            features::add_config_site_feature(name, value, &mut self.features);
            names.push(name.clone());
        }
        Ok(names)
    }

    fn configure_compile_flags_exceptions(&mut self) -> Result<()> {
        if !self.params.get_bool("enable_exceptions", true)? {
            self.features.add("libcpp-no-exceptions");
            self.cxx.compile_flags.push("-fno-exceptions".to_string());
        }
        Ok(())
    }

    fn configure_compile_flags_rtti(&mut self) -> Result<()> {
        if !self.params.get_bool("enable_rtti", true)? {
            self.features.add("libcpp-no-rtti");
            self.cxx.compile_flags.push("-fno-rtti".to_string());
            self.cxx.compile_flags.push("-D_LIBCPP_NO_RTTI".to_string());
        }
        Ok(())
    }

    fn configure_compile_flags_abi_version(&mut self) -> Result<()> {
        let abi_version = self.params.get_conf_or("abi_version", "");
        let abi_version = abi_version.trim();
        // Only a non-default ABI version is spelled out.
        if !abi_version.is_empty() && abi_version != "1" {
            self.cxx
                .compile_flags
                .push(format!("-D_LIBCPP_ABI_VERSION={abi_version}"));
        }
        if self.params.get_bool("abi_unstable", false)? {
            self.features.add("libcpp-abi-unstable");
            self.cxx
                .compile_flags
                .push("-D_LIBCPP_ABI_UNSTABLE".to_string());
        }
        Ok(())
    }

    fn configure_filesystem_compile_flags(&mut self) -> Result<()> {
        if !self.enable_filesystem()? {
            return Ok(());
        }
        if !self.enable_experimental()? {
            return Err(ConfigError::Fatal(
                "filesystem is enabled but the experimental library is not".to_string(),
            ));
        }
        self.features.add("c++filesystem");
        let static_env = self
            .src_root
            .join("test/std/experimental/filesystem/Inputs/static_test_env");
        self.cxx.add_preprocessor_string_flag(
            "LIBCXX_FILESYSTEM_STATIC_TEST_ROOT",
            Some(&static_env.display().to_string()),
        );
        let dynamic_env = self
            .paths
            .test_exec_root
            .join("filesystem")
            .join("Output")
            .join("dynamic_env");
        std::fs::create_dir_all(&dynamic_env)?;
        let dynamic_str = dynamic_env.display().to_string();
        self.cxx.add_preprocessor_string_flag(
            "LIBCXX_FILESYSTEM_DYNAMIC_TEST_ROOT",
            Some(&dynamic_str),
        );
        self.exec_env
            .insert("LIBCXX_FILESYSTEM_DYNAMIC_TEST_ROOT".to_string(), dynamic_str);
        Ok(())
    }

    fn configure_link_flags(&mut self) -> Result<()> {
        if !self.params.get_bool("no_default_flags", false)? {
            self.configure_link_flags_cxx_library_path();
            self.configure_link_flags_abi_library_path();

            match self.stdlib {
                StdlibUnderTest::Libcxx => {
                    self.cxx.link_flags.push("-nodefaultlibs".to_string());
                    if self.is_windows() {
                        self.cxx.link_flags.push("-nostdlib".to_string());
                    }
                    self.configure_link_flags_cxx_library()?;
                    self.configure_link_flags_abi_library()?;
                    self.configure_extra_library_flags()?;
                }
                StdlibUnderTest::Libstdcxx => {
                    if self.enable_filesystem()? {
                        self.features.add("c++experimental");
                        self.cxx.link_flags.push("-lstdc++fs".to_string());
                    }
                    self.cxx
                        .link_flags
                        .extend(["-lm".to_string(), "-pthread".to_string()]);
                }
                StdlibUnderTest::Msvc => {}
                StdlibUnderTest::CxxDefault => {
                    self.cxx.link_flags.push("-pthread".to_string());
                }
            }
        }
        if let Some(extra) = self.params.get_conf("link_flags") {
            self.cxx.link_flags.extend(split_shell_words(&extra));
        }
        Ok(())
    }

    fn configure_link_flags_cxx_library_path(&mut self) {
        let separator = self.target.path_separator();
        match self.use_system_cxx_lib.clone() {
            SystemCxxLib::No => {
                if let Some(root) = self.cxx_library_root.clone() {
                    self.cxx.link_flags.push(format!("-L{}", root.display()));
                    if self.is_windows() && self.link_shared {
                        add_path(&mut self.cxx.compile_env, &root.display().to_string(), separator);
                    }
                }
                if let Some(root) = self.cxx_runtime_root.clone() {
                    if !self.is_windows() {
                        self.cxx
                            .link_flags
                            .push(format!("-Wl,-rpath,{}", root.display()));
                    } else if self.link_shared {
                        add_path(&mut self.exec_env, &root.display().to_string(), separator);
                    }
                }
            }
            SystemCxxLib::Dir(dir) => {
                self.cxx.link_flags.push(format!("-L{}", dir.display()));
                if !self.is_windows() {
                    self.cxx
                        .link_flags
                        .push(format!("-Wl,-rpath,{}", dir.display()));
                } else if self.link_shared {
                    add_path(&mut self.cxx.compile_env, &dir.display().to_string(), separator);
                }
            }
            SystemCxxLib::Yes => {}
        }
    }

    fn configure_link_flags_abi_library_path(&mut self) {
        let Some(root) = self.params.get_conf("abi_library_path").map(PathBuf::from) else {
            return;
        };
        self.cxx.link_flags.push(format!("-L{}", root.display()));
        if self.is_windows() {
            add_path(
                &mut self.exec_env,
                &root.display().to_string(),
                self.target.path_separator(),
            );
        } else {
            self.cxx
                .link_flags
                .push(format!("-Wl,-rpath,{}", root.display()));
        }
        self.abi_library_root = Some(root);
    }

    fn configure_link_flags_cxx_library(&mut self) -> Result<()> {
        if self.enable_experimental()? {
            self.features.add("c++experimental");
            self.cxx.link_flags.push("-lc++experimental".to_string());
        }
        if self.link_shared {
            self.cxx.link_flags.push("-lc++".to_string());
        } else if let Some(root) = self.params.get_conf("cxx_library_root").map(PathBuf::from) {
            let archive = root.join(self.static_lib_name("c++"));
            if !archive.exists() {
                return Err(ConfigError::Fatal(format!(
                    "static c++ library does not exist: {}",
                    archive.display()
                )));
            }
            self.cxx.link_flags.push(archive.display().to_string());
        } else {
            self.cxx.link_flags.push("-lc++".to_string());
        }
        Ok(())
    }

    fn configure_link_flags_abi_library(&mut self) -> Result<()> {
        let abi = self.params.get_conf_or("cxx_abi", "libcxxabi");
        match abi.as_str() {
            "libstdc++" => self.cxx.link_flags.push("-lstdc++".to_string()),
            "libsupc++" => self.cxx.link_flags.push("-lsupc++".to_string()),
            "libcxxabi" => {
                if self.target.allow_cxxabi_link() {
                    if self.params.get_bool("libcxxabi_shared", true)? {
                        self.cxx.link_flags.push("-lc++abi".to_string());
                    } else if let Some(root) =
                        self.params.get_conf("abi_library_path").map(PathBuf::from)
                    {
                        self.cxx
                            .link_flags
                            .push(root.join(self.static_lib_name("c++abi")).display().to_string());
                    } else {
                        self.cxx.link_flags.push("-lc++abi".to_string());
                    }
                }
            }
            "libcxxrt" => self.cxx.link_flags.push("-lcxxrt".to_string()),
            "vcruntime" => {
                let suffix = if self.debug_build { "d" } else { "" };
                for lib in ["vcruntime", "ucrt", "msvcrt"] {
                    self.cxx.link_flags.push(format!("-l{lib}{suffix}"));
                }
            }
            "none" | "default" => {
                if self.is_windows() {
                    let suffix = if self.debug_build { "d" } else { "" };
                    self.cxx.link_flags.push(format!("-lmsvcrt{suffix}"));
                }
            }
            other => {
                return Err(ConfigError::Fatal(format!(
                    "C++ ABI setting {other} unsupported for tests"
                )));
            }
        }
        Ok(())
    }

    fn configure_extra_library_flags(&mut self) -> Result<()> {
        if self.params.get_bool("cxx_ext_threads", false)? {
            self.cxx
                .link_flags
                .push("-lc++external_threads".to_string());
        }
        self.target.add_cxx_link_flags(&mut self.cxx.link_flags);
        Ok(())
    }

    fn configure_env(&mut self) {
        self.target
            .configure_exec_env(&mut self.exec_env, self.cxx_runtime_root.as_deref());
    }

    fn configure_color_diagnostics(&mut self) -> Result<()> {
        let use_color = self
            .params
            .get_conf("color_diagnostics")
            .or_else(|| self.params.env_var("CXXSUITE_COLOR_DIAGNOSTICS"));
        let Some(value) = use_color else {
            return Ok(());
        };
        if !value.is_empty() {
            return Err(ConfigError::Fatal(format!(
                "invalid value for color_diagnostics '{value}'"
            )));
        }
        let flag = "-fdiagnostics-color=always";
        if self.cxx.has_compile_flag(&[flag.to_string()]) {
            self.cxx.flags.push(flag.to_string());
        } else {
            self.diag.warning(
                "color diagnostics have been requested but are not supported by the compiler",
            );
        }
        Ok(())
    }

    fn configure_debug_mode(&mut self) -> Result<()> {
        let Some(level) = self.params.get_conf("debug_level") else {
            return Ok(());
        };
        if level.is_empty() {
            return Ok(());
        }
        if level != "0" && level != "1" {
            return Err(ConfigError::Fatal(format!(
                "invalid value for debug_level '{level}'"
            )));
        }
        self.cxx
            .compile_flags
            .push(format!("-D_LIBCPP_DEBUG={level}"));
        Ok(())
    }

    fn configure_warnings(&mut self) -> Result<()> {
        // Warnings default on for clang in C++ >= 11 dialects.
        let default = self.cxx.kind.is_some_and(CompilerKind::is_clang)
            && self.features.has_any(&["c++11", "c++14", "c++1z"]);
        self.cxx.use_warnings = self.params.get_bool("enable_warnings", default)?;
        self.cxx.warning_flags.extend([
            "-D_LIBCPP_HAS_NO_PRAGMA_SYSTEM_HEADER".to_string(),
            "-Wall".to_string(),
            "-Wextra".to_string(),
            "-Werror".to_string(),
        ]);
        if self.cxx.has_warning_flag("-Wuser-defined-warnings") {
            self.cxx
                .warning_flags
                .push("-Wuser-defined-warnings".to_string());
            self.features.add("diagnose-if-support");
        }
        for flag in [
            "-Wshadow",
            "-Wno-unused-command-line-argument",
            "-Wno-attributes",
            "-Wno-pessimizing-move",
            "-Wno-c++11-extensions",
            "-Wno-user-defined-literals",
            "-Wno-noexcept-type",
            "-Wsign-compare",
            "-Wunused-variable",
            "-Wunused-parameter",
            "-Wunreachable-code",
            "-Wno-conversion",
            "-Wno-unused-local-typedef",
            "-Wno-#warnings",
        ] {
            self.cxx.add_warning_flag_if_supported(flag);
        }
        if matches!(
            self.params.get_conf("std").as_deref(),
            Some("c++98" | "c++03")
        ) {
            // The static_assert emulation in C++03 leaves an unused local
            // typedef wherever it fires.
            self.cxx
                .add_warning_flag_if_supported("-Wno-unused-local-typedef");
        }
        Ok(())
    }

    fn configure_sanitizer(&mut self) -> Result<()> {
        let san = self.params.get_conf_or("use_sanitizer", "");
        let san = san.trim();
        if san.is_empty() {
            return Ok(());
        }
        self.target.add_sanitizer_features(san, &mut self.features);

        // llvm-symbolizer is looked for beside the compiler first.
        let mut symbolizer_search = self.params.env_var("PATH").unwrap_or_default();
        if let Some(cxx_path) = invoke::which(&self.cxx.path.display().to_string(), None)
            && let Some(dir) = cxx_path.parent()
        {
            symbolizer_search = format!(
                "{}{}{symbolizer_search}",
                dir.display(),
                self.target.path_separator()
            );
        }
        let symbolizer = invoke::which("llvm-symbolizer", Some(&symbolizer_search));

        self.cxx
            .flags
            .extend(["-g".to_string(), "-fno-omit-frame-pointer".to_string()]);
        match san {
            "Address" | "Address;Undefined" | "Undefined;Address" => {
                self.cxx.flags.push("-fsanitize=address".to_string());
                if let Some(symbolizer) = &symbolizer {
                    self.exec_env.insert(
                        "ASAN_SYMBOLIZER_PATH".to_string(),
                        symbolizer.display().to_string(),
                    );
                }
                // ODR detection misfires against the replaced operator new.
                self.exec_env.insert(
                    "ASAN_OPTIONS".to_string(),
                    "detect_odr_violation=0".to_string(),
                );
                self.features.add("asan");
                self.features.add("sanitizer-new-delete");
                self.cxx.compile_flags.push("-O1".to_string());
                if san != "Address" {
                    self.add_ubsan();
                }
            }
            "Memory" | "MemoryWithOrigins" => {
                self.cxx.flags.push("-fsanitize=memory".to_string());
                if san == "MemoryWithOrigins" {
                    self.cxx
                        .compile_flags
                        .push("-fsanitize-memory-track-origins".to_string());
                }
                if let Some(symbolizer) = &symbolizer {
                    self.exec_env.insert(
                        "MSAN_SYMBOLIZER_PATH".to_string(),
                        symbolizer.display().to_string(),
                    );
                }
                self.features.add("msan");
                self.features.add("sanitizer-new-delete");
                self.cxx.compile_flags.push("-O1".to_string());
            }
            "Undefined" => {
                self.add_ubsan();
                self.cxx.compile_flags.push("-O2".to_string());
            }
            "Thread" => {
                self.cxx.flags.push("-fsanitize=thread".to_string());
                self.features.add("tsan");
                self.features.add("sanitizer-new-delete");
            }
            other => {
                return Err(ConfigError::Fatal(format!(
                    "unsupported value for use_sanitizer: {other}"
                )));
            }
        }
        if let Some(san_lib) = self.params.get_conf("sanitizer_library") {
            let dir = Path::new(&san_lib)
                .parent()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default();
            self.cxx.link_flags.push(san_lib);
            self.cxx.link_flags.push(format!("-Wl,-rpath,{dir}"));
        }
        Ok(())
    }

    fn add_ubsan(&mut self) {
        self.cxx.flags.extend([
            "-fsanitize=undefined".to_string(),
            "-fno-sanitize=vptr,function,float-divide-by-zero".to_string(),
            "-fno-sanitize-recover=all".to_string(),
        ]);
        self.exec_env.insert(
            "UBSAN_OPTIONS".to_string(),
            "print_stacktrace=1".to_string(),
        );
        self.features.add("ubsan");
    }

    fn configure_coverage(&mut self) -> Result<()> {
        if self.params.get_bool("generate_coverage", false)? {
            self.cxx
                .flags
                .extend(["-g".to_string(), "--coverage".to_string()]);
            self.cxx.compile_flags.push("-O0".to_string());
        }
        Ok(())
    }

    fn configure_modules(&mut self) -> Result<()> {
        let mut modules_flags = vec!["-fmodules".to_string()];
        if self.target.platform != "darwin" {
            modules_flags.extend([
                "-Xclang".to_string(),
                "-fmodules-local-submodule-visibility".to_string(),
            ]);
        }
        let supported = self.cxx.has_compile_flag(&modules_flags);
        let enable =
            self.params
                .get_bool_env("enable_modules", false, "CXXSUITE_ENABLE_MODULES", &self.diag)?;
        if enable && !supported {
            return Err(ConfigError::Fatal(
                "-fmodules is enabled but not supported by the compiler".to_string(),
            ));
        }
        if !supported {
            return Ok(());
        }
        self.features.add("modules-support");
        // Each run gets a fresh module cache.
        let module_cache = self.paths.test_exec_root.join("modules.cache");
        if module_cache.is_dir() {
            std::fs::remove_dir_all(&module_cache)?;
        }
        std::fs::create_dir_all(&module_cache)?;
        modules_flags.push(format!("-fmodules-cache-path={}", module_cache.display()));
        self.cxx.modules_flags = modules_flags;
        if enable {
            self.features.add("-fmodules");
            self.cxx.set_use_modules(true);
        }
        Ok(())
    }

    fn configure_coroutines(&mut self) -> Result<()> {
        if !self.cxx.has_compile_flag(&["-fcoroutines-ts".to_string()]) {
            return Ok(());
        }
        let flags = vec!["-fcoroutines-ts".to_string()];
        let macros = self.cxx.dump_macros(None, &flags, None)?.unwrap_or_default();
        match macros.get("__cpp_coroutines") {
            None => self
                .diag
                .warning("-fcoroutines-ts is supported but __cpp_coroutines is not defined"),
            Some(value) => {
                // Only a recent feature-test value counts as support.
                let value = value.replace('L', "");
                if value.parse::<u64>().is_ok_and(|v| v >= 201_703) {
                    self.features.add("fcoroutines-ts");
                }
            }
        }
        Ok(())
    }

    fn configure_substitutions(&mut self) {
        let cxx_path = shell_quote(&self.cxx.path.display().to_string());
        let quote_join = |flags: &[String]| {
            flags
                .iter()
                .map(|flag| shell_quote(flag))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let flags_str = quote_join(&self.cxx.flags);
        let compile_flags_str = quote_join(&self.cxx.compile_flags);
        let link_flags_str = quote_join(&self.cxx.link_flags);
        let all_flags = format!("{flags_str} {compile_flags_str} {link_flags_str}");

        let mut sub = Vec::new();
        sub.push(("%cxx".to_string(), cxx_path.clone()));
        // %compile_flags and friends must precede their %compile-style
        // prefixes: substitutions apply in order.
        sub.push(("%flags".to_string(), flags_str.clone()));
        sub.push(("%compile_flags".to_string(), compile_flags_str.clone()));
        sub.push(("%link_flags".to_string(), link_flags_str.clone()));
        sub.push(("%all_flags".to_string(), all_flags.clone()));
        if self.cxx.is_verify_supported() {
            sub.push((
                "%verify".to_string(),
                format!(" {} ", self.cxx.verify_flags.join(" ")),
            ));
        }
        let compile_str = format!("{cxx_path} -o %t.o %s -c {flags_str} {compile_flags_str}");
        let link_str = format!("{cxx_path} -o %t.exe %t.o {flags_str} {link_flags_str}");
        let build_str = format!("{cxx_path} -o %t.exe %s {all_flags}");
        if self.cxx.use_modules {
            sub.push(("%compile_module".to_string(), compile_str.clone()));
            sub.push(("%build_module".to_string(), build_str.clone()));
        } else if !self.cxx.modules_flags.is_empty() {
            let modules_str = self.cxx.modules_flags.join(" ");
            sub.push((
                "%compile_module".to_string(),
                format!("{compile_str} {modules_str}"),
            ));
            sub.push((
                "%build_module".to_string(),
                format!("{build_str} {modules_str}"),
            ));
        }
        sub.push(("%compile".to_string(), compile_str));
        sub.push(("%link".to_string(), link_str));
        sub.push(("%build".to_string(), build_str));
        sub.push(("%run".to_string(), "%t.exe".to_string()));
        self.substitutions = sub;
    }

    fn configure_features(&mut self) -> Result<()> {
        if let Some(additional) = self.params.get_conf("additional_features") {
            for feature in additional.split(',') {
                let feature = feature.trim();
                if !feature.is_empty() {
                    self.features.add(feature);
                }
            }
        }
        self.target.add_locale_features(&mut self.features);

        // with_system_cxx_lib carries the triple (and its components) so
        // known failures against shipped libraries can be marked precisely.
        if self.use_system_cxx_lib.enabled() {
            self.features.add("with_system_cxx_lib");
            self.features
                .add(format!("with_system_cxx_lib={}", self.target_triple));
            for component in self.target_triple.split('-') {
                self.features
                    .add(format!("with_system_cxx_lib={component}"));
            }
            if let Some(deployment) = &self.deployment {
                features::add_deployment_features(
                    "with_system_cxx_lib",
                    deployment,
                    &mut self.features,
                );
            }
        }
        if self.with_availability {
            self.features.add("availability_markup");
            if let Some(deployment) = &self.deployment {
                features::add_deployment_features(
                    "availability_markup",
                    deployment,
                    &mut self.features,
                );
            }
        }
        if self.use_system_cxx_lib.enabled() || self.with_availability {
            self.features.add("availability");
            if let Some(deployment) = &self.deployment {
                features::add_deployment_features("availability", deployment, &mut self.features);
            }
        }

        if self.target.platform == "darwin" {
            self.features.add("apple-darwin");
        }
        self.features.add(self.target.platform.clone());

        self.long_tests = match self.params.get_bool_opt("long_tests")? {
            Some(value) => value,
            None => {
                self.diag.note("inferred long_tests as: true");
                true
            }
        };
        if self.long_tests {
            self.features.add("long_tests");
        }

        features::add_compiler_features(&mut self.cxx, &self.target, &mut self.features)?;

        if self.params.get_bool("has_libatomic", false)? {
            self.features.add("libatomic");
        }
        if self.is_windows() {
            self.features.add("windows");
            if self.stdlib == StdlibUnderTest::Libcxx {
                // Blanket marker used to expect known Windows failures until
                // they are diagnosed individually.
                self.features.add("LIBCXX-WINDOWS-FIXME");
            }
        }
        self.configure_header_features();
        Ok(())
    }

    /// Advertise `header.<name>` features: from a scan of the headers under
    /// test when their directory is known, otherwise from the built-in
    /// always-available subset.
    fn configure_header_features(&mut self) {
        match &self.cxx_headers {
            Some(dir) => {
                let Ok(entries) = std::fs::read_dir(dir) else {
                    return;
                };
                let mut names: Vec<String> = entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().is_file())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .filter(|name| !name.starts_with('.') && name != "__config_site")
                    .collect();
                names.sort();
                for name in names {
                    self.features.add(format!("header.{name}"));
                }
                self.enforce_header_requirements = true;
            }
            None => {
                for header in DEFAULT_HEADER_SUBSET {
                    self.features.add(format!("header.{header}"));
                }
            }
        }
    }

    /// Print the final flag lists, features, and environment additions.
    pub fn print_config_info(&self) {
        for note in self.cxx.config_notes() {
            self.diag.note(note);
        }
        self.diag.note(format!(
            "using available features: {:?}",
            self.features.to_vec()
        ));
        let mut added = BTreeMap::new();
        for (key, value) in &self.exec_env {
            if std::env::var(key).ok().as_deref() != Some(value) {
                added.insert(key.clone(), value.clone());
            }
        }
        self.diag
            .note(format!("adding environment variables: {added:?}"));
    }
}

/// Headers assumed present when the header directory cannot be scanned.
const DEFAULT_HEADER_SUBSET: &[&str] = &[
    "float.h",
    "limits.h",
    "stdarg.h",
    "stddef.h",
    "stdint.h",
    "algorithm",
    "array",
    "atomic",
    "cfloat",
    "ciso646",
    "climits",
    "cstdarg",
    "cstdbool",
    "cstddef",
    "cstdint",
    "cstdlib",
    "initializer_list",
    "limits",
    "memory",
    "new",
    "tuple",
    "type_traits",
    "utility",
];

static TRIPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^-]+)-([^-]+)-([^.]+)([^-]*)(.*)").expect("triple pattern is valid")
});

/// Normalize a `-dumpmachine` triple: drop sub-major version components
/// (feature checks expect exact matches), and complete `redhat-linux` /
/// `suse-linux` triples to their `-gnu` form so GLIBC hosts are identified.
#[must_use]
pub fn normalize_triple(raw: &str) -> String {
    let mut triple = TRIPLE_RE.replace(raw, "${1}-${2}-${3}${5}").into_owned();
    if triple.ends_with("redhat-linux") || triple.ends_with("suse-linux") {
        triple.push_str("-gnu");
    }
    triple
}

/// Prepend a directory to a `PATH`-style environment variable.
pub fn add_path(env: &mut BTreeMap<String, String>, new_path: &str, separator: char) {
    match env.get_mut("PATH") {
        Some(existing) => *existing = format!("{new_path}{separator}{existing}"),
        None => {
            env.insert("PATH".to_string(), new_path.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triple_drops_sub_major_version() {
        assert_eq!(
            normalize_triple("x86_64-apple-darwin14.0.0"),
            "x86_64-apple-darwin14"
        );
    }

    #[test]
    fn triple_keeps_four_part_forms() {
        assert_eq!(
            normalize_triple("x86_64-pc-linux-gnu"),
            "x86_64-pc-linux-gnu"
        );
        assert_eq!(
            normalize_triple("armv7-unknown-linux-gnueabihf"),
            "armv7-unknown-linux-gnueabihf"
        );
    }

    #[test]
    fn triple_completes_redhat_and_suse() {
        assert_eq!(
            normalize_triple("x86_64-redhat-linux"),
            "x86_64-redhat-linux-gnu"
        );
        assert_eq!(normalize_triple("x86_64-suse-linux"), "x86_64-suse-linux-gnu");
    }

    #[test]
    fn stdlib_names_round_trip() {
        for name in ["libc++", "libstdc++", "msvc", "cxx_default"] {
            let stdlib = StdlibUnderTest::from_name(name).expect("known stdlib");
            assert_eq!(stdlib.as_str(), name);
        }
        assert!(StdlibUnderTest::from_name("stlport").is_none());
    }

    #[test]
    fn add_path_prepends_with_separator() {
        let mut env = BTreeMap::new();
        add_path(&mut env, "/first", ':');
        assert_eq!(env["PATH"], "/first");
        add_path(&mut env, "/second", ':');
        assert_eq!(env["PATH"], "/second:/first");
    }

    #[test]
    fn system_cxx_lib_enabled_states() {
        assert!(!SystemCxxLib::No.enabled());
        assert!(SystemCxxLib::Yes.enabled());
        assert!(SystemCxxLib::Dir(PathBuf::from("/lib")).enabled());
    }
}
