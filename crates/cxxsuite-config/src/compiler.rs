//! Compiler-under-test wrapper: flag roles, command assembly, invocation.
//!
//! A [`CxxCompiler`] holds the compiler path, six flag lists with fixed
//! roles, and the environment used for child processes. Command assembly
//! follows a strict ordering so the same wrapper serves preprocessing,
//! compilation, linking, and combined builds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::diag::Diag;
use crate::error::{ConfigError, Result};
use crate::invoke::{self, devnull};
use crate::params::ParamResolver;

/// Compilation mode selecting which flag roles apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Compile and link in one invocation.
    Default,
    /// Preprocess only (`-E`).
    Preprocess,
    /// Compile to an object file (`-c`).
    Compile,
    /// Link existing objects.
    Link,
}

/// Detected compiler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerKind {
    Clang,
    AppleClang,
    Gcc,
}

impl CompilerKind {
    /// Stable name used in feature strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clang => "clang",
            Self::AppleClang => "apple-clang",
            Self::Gcc => "gcc",
        }
    }

    #[must_use]
    pub const fn is_clang(self) -> bool {
        matches!(self, Self::Clang | Self::AppleClang)
    }
}

/// Compiler version triple as reported by the predefined macros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerVersion {
    pub major: String,
    pub minor: String,
    pub patchlevel: String,
}

impl CompilerVersion {
    #[must_use]
    pub fn major_number(&self) -> Option<u32> {
        self.major.parse().ok()
    }
}

/// One compiler invocation: the assembled command line and what it produced.
#[derive(Debug, Clone)]
pub struct CompilerInvocation {
    pub cmd: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CompilerInvocation {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Render a failure report: command, exit code, captured output.
    #[must_use]
    pub fn report(&self) -> String {
        let cmd = self
            .cmd
            .iter()
            .map(|part| invoke::shell_quote(part))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "Command: {cmd}\nExit code: {}\nStandard output:\n--\n{}--\nStandard error:\n--\n{}--\n",
            self.exit_code, self.stdout, self.stderr
        )
    }
}

/// The compiler under test.
#[derive(Debug, Clone)]
pub struct CxxCompiler {
    pub path: PathBuf,
    /// Flags applied in every mode.
    pub flags: Vec<String>,
    /// Flags applied when compiling or preprocessing.
    pub compile_flags: Vec<String>,
    /// Flags applied when linking.
    pub link_flags: Vec<String>,
    /// Warning flags, applied when compiling and `use_warnings` is on.
    pub warning_flags: Vec<String>,
    /// Diagnostic-verification flags, applied when `use_verify` is on.
    pub verify_flags: Vec<String>,
    /// Modules flags, applied when `use_modules` is on.
    pub modules_flags: Vec<String>,
    pub use_verify: bool,
    pub use_modules: bool,
    pub use_ccache: bool,
    pub use_warnings: bool,
    /// Environment for compiler child processes.
    pub compile_env: BTreeMap<String, String>,
    pub kind: Option<CompilerKind>,
    pub version: Option<CompilerVersion>,
    pub(crate) verify_supported: Option<bool>,
}

impl CxxCompiler {
    /// Wrap a compiler binary, detecting its family and version by dumping
    /// the predefined macros.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        let mut cxx = Self::with_identity(path, None, None);
        cxx.detect_identity();
        cxx
    }

    /// Wrap a compiler binary with a known identity, skipping detection.
    #[must_use]
    pub fn with_identity(
        path: PathBuf,
        kind: Option<CompilerKind>,
        version: Option<CompilerVersion>,
    ) -> Self {
        Self {
            path,
            flags: Vec::new(),
            compile_flags: Vec::new(),
            link_flags: Vec::new(),
            warning_flags: Vec::new(),
            verify_flags: Vec::new(),
            modules_flags: Vec::new(),
            use_verify: false,
            use_modules: false,
            use_ccache: false,
            use_warnings: false,
            compile_env: std::env::vars().collect(),
            kind,
            version,
            verify_supported: None,
        }
    }

    /// Detect the compiler family and version from its predefined macros.
    /// A compiler that cannot be identified keeps `kind = None`.
    pub fn detect_identity(&mut self) {
        let Ok(Some(macros)) = self.dump_macros(None, &[], None) else {
            return;
        };
        if macros.contains_key("__clang__") {
            self.kind = Some(if macros.contains_key("__apple_build_version__") {
                CompilerKind::AppleClang
            } else {
                CompilerKind::Clang
            });
            self.version = version_from_macros(
                &macros,
                "__clang_major__",
                "__clang_minor__",
                "__clang_patchlevel__",
            );
        } else if macros.contains_key("__GNUC__") {
            self.kind = Some(CompilerKind::Gcc);
            self.version =
                version_from_macros(&macros, "__GNUC__", "__GNUC_MINOR__", "__GNUC_PATCHLEVEL__");
        }
    }

    /// Assemble a command line. Ordering is fixed: output, input language,
    /// sources, mode selector, always-flags, verify flags, modules flags,
    /// compile flags + warnings, link flags, per-call extras.
    #[must_use]
    pub fn basic_cmd(
        &self,
        sources: &[String],
        out: Option<&Path>,
        mode: CompileMode,
        extra_flags: &[String],
        input_is_cxx: bool,
    ) -> Vec<String> {
        let mut cmd = Vec::new();
        if self.use_ccache && mode != CompileMode::Link && mode != CompileMode::Preprocess {
            cmd.push("ccache".to_string());
        }
        cmd.push(self.path.display().to_string());
        if let Some(out) = out {
            cmd.push("-o".to_string());
            cmd.push(out.display().to_string());
        }
        if input_is_cxx {
            cmd.push("-x".to_string());
            cmd.push("c++".to_string());
        }
        cmd.extend(sources.iter().cloned());
        match mode {
            CompileMode::Preprocess => cmd.push("-E".to_string()),
            CompileMode::Compile => cmd.push("-c".to_string()),
            CompileMode::Default | CompileMode::Link => {}
        }
        cmd.extend(self.flags.iter().cloned());
        if self.use_verify {
            debug_assert!(matches!(mode, CompileMode::Default | CompileMode::Compile));
            cmd.extend(self.verify_flags.iter().cloned());
        }
        if self.use_modules {
            cmd.extend(self.modules_flags.iter().cloned());
        }
        if mode != CompileMode::Link {
            cmd.extend(self.compile_flags.iter().cloned());
            if self.use_warnings {
                cmd.extend(self.warning_flags.iter().cloned());
            }
        }
        if mode != CompileMode::Preprocess && mode != CompileMode::Compile {
            cmd.extend(self.link_flags.iter().cloned());
        }
        cmd.extend(extra_flags.iter().cloned());
        cmd
    }

    #[must_use]
    pub fn preprocess_cmd(
        &self,
        sources: &[String],
        out: Option<&Path>,
        flags: &[String],
    ) -> Vec<String> {
        self.basic_cmd(sources, out, CompileMode::Preprocess, flags, true)
    }

    #[must_use]
    pub fn compile_cmd(
        &self,
        sources: &[String],
        out: Option<&Path>,
        flags: &[String],
    ) -> Vec<String> {
        self.basic_cmd(sources, out, CompileMode::Compile, flags, true)
    }

    #[must_use]
    pub fn link_cmd(&self, sources: &[String], out: Option<&Path>, flags: &[String]) -> Vec<String> {
        self.basic_cmd(sources, out, CompileMode::Link, flags, false)
    }

    #[must_use]
    pub fn compile_link_cmd(
        &self,
        sources: &[String],
        out: Option<&Path>,
        flags: &[String],
    ) -> Vec<String> {
        self.basic_cmd(sources, out, CompileMode::Default, flags, false)
    }

    pub(crate) fn run(
        &self,
        cmd: Vec<String>,
        cwd: Option<&Path>,
        stdin_data: Option<&[u8]>,
    ) -> Result<CompilerInvocation> {
        let output = invoke::run_command(&cmd, Some(&self.compile_env), cwd, stdin_data)?;
        Ok(CompilerInvocation {
            cmd,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    }

    pub fn preprocess(
        &self,
        sources: &[String],
        out: Option<&Path>,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<CompilerInvocation> {
        self.run(self.preprocess_cmd(sources, out, flags), cwd, None)
    }

    pub fn compile(
        &self,
        sources: &[String],
        out: Option<&Path>,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<CompilerInvocation> {
        self.run(self.compile_cmd(sources, out, flags), cwd, None)
    }

    pub fn link(
        &self,
        sources: &[String],
        out: Option<&Path>,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<CompilerInvocation> {
        self.run(self.link_cmd(sources, out, flags), cwd, None)
    }

    pub fn compile_link(
        &self,
        sources: &[String],
        out: Option<&Path>,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<CompilerInvocation> {
        self.run(self.compile_link_cmd(sources, out, flags), cwd, None)
    }

    /// Compile to an object file, then link it. When no object path is given
    /// a temporary file is used and removed afterwards. A failing compile
    /// short-circuits; the combined command joins both invocations.
    pub fn compile_link_two_steps(
        &self,
        source: &str,
        out: &Path,
        object_file: Option<&Path>,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<CompilerInvocation> {
        let temp;
        let object_path: &Path = match object_file {
            Some(path) => path,
            None => {
                temp = tempfile::Builder::new().suffix(".o").tempfile()?;
                temp.path()
            }
        };
        let compile = self.compile(&[source.to_string()], Some(object_path), flags, cwd)?;
        if !compile.success() {
            return Ok(compile);
        }
        let link = self.link(
            &[object_path.display().to_string()],
            Some(out),
            flags,
            cwd,
        )?;
        let mut cmd = compile.cmd;
        cmd.push("&&".to_string());
        cmd.extend(link.cmd.iter().cloned());
        Ok(CompilerInvocation {
            cmd,
            stdout: compile.stdout + &link.stdout,
            stderr: compile.stderr + &link.stderr,
            exit_code: link.exit_code,
        })
    }

    /// Dump the preprocessor macro table (`-dM`), over the bit bucket when no
    /// source is given. `None` when the preprocessor exits nonzero.
    pub fn dump_macros(
        &self,
        source: Option<&Path>,
        flags: &[String],
        cwd: Option<&Path>,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let source = source.map_or_else(
            || devnull().display().to_string(),
            |path| path.display().to_string(),
        );
        let mut all_flags = vec!["-dM".to_string()];
        all_flags.extend(flags.iter().cloned());
        let run = self.preprocess(&[source], None, &all_flags, cwd)?;
        if !run.success() {
            return Ok(None);
        }
        Ok(Some(parse_macro_dump(&run.stdout)))
    }

    /// Query the compiler's default target triple (`-dumpmachine`).
    pub fn query_triple(&self) -> Result<String> {
        let mut cmd = vec![self.path.display().to_string()];
        cmd.extend(self.flags.iter().cloned());
        cmd.push("-dumpmachine".to_string());
        Ok(invoke::capture_stdout(&cmd)?.trim().to_string())
    }

    /// Append `-DNAME` or `-DNAME="value"` to the compile flags.
    pub fn add_preprocessor_string_flag(&mut self, name: &str, value: Option<&str>) {
        match value {
            None => self.compile_flags.push(format!("-D{name}")),
            Some(value) => self.compile_flags.push(format!("-D{name}=\"{value}\"")),
        }
    }

    /// Config printout lines for [`crate::Configuration::print_config_info`].
    #[must_use]
    pub fn config_notes(&self) -> Vec<String> {
        let mut notes = vec![
            format!("using compiler: {}", self.path.display()),
            format!("using flags: {:?}", self.flags),
        ];
        if self.use_modules {
            notes.push(format!("using modules flags: {:?}", self.modules_flags));
        }
        notes.push(format!("using compile flags: {:?}", self.compile_flags));
        if !self.warning_flags.is_empty() {
            notes.push(format!("using warnings: {:?}", self.warning_flags));
        }
        notes.push(format!("using link flags: {:?}", self.link_flags));
        notes
    }
}

/// Parse `-dM` preprocessor output into a macro table. Values may be empty.
#[must_use]
pub fn parse_macro_dump(output: &str) -> BTreeMap<String, String> {
    let mut macros = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("#define ") else {
            continue;
        };
        match rest.split_once(' ') {
            Some((name, value)) => macros.insert(name.to_string(), value.to_string()),
            None => macros.insert(rest.to_string(), String::new()),
        };
    }
    macros
}

fn version_from_macros(
    macros: &BTreeMap<String, String>,
    major: &str,
    minor: &str,
    patchlevel: &str,
) -> Option<CompilerVersion> {
    Some(CompilerVersion {
        major: macros.get(major)?.clone(),
        minor: macros.get(minor)?.clone(),
        patchlevel: macros.get(patchlevel)?.clone(),
    })
}

/// Build the compiler-under-test from the resolved parameters.
///
/// When `cxx_under_test` is missing (or names `clang-cl`), a `clang++` found
/// on the search path substitutes for it; failing that is fatal. A `clang-cl`
/// wrapper picks up `-isystem`/`-L` entries from the `INCLUDE`/`LIB`
/// environment variables, and `LIB` directories join the execution `PATH`.
pub fn make_compiler(
    params: &ParamResolver,
    diag: &Diag,
    exec_env: &mut BTreeMap<String, String>,
    path_separator: char,
) -> Result<CxxCompiler> {
    let cxx_path = params.get_conf("cxx_under_test").map(PathBuf::from);
    let is_clang_cl = cxx_path.as_deref().is_some_and(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name == "clang-cl.exe" || name == "clang-cl")
    });

    let resolved = if cxx_path.is_none() || is_clang_cl {
        let search_paths = match cxx_path.as_deref() {
            Some(path) if path.is_absolute() => {
                path.parent().map(|dir| dir.display().to_string())
            }
            _ => params.env_var("PATH"),
        };
        match invoke::which("clang++", search_paths.as_deref()) {
            Some(found) => {
                diag.note(format!("inferred cxx_under_test as: {}", found.display()));
                Some(found)
            }
            None if is_clang_cl => {
                return Err(ConfigError::Fatal(
                    "failed to find clang++ substitution for clang-cl".to_string(),
                ));
            }
            None => cxx_path,
        }
    } else {
        cxx_path
    };

    let Some(path) = resolved else {
        return Err(ConfigError::Fatal(
            "must specify parameter cxx_under_test (e.g. --param cxx_under_test=clang++)"
                .to_string(),
        ));
    };

    if is_clang_cl {
        let split_env = |var: &str| -> Vec<String> {
            params
                .env_var(var)
                .unwrap_or_default()
                .split(';')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(String::from)
                .collect()
        };
        let mut cxx = CxxCompiler::new(path);
        for dir in split_env("INCLUDE") {
            cxx.compile_flags.extend(["-isystem".to_string(), dir]);
        }
        for dir in split_env("LIB") {
            cxx.link_flags.extend(["-L".to_string(), dir.clone()]);
            crate::config::add_path(exec_env, &dir, path_separator);
        }
        Ok(cxx)
    } else {
        Ok(CxxCompiler::new(path))
    }
}
