//! Capability probes: ask the compiler whether it understands a flag by
//! invoking it and inspecting the exit code.

use crate::compiler::CxxCompiler;
use crate::invoke::{self, devnull};

impl CxxCompiler {
    /// Probe a candidate flag set by compiling the bit bucket. When the
    /// compiler family is known, `-Werror -fsyntax-only` is appended so an
    /// unrecognized flag forces a nonzero exit.
    #[must_use]
    pub fn has_compile_flag(&self, candidate: &[String]) -> bool {
        let mut flags = candidate.to_vec();
        if self.kind.is_some() {
            flags.push("-Werror".to_string());
            flags.push("-fsyntax-only".to_string());
        }
        let null_source = devnull().display().to_string();
        match self.compile(&[null_source], Some(devnull()), &flags, None) {
            Ok(run) => run.success(),
            Err(_) => false,
        }
    }

    /// Probe and append to the always-flags on success.
    pub fn add_flag_if_supported(&mut self, candidate: &[String]) -> bool {
        if self.has_compile_flag(candidate) {
            self.flags.extend(candidate.iter().cloned());
            true
        } else {
            false
        }
    }

    /// Probe and append to the compile flags on success.
    pub fn add_compile_flag_if_supported(&mut self, candidate: &[String]) -> bool {
        if self.has_compile_flag(candidate) {
            self.compile_flags.extend(candidate.iter().cloned());
            true
        } else {
            false
        }
    }

    /// Probe a warning flag. `-Wno-<warning>` flags need special handling:
    /// GCC only diagnoses an unknown `-Wno-` flag when another error fires,
    /// so we compile `#error` from stdin under `-Werror <flag>` and treat the
    /// flag as unsupported iff its name shows up in stderr.
    #[must_use]
    pub fn has_warning_flag(&self, flag: &str) -> bool {
        debug_assert!(flag.starts_with("-W"));
        if !flag.starts_with("-Wno-") {
            return self.has_compile_flag(&[flag.to_string()]);
        }
        let mut probe = self.clone();
        probe.use_warnings = false;
        let flags = vec!["-Werror".to_string(), flag.to_string()];
        let mut cmd = probe.compile_cmd(&["-".to_string()], Some(devnull()), &flags);
        // -v would echo the invocation into the error output we grep.
        cmd.retain(|arg| arg != "-v");
        match invoke::run_command(&cmd, Some(&self.compile_env), None, Some(b"#error\n")) {
            Ok(run) => {
                debug_assert!(!run.success());
                !run.stderr.contains(flag)
            }
            Err(_) => false,
        }
    }

    /// Probe a warning flag and append it (deduplicated) on success.
    pub fn add_warning_flag_if_supported(&mut self, flag: &str) -> bool {
        if self.has_warning_flag(flag) {
            if !self.warning_flags.iter().any(|existing| existing == flag) {
                self.warning_flags.push(flag.to_string());
            }
            true
        } else {
            false
        }
    }

    /// Whether the compiler supports clang's `-verify` diagnostic checking.
    /// The probe result is cached; a successful probe installs the verify
    /// flag list.
    pub fn is_verify_supported(&mut self) -> bool {
        if let Some(cached) = self.verify_supported {
            return cached;
        }
        let supported = self.has_compile_flag(&[
            "-Xclang".to_string(),
            "-verify-ignore-unexpected".to_string(),
        ]);
        if supported {
            self.verify_flags = vec![
                "-Xclang".to_string(),
                "-verify".to_string(),
                "-Xclang".to_string(),
                "-verify-ignore-unexpected=note".to_string(),
                "-ferror-limit=1024".to_string(),
            ];
        }
        self.verify_supported = Some(supported);
        supported
    }

    pub fn set_use_verify(&mut self, value: bool) {
        debug_assert!(!value || !self.verify_flags.is_empty());
        self.use_verify = value;
    }

    pub fn set_use_modules(&mut self, value: bool) {
        debug_assert!(!value || !self.modules_flags.is_empty());
        self.use_modules = value;
    }
}
