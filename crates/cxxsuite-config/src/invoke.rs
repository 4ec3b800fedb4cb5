//! Subprocess plumbing: synchronous command execution, lookup, quoting.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{ConfigError, Result};

/// Captured output of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command to completion, capturing stdout and stderr.
///
/// When `env` is given the child sees exactly that environment; otherwise it
/// inherits ours. `stdin_data` is written to the child's stdin when present.
pub fn run_command(
    argv: &[String],
    env: Option<&BTreeMap<String, String>>,
    cwd: Option<&Path>,
    stdin_data: Option<&[u8]>,
) -> Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ConfigError::Fatal("empty command line".to_string()))?;
    let mut command = Command::new(program);
    command.args(args);
    if let Some(env) = env {
        command.env_clear();
        command.envs(env);
    }
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command.spawn().map_err(|source| ConfigError::Spawn {
        program: program.clone(),
        source,
    })?;
    if let Some(data) = stdin_data
        && let Some(mut stdin) = child.stdin.take()
    {
        // The child may exit before draining stdin; a broken pipe is fine.
        let _ = stdin.write_all(data);
    }
    let output = child.wait_with_output().map_err(|source| ConfigError::Spawn {
        program: program.clone(),
        source,
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Run a command and return its stdout; a nonzero exit is an error.
pub fn capture_stdout(argv: &[String]) -> Result<String> {
    let output = run_command(argv, None, None, None)?;
    if !output.success() {
        return Err(ConfigError::Fatal(format!(
            "command '{}' exited with code {}: {}",
            argv.join(" "),
            output.exit_code,
            output.stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// Locate an executable on a search path (defaults to `$PATH`).
#[must_use]
pub fn which(name: &str, search_path: Option<&str>) -> Option<PathBuf> {
    let name_path = Path::new(name);
    if name_path.is_absolute() || name.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(name_path).then(|| name_path.to_path_buf());
    }
    let raw = match search_path {
        Some(paths) => paths.to_string(),
        None => std::env::var("PATH").ok()?,
    };
    for dir in std::env::split_paths(&raw) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// The platform's bit-bucket path, used as probe input and output.
#[must_use]
pub fn devnull() -> &'static Path {
    if cfg!(windows) {
        Path::new("NUL")
    } else {
        Path::new("/dev/null")
    }
}

/// Quote a string for inclusion in a shell command line.
#[must_use]
pub fn shell_quote(raw: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !raw.is_empty() && raw.chars().all(safe) {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\'', "'\"'\"'"))
}

/// Split a flag string into words, honoring quotes and backslash escapes.
#[must_use]
pub fn split_shell_words(raw: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for inner in chars.by_ref() {
                    if inner == '\'' {
                        break;
                    }
                    current.push(inner);
                }
            }
            '"' => {
                in_word = true;
                while let Some(inner) = chars.next() {
                    match inner {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                if !matches!(escaped, '"' | '\\' | '$' | '`') {
                                    current.push('\\');
                                }
                                current.push(escaped);
                            }
                        }
                        _ => current.push(inner),
                    }
                }
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                    in_word = true;
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
