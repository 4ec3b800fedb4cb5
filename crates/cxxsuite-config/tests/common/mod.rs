//! Shared scaffolding: a fake C++ compiler driven by shell script, plus a
//! minimal suite tree layout.

use std::path::{Path, PathBuf};

/// Shell script standing in for the compiler under test.
///
/// Behavior:
/// - `-dumpmachine` prints a Linux triple
/// - `-dM` prints a clang 5.0 macro table (plus `__cpp_coroutines` when
///   `-fcoroutines-ts` is on the command line)
/// - `-fmodules` and `-Wuser-defined-warnings` are rejected as unknown
/// - `-Wno-noexcept-type` is reported in stderr during `-Wno-` probes
/// - with `-verify`, the compile succeeds only when a source carries both an
///   `#error` and a matching `expected-error` marker; without `-verify`,
///   sources containing `#error` fail to compile
/// - `-c` copies the source to the output; linking writes a runnable script
///   that exits 1 when the object contains `RUNTIME_FAIL` and 0 otherwise
const FAKE_CXX: &str = r#"#!/bin/sh
mode="link"
dump=0
verify=0
coroutines=0
stdin_input=0
out=""
prev=""
unknown=""
nowarn_bad=""
sources=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; prev=""; continue; fi
  case "$arg" in
    -o) prev="-o" ;;
    -dumpmachine) printf 'x86_64-unknown-linux-gnu\n'; exit 0 ;;
    -dM) dump=1 ;;
    -E) mode="preprocess" ;;
    -c) mode="compile" ;;
    -verify) verify=1 ;;
    -fcoroutines-ts) coroutines=1 ;;
    -fmodules|-Wuser-defined-warnings) unknown="$arg" ;;
    -Wno-noexcept-type) nowarn_bad="$arg" ;;
    -std=c++1z|-std=c++14|-std=c++11|-std=c++03|-std=c++98) : ;;
    -std=*) unknown="$arg" ;;
    -) stdin_input=1 ;;
    -*) : ;;
    *) sources="$sources $arg" ;;
  esac
done

if [ "$dump" = "1" ]; then
  cat <<'EOF'
#define __clang__ 1
#define __clang_major__ 5
#define __clang_minor__ 0
#define __clang_patchlevel__ 0
#define __cpp_if_constexpr 201606
#define __cpp_structured_bindings 201606
#define __cpp_deduction_guides 201703
EOF
  [ "$coroutines" = "1" ] && printf '#define __cpp_coroutines 201703L\n'
  exit 0
fi

if [ -n "$unknown" ]; then
  printf 'error: unknown argument: %s\n' "$unknown" >&2
  exit 1
fi

if [ "$stdin_input" = "1" ]; then
  cat >/dev/null
  printf 'error: #error\n' >&2
  [ -n "$nowarn_bad" ] && printf 'warning: unknown warning option %s\n' "$nowarn_bad" >&2
  exit 1
fi

if [ "$verify" = "1" ]; then
  for src in $sources; do
    [ -f "$src" ] || continue
    if grep -q 'expected-error' "$src" 2>/dev/null && grep -q '#error' "$src" 2>/dev/null; then
      exit 0
    fi
  done
  printf 'error: expected directives not satisfied\n' >&2
  exit 1
fi

for src in $sources; do
  if [ -f "$src" ] && grep -q '#error' "$src" 2>/dev/null; then
    printf '%s: error: #error directive\n' "$src" >&2
    exit 1
  fi
done

if [ -n "$out" ] && [ "$out" != "/dev/null" ]; then
  if [ "$mode" = "compile" ]; then
    : > "$out"
    for src in $sources; do
      [ -f "$src" ] && cat "$src" >> "$out"
    done
    [ -s "$out" ] || printf 'object\n' > "$out"
  elif [ "$mode" = "link" ]; then
    if grep -q 'RUNTIME_FAIL' $sources 2>/dev/null; then
      printf '#!/bin/sh\nexit 1\n' > "$out"
    else
      printf '#!/bin/sh\nexit 0\n' > "$out"
    fi
    chmod +x "$out"
  fi
fi
exit 0
"#;

/// Write the fake compiler into `dir` and return its path.
pub fn write_fake_cxx(dir: &Path) -> PathBuf {
    let path = dir.join("fake-cxx");
    std::fs::write(&path, FAKE_CXX).expect("write fake compiler");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("mark fake compiler executable");
    }
    path
}

/// Lay out a minimal suite source tree: `test/support`, an `include`
/// directory with the given headers, and return the suite root.
pub fn write_suite_tree(dir: &Path, headers: &[&str]) -> PathBuf {
    let root = dir.join("suite");
    let support = root.join("test").join("support");
    std::fs::create_dir_all(&support).expect("create support dir");
    // Force-included by the default compile flags, so it has to exist.
    std::fs::write(
        support.join("nasty_macros.hpp"),
        "#define NASTY_MACRO(x) x\n",
    )
    .expect("write support header");
    let include = root.join("include");
    std::fs::create_dir_all(&include).expect("create include dir");
    for header in headers {
        std::fs::write(include.join(header), "// header under test\n").expect("write header");
    }
    root
}
