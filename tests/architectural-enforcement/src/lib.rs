//! Architectural Enforcement Integration Tests
//!
//! Source-level checks over `dockwire/core/src`:
//! - No stdout/stderr printing from library code (use `tracing`)
//! - No blocking sleeps or blocking sockets inside the async transport
//! - No subprocesses: SSH runs in-process, never through an `ssh` binary
//!
//! Test modules (everything from the first `#[cfg(test)]` on) and comment
//! lines are exempt.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Root of the core crate's sources
#[must_use]
pub fn core_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../dockwire/core/src")
}

/// Every `.rs` file under `root`
#[must_use]
pub fn source_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Non-comment lines above the file's test module, with 1-based numbers
#[must_use]
pub fn production_lines(contents: &str) -> Vec<(usize, &str)> {
    contents
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(i, line)| (i + 1, line))
        .collect()
}

/// `path:line: text` for each production line containing any of `needles`
#[must_use]
pub fn find_violations(root: &Path, needles: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();
    for path in source_files(root) {
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        for (number, line) in production_lines(&contents) {
            if needles.iter().any(|needle| line.contains(needle)) {
                violations.push(format!("{}:{}: {}", path.display(), number, line.trim()));
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_clean(needles: &[&str], rule: &str) {
        let root = core_src_dir();
        assert!(
            !source_files(&root).is_empty(),
            "no sources found under {}",
            root.display()
        );
        let violations = find_violations(&root, needles);
        assert!(
            violations.is_empty(),
            "{rule}:\n{}",
            violations.join("\n")
        );
    }

    #[test]
    fn test_no_printing_in_library_code() {
        assert_clean(
            &["println!", "eprintln!", "print!(", "dbg!("],
            "library code must log through tracing",
        );
    }

    #[test]
    fn test_no_blocking_calls() {
        assert_clean(
            &["std::thread::sleep", "thread::sleep(", "std::net::", "block_on("],
            "transport code must stay on tokio",
        );
    }

    #[test]
    fn test_no_subprocesses() {
        assert_clean(
            &["std::process::Command", "tokio::process", "Command::new("],
            "SSH runs in-process",
        );
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// println!(\"doc\")\nfn b() {}\n#[cfg(test)]\nmod tests { fn c() { println!(); } }\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}"), (3, "fn b() {}")]);
    }
}
