use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use tokio::process::Command;
use walkdir::WalkDir;
use which::which;

use crate::probe::{classify_path, FileKind};

/// Executables the sandbox will spawn. Everything else is substituted with
/// plain `ls` and never executed.
const SHELL_ALLOWLIST: &[&str] = &["ls", "pwd", "whoami"];

const SHELL_TIMEOUT: Duration = Duration::from_secs(5);
const READ_PREVIEW_CHARS: usize = 200;
const MAX_PATTERN_CHARS: usize = 100;
const MAX_LINE_CHARS: usize = 100;
const MAX_FILES_VISITED: usize = 50;
const ERROR_DETAIL_CHARS: usize = 100;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Extract a single valid tool request from advisory text. The dispatcher is
/// not trusted: anything off-grammar falls back to the safe default.
pub fn parse_tool_request(raw: &str) -> String {
    for line in raw.lines() {
        let line = line.trim();
        if line.starts_with("read_text:")
            || line.starts_with("describe_binary:")
            || line.starts_with("search_text:")
        {
            return line.to_string();
        }
        if SHELL_ALLOWLIST.contains(&line) {
            return line.to_string();
        }
        if let Some(dir) = line.strip_prefix("ls ") {
            // Keep `ls <dir>` on-grammar only while it cannot leave the sandbox.
            if !dir.contains("..") {
                return line.to_string();
            }
        }
    }
    "ls".to_string()
}

/// Run one tool request inside `root` and encode the outcome as a single
/// tagged result string. The tag prefix is the sole success signal consumed
/// downstream; nothing here panics or propagates errors.
pub async fn execute(raw_request: &str, root: &Path) -> String {
    let requested = parse_tool_request(raw_request);

    if let Some(file) = requested.strip_prefix("read_text:") {
        let file = file.trim();
        return match fs::read_to_string(root.join(file)) {
            Ok(content) => format!(
                "SUCCESS: Read text file {} - {}...",
                file,
                truncate_chars(&content, READ_PREVIEW_CHARS)
            ),
            Err(e) => failed(&requested, &e.to_string()),
        };
    }

    if let Some(file) = requested.strip_prefix("describe_binary:") {
        let file = file.trim();
        return match fs::metadata(root.join(file)) {
            Ok(md) => {
                let ext = file
                    .rsplit_once('.')
                    .map(|(_, e)| e.to_ascii_lowercase())
                    .unwrap_or_else(|| "unknown".to_string());
                let description = if ext == "db" {
                    format!(
                        "SQLite database file, Size: {} bytes, Purpose: agent memory storage",
                        md.len()
                    )
                } else {
                    format!("Binary file ({}), Size: {} bytes", ext, md.len())
                };
                format!("SUCCESS: {}", description)
            }
            Err(e) => failed(&requested, &e.to_string()),
        };
    }

    if let Some(rest) = requested.strip_prefix("search_text:") {
        let parts: Vec<&str> = rest.splitn(3, ':').collect();
        if parts.len() < 3 {
            return "FAILED: Invalid search_text format".to_string();
        }
        let Ok(max_results) = parts[2].trim().parse::<i64>() else {
            return "FAILED: Invalid search_text format".to_string();
        };
        let max_results = max_results.clamp(1, crate::plan::MAX_RESULTS_CAP) as usize;
        return match search_text_bounded(parts[0], parts[1], max_results, root) {
            Ok(summary) => format!("SUCCESS: {}", summary),
            Err(msg) => format!("FAILED: {}", msg),
        };
    }

    // Allow-listed shell tokens; anything else degrades to plain `ls`.
    match shell_argv(&requested) {
        Some(argv) => match run_allowlisted(&argv, root).await {
            Ok(stdout) => format!("SUCCESS: {} - {}", requested, stdout),
            Err(e) => failed(&requested, &e),
        },
        None => {
            warn!("unrecognized tool request {:?}, substituting ls", requested);
            match run_allowlisted(&["ls".to_string()], root).await {
                Ok(stdout) => format!("FALLBACK: Used ls instead - {}", stdout),
                Err(e) => failed("ls", &e),
            }
        }
    }
}

fn failed(requested: &str, detail: &str) -> String {
    format!(
        "FAILED: {} - {}",
        requested,
        truncate_chars(detail, ERROR_DETAIL_CHARS)
    )
}

fn shell_argv(request: &str) -> Option<Vec<String>> {
    if SHELL_ALLOWLIST.contains(&request) {
        return Some(vec![request.to_string()]);
    }
    if let Some(dir) = request.strip_prefix("ls ") {
        let dir = dir.trim();
        if !dir.is_empty() && !dir.contains("..") {
            return Some(vec!["ls".to_string(), dir.to_string()]);
        }
    }
    None
}

/// Spawn an allow-listed program with an explicit argument vector. No shell
/// is ever involved, so there is nothing to inject into.
async fn run_allowlisted(argv: &[String], root: &Path) -> Result<String, String> {
    let program = &argv[0];
    which(program).map_err(|_| format!("binary `{}` not on PATH", program))?;

    let output = tokio::time::timeout(
        SHELL_TIMEOUT,
        Command::new(program)
            .args(&argv[1..])
            .current_dir(root)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| format!("timed out after {}s", SHELL_TIMEOUT.as_secs()))?
    .map_err(|e| e.to_string())?;

    if output.status.success() {
        info!("ran {:?}", argv);
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(format!(
            "exit status {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Resolve `path` against `root`, refusing anything that lands outside it.
/// `..` segments were already rejected, so the check is lexical.
fn resolve_within(root: &Path, path: &str) -> Option<PathBuf> {
    let p = Path::new(path);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    };
    abs.starts_with(root).then_some(abs)
}

/// Case-insensitive substring search with hard caps on pattern size, files
/// visited, matches returned, and reported line length. Input validation
/// happens before any filesystem access.
fn search_text_bounded(
    pattern: &str,
    path: &str,
    max_results: usize,
    root: &Path,
) -> Result<String, String> {
    if pattern.is_empty() || pattern.chars().count() > MAX_PATTERN_CHARS {
        return Err("Invalid pattern".to_string());
    }
    if path.is_empty() || path.contains("..") {
        return Err("Invalid path".to_string());
    }
    let Some(abs) = resolve_within(root, path) else {
        return Err("Path outside working directory".to_string());
    };

    let needle = pattern.to_lowercase();
    let mut results: Vec<String> = Vec::new();
    let mut files_checked = 0usize;

    if abs.is_file() {
        if classify_path(&abs) == FileKind::Text {
            scan_file(&abs, path, &needle, max_results, &mut results);
        }
    } else {
        for entry in WalkDir::new(&abs)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.path().file_name().and_then(|s| s.to_str()).unwrap_or("");
                let hidden = name.starts_with('.') && e.depth() > 0;
                !hidden && name != "target" && name != "node_modules"
            })
            .filter_map(Result::ok)
        {
            if files_checked >= MAX_FILES_VISITED || results.len() >= max_results {
                break;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            if classify_path(entry.path()) != FileKind::Text {
                continue;
            }
            files_checked += 1;
            let display = entry.path().display().to_string();
            scan_file(entry.path(), &display, &needle, max_results, &mut results);
        }
    }

    if results.is_empty() {
        return Ok(format!("No matches found for '{}'", pattern));
    }

    let mut summary = format!("Found {} matches", results.len());
    if results.len() >= max_results {
        summary.push_str(&format!(" (limited to {})", max_results));
    }
    if files_checked >= MAX_FILES_VISITED {
        summary.push_str(&format!(" (searched {} files)", MAX_FILES_VISITED));
    }
    Ok(format!("{}:\n{}", summary, results.join("\n")))
}

fn scan_file(
    path: &Path,
    display: &str,
    needle_lower: &str,
    max_results: usize,
    results: &mut Vec<String>,
) {
    // Unreadable or non-UTF-8 files are skipped, not fatal.
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    for (line_num, line) in content.lines().enumerate() {
        if results.len() >= max_results {
            break;
        }
        if line.to_lowercase().contains(needle_lower) {
            results.push(format!(
                "{}:{}:{}",
                display,
                line_num + 1,
                truncate_chars(line.trim(), MAX_LINE_CHARS)
            ));
        }
    }
}
