use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

/// Sentinel returned whenever grounding cannot complete. The planner still
/// receives a usable (if empty) picture of the environment.
pub const PROBE_FAILED: &str = "Environment inspection failed";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Extensions treated as binary; everything else is text.
const BINARY_EXTENSIONS: &[&str] = &[
    "db", "sqlite", "bin", "exe", "so", "dylib", "dll", "jpg", "png", "gif", "pdf", "zip", "tar",
    "gz",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Binary,
}

impl FileKind {
    pub fn tag(self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Binary => "binary",
        }
    }
}

/// Classify a file name by extension. Unknown extensions and extensionless
/// names default to text.
pub fn classify_name(name: &str) -> FileKind {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return FileKind::Text;
    };
    let ext = ext.to_ascii_lowercase();
    if BINARY_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Binary
    } else {
        FileKind::Text
    }
}

pub fn classify_path(path: &Path) -> FileKind {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(classify_name)
        .unwrap_or(FileKind::Text)
}

/// Gather cheap, bounded facts about `root`: its path and an annotated entry
/// listing. Never errors; a failure or a hung listing yields the sentinel.
pub async fn probe_environment(root: &Path) -> String {
    let root = root.to_path_buf();
    let listing = tokio::time::timeout(
        PROBE_TIMEOUT,
        tokio::task::spawn_blocking(move || gather_facts(&root)),
    )
    .await;
    match listing {
        Ok(Ok(Ok(facts))) => facts,
        _ => {
            warn!("environment probe failed, using sentinel");
            PROBE_FAILED.to_string()
        }
    }
}

fn gather_facts(root: &PathBuf) -> anyhow::Result<String> {
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        // Hidden entries stay out of the listing except the few dotfiles the
        // planner may legitimately want to look at.
        if name.starts_with('.') && name != ".gitignore" && name != ".env" {
            continue;
        }
        names.push(name);
    }
    names.sort();

    let entries: Vec<String> = names
        .iter()
        .map(|n| format!("{} [{}]", n, classify_name(n).tag()))
        .collect();

    Ok(format!(
        "Current directory: {}\nContents:\n{}",
        root.display(),
        entries.join("\n")
    ))
}
