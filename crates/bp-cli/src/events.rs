//! Event source: newline-delimited JSON files and run lists.

use anyhow::{Context, Result};
use bp_direction::EventCandidate;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Read one `EventCandidate` per non-blank line.
pub fn read_events(path: &Path) -> Result<Vec<EventCandidate>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open event file {}", path.display()))?;
    let mut events = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: EventCandidate = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid event record", path.display(), i + 1))?;
        events.push(event);
    }
    tracing::info!(path = %path.display(), events = events.len(), "loaded events");
    Ok(events)
}

/// Read a run list: one event file per line, relative paths resolved
/// against the list's directory. Blank lines and `#` comments are skipped.
pub fn read_file_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read file list {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            let p = Path::new(l);
            if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir()
            .join(format!("bp_events_{}_{}_{}", std::process::id(), nanos, tag));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn file_list_resolves_relative_paths() {
        let dir = tmp_dir("list");
        let list = dir.join("runs.txt");
        std::fs::write(&list, "# runs\nrun1.ndjson\n\n  /abs/run2.ndjson  \n").unwrap();
        let files = read_file_list(&list).unwrap();
        assert_eq!(files, vec![dir.join("run1.ndjson"), PathBuf::from("/abs/run2.ndjson")]);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn bad_line_reports_its_number() {
        let dir = tmp_dir("bad");
        let path = dir.join("events.ndjson");
        let good = r#"{"anchor": {"segment": 50, "energy": 0.85, "psd": 0.25, "z": 0.0, "time": 1.0}}"#;
        std::fs::write(&path, format!("{good}\n\n{{not json}}\n")).unwrap();
        let err = read_events(&path).unwrap_err();
        assert!(format!("{err}").contains(":3:"), "{err}");
        std::fs::remove_dir_all(dir).ok();
    }
}
