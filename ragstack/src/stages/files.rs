//! Local file discovery for uploads.

use std::path::{Path, PathBuf};

/// Files under `root` accepted by `keep`, sorted, with their object-key
/// form (relative path joined by `/`).
pub fn files_under<F>(root: &Path, keep: F) -> std::io::Result<Vec<(PathBuf, String)>>
where
    F: Fn(&Path) -> bool,
{
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if keep(&path) {
                if let Some(key) = object_key(root, &path) {
                    found.push((path, key));
                }
            }
        }
    }

    found.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(found)
}

fn object_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Returns true if the file extension is one of `extensions`, ignoring case.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}
