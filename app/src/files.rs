use std::path::{Path, PathBuf};

use anyhow::Context as _;

/// Prefix of the per-chunk tileset directories produced by `index`. A
/// directory with this prefix and a `content.las` inside is a chunk
/// boundary the merge-tree walk does not descend into.
pub const CHUNK_TILESET_PREFIX: &str = "chunk-tileset-";

/// The LAS companion every emitted tileset carries at its root.
pub const CONTENT_LAS: &str = "content.las";

/// Resolves the input to the list of LAS files to process: the input
/// itself, or its `*.las` / `*.laz` contents in folder mode.
pub fn discover_las(input: &Path, folder: bool, recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    if !folder {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for extension in ["las", "laz"] {
        let pattern = if recursive {
            input.join("**").join(format!("*.{extension}"))
        } else {
            input.join(format!("*.{extension}"))
        };
        let pattern = pattern.to_string_lossy().into_owned();
        for entry in glob::glob(&pattern).with_context(|| format!("bad glob '{pattern}'"))? {
            match entry {
                Ok(path) => files.push(path),
                Err(err) => log::warn!("skipping unreadable path: {err}"),
            }
        }
    }
    files.sort();
    Ok(files)
}

/// The `content.las` companions of the chunk tilesets directly under the
/// given folder, in directory-name order.
pub fn find_child_las(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let candidate = path.join(CONTENT_LAS);
        if candidate.is_file() {
            files.push(candidate);
        }
    }
    files.sort();
    Ok(files)
}

/// Every `content.las` found anywhere under the given folder.
pub fn find_all_content_las(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().is_some_and(|name| name == CONTENT_LAS) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_mode_returns_the_input() {
        let files = discover_las(Path::new("cloud.las"), false, false).unwrap();
        assert_eq!(files, vec![PathBuf::from("cloud.las")]);
    }

    #[test]
    fn folder_mode_lists_las_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.las"), b"").unwrap();
        std::fs::write(dir.path().join("a.las"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.las"), b"").unwrap();

        let flat = discover_las(dir.path(), true, false).unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.las", "b.las"]);

        let recursive = discover_las(dir.path(), true, true).unwrap();
        assert_eq!(recursive.len(), 3);
    }

    #[test]
    fn child_las_discovery_checks_immediate_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        let chunk_a = dir.path().join("chunk-tileset-a");
        let chunk_b = dir.path().join("chunk-tileset-b");
        let plain = dir.path().join("plain");
        std::fs::create_dir_all(&chunk_a).unwrap();
        std::fs::create_dir_all(&chunk_b).unwrap();
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::write(chunk_a.join(CONTENT_LAS), b"").unwrap();
        std::fs::write(chunk_b.join(CONTENT_LAS), b"").unwrap();

        let children = find_child_las(dir.path()).unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[0].ends_with("chunk-tileset-a/content.las"));
    }

    #[test]
    fn recursive_content_las_walk_finds_nested_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("zone/chunk-tileset-x");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(CONTENT_LAS), b"").unwrap();

        let all = find_all_content_las(dir.path()).unwrap();
        assert_eq!(all.len(), 1);
    }
}
