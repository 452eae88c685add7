//! `.fleetignore` handling for the Bundle Reader (C3): a gitignore-style
//! glob file, one per directory, whose patterns exclude files from the
//! resources walk - `walkdir` drives the recursive traversal, `globset`
//! compiles each directory's accumulated pattern set.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{AppError, AppResult};

const IGNORE_FILE: &str = ".fleetignore";

/// Patterns collected from every `.fleetignore` between the bundle root and
/// the directory currently being walked, nearest-directory patterns last so
/// they take precedence the way gitignore's own directory-scoping does.
#[derive(Clone, Default)]
struct IgnoreStack {
    sets: Vec<GlobSet>,
}

impl IgnoreStack {
    fn is_ignored(&self, relative: &Path) -> bool {
        self.sets.iter().any(|set| set.is_match(relative))
    }
}

fn compile(patterns: &str) -> AppResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for line in patterns.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let pattern = directory_pattern(line);
        let glob = Glob::new(&pattern)
            .map_err(|e| AppError::InvalidInput(format!("invalid {IGNORE_FILE} pattern {line:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AppError::InvalidInput(format!("failed to compile {IGNORE_FILE}: {e}")))
}

/// `globset` compiles a bare pattern literally, not gitignore-style, so
/// `build/` would only ever match a path exactly equal to `build/` and never
/// anything inside it. A trailing `/*` or `/` means "entire subdirectory"
/// (spec §4.3 step 3), so translate either into `dir/**`.
fn directory_pattern(line: &str) -> String {
    if let Some(stripped) = line.strip_suffix("/*") {
        format!("{stripped}/**")
    } else if let Some(stripped) = line.strip_suffix('/') {
        format!("{stripped}/**")
    } else {
        line.to_string()
    }
}

/// Walks `root`, returning every file path not excluded by any
/// `.fleetignore` between `root` and that file, relative to `root`.
pub fn walk_included_files(root: &Path) -> AppResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack_by_dir: std::collections::HashMap<PathBuf, IgnoreStack> = std::collections::HashMap::new();
    stack_by_dir.insert(root.to_path_buf(), root_stack(root)?);

    for entry in WalkDir::new(root).follow_links(false).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path == root {
            continue;
        }

        let parent = path.parent().unwrap_or(root).to_path_buf();
        let stack = stack_for(&mut stack_by_dir, root, &parent)?;

        let relative = path.strip_prefix(root).unwrap_or(path);
        if stack.is_ignored(relative) {
            continue;
        }

        if entry.file_type().is_file() && path.file_name().map(|n| n != IGNORE_FILE).unwrap_or(true) {
            out.push(relative.to_path_buf());
        }
    }

    Ok(out)
}

fn root_stack(root: &Path) -> AppResult<IgnoreStack> {
    let mut stack = IgnoreStack::default();
    push_dir_patterns(&mut stack, root)?;
    Ok(stack)
}

fn stack_for<'a>(
    cache: &'a mut std::collections::HashMap<PathBuf, IgnoreStack>,
    root: &Path,
    dir: &Path,
) -> AppResult<&'a IgnoreStack> {
    if !cache.contains_key(dir) {
        let parent_stack = match dir.parent() {
            Some(p) if p.starts_with(root) || p == root => stack_for(cache, root, p)?.clone(),
            _ => IgnoreStack::default(),
        };
        let mut stack = parent_stack;
        push_dir_patterns(&mut stack, dir)?;
        cache.insert(dir.to_path_buf(), stack);
    }
    Ok(cache.get(dir).unwrap())
}

fn push_dir_patterns(stack: &mut IgnoreStack, dir: &Path) -> AppResult<()> {
    let ignore_path = dir.join(IGNORE_FILE);
    if ignore_path.is_file() {
        let contents = std::fs::read_to_string(&ignore_path).map_err(AppError::Io)?;
        stack.sets.push(compile(&contents)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn excludes_patterns_from_fleetignore() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".fleetignore"), "*.secret\nbuild/\n").unwrap();
        fs::write(dir.path().join("values.yaml"), "a: 1").unwrap();
        fs::write(dir.path().join("api.secret"), "shh").unwrap();
        fs::create_dir(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build/out.yaml"), "x: 1").unwrap();

        let files = walk_included_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.to_string_lossy().to_string()).collect();

        assert!(names.contains(&"values.yaml".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".secret")));
        assert!(!names.iter().any(|n| n.starts_with("build/")));
    }

    #[test]
    fn nested_fleetignore_only_applies_to_its_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/.fleetignore"), "local.yaml\n").unwrap();
        fs::write(dir.path().join("local.yaml"), "a: 1").unwrap();
        fs::write(dir.path().join("sub/local.yaml"), "b: 1").unwrap();

        let files = walk_included_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.to_string_lossy().to_string()).collect();

        assert!(names.contains(&"local.yaml".to_string()));
        assert!(!names.contains(&"sub/local.yaml".to_string()));
    }
}
