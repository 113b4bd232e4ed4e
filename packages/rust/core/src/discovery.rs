//! Resolve asset source globs to concrete files.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

use assetforge_shared::{AssetManifest, AssetSpec, ForgeConfig, ForgeError, Result, SourceFile};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Leading components of `pattern` that contain no glob metacharacters.
///
/// `src/assets/**/*.scss` → `src/assets`; a literal file path yields its parent.
pub fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    let mut literal = true;
    for component in Path::new(pattern).components() {
        let Component::Normal(part) = component else {
            continue;
        };
        if part.to_string_lossy().contains(['*', '?', '[', '{']) {
            literal = false;
            break;
        }
        base.push(part);
    }
    if literal {
        base.pop();
    }
    base
}

/// Files matched by `spec.sources`, in pattern order, minus `spec.exclude`.
///
/// A file matched by several patterns keeps its first position.
pub fn discover(project_root: &Path, spec: &AssetSpec) -> Result<Vec<SourceFile>> {
    let exclude = compile(&spec.exclude)?;
    let root_prefix = Pattern::escape(&project_root.to_string_lossy());
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in &spec.sources {
        compile(std::slice::from_ref(pattern))?;
        let base = glob_base(pattern);
        let full = format!("{root_prefix}/{pattern}");
        let entries = glob::glob_with(&full, MATCH_OPTIONS)
            .map_err(|e| ForgeError::config(format!("invalid glob `{pattern}`: {}", e.msg)))?;

        for entry in entries {
            let absolute = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(error = %err, "unreadable path while expanding sources");
                    continue;
                }
            };
            if !absolute.is_file() {
                continue;
            }
            let Ok(path) = absolute.strip_prefix(project_root).map(Path::to_path_buf) else {
                continue;
            };
            if exclude.iter().any(|p| p.matches_path_with(&path, MATCH_OPTIONS)) {
                continue;
            }
            if !seen.insert(path.clone()) {
                continue;
            }
            let logical = path.strip_prefix(&base).unwrap_or(&path).to_path_buf();
            files.push(SourceFile { path, logical });
        }
    }

    Ok(files)
}

/// Discover every configured asset plus the index entry point.
pub fn discover_all(project_root: &Path, config: &ForgeConfig) -> Result<AssetManifest> {
    let mut manifest = AssetManifest::new();
    for (name, spec) in &config.assets {
        let files = discover(project_root, spec)?;
        debug!(asset = %name, files = files.len(), "discovered sources");
        manifest.insert(name.clone(), files);
    }

    if config.index.enabled {
        let source = &config.index.source;
        let mut files = Vec::new();
        if project_root.join(source).is_file() {
            files.push(SourceFile {
                path: source.clone(),
                logical: source.file_name().map(PathBuf::from).unwrap_or_default(),
            });
        }
        manifest.insert(crate::INDEX_TASK.to_string(), files);
    }
    Ok(manifest)
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                ForgeError::config(format!("invalid glob `{p}`: {} at position {}", e.msg, e.pos))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetforge_shared::MediaKind;

    fn temp_project(files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("af-discover-test-{}", uuid::Uuid::now_v7()));
        for file in files {
            let path = dir.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, file).unwrap();
        }
        dir
    }

    fn spec(sources: &[&str], exclude: &[&str]) -> AssetSpec {
        AssetSpec {
            kind: MediaKind::Script,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            dest: "js".into(),
            dev: Vec::new(),
            prod: Vec::new(),
            inject: None,
            watch: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    #[test]
    fn glob_base_stops_at_first_wildcard() {
        assert_eq!(glob_base("src/assets/**/*.scss"), PathBuf::from("src/assets"));
        assert_eq!(glob_base("src/*.js"), PathBuf::from("src"));
        assert_eq!(glob_base("*.js"), PathBuf::new());
        assert_eq!(glob_base("src/index.html"), PathBuf::from("src"));
    }

    #[test]
    fn pattern_order_wins_and_duplicates_collapse() {
        let root = temp_project(&["src/z.js", "src/app/a.js", "src/app/b.js"]);
        let files = discover(&root, &spec(&["src/*.js", "src/**/*.js"], &[])).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("src/z.js"),
                PathBuf::from("src/app/a.js"),
                PathBuf::from("src/app/b.js"),
            ]
        );
        assert_eq!(files[1].logical, PathBuf::from("app/a.js"));
    }

    #[test]
    fn excludes_are_honoured() {
        let root = temp_project(&["src/index.html", "src/views/home.html"]);
        let files = discover(&root, &spec(&["src/**/*.html"], &["src/index.html"])).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].logical, PathBuf::from("views/home.html"));
    }

    #[test]
    fn nothing_matched_is_empty() {
        let root = temp_project(&["README.md"]);
        assert!(discover(&root, &spec(&["src/**/*.js"], &[])).unwrap().is_empty());
    }

    #[test]
    fn malformed_patterns_report_the_written_position() {
        let root = temp_project(&["src/app.js"]);
        let err = discover(&root, &spec(&["src/[.js"], &[])).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("`src/[.js`: invalid range pattern at position 4"), "{err}");

        let err = discover(&root, &spec(&["src/*.js"], &["src/["])).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn index_is_discovered_when_present() {
        let root = temp_project(&["src/index.html"]);
        let manifest = discover_all(&root, &ForgeConfig::default()).unwrap();
        assert_eq!(manifest["index"][0].logical, PathBuf::from("index.html"));
        assert!(manifest["scripts"].is_empty());
    }
}
