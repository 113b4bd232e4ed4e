//! Script-only steps: `filesort` and `transpile:<command>`.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use assetforge_shared::{ForgeError, MediaKind, Result};

use super::exec::{run_filter, split_command};
use crate::{FileBlob, Transform, TransformContext};

// ---------------------------------------------------------------------------
// filesort
// ---------------------------------------------------------------------------

/// Orders scripts so that a file declaring an angular module comes before
/// every file that uses it or declares a module depending on it.
///
/// `angular.module('x', [...])` declares `x`; `angular.module('x')` uses it.
/// Files with no ordering constraint keep their input order. Modules nobody
/// declares (vendor modules) impose nothing.
#[derive(Debug, Clone, Copy)]
pub struct FileSort;

impl FileSort {
    const NAME: &'static str = "filesort";

    pub fn sort(files: Vec<FileBlob>) -> Result<Vec<FileBlob>> {
        static MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"angular\s*\.\s*module\s*\(\s*['"]([\w.$-]+)['"]\s*(?:,\s*\[([^\]]*)\])?"#)
                .expect("valid regex")
        });
        static QUOTED_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r#"['"]([\w.$-]+)['"]"#).expect("valid regex"));

        let mut declared: HashMap<String, usize> = HashMap::new();
        let mut requires: Vec<Vec<String>> = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            let src = file.text(Self::NAME)?;
            let mut needed = Vec::new();
            for caps in MODULE_RE.captures_iter(src) {
                let module = caps[1].to_string();
                match caps.get(2) {
                    Some(deps) => {
                        needed.extend(QUOTED_RE.captures_iter(deps.as_str()).map(|c| c[1].to_string()));
                        declared.entry(module).or_insert(i);
                    }
                    None => needed.push(module),
                }
            }
            requires.push(needed);
        }

        let n = files.len();
        let mut indegree = vec![0usize; n];
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (i, needed) in requires.iter().enumerate() {
            for module in needed {
                if let Some(&j) = declared.get(module) {
                    if j != i && successors[j].insert(i) {
                        indegree[i] += 1;
                    }
                }
            }
        }

        // Lowest input position first among the ready files.
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &successors[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<String> = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| files[i].path.display().to_string())
                .collect();
            return Err(ForgeError::transform(
                Self::NAME,
                format!("module dependency cycle between {}", stuck.join(", ")),
            ));
        }

        debug!(?order, "sorted scripts");
        let mut slots: Vec<Option<FileBlob>> = files.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}

impl Transform for FileSort {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Script
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Script
    }

    fn apply(&self, files: Vec<FileBlob>, _cx: &TransformContext) -> Result<Vec<FileBlob>> {
        Self::sort(files)
    }
}

// ---------------------------------------------------------------------------
// transpile
// ---------------------------------------------------------------------------

/// Pipes each script through an external compiler, e.g.
/// `transpile:npx babel --presets es2015 --filename {path}`.
#[derive(Debug, Clone)]
pub struct Transpile {
    spec: String,
    argv: Vec<String>,
}

impl Transpile {
    const NAME: &'static str = "transpile";

    pub fn new(command: &str) -> Result<Self> {
        Ok(Self {
            spec: format!("{}:{command}", Self::NAME),
            argv: split_command(Self::NAME, command)?,
        })
    }
}

impl Transform for Transpile {
    fn name(&self) -> &str {
        &self.spec
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Script
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Script
    }

    fn apply(&self, files: Vec<FileBlob>, cx: &TransformContext) -> Result<Vec<FileBlob>> {
        files
            .into_iter()
            .map(|file| {
                let contents = run_filter(Self::NAME, &self.argv, &cx.project_root, &file)?;
                Ok(FileBlob::new(file.path, contents))
            })
            .collect()
    }
}
