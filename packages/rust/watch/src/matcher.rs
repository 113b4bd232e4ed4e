//! Map changed paths to the tasks that must re-run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};

use assetforge_graph::{TaskRegistry, WatchInputs};
use assetforge_shared::{ForgeError, Result};

/// `*` never crosses a directory separator; `**` does.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled include/exclude globs.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl GlobSet {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn from_inputs(inputs: &WatchInputs) -> Result<Self> {
        Self::new(&inputs.include, &inputs.exclude)
    }

    /// A project-relative path matches when some include does and no exclude does.
    pub fn matches(&self, path: &Path) -> bool {
        self.include.iter().any(|p| p.matches_path_with(path, MATCH_OPTIONS))
            && !self.exclude.iter().any(|p| p.matches_path_with(path, MATCH_OPTIONS))
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            let p = p.as_ref();
            Pattern::new(p).map_err(|e| ForgeError::config(format!("invalid glob `{p}`: {} at position {}", e.msg, e.pos)))
        })
        .collect()
}

/// Watched inputs of every task in a registry.
#[derive(Debug, Clone)]
pub struct InputMatcher {
    registry: Arc<TaskRegistry>,
    tasks: Vec<(String, GlobSet)>,
}

impl InputMatcher {
    pub fn new(registry: Arc<TaskRegistry>) -> Result<Self> {
        let mut tasks = Vec::new();
        for task in registry.tasks() {
            if task.inputs().is_empty() {
                continue;
            }
            tasks.push((task.id().to_string(), GlobSet::from_inputs(task.inputs())?));
        }
        Ok(Self { registry, tasks })
    }

    /// Tasks whose inputs match one of `paths`, without dependents.
    pub fn direct<'a, I>(&self, paths: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let paths: Vec<&PathBuf> = paths.into_iter().collect();
        self.tasks
            .iter()
            .filter(|(_, globs)| paths.iter().any(|p| globs.matches(p)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Directly affected tasks plus everything that transitively depends on them.
    pub fn affected<'a, I>(&self, paths: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let direct = self.direct(paths);
        self.registry
            .dependents_closure(direct.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetforge_graph::{Task, TaskContext, TaskReport};

    async fn noop(_cx: TaskContext) -> Result<TaskReport> {
        Ok(TaskReport::default())
    }

    fn inputs(include: &[&str], exclude: &[&str]) -> WatchInputs {
        WatchInputs {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .insert(Task::new("scripts", noop).watching(inputs(&["src/*.js", "src/**/*.js"], &[])))
            .unwrap();
        registry
            .insert(Task::new("styles", noop).watching(inputs(
                &["src/assets/**/*.scss", "src/js/directives/**/*.scss"],
                &[],
            )))
            .unwrap();
        registry
            .insert(
                Task::new("partials", noop)
                    .watching(inputs(&["src/**/*.html"], &["src/index.html"])),
            )
            .unwrap();
        registry
            .insert(
                Task::new("index", noop)
                    .depends_on(["scripts", "styles"])
                    .watching(inputs(&["src/index.html"], &[])),
            )
            .unwrap();
        registry
            .insert(Task::new("build", noop).depends_on(["index", "partials"]))
            .unwrap();
        Arc::new(registry)
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn star_does_not_cross_directories() {
        let globs = GlobSet::new(&["src/*.js"], &[] as &[&str]).unwrap();
        assert!(globs.matches(Path::new("src/app.js")));
        assert!(!globs.matches(Path::new("src/js/app.js")));
    }

    #[test]
    fn excludes_win() {
        let matcher = InputMatcher::new(registry()).unwrap();
        let changed = [PathBuf::from("src/index.html")];
        assert_eq!(matcher.direct(&changed), set(&["index"]));

        let changed = [PathBuf::from("src/views/home.html")];
        assert_eq!(matcher.direct(&changed), set(&["partials"]));
    }

    #[test]
    fn styles_change_reaches_dependents_only() {
        let matcher = InputMatcher::new(registry()).unwrap();
        let changed = [PathBuf::from("src/js/directives/nav/nav.scss")];
        assert_eq!(matcher.affected(&changed), set(&["styles", "index", "build"]));
    }

    #[test]
    fn unrelated_paths_affect_nothing() {
        let matcher = InputMatcher::new(registry()).unwrap();
        let changed = [PathBuf::from("README.md")];
        assert!(matcher.affected(&changed).is_empty());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = GlobSet::new(&["src/[.js"], &[] as &[&str]).unwrap_err();
        assert!(matches!(err, ForgeError::Config { .. }));
        assert!(err.is_configuration());
    }
}
