//! A loaded project and the per-mode build pipeline derived from it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use assetforge_graph::{Executor, RunReport, Task, TaskContext, TaskRegistry, TaskReport, WatchInputs};
use assetforge_shared::{
    BuildContext, BuildMode, CancelToken, FailurePolicy, ForgeConfig, ForgeError, MediaKind,
    Result, load_config,
};
use assetforge_transforms::{Chain, TransformRegistry};

use crate::discovery::discover_all;
use crate::manifest::ManifestStore;
use crate::tasks::{AssetTask, IndexTask, Shared};
use crate::{BUILD_TASK, INDEX_TASK};

/// Per-invocation overrides of the `[executor]` settings.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Ignore the build manifest and rebuild every task.
    pub force: bool,
    pub jobs: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Project root plus its validated configuration.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: Arc<ForgeConfig>,
    transforms: Arc<TransformRegistry>,
}

impl Project {
    /// Load `<root>/assetforge.toml`, or `config_path` when given.
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(root, config_path)?;
        Self::new(root, config)
    }

    pub fn new(root: &Path, config: ForgeConfig) -> Result<Self> {
        config.validate()?;
        let root = root.canonicalize().map_err(|e| ForgeError::io(root, e))?;
        Ok(Self {
            root,
            config: Arc::new(config),
            transforms: Arc::new(TransformRegistry::builtin()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Absolute output root for `mode`.
    pub fn output_root(&self, mode: BuildMode) -> PathBuf {
        self.root.join(self.config.paths.output_root(mode))
    }

    /// Register every task for `mode` and validate the graph and all chains.
    #[instrument(skip_all, fields(%mode))]
    pub fn pipeline(&self, mode: BuildMode, options: &BuildOptions) -> Result<Pipeline> {
        let output_root = self.output_root(mode);
        let shared = Arc::new(Shared {
            manifest: ManifestStore::new(&output_root),
            force: options.force,
        });

        let mut registry = TaskRegistry::new();
        let mut groups = BTreeMap::new();

        for (name, spec) in &self.config.assets {
            let chain = self.chain(name, spec.chain(mode), spec.kind)?;
            let mut include = spec.sources.clone();
            include.extend(spec.watch.iter().cloned());

            let task = Task::new(name.clone(), AssetTask::new(name, spec.dest.clone(), chain, Arc::clone(&shared)))
                .depends_on(spec.depends_on.iter().cloned())
                .watching(WatchInputs {
                    include,
                    exclude: spec.exclude.clone(),
                });
            registry.insert(task)?;

            if let Some(group) = &spec.inject {
                groups.insert(name.clone(), group.clone());
            }
        }

        let mut aggregate: Vec<String> = self.config.assets.keys().cloned().collect();

        if self.config.index.enabled {
            let chain = self.chain(INDEX_TASK, self.config.index.chain(mode), MediaKind::Markup)?;
            let deps: Vec<String> = groups.keys().cloned().collect();
            let source = self.config.index.source.to_string_lossy().into_owned();
            let task = Task::new(INDEX_TASK, IndexTask::new(chain, groups, Arc::clone(&shared)))
                .depends_on(deps)
                .watching(WatchInputs {
                    include: vec![source],
                    exclude: Vec::new(),
                });
            registry.insert(task)?;
            aggregate.push(INDEX_TASK.to_string());
        }

        registry.insert(Task::new(BUILD_TASK, aggregate_action).depends_on(aggregate))?;
        registry.validate()?;
        debug!(tasks = registry.len(), "task registry ready");

        let mut executor = Executor::from_config(&self.config.executor);
        if let Some(jobs) = options.jobs {
            executor = executor.with_jobs(jobs);
        }
        if let Some(policy) = options.failure_policy {
            executor = executor.with_failure_policy(policy);
        }

        Ok(Pipeline {
            project: self.clone(),
            mode,
            output_root,
            registry: Arc::new(registry),
            executor,
            shared,
        })
    }

    fn chain(&self, task: &str, specs: &[String], input: MediaKind) -> Result<Chain> {
        let chain = Chain::from_specs(&self.transforms, specs)?;
        let output = chain.validate(input)?;
        debug!(task, steps = chain.len(), %output, "chain validated");
        Ok(chain)
    }
}

async fn aggregate_action(_cx: TaskContext) -> Result<TaskReport> {
    Ok(TaskReport::default())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Validated tasks for one build mode, ready to run any number of times.
#[derive(Debug)]
pub struct Pipeline {
    project: Project,
    mode: BuildMode,
    output_root: PathBuf,
    registry: Arc<TaskRegistry>,
    executor: Executor,
    shared: Arc<Shared>,
}

impl Pipeline {
    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Discover sources and create the immutable context for one invocation.
    pub fn context(&self) -> Result<Arc<BuildContext>> {
        let assets = discover_all(self.project.root(), self.project.config())?;
        Ok(BuildContext::new(self.project.root(), &self.output_root, self.mode)
            .with_assets(assets)
            .into_shared())
    }

    /// Build `target` and everything it depends on.
    pub async fn run(&self, target: &str, cancel: &CancelToken) -> Result<RunReport> {
        let ctx = self.context()?;
        self.shared.manifest.reset();
        info!(build_target = target, mode = %self.mode, output = %self.output_root.display(), "build");
        self.executor.run(&self.registry, target, ctx, cancel).await
    }

    /// Build exactly `tasks`, treating their other dependencies as satisfied.
    pub async fn run_tasks(&self, tasks: &BTreeSet<String>, cancel: &CancelToken) -> Result<RunReport> {
        let ctx = self.context()?;
        self.shared.manifest.reset();
        info!(tasks = ?tasks, mode = %self.mode, "incremental build");
        self.executor.run_tasks(&self.registry, tasks, ctx, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetforge_graph::TaskStatus;
    use assetforge_watch::InputMatcher;

    use crate::manifest::BuildManifest;

    const INDEX_HTML: &str = "<html>\n<head>\n  <!-- inject:css -->\n  <!-- endinject -->\n  <!-- inject:html -->\n  <!-- endinject -->\n</head>\n<body>\n  <!-- inject:js -->\n  <!-- endinject -->\n</body>\n</html>\n";

    fn temp_project(files: &[(&str, &str)]) -> Project {
        let dir = std::env::temp_dir().join(format!("af-project-test-{}", uuid::Uuid::now_v7()));
        for (path, contents) in files {
            let path = dir.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        Project::new(&dir, ForgeConfig::default()).unwrap()
    }

    fn sample_project() -> Project {
        temp_project(&[
            ("src/app.js", "var app = angular.module('app', []);\n"),
            ("src/js/nav.js", "// nav directive\nfunction nav() { return 'nav'; }\n"),
            ("src/assets/main.css", "body {\n  color: red;\n}\n"),
            ("src/assets/_vars.scss", "$x: 1;\n"),
            ("src/views/home.html", "<div>\n  <p>home</p>\n</div>\n"),
            ("src/index.html", INDEX_HTML),
        ])
    }

    async fn build(project: &Project, mode: BuildMode, options: BuildOptions) -> RunReport {
        project
            .pipeline(mode, &options)
            .unwrap()
            .run(BUILD_TASK, &CancelToken::new())
            .await
            .unwrap()
    }

    /// Every file under `root` with its contents, sorted by path.
    fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files = Vec::new();
        let mut dirs = vec![root.to_path_buf()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    dirs.push(path);
                } else {
                    let contents = std::fs::read(&path).unwrap();
                    files.push((path.strip_prefix(root).unwrap().to_path_buf(), contents));
                }
            }
        }
        files.sort();
        files
    }

    fn find(root: &Path, dir: &str, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(root.join(dir))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(prefix))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn dev_build_lays_out_outputs() {
        let project = sample_project();
        let report = build(&project, BuildMode::Dev, BuildOptions::default()).await;
        assert!(report.is_success(), "{report:?}");

        let out = project.output_root(BuildMode::Dev);
        let scripts = std::fs::read_to_string(out.join("js/scripts.js")).unwrap();
        assert!(scripts.starts_with("var app"));
        assert!(scripts.contains("function nav()"));
        assert_eq!(
            std::fs::read_to_string(out.join("assets/main.css")).unwrap(),
            "body {\n  color: red;\n}\n"
        );
        assert!(!out.join("assets/_vars.css").exists());
        assert!(out.join("views/home.html").is_file());

        let index = std::fs::read_to_string(out.join("index.html")).unwrap();
        assert!(index.contains(r#"<script src="/js/scripts.js"></script>"#));
        assert!(index.contains(r#"<link rel="stylesheet" href="/assets/main.css">"#));
        assert!(index.contains(r#"<link rel="import" href="/views/home.html">"#));
        assert!(out.join(crate::MANIFEST_FILE).is_file());
    }

    #[tokio::test]
    async fn prod_build_is_minified_and_cache_busted() {
        let project = sample_project();
        let report = build(&project, BuildMode::Prod, BuildOptions::default()).await;
        assert!(report.is_success(), "{report:?}");

        let out = project.output_root(BuildMode::Prod);
        let scripts = find(&out, "js", "scripts.");
        assert_eq!(scripts.len(), 1);
        assert!(!std::fs::read_to_string(out.join("js").join(&scripts[0])).unwrap().contains("// nav"));

        let styles = find(&out, "assets", "main.");
        assert_eq!(std::fs::read_to_string(out.join("assets").join(&styles[0])).unwrap(), "body{color:red}");

        let index = std::fs::read_to_string(out.join("index.html")).unwrap();
        assert!(index.contains(&format!("/js/{}", scripts[0])));
        assert!(index.contains(&format!("/assets/{}", styles[0])));

        let partial = std::fs::read_to_string(out.join("views/home.html")).unwrap();
        assert_eq!(partial, "<div><p>home</p></div>");
    }

    #[tokio::test]
    async fn prod_builds_are_idempotent() {
        let project = sample_project();
        let out = project.output_root(BuildMode::Prod);

        build(&project, BuildMode::Prod, BuildOptions::default()).await;
        let first = snapshot(&out);

        let forced = BuildOptions {
            force: true,
            ..BuildOptions::default()
        };
        let report = build(&project, BuildMode::Prod, forced).await;
        assert_eq!(report.outcome("scripts").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(snapshot(&out), first);
    }

    #[tokio::test]
    async fn unchanged_tasks_are_up_to_date() {
        let project = sample_project();
        build(&project, BuildMode::Dev, BuildOptions::default()).await;
        let manifest = std::fs::read(BuildManifest::path_for(&project.output_root(BuildMode::Dev))).unwrap();

        let report = build(&project, BuildMode::Dev, BuildOptions::default()).await;
        for id in ["scripts", "styles", "partials", "index"] {
            assert_eq!(report.outcome(id).unwrap().status, TaskStatus::UpToDate, "{id}");
        }
        let after = std::fs::read(BuildManifest::path_for(&project.output_root(BuildMode::Dev))).unwrap();
        assert_eq!(after, manifest);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn published_outputs_are_recorded_in_the_manifest() {
        let project = sample_project();
        let report = build(&project, BuildMode::Prod, BuildOptions::default()).await;
        assert!(report.is_success(), "{report:?}");

        let manifest = BuildManifest::load(&project.output_root(BuildMode::Prod)).unwrap();
        for id in ["scripts", "styles", "partials", "index"] {
            assert_eq!(manifest.tasks[id].outputs, report.outcome(id).unwrap().outputs, "{id}");
        }
    }

    #[tokio::test]
    async fn deleted_output_is_rebuilt() {
        let project = sample_project();
        build(&project, BuildMode::Dev, BuildOptions::default()).await;
        let out = project.output_root(BuildMode::Dev);
        std::fs::remove_file(out.join("js/scripts.js")).unwrap();

        let report = build(&project, BuildMode::Dev, BuildOptions::default()).await;
        assert_eq!(report.outcome("scripts").unwrap().status, TaskStatus::Succeeded);
        assert!(out.join("js/scripts.js").is_file());
    }

    #[tokio::test]
    async fn lint_failure_publishes_nothing() {
        let project = temp_project(&[
            ("src/app.js", "function f() {\n  debugger;\n}\n"),
            ("src/index.html", INDEX_HTML),
        ]);
        let report = build(&project, BuildMode::Prod, BuildOptions::default()).await;
        assert!(!report.is_success());

        let scripts = report.outcome("scripts").unwrap();
        assert_eq!(scripts.status, TaskStatus::Failed);
        assert!(scripts.error.as_deref().unwrap().contains("transform `lint-js` failed"));
        assert_eq!(report.outcome("index").unwrap().status, TaskStatus::Skipped);
        assert!(!project.output_root(BuildMode::Prod).join("js").exists());
        assert!(matches!(report.into_result(), Err(ForgeError::ExecutorFailure { .. })));
    }

    #[tokio::test]
    async fn styles_change_leaves_scripts_untouched() {
        let project = sample_project();
        let pipeline = project.pipeline(BuildMode::Dev, &BuildOptions::default()).unwrap();
        pipeline.run(BUILD_TASK, &CancelToken::new()).await.unwrap();

        let out = project.output_root(BuildMode::Dev);
        let scripts_before = std::fs::metadata(out.join("js/scripts.js")).unwrap().modified().unwrap();

        std::fs::write(project.root().join("src/assets/main.css"), "body { color: blue; }\n").unwrap();
        let matcher = InputMatcher::new(Arc::clone(pipeline.registry())).unwrap();
        let affected = matcher.affected(&[PathBuf::from("src/assets/main.css")]);
        let expected: BTreeSet<String> = ["build", "index", "styles"].iter().map(|s| s.to_string()).collect();
        assert_eq!(affected, expected);

        let report = pipeline.run_tasks(&affected, &CancelToken::new()).await.unwrap();
        assert!(report.is_success());
        assert!(report.outcome("scripts").is_none());
        assert_eq!(report.outcome("styles").unwrap().status, TaskStatus::Succeeded);

        assert_eq!(
            std::fs::metadata(out.join("js/scripts.js")).unwrap().modified().unwrap(),
            scripts_before
        );
        assert!(std::fs::read_to_string(out.join("assets/main.css")).unwrap().contains("blue"));
    }

    #[tokio::test]
    async fn changed_content_gets_a_new_token_and_old_file_goes() {
        let project = sample_project();
        build(&project, BuildMode::Prod, BuildOptions::default()).await;
        let out = project.output_root(BuildMode::Prod);
        let before = find(&out, "js", "scripts.");

        std::fs::write(project.root().join("src/app.js"), "var app = 2;\n").unwrap();
        build(&project, BuildMode::Prod, BuildOptions::default()).await;
        let after = find(&out, "js", "scripts.");

        assert_eq!(after.len(), 1);
        assert_ne!(before, after);
        let index = std::fs::read_to_string(out.join("index.html")).unwrap();
        assert!(index.contains(&after[0]));
        assert!(!index.contains(&before[0]));
    }

    #[test]
    fn configuration_errors_are_raised_at_registration() {
        let project = sample_project();

        let mut config = project.config().clone();
        config.assets.get_mut("scripts").unwrap().prod = vec!["minfy-js".into()];
        let err = Project::new(project.root(), config).unwrap().pipeline(BuildMode::Prod, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, ForgeError::UnknownTransform { .. }));

        let mut config = project.config().clone();
        config.assets.get_mut("scripts").unwrap().dev = vec!["minify-css".into()];
        let err = Project::new(project.root(), config).unwrap().pipeline(BuildMode::Dev, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, ForgeError::ChainTypeMismatch { .. }));

        let mut config = project.config().clone();
        config.assets.get_mut("scripts").unwrap().depends_on = vec!["styles".into()];
        config.assets.get_mut("styles").unwrap().depends_on = vec!["scripts".into()];
        let err = Project::new(project.root(), config).unwrap().pipeline(BuildMode::Dev, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, ForgeError::CyclicDependency { .. }));
        assert!(err.is_configuration());

        let mut config = project.config().clone();
        config.assets.get_mut("scripts").unwrap().sources = vec!["src/[.js".into()];
        let err = Project::new(project.root(), config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn unknown_target_is_rejected() {
        let project = sample_project();
        let pipeline = project.pipeline(BuildMode::Dev, &BuildOptions::default()).unwrap();
        let err = pipeline.run("deploy", &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, ForgeError::TaskNotFound { .. }));
        assert!(!project.output_root(BuildMode::Dev).exists());
    }
}
