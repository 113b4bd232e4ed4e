//! Project configuration for assetforge.
//!
//! The project config lives at `<project>/assetforge.toml`. Every key has a
//! documented default mirroring a conventional front-end layout (`src/` in,
//! `public/` for dev builds, `dist/` for prod builds). CLI flags override
//! config file values, which override defaults. Unknown keys are rejected.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::types::{BuildMode, MediaKind};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "assetforge.toml";

/// Task ids reserved for the generated index and aggregate tasks.
pub const RESERVED_TASK_IDS: &[&str] = &["index", "build"];

// ---------------------------------------------------------------------------
// Config structs (matching assetforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level project config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgeConfig {
    /// Output roots.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Dev server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Watch mode settings.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// External test runner.
    #[serde(default)]
    pub test: TestConfig,

    /// Asset classes, keyed by logical asset name (also the task id).
    #[serde(default = "default_assets")]
    pub assets: BTreeMap<String, AssetSpec>,

    /// The HTML entry point that receives injected references.
    #[serde(default)]
    pub index: IndexConfig,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            executor: ExecutorConfig::default(),
            test: TestConfig::default(),
            assets: default_assets(),
            index: IndexConfig::default(),
        }
    }
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Output root for dev builds, relative to the project root.
    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,

    /// Output root for prod builds, relative to the project root.
    #[serde(default = "default_prod_root")]
    pub prod_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dev_root: default_dev_root(),
            prod_root: default_prod_root(),
        }
    }
}

impl PathsConfig {
    /// Output root for `mode`, still relative to the project root.
    pub fn output_root(&self, mode: BuildMode) -> &Path {
        match mode {
            BuildMode::Dev => &self.dev_root,
            BuildMode::Prod => &self.prod_root,
        }
    }
}

fn default_dev_root() -> PathBuf {
    "public".into()
}
fn default_prod_root() -> PathBuf {
    "dist".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Push reload events to connected browsers after each rebuild.
    #[serde(default = "default_true")]
    pub livereload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            livereload: true,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_true() -> bool {
    true
}

/// `[watch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Quiet period after the last change before a rebuild starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Project-relative globs whose changes are never reported.
    #[serde(default = "default_watch_ignore")]
    pub ignore: Vec<String>,

    /// Run `[test].command` after the initial build, before serving.
    #[serde(default)]
    pub run_tests: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore: default_watch_ignore(),
            run_tests: false,
        }
    }
}

fn default_debounce_ms() -> u64 {
    200
}
fn default_watch_ignore() -> Vec<String> {
    vec![
        ".git/**".into(),
        "node_modules/**".into(),
        "**/*.swp".into(),
        "**/*~".into(),
    ]
}

/// What the executor does with the rest of the plan after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Let in-flight tasks finish; never start pending ones.
    #[default]
    Drain,
    /// Abort in-flight tasks immediately.
    Abort,
    /// Keep scheduling tasks that do not depend on the failure.
    KeepGoing,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "drain" => Ok(Self::Drain),
            "abort" => Ok(Self::Abort),
            "keep-going" => Ok(Self::KeepGoing),
            other => Err(format!(
                "unknown failure policy '{other}': expected 'drain', 'abort' or 'keep-going'"
            )),
        }
    }
}

/// What a run does when another run holds the output root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicy {
    /// Fail immediately with `BuildInProgress`.
    #[default]
    Fail,
    /// Wait until the other run releases the lock.
    Wait,
}

/// `[executor]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Worker pool size; 0 uses the available parallelism.
    #[serde(default)]
    pub jobs: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub lock: LockPolicy,
}

/// `[test]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    /// Program and arguments of the external test runner.
    #[serde(default = "default_test_command")]
    pub command: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: default_test_command(),
        }
    }
}

fn default_test_command() -> Vec<String> {
    ["npx", "karma", "start", "karma.conf.js", "--single-run"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[assets.<name>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetSpec {
    /// Media kind of the raw sources.
    pub kind: MediaKind,

    /// Project-relative glob patterns, in concatenation order.
    #[serde(default)]
    pub sources: Vec<String>,

    /// Project-relative glob patterns removed from `sources`.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Destination directory inside the output root.
    #[serde(default)]
    pub dest: PathBuf,

    /// Transform chain for dev builds.
    #[serde(default)]
    pub dev: Vec<String>,

    /// Transform chain for prod builds.
    #[serde(default)]
    pub prod: Vec<String>,

    /// Injection group (`inject`, `bower`, ...) the outputs are referenced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<String>,

    /// Extra globs that trigger a rebuild without being sources (e.g. SCSS includes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<String>,

    /// Extra task dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl AssetSpec {
    pub fn chain(&self, mode: BuildMode) -> &[String] {
        match mode {
            BuildMode::Dev => &self.dev,
            BuildMode::Prod => &self.prod,
        }
    }
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Project-relative path of the HTML entry point.
    #[serde(default = "default_index_source")]
    pub source: PathBuf,

    #[serde(default = "default_index_chain")]
    pub dev: Vec<String>,

    #[serde(default = "default_index_chain")]
    pub prod: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: default_index_source(),
            dev: default_index_chain(),
            prod: default_index_chain(),
        }
    }
}

impl IndexConfig {
    pub fn chain(&self, mode: BuildMode) -> &[String] {
        match mode {
            BuildMode::Dev => &self.dev,
            BuildMode::Prod => &self.prod,
        }
    }
}

fn default_index_source() -> PathBuf {
    "src/index.html".into()
}
fn default_index_chain() -> Vec<String> {
    vec!["inject".into()]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_assets() -> BTreeMap<String, AssetSpec> {
    let mut assets = BTreeMap::new();

    assets.insert(
        "scripts".to_string(),
        AssetSpec {
            kind: MediaKind::Script,
            sources: strings(&["src/*.js", "src/**/*.js"]),
            exclude: Vec::new(),
            dest: "js".into(),
            dev: strings(&["lint-js", "filesort", "concat:scripts.js"]),
            prod: strings(&["lint-js", "filesort", "concat:scripts.js", "minify-js", "cachebust"]),
            inject: Some("inject".into()),
            watch: Vec::new(),
            depends_on: Vec::new(),
        },
    );

    assets.insert(
        "styles".to_string(),
        AssetSpec {
            kind: MediaKind::StyleSource,
            sources: strings(&["src/assets/**/*.css", "src/assets/**/*.scss"]),
            exclude: Vec::new(),
            dest: "assets".into(),
            dev: strings(&["compile-styles"]),
            prod: strings(&["compile-styles", "minify-css", "cachebust"]),
            inject: Some("inject".into()),
            watch: strings(&["src/js/directives/**/*.scss"]),
            depends_on: Vec::new(),
        },
    );

    assets.insert(
        "partials".to_string(),
        AssetSpec {
            kind: MediaKind::Markup,
            sources: strings(&["src/**/*.html"]),
            exclude: strings(&["src/index.html"]),
            dest: PathBuf::new(),
            dev: strings(&["lint-html"]),
            prod: strings(&["lint-html", "minify-html"]),
            inject: Some("inject".into()),
            watch: Vec::new(),
            depends_on: Vec::new(),
        },
    );

    assets.insert(
        "images".to_string(),
        AssetSpec {
            kind: MediaKind::Image,
            sources: strings(&[
                "src/assets/**/*.jpg",
                "src/assets/**/*.jpeg",
                "src/assets/**/*.png",
                "src/assets/**/*.ico",
                "src/assets/**/*.gif",
            ]),
            exclude: Vec::new(),
            dest: "assets".into(),
            dev: strings(&["copy"]),
            prod: strings(&["copy"]),
            inject: None,
            watch: Vec::new(),
            depends_on: Vec::new(),
        },
    );

    assets.insert(
        "vendor".to_string(),
        AssetSpec {
            kind: MediaKind::Script,
            sources: Vec::new(),
            exclude: Vec::new(),
            dest: "js".into(),
            dev: strings(&["concat:vendor.js"]),
            prod: strings(&["concat:vendor.js", "minify-js", "cachebust"]),
            inject: Some("bower".into()),
            watch: Vec::new(),
            depends_on: Vec::new(),
        },
    );

    assets
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl ForgeConfig {
    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        for root in [&self.paths.dev_root, &self.paths.prod_root] {
            if root.as_os_str().is_empty() || !is_contained(root) {
                return Err(ForgeError::config(format!(
                    "output root {} must be a non-empty path inside the project",
                    root.display()
                )));
            }
        }

        if self.watch.debounce_ms == 0 {
            return Err(ForgeError::config("watch.debounce_ms must be greater than 0"));
        }

        for (name, spec) in &self.assets {
            if RESERVED_TASK_IDS.contains(&name.as_str()) {
                return Err(ForgeError::config(format!(
                    "asset name `{name}` is reserved"
                )));
            }
            if !is_contained(&spec.dest) {
                return Err(ForgeError::config(format!(
                    "assets.{name}.dest must stay inside the output root"
                )));
            }
            check_globs(&format!("assets.{name}.sources"), &spec.sources)?;
            check_globs(&format!("assets.{name}.exclude"), &spec.exclude)?;
            check_globs(&format!("assets.{name}.watch"), &spec.watch)?;
        }
        check_globs("watch.ignore", &self.watch.ignore)?;

        if self.test.command.is_empty() {
            return Err(ForgeError::config("test.command must name a program"));
        }

        Ok(())
    }
}

/// Reject patterns the glob matcher cannot compile, reporting positions in
/// the pattern as written.
fn check_globs(key: &str, patterns: &[String]) -> Result<()> {
    for pattern in patterns {
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ForgeError::config(format!(
                "{key}: invalid glob `{pattern}`: {} at position {}",
                e.msg, e.pos
            )));
        }
    }
    Ok(())
}

/// Relative path without `..` or root components.
fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Path of the config file for a project root.
pub fn config_file_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_FILE_NAME)
}

/// Load the project config. Returns defaults if no config file exists.
///
/// An explicitly requested file must exist.
pub fn load_config(project_root: &Path, explicit: Option<&Path>) -> Result<ForgeConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = config_file_path(project_root);
            if !path.exists() {
                tracing::debug!(?path, "config file not found, using defaults");
                return Ok(ForgeConfig::default());
            }
            path
        }
    };

    load_config_from(&path)
}

/// Load and validate the config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<ForgeConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ForgeError::io(path, e))?;
    let config = parse_config(&content)
        .map_err(|e| match e {
            ForgeError::Config { message } => {
                ForgeError::config(format!("failed to parse {}: {message}", path.display()))
            }
            other => other,
        })?;
    config.validate()?;
    Ok(config)
}

/// Parse config text, classifying unknown keys as [`ForgeError::UnknownConfigOption`].
pub fn parse_config(content: &str) -> Result<ForgeConfig> {
    toml::from_str(content).map_err(|e| {
        let message = e.message().to_string();
        match unknown_field(&message) {
            Some(option) => ForgeError::UnknownConfigOption { option },
            None => ForgeError::config(message),
        }
    })
}

fn unknown_field(message: &str) -> Option<String> {
    let rest = message.strip_prefix("unknown field `")?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

/// Write a default config file into `project_root`. Refuses to overwrite.
pub fn init_config(project_root: &Path) -> Result<PathBuf> {
    let path = config_file_path(project_root);
    if path.exists() {
        return Err(ForgeError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let content = toml::to_string_pretty(&ForgeConfig::default())
        .map_err(|e| ForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = ForgeConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("dev_root"));
        assert!(toml_str.contains("debounce_ms"));
    }

    #[test]
    fn config_roundtrip() {
        let config = ForgeConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed = parse_config(&toml_str).expect("deserialize");
        assert_eq!(parsed.server.port, 8000);
        assert_eq!(parsed.watch.debounce_ms, 200);
        assert_eq!(parsed.assets.len(), 5);
        assert_eq!(parsed.assets["styles"].kind, MediaKind::StyleSource);
        parsed.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let parsed = parse_config(
            r#"
[server]
port = 9000

[executor]
failure_policy = "keep-going"
"#,
        )
        .expect("parse");
        assert_eq!(parsed.server.port, 9000);
        assert!(parsed.server.livereload);
        assert_eq!(parsed.executor.failure_policy, FailurePolicy::KeepGoing);
        assert_eq!(parsed.paths.output_root(BuildMode::Prod), Path::new("dist"));
        assert!(parsed.assets.contains_key("scripts"));
    }

    #[test]
    fn explicit_assets_replace_defaults() {
        let parsed = parse_config(
            r#"
[assets.app]
kind = "script"
sources = ["lib/**/*.js"]
dest = "js"
dev = ["concat:app.js"]
prod = ["concat:app.js", "minify-js"]
"#,
        )
        .expect("parse");
        assert_eq!(parsed.assets.len(), 1);
        assert_eq!(parsed.assets["app"].chain(BuildMode::Prod).len(), 2);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = parse_config("[server]\nprot = 8080\n").unwrap_err();
        match err {
            ForgeError::UnknownConfigOption { option } => assert_eq!(option, "prot"),
            other => panic!("unexpected error: {other}"),
        }

        let err = parse_config("colour = true\n").unwrap_err();
        assert!(matches!(err, ForgeError::UnknownConfigOption { .. }));
    }

    #[test]
    fn reserved_asset_names_fail_validation() {
        let parsed = parse_config(
            r#"
[assets.index]
kind = "markup"
"#,
        )
        .expect("parse");
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn malformed_globs_are_configuration_errors() {
        let mut config = ForgeConfig::default();
        if let Some(scripts) = config.assets.get_mut("scripts") {
            scripts.sources = vec!["src/[.js".into()];
        }
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        let message = err.to_string();
        assert!(message.contains("assets.scripts.sources"), "{message}");
        assert!(message.contains("position 4"), "{message}");

        let mut config = ForgeConfig::default();
        config.watch.ignore.push("**/[".into());
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn escaping_paths_fail_validation() {
        let mut config = ForgeConfig::default();
        config.paths.prod_root = "../outside".into();
        assert!(config.validate().is_err());
    }
}
