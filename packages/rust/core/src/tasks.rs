//! Task actions generated from configuration.
//!
//! - [`AssetTask`] reads an asset's sources, runs its chain and publishes
//! - [`IndexTask`] fills the entry point's inject blocks from published assets

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use assetforge_graph::{TaskAction, TaskContext, TaskFuture, TaskReport};
use assetforge_shared::{
    BuildContext, CancelToken, ForgeError, Fingerprint, Result, SourceFile, content_hash,
};
use assetforge_transforms::{Chain, FileBlob, Injections, TransformContext};

use crate::manifest::{ManifestStore, TaskRecord};
use crate::publish::{Output, publish};

/// State shared by every task of one pipeline.
#[derive(Debug)]
pub(crate) struct Shared {
    pub manifest: ManifestStore,
    /// Rebuild even when the fingerprint matches.
    pub force: bool,
}

// ---------------------------------------------------------------------------
// AssetTask
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AssetInner {
    name: String,
    dest: PathBuf,
    chain: Chain,
    shared: Arc<Shared>,
}

/// Builds one configured asset class.
#[derive(Debug, Clone)]
pub(crate) struct AssetTask {
    inner: Arc<AssetInner>,
}

impl AssetTask {
    pub fn new(name: &str, dest: PathBuf, chain: Chain, shared: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(AssetInner {
                name: name.to_string(),
                dest,
                chain,
                shared,
            }),
        }
    }
}

impl TaskAction for AssetTask {
    fn run(&self, cx: TaskContext) -> TaskFuture {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.build(cx).await })
    }
}

impl AssetInner {
    #[instrument(skip_all, fields(task = %cx.task_id))]
    async fn build(&self, cx: TaskContext) -> Result<TaskReport> {
        let sources = cx.build.sources(&self.name).to_vec();
        let files = read_sources(&cx.build, &sources).await?;

        let mut fingerprint = Fingerprint::new();
        fingerprint
            .part(&self.name)
            .part(cx.build.mode.as_str())
            .part(self.dest.to_string_lossy().as_bytes());
        for spec in self.chain.specs() {
            fingerprint.part(spec);
        }
        let record_sources = fingerprint_sources(&mut fingerprint, &files);
        let fingerprint = fingerprint.finish();

        if let Some(report) = up_to_date(&self.shared, &cx, &fingerprint)? {
            return Ok(report);
        }

        let tcx = TransformContext::new(cx.build.mode, &cx.build.project_root);
        let blobs = files.into_iter().map(|(_, blob)| blob).collect();
        let produced = self.chain.apply(blobs, &tcx, &cx.cancel).await?;

        let outputs = produced
            .into_iter()
            .map(|blob| Output {
                path: self.dest.join(&blob.path),
                contents: blob.contents,
            })
            .collect();
        finish(&self.shared, &cx, fingerprint, record_sources, outputs).await
    }
}

// ---------------------------------------------------------------------------
// IndexTask
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct IndexInner {
    chain: Chain,
    /// Asset task id → injection group, for assets that are injected.
    groups: BTreeMap<String, String>,
    shared: Arc<Shared>,
}

/// Publishes the HTML entry point with references to the injected assets.
#[derive(Debug, Clone)]
pub(crate) struct IndexTask {
    inner: Arc<IndexInner>,
}

impl IndexTask {
    pub fn new(chain: Chain, groups: BTreeMap<String, String>, shared: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                chain,
                groups,
                shared,
            }),
        }
    }
}

impl TaskAction for IndexTask {
    fn run(&self, cx: TaskContext) -> TaskFuture {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.build(cx).await })
    }
}

impl IndexInner {
    #[instrument(skip_all, fields(task = %cx.task_id))]
    async fn build(&self, cx: TaskContext) -> Result<TaskReport> {
        let sources = cx.build.sources(&cx.task_id).to_vec();
        if sources.is_empty() {
            return Err(ForgeError::validation("index source file not found"));
        }
        let files = read_sources(&cx.build, &sources).await?;
        let injections = self.injections()?;

        let mut fingerprint = Fingerprint::new();
        fingerprint.part(&cx.task_id).part(cx.build.mode.as_str());
        for spec in self.chain.specs() {
            fingerprint.part(spec);
        }
        for (group, urls) in &injections {
            fingerprint.part(group);
            for url in urls {
                fingerprint.part(url);
            }
        }
        let record_sources = fingerprint_sources(&mut fingerprint, &files);
        let fingerprint = fingerprint.finish();

        if let Some(report) = up_to_date(&self.shared, &cx, &fingerprint)? {
            return Ok(report);
        }

        let tcx = TransformContext::new(cx.build.mode, &cx.build.project_root)
            .with_injections(injections);
        let blobs = files.into_iter().map(|(_, blob)| blob).collect();
        let produced = self.chain.apply(blobs, &tcx, &cx.cancel).await?;

        let outputs = produced
            .into_iter()
            .map(|blob| Output {
                path: blob.path,
                contents: blob.contents,
            })
            .collect();
        finish(&self.shared, &cx, fingerprint, record_sources, outputs).await
    }

    /// Group → root-relative URLs of the last published outputs of each asset.
    fn injections(&self) -> Result<Injections> {
        let mut injections = Injections::new();
        for (task, group) in &self.groups {
            let urls = injections.entry(group.clone()).or_default();
            for output in self.shared.manifest.outputs(task)? {
                let segments: Vec<String> = output
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                urls.push(format!("/{}", segments.join("/")));
            }
        }
        Ok(injections)
    }
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

async fn read_sources(build: &BuildContext, sources: &[SourceFile]) -> Result<Vec<(PathBuf, FileBlob)>> {
    let mut files = Vec::with_capacity(sources.len());
    for source in sources {
        let path = build.source_path(source);
        let contents = tokio::fs::read(&path)
            .await
            .map_err(|e| ForgeError::io(&path, e))?;
        files.push((source.path.clone(), FileBlob::new(&source.logical, contents)));
    }
    Ok(files)
}

/// Feed each source into `fingerprint`; returns path → content hash.
fn fingerprint_sources(
    fingerprint: &mut Fingerprint,
    files: &[(PathBuf, FileBlob)],
) -> BTreeMap<String, String> {
    let mut hashes = BTreeMap::new();
    for (path, blob) in files {
        let hash = content_hash(&blob.contents);
        fingerprint
            .part(blob.path.to_string_lossy().as_bytes())
            .part(&hash);
        hashes.insert(path.to_string_lossy().into_owned(), hash);
    }
    hashes
}

/// `Some` when the last build had the same fingerprint and its outputs still exist.
fn up_to_date(shared: &Shared, cx: &TaskContext, fingerprint: &str) -> Result<Option<TaskReport>> {
    if shared.force {
        return Ok(None);
    }
    let Some(record) = shared.manifest.record(&cx.task_id)? else {
        return Ok(None);
    };
    if record.fingerprint != fingerprint {
        return Ok(None);
    }
    if !record.outputs.iter().all(|p| cx.build.output_root.join(p).is_file()) {
        debug!(task = %cx.task_id, "outputs missing, rebuilding");
        return Ok(None);
    }
    debug!(task = %cx.task_id, "up to date");
    Ok(Some(TaskReport::up_to_date(record.outputs)))
}

async fn finish(
    shared: &Arc<Shared>,
    cx: &TaskContext,
    fingerprint: String,
    sources: BTreeMap<String, String>,
    outputs: Vec<Output>,
) -> Result<TaskReport> {
    check_cancelled(&cx.cancel)?;

    // Publishing and the manifest write both touch the disk under the store lock.
    let shared = Arc::clone(shared);
    let output_root = cx.build.output_root.clone();
    let task = cx.task_id.clone();
    let published = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        let previous = shared.manifest.outputs(&task)?;
        let published = publish(&output_root, &task, outputs, &previous)?;
        shared.manifest.commit(
            &task,
            TaskRecord {
                fingerprint,
                sources,
                outputs: published.clone(),
            },
        )?;
        Ok(published)
    })
    .await
    .map_err(|e| ForgeError::validation(format!("publish task panicked: {e}")))??;

    info!(task = %cx.task_id, files = published.len(), "published");
    Ok(TaskReport::built(published))
}

fn check_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ForgeError::Cancelled);
    }
    Ok(())
}
