//! Ordered transform chains.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};

use assetforge_shared::{CancelToken, ForgeError, MediaKind, Result};

use crate::registry::TransformRegistry;
use crate::{FileBlob, Transform, TransformContext};

/// One resolved step of a chain.
#[derive(Debug, Clone)]
pub struct ChainStep {
    spec: String,
    transform: Arc<dyn Transform>,
}

impl ChainStep {
    pub fn new(spec: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        Self {
            spec: spec.into(),
            transform,
        }
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Transform name without its argument (`concat:app.js` → `concat`).
    pub fn name(&self) -> &str {
        self.spec.split_once(':').map_or(&self.spec, |(name, _)| name)
    }

    pub fn transform(&self) -> &Arc<dyn Transform> {
        &self.transform
    }
}

/// An ordered sequence of transforms applied to one asset's files.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    steps: Vec<ChainStep>,
}

impl Chain {
    pub fn new(steps: Vec<ChainStep>) -> Self {
        Self { steps }
    }

    /// Resolve step specs against `registry`.
    pub fn from_specs<S: AsRef<str>>(registry: &TransformRegistry, specs: &[S]) -> Result<Self> {
        let steps = specs
            .iter()
            .map(|spec| {
                let spec = spec.as_ref();
                registry
                    .create(spec)
                    .map(|transform| ChainStep::new(spec, transform))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(ChainStep::spec)
    }

    /// Check that each step accepts what the previous one produces.
    ///
    /// Returns the kind produced by the last step.
    pub fn validate(&self, input: MediaKind) -> Result<MediaKind> {
        let mut current = input;
        for step in &self.steps {
            let expected = step.transform.input_kind();
            if !expected.accepts(current) {
                return Err(ForgeError::ChainTypeMismatch {
                    step: step.spec.clone(),
                    expected: expected.to_string(),
                    found: current.to_string(),
                });
            }
            current = match step.transform.output_kind() {
                MediaKind::Any => current,
                kind => kind,
            };
        }
        Ok(current)
    }

    /// Run every step in order on the blocking pool.
    ///
    /// Cancellation is observed between steps. The first failing step ends
    /// the chain with `Transform { step, cause }`.
    #[instrument(skip_all, fields(steps = self.steps.len(), files = files.len()))]
    pub async fn apply(
        &self,
        mut files: Vec<FileBlob>,
        cx: &TransformContext,
        cancel: &CancelToken,
    ) -> Result<Vec<FileBlob>> {
        for step in &self.steps {
            if cancel.is_cancelled() {
                debug!(step = step.spec(), "chain cancelled before step");
                return Err(ForgeError::Cancelled);
            }

            let started = Instant::now();
            let transform = Arc::clone(&step.transform);
            let step_cx = cx.clone();
            let input = std::mem::take(&mut files);

            files = tokio::task::spawn_blocking(move || transform.apply(input, &step_cx))
                .await
                .map_err(|e| ForgeError::transform(step.name(), format!("step panicked: {e}")))?
                .map_err(|e| match e {
                    err @ (ForgeError::Transform { .. } | ForgeError::Cancelled) => err,
                    other => ForgeError::transform(step.name(), other.to_string()),
                })?;

            debug!(
                step = step.spec(),
                files = files.len(),
                elapsed_ms = started.elapsed().as_millis(),
                "step complete"
            );
        }
        Ok(files)
    }
}
