//! Built-in transforms.
//!
//! These are deliberately conservative: they catch obvious mistakes and
//! shrink output without attempting full language semantics. Anything more
//! involved goes through [`Exec`] and an external tool.

mod exec;
mod inject;
mod js;
mod lint;
mod minify;
mod scripts;
mod styles;

use std::path::PathBuf;
use std::sync::Arc;

use assetforge_shared::{CacheBustToken, MediaKind, Result};

use crate::registry::{TransformRegistry, required_arg};
use crate::{FileBlob, Transform, TransformContext};

pub use exec::Exec;
pub use inject::Inject;
pub use lint::{LintHtml, LintJs};
pub use minify::{MinifyCss, MinifyHtml, MinifyJs};
pub use scripts::{FileSort, Transpile};
pub use styles::CompileStyles;

/// Register every built-in factory on `registry`.
pub(crate) fn register_all(registry: &mut TransformRegistry) {
    registry.register("lint-js", |_| Ok(Arc::new(LintJs) as Arc<dyn Transform>));
    registry.register("lint-html", |_| Ok(Arc::new(LintHtml) as Arc<dyn Transform>));
    registry.register("compile-styles", |arg| {
        Ok(Arc::new(CompileStyles::new(arg)?) as Arc<dyn Transform>)
    });
    registry.register("filesort", |_| Ok(Arc::new(FileSort) as Arc<dyn Transform>));
    registry.register("transpile", |arg| {
        let command = required_arg("transpile", arg, "command")?;
        Ok(Arc::new(Transpile::new(command)?) as Arc<dyn Transform>)
    });
    registry.register("concat", |arg| {
        let output = required_arg("concat", arg, "output")?;
        Ok(Arc::new(Concat::new(output)) as Arc<dyn Transform>)
    });
    registry.register("minify-js", |_| Ok(Arc::new(MinifyJs) as Arc<dyn Transform>));
    registry.register("minify-css", |_| Ok(Arc::new(MinifyCss) as Arc<dyn Transform>));
    registry.register("minify-html", |_| Ok(Arc::new(MinifyHtml) as Arc<dyn Transform>));
    registry.register("cachebust", |_| Ok(Arc::new(CacheBust) as Arc<dyn Transform>));
    registry.register("inject", |_| Ok(Arc::new(Inject) as Arc<dyn Transform>));
    registry.register("exec", |arg| {
        let command = required_arg("exec", arg, "command")?;
        Ok(Arc::new(Exec::new(command)?) as Arc<dyn Transform>)
    });
    registry.register("copy", |_| Ok(Arc::new(CopyFiles) as Arc<dyn Transform>));
}

// ---------------------------------------------------------------------------
// copy
// ---------------------------------------------------------------------------

/// Identity transform.
#[derive(Debug, Clone, Copy)]
pub struct CopyFiles;

impl Transform for CopyFiles {
    fn name(&self) -> &str {
        "copy"
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn apply(&self, files: Vec<FileBlob>, _cx: &TransformContext) -> Result<Vec<FileBlob>> {
        Ok(files)
    }
}

// ---------------------------------------------------------------------------
// concat
// ---------------------------------------------------------------------------

/// Joins every input, in order, into a single file.
#[derive(Debug, Clone)]
pub struct Concat {
    spec: String,
    output: PathBuf,
}

impl Concat {
    pub fn new(output: &str) -> Self {
        Self {
            spec: format!("concat:{output}"),
            output: PathBuf::from(output),
        }
    }
}

impl Transform for Concat {
    fn name(&self) -> &str {
        &self.spec
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn apply(&self, files: Vec<FileBlob>, _cx: &TransformContext) -> Result<Vec<FileBlob>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let mut contents = Vec::new();
        for (i, file) in files.iter().enumerate() {
            if i > 0 {
                contents.push(b'\n');
            }
            contents.extend_from_slice(&file.contents);
        }
        Ok(vec![FileBlob::new(self.output.clone(), contents)])
    }
}

// ---------------------------------------------------------------------------
// cachebust
// ---------------------------------------------------------------------------

/// Embeds a content token in each file name.
#[derive(Debug, Clone, Copy)]
pub struct CacheBust;

impl Transform for CacheBust {
    fn name(&self) -> &str {
        "cachebust"
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn apply(&self, files: Vec<FileBlob>, _cx: &TransformContext) -> Result<Vec<FileBlob>> {
        Ok(files
            .into_iter()
            .map(|file| {
                let token = CacheBustToken::of(&file.contents);
                FileBlob {
                    path: token.stamp(&file.path),
                    contents: file.contents,
                }
            })
            .collect())
    }
}
