//! `compile-styles[:command]`: stylesheet sources to CSS.

use tracing::debug;

use assetforge_shared::{MediaKind, Result};

use super::exec::{run_filter, split_command};
use crate::{FileBlob, Transform, TransformContext};

/// Turns `.scss`/`.css` sources into `.css` files.
///
/// Files whose name starts with `_` are partials, imported by other files and
/// never emitted. With a command (e.g. `compile-styles:sass --stdin`) each
/// file is piped through it; without one the contents pass through unchanged.
#[derive(Debug, Clone)]
pub struct CompileStyles {
    spec: String,
    command: Option<Vec<String>>,
}

impl CompileStyles {
    const NAME: &'static str = "compile-styles";

    pub fn new(command: Option<&str>) -> Result<Self> {
        Ok(match command {
            Some(cmd) => Self {
                spec: format!("{}:{cmd}", Self::NAME),
                command: Some(split_command(Self::NAME, cmd)?),
            },
            None => Self {
                spec: Self::NAME.to_string(),
                command: None,
            },
        })
    }
}

impl Transform for CompileStyles {
    fn name(&self) -> &str {
        &self.spec
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::StyleSource
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Style
    }

    fn apply(&self, files: Vec<FileBlob>, cx: &TransformContext) -> Result<Vec<FileBlob>> {
        let mut out = Vec::with_capacity(files.len());
        for file in files {
            if file.file_name().starts_with('_') {
                debug!(file = %file.path.display(), "skipping partial");
                continue;
            }
            let contents = match &self.command {
                Some(argv) => run_filter(Self::NAME, argv, &cx.project_root, &file)?,
                None => file.contents,
            };
            out.push(FileBlob::new(file.path.with_extension("css"), contents));
        }
        Ok(out)
    }
}
