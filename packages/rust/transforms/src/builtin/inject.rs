//! `inject`: fill marker blocks in markup with references to published assets.
//!
//! ```html
//! <!-- inject:js -->
//! <script src="/js/scripts.3f2a9c01bd.js"></script>
//! <!-- endinject -->
//! ```
//!
//! The group before the colon selects an injection group; the extension after
//! it filters that group's URLs. Existing block contents are replaced, so
//! injecting twice gives the same result.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use assetforge_shared::{MediaKind, Result};

use crate::{FileBlob, Transform, TransformContext};

#[derive(Debug, Clone, Copy)]
pub struct Inject;

impl Inject {
    pub fn inject(html: &str, cx: &TransformContext) -> String {
        static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?s)([ \t]*)<!--\s*([\w-]+):(\w+)\s*-->.*?<!--\s*endinject\s*-->")
                .expect("valid regex")
        });

        BLOCK_RE
            .replace_all(html, |caps: &Captures<'_>| {
                let indent = &caps[1];
                let group = &caps[2];
                let ext = &caps[3];
                let Some(tag) = tag_template(ext) else {
                    return caps[0].to_string();
                };

                let suffix = format!(".{ext}");
                let mut block = format!("{indent}<!-- {group}:{ext} -->\n");
                for url in cx
                    .injections
                    .get(group)
                    .into_iter()
                    .flatten()
                    .filter(|url| url.ends_with(&suffix))
                {
                    block.push_str(indent);
                    block.push_str(&tag.replace("{url}", url));
                    block.push('\n');
                }
                block.push_str(indent);
                block.push_str("<!-- endinject -->");
                block
            })
            .into_owned()
    }
}

fn tag_template(ext: &str) -> Option<&'static str> {
    match ext {
        "js" => Some(r#"<script src="{url}"></script>"#),
        "css" => Some(r#"<link rel="stylesheet" href="{url}">"#),
        "html" => Some(r#"<link rel="import" href="{url}">"#),
        _ => None,
    }
}

impl Transform for Inject {
    fn name(&self) -> &str {
        "inject"
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Markup
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Markup
    }

    fn apply(&self, files: Vec<FileBlob>, cx: &TransformContext) -> Result<Vec<FileBlob>> {
        files
            .into_iter()
            .map(|file| {
                let html = Self::inject(file.text(self.name())?, cx);
                Ok(FileBlob::new(file.path, html))
            })
            .collect()
    }
}
