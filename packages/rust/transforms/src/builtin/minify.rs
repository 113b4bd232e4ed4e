//! `minify-js`, `minify-css` and `minify-html`.

use std::sync::LazyLock;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use regex::{Captures, Regex};

use assetforge_shared::{ForgeError, MediaKind, Result};

use super::js::{self, SegmentKind};
use crate::{FileBlob, Transform, TransformContext};

/// Apply `f` to the text of every file.
fn map_text(
    step: &str,
    files: Vec<FileBlob>,
    f: impl Fn(&FileBlob, &str) -> Result<String>,
) -> Result<Vec<FileBlob>> {
    files
        .into_iter()
        .map(|file| {
            let out = f(&file, file.text(step)?)?;
            Ok(FileBlob::new(file.path, out))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// minify-js
// ---------------------------------------------------------------------------

/// Strips comments and redundant whitespace. Line breaks are kept (collapsed)
/// so automatic semicolon insertion is unaffected. `/*! ... */` comments survive.
#[derive(Debug, Clone, Copy)]
pub struct MinifyJs;

impl MinifyJs {
    const NAME: &'static str = "minify-js";

    pub fn minify(path: &str, src: &str) -> Result<String> {
        let segments = js::segments(src).map_err(|e| {
            ForgeError::transform(Self::NAME, format!("{path}:{}: {}", e.line, e.message))
        })?;

        #[derive(PartialEq, PartialOrd)]
        enum Gap {
            None,
            Space,
            Newline,
        }

        let mut out = String::with_capacity(src.len());
        let mut gap = Gap::None;

        for seg in segments {
            match seg.kind {
                SegmentKind::Space | SegmentKind::Comment if !seg.text.starts_with("/*!") => {
                    let this = if seg.has_newline() { Gap::Newline } else { Gap::Space };
                    if this > gap {
                        gap = this;
                    }
                }
                _ => {
                    if !out.is_empty() {
                        match gap {
                            Gap::Newline => out.push('\n'),
                            Gap::Space if needs_space(&out, seg.text) => out.push(' '),
                            _ => {}
                        }
                    }
                    gap = Gap::None;
                    out.push_str(seg.text);
                }
            }
        }
        Ok(out)
    }
}

/// Whether dropping the whitespace between `before` and `after` would merge tokens.
fn needs_space(before: &str, after: &str) -> bool {
    let (Some(&a), Some(&b)) = (before.as_bytes().last(), after.as_bytes().first()) else {
        return false;
    };
    (js::is_ident_byte(a) && js::is_ident_byte(b))
        || (a == b'+' && b == b'+')
        || (a == b'-' && b == b'-')
        || (a == b'/' && (b == b'/' || b == b'*'))
}

impl Transform for MinifyJs {
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
        map_text(Self::NAME, files, |file, src| {
            Self::minify(&file.path.display().to_string(), src)
        })
    }
}

// ---------------------------------------------------------------------------
// minify-css
// ---------------------------------------------------------------------------

/// Parses with lightningcss and prints minified.
#[derive(Debug, Clone, Copy)]
pub struct MinifyCss;

impl MinifyCss {
    const NAME: &'static str = "minify-css";

    pub fn minify(path: &str, src: &str) -> Result<String> {
        let fail = |what: &str, e: &dyn std::fmt::Display| {
            ForgeError::transform(Self::NAME, format!("{path}: {what}: {e}"))
        };

        let options = ParserOptions {
            filename: path.to_string(),
            ..ParserOptions::default()
        };
        let mut sheet = StyleSheet::parse(src, options).map_err(|e| fail("parse error", &e))?;
        sheet
            .minify(MinifyOptions::default())
            .map_err(|e| fail("minify error", &e))?;
        let printed = sheet
            .to_css(PrinterOptions {
                minify: true,
                ..PrinterOptions::default()
            })
            .map_err(|e| fail("print error", &e))?;
        Ok(printed.code)
    }
}

impl Transform for MinifyCss {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Style
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Style
    }

    fn apply(&self, files: Vec<FileBlob>, _cx: &TransformContext) -> Result<Vec<FileBlob>> {
        map_text(Self::NAME, files, |file, src| {
            Self::minify(&file.path.display().to_string(), src)
        })
    }
}

// ---------------------------------------------------------------------------
// minify-html
// ---------------------------------------------------------------------------

/// Removes comments and collapses whitespace between tags.
///
/// Inject markers and conditional comments are kept; `<pre>`, `<textarea>`,
/// `<script>` and `<style>` bodies are left untouched.
#[derive(Debug, Clone, Copy)]
pub struct MinifyHtml;

impl MinifyHtml {
    pub fn minify(src: &str) -> String {
        static PRESERVE_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>",
            )
            .expect("valid regex")
        });

        static PLACEHOLDER_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"<\x01(\d+)>").expect("valid regex"));

        // Swap preserved blocks for tag-shaped placeholders so whitespace
        // around them collapses like around any other tag.
        let mut preserved: Vec<String> = Vec::new();
        let masked = PRESERVE_RE.replace_all(src, |caps: &Captures<'_>| {
            preserved.push(caps[0].to_string());
            format!("<\x01{}>", preserved.len() - 1)
        });
        let minified = minify_fragment(&masked);
        let restored = PLACEHOLDER_RE.replace_all(&minified, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| preserved.get(i).cloned())
                .unwrap_or_default()
        });
        restored.trim().to_string()
    }
}

fn minify_fragment(html: &str) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--(.*?)-->").expect("valid regex"));
    static KEEP_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:\[if\b|<!\[endif\]|\s*[\w-]+:\w+\s*$|\s*endinject\s*$)").expect("valid regex")
    });

    let stripped = COMMENT_RE.replace_all(html, |caps: &Captures<'_>| {
        if KEEP_COMMENT_RE.is_match(&caps[1]) {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    collapse_text(&stripped)
}

/// Collapse whitespace in text between tags; tags themselves are copied as is.
///
/// Whitespace-only text spanning a line break is dropped, other runs become a
/// single space.
fn collapse_text(html: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"<(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("valid regex")
    });
    static SPACE_RUN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid regex"));

    let mut out = String::with_capacity(html.len());
    let push_text = |out: &mut String, text: &str| {
        if text.trim().is_empty() && text.contains('\n') {
            return;
        }
        out.push_str(&SPACE_RUN_RE.replace_all(text, " "));
    };

    let mut last = 0;
    for tag in TAG_RE.find_iter(html) {
        push_text(&mut out, &html[last..tag.start()]);
        out.push_str(tag.as_str());
        last = tag.end();
    }
    push_text(&mut out, &html[last..]);
    out
}

impl Transform for MinifyHtml {
    fn name(&self) -> &str {
        "minify-html"
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Markup
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Markup
    }

    fn apply(&self, files: Vec<FileBlob>, _cx: &TransformContext) -> Result<Vec<FileBlob>> {
        map_text(self.name(), files, |_, src| Ok(Self::minify(src)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_comments_and_whitespace_are_removed() {
        let src = "/*! keep me */\n// drop\nfunction add(a, b) {\n    return a + b; /* inline */\n}\n\n\nvar s = \"  // not a comment  \";\n";
        let out = MinifyJs::minify("a.js", src).unwrap();
        assert_eq!(
            out,
            "/*! keep me */\nfunction add(a,b){\nreturn a+b;\n}\nvar s=\"  // not a comment  \";"
        );
    }

    #[test]
    fn js_tokens_are_not_merged() {
        let out = MinifyJs::minify("a.js", "a + +b; c - -d; x = y / /re/.source;").unwrap();
        assert_eq!(out, "a+ +b;c- -d;x=y/ /re/.source;");
    }

    #[test]
    fn js_minify_is_stable() {
        let once = MinifyJs::minify("a.js", "var t = `a ${ b } c`;  // t\n").unwrap();
        let twice = MinifyJs::minify("a.js", &once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "var t=`a ${ b } c`;");
    }

    #[test]
    fn css_is_minified() {
        let out = MinifyCss::minify("site.css", "body {\n  color: #ff0000;\n  margin: 0px;\n}\n").unwrap();
        assert_eq!(out, "body{color:red;margin:0}");
    }

    #[test]
    fn invalid_css_fails_with_step_name() {
        match MinifyCss::minify("bad.css", "body { color: red; ") {
            Ok(_) => {}
            Err(ForgeError::Transform { step, cause }) => {
                assert_eq!(step, "minify-css");
                assert!(cause.starts_with("bad.css"));
            }
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn html_attribute_values_are_left_alone() {
        let out = MinifyHtml::minify("<p title=\"a  b\">x</p>\n<input value=\"two  spaces\">");
        assert_eq!(out, "<p title=\"a  b\">x</p><input value=\"two  spaces\">");

        let out = MinifyHtml::minify("<a href=\"#\" data-x='1 > 0  ok'>one   two</a>  <b>three</b>");
        assert_eq!(out, "<a href=\"#\" data-x='1 > 0  ok'>one two</a> <b>three</b>");
    }

    #[test]
    fn html_keeps_markers_and_preformatted_text() {
        let src = "<html>\n  <head>\n    <!-- inject:css -->\n    <!-- endinject -->\n    <!-- a note -->\n  </head>\n  <body>\n    <pre>\n  keep   this\n</pre>\n  </body>\n</html>\n";
        let out = MinifyHtml::minify(src);
        assert_eq!(
            out,
            "<html><head><!-- inject:css --><!-- endinject --></head><body><pre>\n  keep   this\n</pre></body></html>"
        );
    }
}
