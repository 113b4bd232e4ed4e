//! `lint-js` and `lint-html`: structural checks that fail the chain.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use assetforge_shared::{ForgeError, MediaKind, Result};

use super::js::{self, SegmentKind};
use crate::{FileBlob, Transform, TransformContext};

/// Problems reported per failing chain before the list is truncated.
const MAX_REPORTED: usize = 20;

/// Fail with every collected problem, or pass the files through.
fn finish(step: &str, files: Vec<FileBlob>, problems: Vec<String>) -> Result<Vec<FileBlob>> {
    if problems.is_empty() {
        debug!(step, files = files.len(), "lint clean");
        return Ok(files);
    }
    let total = problems.len();
    let mut cause = problems
        .into_iter()
        .take(MAX_REPORTED)
        .collect::<Vec<_>>()
        .join("; ");
    if total > MAX_REPORTED {
        cause.push_str(&format!("; and {} more", total - MAX_REPORTED));
    }
    Err(ForgeError::transform(step, cause))
}

// ---------------------------------------------------------------------------
// lint-js
// ---------------------------------------------------------------------------

/// Delimiter balance, unterminated literals and `debugger` statements.
#[derive(Debug, Clone, Copy)]
pub struct LintJs;

impl LintJs {
    const NAME: &'static str = "lint-js";

    fn check(file: &FileBlob, problems: &mut Vec<String>) -> Result<()> {
        let path = file.path.display();
        let src = file.text(Self::NAME)?;
        let segments = match js::segments(src) {
            Ok(segments) => segments,
            Err(err) => {
                problems.push(format!("{path}:{}: {}", err.line, err.message));
                return Ok(());
            }
        };

        let mut open: Vec<(u8, usize)> = Vec::new();
        for seg in segments.iter().filter(|s| s.kind == SegmentKind::Code) {
            for word in seg.text.split(|c: char| !c.is_ascii() || !js::is_ident_byte(c as u8)) {
                if word == "debugger" {
                    problems.push(format!("{path}:{}: unexpected `debugger` statement", seg.line));
                }
            }
            for b in seg.text.bytes() {
                match b {
                    b'(' | b'[' | b'{' => open.push((b, seg.line)),
                    b')' | b']' | b'}' => {
                        let expected = match b {
                            b')' => b'(',
                            b']' => b'[',
                            _ => b'{',
                        };
                        match open.pop() {
                            Some((o, _)) if o == expected => {}
                            Some((o, line)) => {
                                problems.push(format!(
                                    "{path}:{}: `{}` does not close `{}` opened on line {line}",
                                    seg.line, b as char, o as char
                                ));
                                return Ok(());
                            }
                            None => {
                                problems.push(format!("{path}:{}: unmatched `{}`", seg.line, b as char));
                                return Ok(());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some((o, line)) = open.last() {
            problems.push(format!("{path}:{line}: unclosed `{}`", *o as char));
        }
        Ok(())
    }
}

impl Transform for LintJs {
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
        let mut problems = Vec::new();
        for file in &files {
            Self::check(file, &mut problems)?;
        }
        finish(Self::NAME, files, problems)
    }
}

// ---------------------------------------------------------------------------
// lint-html
// ---------------------------------------------------------------------------

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose closing tag may be omitted.
const OPTIONAL_CLOSE: &[&str] = &[
    "p", "li", "dt", "dd", "tr", "td", "th", "thead", "tbody", "tfoot", "option", "colgroup",
];

/// Unclosed comments and mismatched open/close tags.
#[derive(Debug, Clone, Copy)]
pub struct LintHtml;

impl LintHtml {
    const NAME: &'static str = "lint-html";

    fn check(file: &FileBlob, problems: &mut Vec<String>) -> Result<()> {
        static COMMENT_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
        static RAW_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?is)(<script\b[^>]*>).*?</script\s*>|(<style\b[^>]*>).*?</style\s*>")
                .expect("valid regex")
        });
        static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"<(/?)([A-Za-z][\w:.-]*)((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#)
                .expect("valid regex")
        });

        let path = file.path.display();
        let src = file.text(Self::NAME)?;

        // Blank out comments and raw text, keeping newlines so lines stay right.
        let mut masked = blank(src, &COMMENT_RE, |_| String::new());
        if let Some(start) = masked.find("<!--") {
            problems.push(format!("{path}:{}: unclosed comment", line_of(&masked, start)));
            return Ok(());
        }
        masked = blank(&masked, &RAW_TEXT_RE, |caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|open| open.as_str().to_string())
                .unwrap_or_default()
        });

        let mut open: Vec<(String, usize)> = Vec::new();
        for caps in TAG_RE.captures_iter(&masked) {
            let whole = caps.get(0).map_or(0, |m| m.start());
            let line = line_of(&masked, whole);
            let closing = !caps[1].is_empty();
            let self_closing = !caps[4].is_empty();
            let name = caps[2].to_ascii_lowercase();

            if VOID_ELEMENTS.contains(&name.as_str()) || self_closing {
                continue;
            }
            if !closing {
                if matches!(name.as_str(), "script" | "style") {
                    // Raw-text bodies were masked together with their closing tag.
                    continue;
                }
                open.push((name, line));
                continue;
            }

            loop {
                match open.pop() {
                    Some((top, _)) if top == name => break,
                    Some((top, _)) if OPTIONAL_CLOSE.contains(&top.as_str()) => continue,
                    Some((top, top_line)) => {
                        problems.push(format!(
                            "{path}:{line}: `</{name}>` does not close `<{top}>` opened on line {top_line}"
                        ));
                        return Ok(());
                    }
                    None => {
                        problems.push(format!("{path}:{line}: unexpected `</{name}>`"));
                        return Ok(());
                    }
                }
            }
        }

        if let Some((name, line)) = open
            .iter()
            .rev()
            .find(|(name, _)| !OPTIONAL_CLOSE.contains(&name.as_str()))
        {
            problems.push(format!("{path}:{line}: unclosed `<{name}>`"));
        }
        Ok(())
    }
}

/// Replace each match with `keep(caps)` followed by the newlines it spanned.
fn blank(src: &str, re: &Regex, keep: impl Fn(&regex::Captures<'_>) -> String) -> String {
    re.replace_all(src, |caps: &regex::Captures<'_>| {
        let newlines = caps[0].matches('\n').count();
        format!("{}{}", keep(caps), "\n".repeat(newlines))
    })
    .into_owned()
}

fn line_of(src: &str, offset: usize) -> usize {
    src[..offset].matches('\n').count() + 1
}

impl Transform for LintHtml {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Markup
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Markup
    }

    fn apply(&self, files: Vec<FileBlob>, _cx: &TransformContext) -> Result<Vec<FileBlob>> {
        let mut problems = Vec::new();
        for file in &files {
            Self::check(file, &mut problems)?;
        }
        finish(Self::NAME, files, problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetforge_shared::BuildMode;

    fn cx() -> TransformContext {
        TransformContext::new(BuildMode::Dev, std::env::temp_dir())
    }

    fn lint_cause(t: &dyn Transform, path: &str, src: &str) -> String {
        match t.apply(vec![FileBlob::new(path, src)], &cx()) {
            Err(ForgeError::Transform { step, cause }) => {
                assert_eq!(step, t.name());
                cause
            }
            other => panic!("expected lint failure, got {other:?}"),
        }
    }

    #[test]
    fn clean_script_passes_through() {
        let src = "function f(a) {\n  return [a, { b: '}' }];\n}\nvar re = /[)]/;\n";
        let out = LintJs.apply(vec![FileBlob::new("a.js", src)], &cx()).unwrap();
        assert_eq!(out[0].contents, src.as_bytes());
    }

    #[test]
    fn debugger_statement_is_reported_with_line() {
        let cause = lint_cause(&LintJs, "src/app.js", "var a;\nfunction f() {\n  debugger;\n}\n");
        assert_eq!(cause, "src/app.js:3: unexpected `debugger` statement");
    }

    #[test]
    fn unbalanced_delimiters_are_reported() {
        let cause = lint_cause(&LintJs, "a.js", "if (x) {\n  y(;\n}\n");
        assert_eq!(cause, "a.js:3: `}` does not close `(` opened on line 2");

        let cause = lint_cause(&LintJs, "b.js", "function f() {\n  return 1;\n");
        assert_eq!(cause, "b.js:1: unclosed `{`");
    }

    #[test]
    fn problems_across_files_are_collected() {
        let files = vec![
            FileBlob::new("a.js", "debugger;"),
            FileBlob::new("b.js", "ok();"),
            FileBlob::new("c.js", "'open"),
        ];
        let err = LintJs.apply(files, &cx()).unwrap_err();
        let cause = err.to_string();
        assert!(cause.contains("a.js:1"));
        assert!(cause.contains("c.js:1: unterminated string literal"));
        assert!(!cause.contains("b.js"));
    }

    #[test]
    fn balanced_markup_passes() {
        let src = "<div class=\"a>b\">\n  <img src=\"x.png\">\n  <ul><li>one<li>two</ul>\n  <br/>\n  <script>if (a < b) { x('</div>'); }</script>\n  <!-- <span> -->\n</div>\n";
        LintHtml.apply(vec![FileBlob::new("p.html", src)], &cx()).unwrap();
    }

    #[test]
    fn mismatched_tag_is_reported() {
        let cause = lint_cause(&LintHtml, "views/home.html", "<div>\n  <span>\n</div>\n");
        assert_eq!(
            cause,
            "views/home.html:3: `</div>` does not close `<span>` opened on line 2"
        );
    }

    #[test]
    fn unclosed_comment_is_reported() {
        let cause = lint_cause(&LintHtml, "x.html", "<p>hi</p>\n<!-- todo\n<div></div>\n");
        assert_eq!(cause, "x.html:2: unclosed comment");
    }

    #[test]
    fn unclosed_element_is_reported() {
        let cause = lint_cause(&LintHtml, "x.html", "<section>\n<div></div>\n");
        assert_eq!(cause, "x.html:1: unclosed `<section>`");
    }
}
