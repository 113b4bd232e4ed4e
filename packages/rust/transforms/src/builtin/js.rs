//! Minimal JavaScript lexer.
//!
//! Splits source into code, literal (string, template, regex), comment and
//! whitespace segments. Enough to keep `lint-js` and `minify-js` from
//! looking inside literals; it does not parse.

/// What a [`Segment`] contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    Code,
    Literal,
    Comment,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment<'a> {
    pub kind: SegmentKind,
    pub text: &'a str,
    /// 1-based line the segment starts on.
    pub line: usize,
}

impl Segment<'_> {
    pub fn has_newline(&self) -> bool {
        self.text.contains('\n')
    }
}

/// An unterminated literal or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LexError {
    pub line: usize,
    pub message: &'static str,
}

/// Keywords after which `/` starts a regex literal rather than a division.
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "case", "do", "else", "in", "of", "void", "yield", "await",
    "delete", "throw", "new",
];

pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

pub(crate) fn segments(src: &str) -> Result<Vec<Segment<'_>>, LexError> {
    let bytes = src.as_bytes();
    let mut out: Vec<Segment<'_>> = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut code_start: Option<(usize, usize)> = None;

    macro_rules! flush_code {
        () => {
            if let Some((start, start_line)) = code_start.take() {
                out.push(Segment {
                    kind: SegmentKind::Code,
                    text: &src[start..i],
                    line: start_line,
                });
            }
        };
    }

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                flush_code!();
                let (start, start_line) = (i, line);
                while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n') {
                    if bytes[i] == b'\n' {
                        line += 1;
                    }
                    i += 1;
                }
                out.push(Segment {
                    kind: SegmentKind::Space,
                    text: &src[start..i],
                    line: start_line,
                });
            }
            b'"' | b'\'' | b'`' => {
                flush_code!();
                let (start, start_line) = (i, line);
                i = if b == b'`' {
                    scan_template(bytes, i, &mut line)?
                } else {
                    scan_string(bytes, i, &mut line)?
                };
                out.push(Segment {
                    kind: SegmentKind::Literal,
                    text: &src[start..i],
                    line: start_line,
                });
            }
            b'/' if next == Some(b'/') => {
                flush_code!();
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                out.push(Segment {
                    kind: SegmentKind::Comment,
                    text: &src[start..i],
                    line,
                });
            }
            b'/' if next == Some(b'*') => {
                flush_code!();
                let (start, start_line) = (i, line);
                let Some(end) = src[i + 2..].find("*/") else {
                    return Err(LexError {
                        line,
                        message: "unterminated block comment",
                    });
                };
                i += 2 + end + 2;
                line += src[start..i].matches('\n').count();
                out.push(Segment {
                    kind: SegmentKind::Comment,
                    text: &src[start..i],
                    line: start_line,
                });
            }
            b'/' => {
                flush_code!();
                if regex_allowed(&out) {
                    let start = i;
                    i = scan_regex(bytes, i, line)?;
                    out.push(Segment {
                        kind: SegmentKind::Literal,
                        text: &src[start..i],
                        line,
                    });
                } else {
                    code_start = Some((i, line));
                    i += 1;
                }
            }
            _ => {
                if code_start.is_none() {
                    code_start = Some((i, line));
                }
                i += 1;
            }
        }
    }
    flush_code!();

    Ok(out)
}

/// Decide whether a `/` at this point opens a regex literal.
fn regex_allowed(out: &[Segment<'_>]) -> bool {
    let Some(prev) = out
        .iter()
        .rev()
        .find(|s| !matches!(s.kind, SegmentKind::Space | SegmentKind::Comment))
    else {
        return true;
    };
    if prev.kind == SegmentKind::Literal {
        return false;
    }
    let text = prev.text.as_bytes();
    let Some(&last) = text.last() else {
        return true;
    };
    if is_ident_byte(last) {
        let word_start = text
            .iter()
            .rposition(|b| !is_ident_byte(*b))
            .map_or(0, |p| p + 1);
        let word = &prev.text[word_start..];
        return REGEX_KEYWORDS.contains(&word);
    }
    !matches!(last, b')' | b']')
}

fn scan_string(bytes: &[u8], start: usize, line: &mut usize) -> Result<usize, LexError> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if bytes.get(i + 1) == Some(&b'\n') {
                    *line += 1;
                }
                i += 2;
            }
            b'\n' => break,
            b if b == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(LexError {
        line: *line,
        message: "unterminated string literal",
    })
}

fn scan_template(bytes: &[u8], start: usize, line: &mut usize) -> Result<usize, LexError> {
    let start_line = *line;
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => {
                *line += 1;
                i += 1;
            }
            b'`' => return Ok(i + 1),
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                i = scan_substitution(bytes, i + 2, line)?;
            }
            _ => i += 1,
        }
    }
    Err(LexError {
        line: start_line,
        message: "unterminated template literal",
    })
}

/// Skip a `${ ... }` body, returning the index after its closing brace.
fn scan_substitution(bytes: &[u8], start: usize, line: &mut usize) -> Result<usize, LexError> {
    let mut depth = 1;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            b'"' | b'\'' => i = scan_string(bytes, i, line)?,
            b'`' => i = scan_template(bytes, i, line)?,
            b'\n' => {
                *line += 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Err(LexError {
        line: *line,
        message: "unterminated template substitution",
    })
}

fn scan_regex(bytes: &[u8], start: usize, line: usize) -> Result<usize, LexError> {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => break,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Ok(i);
            }
            _ => i += 1,
        }
    }
    Err(LexError {
        line,
        message: "unterminated regular expression literal",
    })
}
