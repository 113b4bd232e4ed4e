//! `exec:<command>`: pipe each file through an external process.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use assetforge_shared::{ForgeError, MediaKind, Result};

use crate::{FileBlob, Transform, TransformContext};

/// Placeholder replaced with the file's logical path in command arguments.
const PATH_PLACEHOLDER: &str = "{path}";

/// Runs `program args..` once per file with the contents on stdin and
/// replaces the contents with its stdout. Non-zero exit fails the step.
#[derive(Debug, Clone)]
pub struct Exec {
    spec: String,
    argv: Vec<String>,
}

impl Exec {
    pub fn new(command: &str) -> Result<Self> {
        Ok(Self {
            spec: format!("exec:{command}"),
            argv: split_command("exec", command)?,
        })
    }
}

impl Transform for Exec {
    fn name(&self) -> &str {
        &self.spec
    }

    fn input_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn output_kind(&self) -> MediaKind {
        MediaKind::Any
    }

    fn apply(&self, files: Vec<FileBlob>, cx: &TransformContext) -> Result<Vec<FileBlob>> {
        files
            .into_iter()
            .map(|file| {
                let contents = run_filter("exec", &self.argv, &cx.project_root, &file)?;
                Ok(FileBlob::new(file.path, contents))
            })
            .collect()
    }
}

/// Split a command line on whitespace, honouring single and double quotes.
pub(crate) fn split_command(step: &str, command: &str) -> Result<Vec<String>> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    argv.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(ForgeError::config(format!(
            "transform `{step}`: unbalanced quote in `{command}`"
        )));
    }
    if in_word {
        argv.push(current);
    }
    if argv.is_empty() {
        return Err(ForgeError::config(format!("transform `{step}` requires a command")));
    }
    Ok(argv)
}

/// Run `argv` with `file` on stdin and return stdout.
pub(crate) fn run_filter(step: &str, argv: &[String], cwd: &Path, file: &FileBlob) -> Result<Vec<u8>> {
    let path = file.path.to_string_lossy();
    let args: Vec<String> = argv[1..]
        .iter()
        .map(|a| a.replace(PATH_PLACEHOLDER, &path))
        .collect();

    debug!(step, program = %argv[0], file = %path, "running external command");

    let mut child = Command::new(&argv[0])
        .args(&args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ForgeError::transform(step, format!("{path}: failed to start `{}`: {e}", argv[0])))?;

    // stdin is written on its own thread while wait_with_output drains stdout.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = file.contents.clone();
        std::thread::spawn(move || stdin.write_all(&input))
    });

    let output = child
        .wait_with_output()
        .map_err(|e| ForgeError::transform(step, format!("{path}: {e}")))?;

    if let Some(writer) = writer {
        // Broken pipe here means the child stopped reading; its exit status decides.
        let _ = writer.join();
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        return Err(ForgeError::transform(
            step,
            format!(
                "{path}: `{}` exited with {}{}{}",
                argv[0],
                output.status,
                if detail.is_empty() { "" } else { ": " },
                detail
            ),
        ));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetforge_shared::BuildMode;

    fn cx() -> TransformContext {
        TransformContext::new(BuildMode::Prod, std::env::temp_dir())
    }

    #[test]
    fn command_lines_are_split_with_quotes() {
        assert_eq!(
            split_command("exec", r#"sed -e 's/a b/c/' "two words""#).unwrap(),
            vec!["sed", "-e", "s/a b/c/", "two words"]
        );
        assert!(split_command("exec", "   ").is_err());
        assert!(split_command("exec", "tr 'a").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn pipes_contents_through_command() {
        let out = Exec::new("tr a-z A-Z")
            .unwrap()
            .apply(vec![FileBlob::new("x.txt", "hello")], &cx())
            .unwrap();
        assert_eq!(out[0].contents, b"HELLO");
        assert_eq!(out[0].path, Path::new("x.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_fails_the_step() {
        let err = Exec::new("sh -c 'echo broken >&2; exit 3'")
            .unwrap()
            .apply(vec![FileBlob::new("x.txt", "")], &cx())
            .unwrap_err();
        match err {
            ForgeError::Transform { step, cause } => {
                assert_eq!(step, "exec");
                assert!(cause.contains("broken"), "{cause}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
