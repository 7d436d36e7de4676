//! Template rendering: variable substitution and persistence of the rendered file.
//!
//! Tokens take the form `${NAME}` or `$NAME`. A token is replaced only when
//! `NAME` is a key of the variable map; anything else is left verbatim, so
//! build-time references such as `$HOME` inside a `RUN` line survive unless
//! the caller explicitly binds them. Substitution is a single pass: values
//! are never re-scanned for tokens.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}\s]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("token pattern is valid")
});

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to prepare working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write rendered file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Substitute known variables into `template`.
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match variables.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Write `contents` to `path`, creating parent directories, and force it to disk.
pub fn persist(contents: &str, path: &Path) -> Result<PathBuf, RenderError> {
    let write_err = |source: std::io::Error| RenderError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RenderError::WorkDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut file = File::create(path).map_err(write_err)?;
    file.write_all(contents.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn literal_text_is_unchanged() {
        let template = "FROM busybox\nRUN echo hi\n";
        assert_eq!(render(template, &vars(&[("image", "x")])), template);
    }

    #[test]
    fn replaces_both_token_forms() {
        let out = render(
            "FROM ${base}:$version\nLABEL owner=$owner",
            &vars(&[("base", "ubuntu"), ("version", "18.04"), ("owner", "ci")]),
        );
        assert_eq!(out, "FROM ubuntu:18.04\nLABEL owner=ci");
    }

    #[test]
    fn unresolved_tokens_are_kept() {
        let out = render("RUN echo $HOME ${missing} $", &vars(&[("other", "x")]));
        assert_eq!(out, "RUN echo $HOME ${missing} $");
    }

    #[test]
    fn replaces_every_occurrence_once() {
        let out = render("$a-$a-${a}", &vars(&[("a", "$a")]));
        assert_eq!(out, "$a-$a-$a");
    }

    #[test]
    fn braced_names_may_contain_punctuation() {
        let out = render("${docker.host}", &vars(&[("docker.host", "tcp://h:2375")]));
        assert_eq!(out, "tcp://h:2375");
    }

    #[test]
    fn bare_token_stops_at_non_identifier() {
        let out = render("$name.txt", &vars(&[("name", "report")]));
        assert_eq!(out, "report.txt");
    }

    #[test]
    fn persist_writes_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("Dockerfile");
        let written = persist("FROM busybox\n", &path).unwrap();
        assert_eq!(written, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), "FROM busybox\n");
    }

    #[test]
    fn persist_reports_unwritable_target() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a file.
        let err = persist("x", dir.path()).unwrap_err();
        assert!(matches!(err, RenderError::Write { .. }));
    }
}
