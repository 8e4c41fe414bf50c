//! Git-backed [`HistoryProvider`].
//!
//! Shells out to the `git` binary in the repository root. Output formats are
//! chosen to be unambiguous to parse: porcelain blame, and `%x1f`/`%x1e`
//! field/record separators for `show` and `log`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::models::{BlameInfo, CommitInfo, RepoSlug};
use crate::traits::HistoryProvider;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
/// Remote whose URL names the code-host repository.
const REMOTE: &str = "origin";

/// History provider backed by the local `git` executable.
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl HistoryProvider for GitCli {
    async fn blame(&self, file: &Path, line: usize) -> Result<BlameInfo> {
        let range = format!("{},{}", line, line);
        let file = path_arg(file)?;
        let out = self
            .git(&["blame", "--porcelain", "-L", &range, "--", file])
            .await?;
        parse_blame_porcelain(&out, line)
    }

    async fn commit(&self, hash: &str) -> Result<CommitInfo> {
        let header = self
            .git(&["show", "-s", "--no-color", "--format=%H%x1f%an%x1f%aI%x1f%B", hash])
            .await?;
        let mut commit = parse_commit_record(&header)
            .with_context(|| format!("Unexpected git show output for {}", hash))?;

        commit.diff = self
            .git(&["show", "--no-color", "--format=", "--patch", hash])
            .await?
            .trim()
            .to_string();

        commit.changed_files = self
            .git(&["show", "--no-color", "--format=", "--name-only", hash])
            .await?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        Ok(commit)
    }

    async fn file_history(&self, file: &Path, max_count: usize) -> Result<Vec<CommitInfo>> {
        let count = max_count.to_string();
        let file = path_arg(file)?;
        let out = self
            .git(&[
                "log",
                "-n",
                &count,
                "--no-color",
                "--format=%H%x1f%an%x1f%aI%x1f%B%x1e",
                "--",
                file,
            ])
            .await?;

        out.split(RECORD_SEP)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(parse_commit_record)
            .collect()
    }

    async fn remote_info(&self) -> Result<Option<RepoSlug>> {
        let key = format!("remote.{}.url", REMOTE);
        match self.git(&["config", "--get", &key]).await {
            Ok(url) => Ok(parse_remote_url(url.trim())),
            // `git config --get` exits 1 when the key is missing.
            Err(_) => Ok(None),
        }
    }
}

fn path_arg(file: &Path) -> Result<&str> {
    file.to_str()
        .ok_or_else(|| anyhow::anyhow!("Path is not valid UTF-8: {}", file.display()))
}

/// Parse `git blame --porcelain` output for a single line.
pub fn parse_blame_porcelain(output: &str, line: usize) -> Result<BlameInfo> {
    let mut lines = output.lines();
    let header = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty blame output"))?;
    let commit_hash = header
        .split_whitespace()
        .next()
        .filter(|h| h.len() >= 7 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| anyhow::anyhow!("Malformed blame header: {}", header))?
        .to_string();

    let mut author = String::new();
    let mut author_email = String::new();
    let mut author_time: Option<i64> = None;
    let mut line_content = String::new();

    for l in lines {
        if let Some(content) = l.strip_prefix('\t') {
            line_content = content.to_string();
            break;
        }
        if let Some(rest) = l.strip_prefix("author-mail ") {
            author_email = rest.trim_matches(|c| c == '<' || c == '>').to_string();
        } else if let Some(rest) = l.strip_prefix("author-time ") {
            author_time = rest.trim().parse().ok();
        } else if let Some(rest) = l.strip_prefix("author ") {
            author = rest.to_string();
        }
    }

    let timestamp = author_time
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .ok_or_else(|| anyhow::anyhow!("Blame output missing author-time"))?;

    Ok(BlameInfo {
        commit_hash,
        author,
        author_email,
        timestamp,
        line,
        line_content,
    })
}

/// Parse one `%H%x1f%an%x1f%aI%x1f%B` record.
pub fn parse_commit_record(record: &str) -> Result<CommitInfo> {
    let mut fields = record.trim_start_matches('\n').splitn(4, FIELD_SEP);
    let hash = fields.next().unwrap_or("").trim().to_string();
    let author = fields.next().unwrap_or("").to_string();
    let date = fields
        .next()
        .ok_or_else(|| anyhow::anyhow!("Commit record missing date"))?;
    let message = fields.next().unwrap_or("").trim().to_string();

    if hash.is_empty() {
        bail!("Commit record missing hash");
    }

    let date = DateTime::parse_from_rfc3339(date.trim())
        .with_context(|| format!("Invalid commit date: {}", date))?
        .with_timezone(&Utc);

    Ok(CommitInfo {
        hash,
        author,
        date,
        message,
        diff: String::new(),
        changed_files: Vec::new(),
    })
}

/// Derive `owner/repo` from a remote URL.
///
/// Handles `git@host:owner/repo.git`, `ssh://git@host/owner/repo.git`, and
/// `https://host/owner/repo(.git)`.
pub fn parse_remote_url(url: &str) -> Option<RepoSlug> {
    let path = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("ssh://"))
    {
        rest.split_once('/')?.1
    } else {
        return None;
    };

    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = path.rsplitn(2, '/');
    let repo = parts.next()?;
    let owner = parts.next()?.rsplit('/').next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(RepoSlug::new(owner, repo))
}

/// Resolve the top-level directory of the repository containing `path`.
pub fn discover_repo_root(path: &Path) -> Result<PathBuf> {
    let dir = if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or_else(|| Path::new("."))
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    let output = std::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .with_context(|| "Failed to execute 'git rev-parse'. Is git installed?")?;

    if !output.status.success() {
        bail!("{} is not inside a git repository", path.display());
    }

    Ok(PathBuf::from(
        String::from_utf8_lossy(&output.stdout).trim(),
    ))
}
