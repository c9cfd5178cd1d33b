//! Git operations over the per-service source checkouts
//!
//! Each service that builds from source keeps a clone under the sources
//! directory. Everything here is plain `git` via the command executor;
//! ref selection (branch vs release tag) happens in Rust rather than in
//! shell pipelines.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{HubError, HubResult};
use crate::process::{run_command, RunOptions};

const FETCH_TIMEOUT_SECS: u64 = 60;
const PULL_TIMEOUT_SECS: u64 = 60;

/// The ref an update pipeline checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Branch(String),
    Tag(String),
}

impl SourceRef {
    pub fn name(&self) -> &str {
        match self {
            SourceRef::Branch(n) | SourceRef::Tag(n) => n,
        }
    }
}

async fn git(repo: &Path, args: &[&str], timeout: u64) -> HubResult<crate::process::CommandOutput> {
    let mut argv = vec!["git"];
    argv.extend_from_slice(args);
    run_command(&argv, RunOptions::in_dir(repo).timeout(timeout).checked()).await
}

pub fn has_repo(repo: &Path) -> bool {
    repo.join(".git").exists()
}

pub async fn fetch_all(repo: &Path) -> HubResult<()> {
    git(repo, &["fetch", "--all", "--tags", "--prune"], FETCH_TIMEOUT_SECS).await?;
    Ok(())
}

/// Current HEAD revision, if the repo is readable.
pub async fn head_revision(repo: &Path) -> Option<String> {
    match git(repo, &["rev-parse", "HEAD"], 30).await {
        Ok(out) => {
            let rev = out.stdout.trim().to_string();
            (!rev.is_empty()).then_some(rev)
        }
        Err(err) => {
            debug!(repo = %repo.display(), %err, "no readable HEAD");
            None
        }
    }
}

/// Default branch: origin/HEAD when the remote advertises one, else
/// `main` if the remote has it, else `master`.
pub async fn default_branch(repo: &Path) -> String {
    if let Ok(out) = git(repo, &["symbolic-ref", "refs/remotes/origin/HEAD"], 30).await {
        if let Some(branch) = out.stdout.trim().strip_prefix("refs/remotes/origin/") {
            if !branch.is_empty() {
                return branch.to_string();
            }
        }
    }
    match git(repo, &["branch", "-r"], 30).await {
        Ok(out) if out.stdout.contains("origin/main") => "main".to_string(),
        _ => "master".to_string(),
    }
}

/// `vX.Y.Z` / `X.Y.Z` -> numeric triple.
pub fn parse_semver(tag: &str) -> Option<(u64, u64, u64)> {
    let trimmed = tag.strip_prefix('v').unwrap_or(tag);
    let mut parts = trimmed.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// Highest semantic version among the tags, compared numerically. When
/// nothing parses as semver, the most recently listed tag wins.
pub fn select_release_tag(tags: &[String]) -> Option<String> {
    tags.iter()
        .filter_map(|t| parse_semver(t).map(|v| (v, t)))
        .max_by_key(|(v, _)| *v)
        .map(|(_, t)| t.clone())
        .or_else(|| tags.last().cloned())
}

/// Tag names from `git ls-remote --tags origin`, peeled refs excluded,
/// in the order the remote listed them.
fn parse_ls_remote_tags(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter_map(|(_, r)| r.trim().strip_prefix("refs/tags/"))
        .filter(|tag| !tag.ends_with("^{}"))
        .map(str::to_string)
        .collect()
}

/// Pick the ref to deploy for a strategy. `stable` prefers the highest
/// release tag and falls back to the default branch when the remote has
/// no tags at all; every other strategy tracks the default branch.
pub async fn select_ref(repo: &Path, strategy: &str) -> HubResult<SourceRef> {
    if strategy == "stable" {
        let listing = git(repo, &["ls-remote", "--tags", "origin"], FETCH_TIMEOUT_SECS).await?;
        let tags = parse_ls_remote_tags(&listing.stdout);
        if let Some(tag) = select_release_tag(&tags) {
            return Ok(SourceRef::Tag(tag));
        }
        debug!(repo = %repo.display(), "no release tags, tracking default branch");
    }
    Ok(SourceRef::Branch(default_branch(repo).await))
}

/// Force-checkout the ref; branches are additionally reset to their
/// origin tip and pulled.
pub async fn checkout(repo: &Path, source_ref: &SourceRef) -> HubResult<()> {
    git(repo, &["checkout", "-f", source_ref.name()], 30).await?;
    if let SourceRef::Branch(branch) = source_ref {
        let origin = format!("origin/{branch}");
        git(repo, &["reset", "--hard", &origin], 30).await?;
        git(repo, &["pull"], PULL_TIMEOUT_SECS).await?;
    }
    Ok(())
}

/// `true` when the local branch is behind its upstream.
pub async fn is_behind(repo: &Path) -> bool {
    match git(repo, &["status", "-uno"], 30).await {
        Ok(out) => out.stdout.contains("behind"),
        Err(err) => {
            debug!(repo = %repo.display(), %err, "status check failed");
            false
        }
    }
}

/// What an update would bring in: commits between HEAD and the origin
/// tip of the default branch. Fetches first so the range is current.
pub async fn local_changelog(repo: &Path) -> HubResult<Vec<String>> {
    if let Err(err) = git(repo, &["fetch"], FETCH_TIMEOUT_SECS).await {
        debug!(repo = %repo.display(), %err, "changelog fetch failed");
    }
    let branch = default_branch(repo).await;
    let range = format!("HEAD..origin/{branch}");
    let out = git(repo, &["log", "--pretty=format:%h - %s (%cr)", &range], 30).await?;
    Ok(out
        .stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Release notes from the upstream GitHub repo, for services with no
/// local checkout.
pub async fn upstream_releases(repo_url: &str) -> HubResult<Value> {
    let path = repo_url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .split_once("github.com/")
        .map(|(_, rest)| rest.to_string())
        .ok_or_else(|| HubError::validation("repo", "not a github repository"))?;
    let url = format!("https://api.github.com/repos/{path}/releases?per_page=10");
    let client = reqwest::Client::builder()
        .user_agent("privacy-hub")
        .timeout(std::time::Duration::from_secs(15))
        .build()
        .map_err(|e| HubError::internal(format!("http client: {e}")))?;
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| HubError::external_tool("github", e.to_string()))?;
    if !response.status().is_success() {
        warn!(status = %response.status(), %url, "release lookup failed");
        return Err(HubError::external_tool(
            "github",
            format!("status {}", response.status()),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| HubError::external_tool("github", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semver_parses_with_and_without_prefix() {
        assert_eq!(parse_semver("v1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_semver("10.0.1"), Some((10, 0, 1)));
        assert_eq!(parse_semver("v1.2"), None);
        assert_eq!(parse_semver("nightly"), None);
        assert_eq!(parse_semver("1.2.3.4"), None);
    }

    #[test]
    fn highest_version_wins_numerically_not_lexically() {
        let tags: Vec<String> = ["v1.9.0", "v1.10.0", "v1.2.0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(select_release_tag(&tags), Some("v1.10.0".to_string()));
    }

    #[test]
    fn falls_back_to_last_listed_tag_when_nothing_is_semver() {
        let tags: Vec<String> = ["nightly", "release-old", "release-new"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(select_release_tag(&tags), Some("release-new".to_string()));
        assert_eq!(select_release_tag(&[]), None);
    }

    #[test]
    fn ls_remote_parsing_excludes_peeled_refs() {
        let listing = "aaaa\trefs/tags/v1.0.0\n\
                       bbbb\trefs/tags/v1.0.0^{}\n\
                       cccc\trefs/tags/v2.0.0\n\
                       dddd\trefs/heads/main\n";
        assert_eq!(parse_ls_remote_tags(listing), vec!["v1.0.0", "v2.0.0"]);
    }
}
