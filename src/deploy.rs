//! Publishing the built site to a branch of a remote git repository.
//!
//! The work happens in a scratch repository under the cache folder which
//! survives between deploys, so only the objects that changed since the
//! previous publish have to be transferred.

use std::fs;
use std::process::{Command, Stdio};

use camino::Utf8Path;
use chrono::{SecondsFormat, Utc};

use crate::config::Config;
use crate::error::DeployError;
use crate::io;

const DIR_PUBLISH: &str = "publish";

/// Publish the `dist` folder using the remote and branch from the config.
pub fn deploy(config: &Config) -> Result<(), DeployError> {
    let remote = config
        .deploy
        .remote
        .as_deref()
        .ok_or(DeployError::MissingRemote)?;

    let work = config.cache.join(DIR_PUBLISH);
    publish(&config.dist(), &work, remote, &config.deploy.branch)?;

    Ok(())
}

/// Replace the contents of `branch` on `remote` with the contents of
/// `directory`, committing from the scratch repository at `work`. Returns
/// `false` when the branch already matched and nothing was pushed.
pub fn publish(
    directory: &Utf8Path,
    work: &Utf8Path,
    remote: &str,
    branch: &str,
) -> Result<bool, DeployError> {
    if !directory.is_dir() {
        return Err(DeployError::MissingDirectory(directory.to_path_buf()));
    }

    fs::create_dir_all(work)?;
    if !work.join(".git").is_dir() {
        tracing::info!("initializing {}", work);
        git(work, &["init", "--quiet"])?;
    }

    let heads = git(work, &["ls-remote", "--heads", remote, branch])?;
    if heads.trim().is_empty() {
        tracing::info!("branch {} doesn't exist on the remote yet, starting it", branch);
        git(work, &["symbolic-ref", "HEAD", &format!("refs/heads/{branch}")])?;
    } else {
        git(work, &["fetch", "--quiet", remote, branch])?;
        git(work, &["checkout", "--quiet", "--force", "-B", branch, "FETCH_HEAD"])?;
    }

    clear_worktree(work)?;
    let copied = io::copy_tree(directory, work)?;
    tracing::debug!("copied {} files into {}", copied, work);

    git(work, &["add", "--all"])?;
    if git(work, &["status", "--porcelain"])?.trim().is_empty() {
        tracing::info!("{} is up to date, nothing to deploy", branch);
        return Ok(false);
    }

    let message = format!("Update {}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    git(work, &["commit", "--quiet", "--message", &message])?;
    git(work, &["push", "--quiet", remote, &format!("HEAD:refs/heads/{branch}")])?;

    tracing::info!("pushed {} to {} ({})", branch, remote, message);
    Ok(true)
}

/// Remove everything but the repository itself.
fn clear_worktree(work: &Utf8Path) -> Result<(), DeployError> {
    for entry in work.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }

        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }

    Ok(())
}

fn git(work: &Utf8Path, args: &[&str]) -> Result<String, DeployError> {
    tracing::debug!("git {}", args.join(" "));

    let output = Command::new("git")
        .args(args)
        .current_dir(work)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        return Err(DeployError::Git(
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
