//! Built-in `uses:` actions
//!
//! These cover the docs pipeline: check out the source, compute the pages
//! URL, hand the built site to the deploy stage and publish it.

use crate::runner::{
    response::{ToolError, ToolOutput},
    Invocation,
};
use std::fs;
use std::io;
use std::path::{Component, Path};
use tracing::{debug, info};

pub const CHECKOUT: &str = "checkout";
pub const CONFIGURE_PAGES: &str = "configure-pages";
pub const UPLOAD_ARTIFACT: &str = "upload-artifact";
pub const DEPLOY_PAGES: &str = "deploy-pages";

pub const BUILTIN_ACTIONS: &[&str] = &[CHECKOUT, CONFIGURE_PAGES, UPLOAD_ARTIFACT, DEPLOY_PAGES];

/// Artifact name used when `with.name` / `with.artifact_name` is absent
pub const DEFAULT_ARTIFACT: &str = "github-pages";

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_ACTIONS.contains(&name)
}

/// Run a built-in action on the blocking pool
pub async fn run(name: &str, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
    let name = name.to_string();
    let invocation = invocation.clone();

    tokio::task::spawn_blocking(move || match name.as_str() {
        CHECKOUT => checkout(&invocation),
        CONFIGURE_PAGES => Ok(configure_pages(&invocation)),
        UPLOAD_ARTIFACT => upload_artifact(&invocation),
        DEPLOY_PAGES => deploy_pages(&invocation),
        other => Err(ToolError::NotFound(format!("action '{}'", other))),
    })
    .await
    .map_err(|e| ToolError::Internal(format!("action task failed: {}", e)))?
}

fn checkout(invocation: &Invocation) -> Result<ToolOutput, ToolError> {
    let source = invocation
        .source_dir
        .as_ref()
        .ok_or_else(|| ToolError::NotFound("checkout source directory".to_string()))?;

    if !source.is_dir() {
        return Err(ToolError::NotFound(source.display().to_string()));
    }

    let copied = copy_tree(source, &invocation.working_dir)
        .map_err(|e| fs_error("checking out source", e))?;
    debug!(step = %invocation.step_id, "Checked out {} files from {}", copied, source.display());

    Ok(ToolOutput::success()
        .with_stdout(format!("checked out {} into workspace ({} files)", invocation.repository, copied))
        .with_output("path", invocation.working_dir.display().to_string()))
}

fn configure_pages(invocation: &Invocation) -> ToolOutput {
    ToolOutput::success()
        .with_output("base_url", invocation.repository.pages_url())
        .with_output("base_path", format!("/{}", invocation.repository.name))
}

fn upload_artifact(invocation: &Invocation) -> Result<ToolOutput, ToolError> {
    let Some(path) = invocation.inputs.get("path") else {
        return Ok(ToolOutput::failure(1, "upload-artifact: missing input 'path'"));
    };
    let name = artifact_name(invocation, "name");
    if !is_contained(path) {
        return Ok(ToolOutput::failure(
            1,
            format!("upload-artifact: path '{}' must stay inside the workspace", path),
        ));
    }
    if !is_contained(name) {
        return Ok(ToolOutput::failure(
            1,
            format!("upload-artifact: invalid artifact name '{}'", name),
        ));
    }

    let source = invocation.working_dir.join(path);
    if !source.exists() {
        return Ok(ToolOutput::failure(
            1,
            format!("upload-artifact: path '{}' does not exist", path),
        ));
    }

    let target = invocation.artifacts_dir.join(name);
    if target.exists() {
        fs::remove_dir_all(&target).map_err(|e| fs_error("replacing artifact", e))?;
    }
    fs::create_dir_all(&target).map_err(|e| fs_error("creating artifact store", e))?;

    let copied = if source.is_dir() {
        copy_tree(&source, &target)
    } else {
        copy_file(&source, &target)
    }
    .map_err(|e| fs_error("uploading artifact", e))?;

    info!(step = %invocation.step_id, artifact = %name, "Uploaded artifact ({} files)", copied);

    Ok(ToolOutput::success()
        .with_stdout(format!("uploaded {} files as '{}'", copied, name))
        .with_output("artifact", name))
}

fn deploy_pages(invocation: &Invocation) -> Result<ToolOutput, ToolError> {
    let name = artifact_name(invocation, "artifact_name");
    if !is_contained(name) {
        return Ok(ToolOutput::failure(
            1,
            format!("deploy-pages: invalid artifact name '{}'", name),
        ));
    }
    let artifact = invocation.artifacts_dir.join(name);
    if !artifact.is_dir() {
        return Ok(ToolOutput::failure(
            1,
            format!("deploy-pages: no artifact named '{}' in this run", name),
        ));
    }

    let publish = &invocation.publish_dir;
    if publish.exists() {
        fs::remove_dir_all(publish).map_err(|e| fs_error("clearing publish directory", e))?;
    }
    fs::create_dir_all(publish).map_err(|e| fs_error("creating publish directory", e))?;

    let copied = copy_tree(&artifact, publish).map_err(|e| fs_error("publishing artifact", e))?;
    let page_url = invocation.repository.pages_url();

    info!(step = %invocation.step_id, url = %page_url, "Published {} files", copied);

    Ok(ToolOutput::success()
        .with_stdout(format!("published {} files to {}", copied, publish.display()))
        .with_output("page_url", page_url))
}

fn artifact_name<'a>(invocation: &'a Invocation, key: &str) -> &'a str {
    invocation
        .inputs
        .get(key)
        .map(String::as_str)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_ARTIFACT)
}

/// True when `path` is relative and never leaves the directory it is joined to
fn is_contained(path: &str) -> bool {
    let mut components = Path::new(path).components().peekable();
    components.peek().is_some()
        && components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn fs_error(what: &str, err: io::Error) -> ToolError {
    ToolError::Internal(format!("{}: {}", what, err))
}

fn copy_file(source: &Path, target_dir: &Path) -> io::Result<usize> {
    let file_name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    fs::copy(source, target_dir.join(file_name))?;
    Ok(1)
}

/// Recursively copy the contents of `source` into `target`, returning the
/// number of files copied. `target` itself is skipped when nested in `source`.
pub fn copy_tree(source: &Path, target: &Path) -> io::Result<usize> {
    fs::create_dir_all(target)?;
    let skip = target.canonicalize().ok();
    copy_dir(source, target, skip.as_deref())
}

fn copy_dir(source: &Path, target: &Path, skip: Option<&Path>) -> io::Result<usize> {
    let mut copied = 0;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let destination = target.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            if skip.is_some() && path.canonicalize().ok().as_deref() == skip {
                continue;
            }
            fs::create_dir_all(&destination)?;
            copied += copy_dir(&path, &destination, skip)?;
        } else {
            fs::copy(&path, &destination)?;
            copied += 1;
        }
    }
    Ok(copied)
}
