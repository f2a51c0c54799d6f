//! Version-control handoff: commit rendered output to a git repository

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, error, info};

use crate::delivery::channel::{
    render_manifests, ApplyReport, DeliveryChannel, DeliveryRequest, DryRunReport, PhaseOutput,
    Rendered,
};
use crate::delivery::tool::{ToolCommand, ToolOutput};
use crate::errors::FleetError;
use crate::filesys::dir::Dir;
use crate::models::downstream::{ExternalHandoffConfig, HandoffAction, HandoffFormat};
use crate::storage::layout::StorageLayout;

const COMMIT_AUTHOR_NAME: &str = "fleetdeck";
const COMMIT_AUTHOR_EMAIL: &str = "fleetdeck@localhost";

/// Pushes rendered manifests to a downstream's handoff repository
#[derive(Debug, Clone)]
pub struct GitHandoff {
    git: String,
    kustomize: String,
    layout: StorageLayout,
    config: ExternalHandoffConfig,
}

/// Branch a release is committed to
pub fn target_branch(config: &ExternalHandoffConfig, sequence: i64) -> String {
    match config.action {
        HandoffAction::Commit => config.branch.clone(),
        HandoffAction::Branch => format!("{}-release-{}", config.branch, sequence),
    }
}

/// Files to write into the repository, relative to its root
pub fn handoff_files(
    app_slug: &str,
    config: &ExternalHandoffConfig,
    manifests: &str,
) -> Vec<(PathBuf, String)> {
    let base = PathBuf::from(config.path.trim_matches('/'));
    match config.format {
        HandoffFormat::Single => {
            vec![(base.join(format!("{}.yaml", app_slug)), manifests.to_string())]
        }
        HandoffFormat::Split => split_documents(manifests)
            .into_iter()
            .enumerate()
            .map(|(i, doc)| {
                let name = format!("{:02}-{}.yaml", i, document_kind(&doc));
                (base.join(app_slug).join(name), doc)
            })
            .collect(),
    }
}

/// Split a multi-document YAML stream, dropping empty documents
fn split_documents(manifests: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in manifests.lines() {
        if line.trim_end() == "---" {
            push_document(&mut docs, &mut current);
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_document(&mut docs, &mut current);
    docs
}

fn push_document(docs: &mut Vec<String>, current: &mut String) {
    let doc = std::mem::take(current);
    if doc.lines().any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#')) {
        docs.push(doc);
    }
}

fn document_kind(doc: &str) -> String {
    doc.lines()
        .find_map(|l| l.strip_prefix("kind:"))
        .map(|k| k.trim().trim_matches('"').to_lowercase())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| "resource".to_string())
}

/// `GIT_SSH_COMMAND` using a specific private key
pub fn ssh_command(key_path: &Path) -> String {
    format!(
        "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
        key_path.display()
    )
}

/// Write handoff files under a repository root.
///
/// Split output replaces the application's directory wholesale so
/// documents removed from a release disappear from the repository.
pub async fn write_handoff_files(
    root: &Path,
    app_slug: &str,
    config: &ExternalHandoffConfig,
    files: &[(PathBuf, String)],
) -> Result<(), FleetError> {
    if config.format == HandoffFormat::Split {
        let base = root.join(config.path.trim_matches('/')).join(app_slug);
        Dir::new(base).delete().await?;
    }
    for (relative, contents) in files {
        crate::filesys::file::File::new(root.join(relative))
            .write_string(contents)
            .await?;
    }
    Ok(())
}

/// Materialize the deploy key (if any) and return the git environment
async fn git_env(
    layout: &StorageLayout,
    downstream_id: &str,
    config: &ExternalHandoffConfig,
) -> Result<Vec<(String, String)>, FleetError> {
    let Some(key) = &config.deploy_key else {
        return Ok(Vec::new());
    };
    let key_file = layout.handoff_key_file(downstream_id);
    let mut contents = key.expose_secret().to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    key_file.write_private(&contents).await?;
    Ok(vec![(
        "GIT_SSH_COMMAND".to_string(),
        ssh_command(key_file.path()),
    )])
}

/// Check that the handoff repository answers for the configured branch
pub async fn check_remote(
    git: &str,
    layout: &StorageLayout,
    downstream_id: &str,
    config: &ExternalHandoffConfig,
) -> Result<ToolOutput, FleetError> {
    let envs = git_env(layout, downstream_id, config).await?;
    let mut command = ToolCommand::new(git)
        .args(["ls-remote", "--heads", config.uri.as_str(), config.branch.as_str()])
        .env("GIT_TERMINAL_PROMPT", "0");
    for (key, value) in envs {
        command = command.env(&key, value);
    }
    command.run().await
}

impl GitHandoff {
    pub fn new(
        git: &str,
        kustomize: &str,
        layout: StorageLayout,
        config: ExternalHandoffConfig,
    ) -> Self {
        Self {
            git: git.to_string(),
            kustomize: kustomize.to_string(),
            layout,
            config,
        }
    }

    async fn git(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
        envs: &[(String, String)],
        output: &mut PhaseOutput,
    ) -> Result<bool, FleetError> {
        let mut command = ToolCommand::new(&self.git)
            .args(args.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(cwd) = cwd {
            command = command.current_dir(cwd);
        }
        for (key, value) in envs {
            command = command.env(key, value.clone());
        }
        let result = command.run().await?;
        output.extend(&result.stdout, &result.stderr);
        if !result.success {
            error!("git {} failed: {}", args.join(" "), result.stderr.trim());
        }
        Ok(result.success)
    }

    /// Clone the repository, or bring an existing working copy up to date,
    /// and check out the release's target branch
    async fn prepare_worktree(
        &self,
        worktree: &Path,
        branch: &str,
        envs: &[(String, String)],
        output: &mut PhaseOutput,
    ) -> Result<bool, FleetError> {
        let has_checkout = Dir::new(worktree.join(".git")).exists().await;
        if has_checkout {
            debug!("Fetching handoff repository into {}", worktree.display());
            if !self.git(&["fetch", "origin"], Some(worktree), envs, output).await? {
                return Ok(false);
            }
        } else {
            debug!("Cloning handoff repository into {}", worktree.display());
            Dir::new(worktree).delete().await?;
            let dest = worktree.to_string_lossy();
            if !self
                .git(&["clone", self.config.uri.as_str(), dest.as_ref()], None, envs, output)
                .await?
            {
                return Ok(false);
            }
        }

        let base = format!("origin/{}", self.config.branch);
        self.git(&["checkout", "-B", branch, base.as_str()], Some(worktree), envs, output)
            .await
    }
}

#[async_trait]
impl DeliveryChannel for GitHandoff {
    fn kind(&self) -> &'static str {
        "handoff"
    }

    async fn dry_run(&self, request: &DeliveryRequest) -> Result<DryRunReport, FleetError> {
        match render_manifests(&self.kustomize, request).await? {
            Rendered::Ok(manifests) => {
                let files = handoff_files(&request.app_slug, &self.config, &manifests);
                let listing = files
                    .iter()
                    .map(|(path, _)| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(DryRunReport::Rendered(PhaseOutput::new(listing, "")))
            }
            Rendered::Failed { error, output } => Ok(DryRunReport::RenderFailed { error, output }),
        }
    }

    async fn apply(&self, request: &DeliveryRequest) -> Result<ApplyReport, FleetError> {
        let mut output = PhaseOutput::default();
        let failed = |output: PhaseOutput| ApplyReport {
            succeeded: false,
            output,
            reference: None,
        };

        let manifests = match render_manifests(&self.kustomize, request).await? {
            Rendered::Ok(manifests) => manifests,
            Rendered::Failed { output, .. } => return Ok(failed(output)),
        };

        let envs = git_env(&self.layout, &request.downstream_id, &self.config).await?;
        let worktree_dir = self.layout.handoff_worktree(&request.downstream_id);
        let worktree = worktree_dir.path();
        let branch = target_branch(&self.config, request.release.sequence);

        if !self.prepare_worktree(worktree, &branch, &envs, &mut output).await? {
            return Ok(failed(output));
        }

        let files = handoff_files(&request.app_slug, &self.config, &manifests);
        write_handoff_files(worktree, &request.app_slug, &self.config, &files).await?;

        if !self.git(&["add", "--all"], Some(worktree), &envs, &mut output).await? {
            return Ok(failed(output));
        }

        // `diff --cached --quiet` exits non-zero when something is staged
        let staged = ToolCommand::new(&self.git)
            .args(["diff", "--cached", "--quiet"])
            .current_dir(worktree)
            .run()
            .await?;
        if staged.success {
            info!(
                "Release {} produced no changes in the handoff repository for {}",
                request.release.sequence, request.downstream_id
            );
        } else {
            let message = format!(
                "Updating {} to release {} for {}",
                request.app_slug, request.release.sequence, request.downstream_id
            );
            let author_name = format!("user.name={}", COMMIT_AUTHOR_NAME);
            let author_email = format!("user.email={}", COMMIT_AUTHOR_EMAIL);
            let args = [
                "-c",
                author_name.as_str(),
                "-c",
                author_email.as_str(),
                "commit",
                "-m",
                message.as_str(),
            ];
            if !self.git(&args, Some(worktree), &envs, &mut output).await? {
                return Ok(failed(output));
            }
        }

        if !self
            .git(&["push", "origin", branch.as_str()], Some(worktree), &envs, &mut output)
            .await?
        {
            return Ok(failed(output));
        }

        let head = ToolCommand::new(&self.git)
            .args(["rev-parse", "HEAD"])
            .current_dir(worktree)
            .run()
            .await?;
        let reference = head
            .success
            .then(|| format!("{}@{}", branch, head.stdout.trim()));

        info!(
            "Pushed release {} for {} to {}",
            request.release.sequence, request.downstream_id, branch
        );
        Ok(ApplyReport {
            succeeded: true,
            output,
            reference,
        })
    }
}
