//! Update planning and the end-to-end pipeline.
//!
//! Asks a [`VersionResolver`] about every scanned reference, turns newer
//! versions into [`Update`]s, and drives scan → plan → apply → publish. The
//! resolver and the pull-request publisher live outside this crate; only
//! their traits are defined here.

use crate::config::Config;
use crate::reference::ActionReference;
use crate::scanner::{ScanDiagnostics, scan_repository};
use crate::update::{Update, UpdateManager};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

/// Newest release of an action as reported by the release API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestVersion {
    pub tag: String,
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub tag: String,
    pub commit_hash: Option<String>,
}

/// Looks up the latest release of an action.
pub trait VersionResolver: Send + Sync {
    fn latest_version(&self, action: &ActionReference) -> Result<LatestVersion>;

    /// Compares the latest release with the reference's current pin.
    fn is_update_available(&self, action: &ActionReference) -> Result<Availability> {
        let latest = self.latest_version(action)?;
        let available = latest.tag != action.version || latest.commit_hash != action.commit_hash;
        Ok(Availability {
            available,
            tag: latest.tag,
            commit_hash: latest.commit_hash,
        })
    }
}

/// Commits already-rewritten files and opens a pull request for them.
pub trait PullRequestPublisher {
    fn create_pr(&self, updates: &[Update]) -> Result<()>;
}

/// A reference the resolver could not answer for.
#[derive(Debug, Clone, Serialize)]
pub struct PlanFailure {
    #[serde(flatten)]
    pub reference: ActionReference,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PlanDiagnostics {
    pub total_refs: usize,
    pub up_to_date: usize,
    pub updates_planned: usize,
    pub resolver_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub updates: Vec<Update>,
    pub failures: Vec<PlanFailure>,
    pub diagnostics: PlanDiagnostics,
}

/// Builds an update for every reference with a newer version available.
///
/// Resolver errors are recorded per reference and never abort the plan.
pub fn plan_updates(
    refs: &[ActionReference],
    resolver: &dyn VersionResolver,
    manager: &UpdateManager,
) -> PlanResult {
    let answers: Vec<Result<Availability>> = refs
        .par_iter()
        .map(|reference| resolver.is_update_available(reference))
        .collect();

    let mut updates = Vec::new();
    let mut failures = Vec::new();
    let mut up_to_date = 0;

    for (reference, answer) in refs.iter().zip(answers) {
        match answer {
            Ok(availability) if availability.available => {
                match manager.create_update(
                    &reference.path,
                    reference,
                    &availability.tag,
                    availability.commit_hash.as_deref(),
                ) {
                    Some(update) => updates.push(update),
                    None => up_to_date += 1,
                }
            }
            Ok(_) => up_to_date += 1,
            Err(err) => {
                warn!(action = %reference, error = %err, "failed to resolve latest version");
                failures.push(PlanFailure {
                    reference: reference.clone(),
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    let diagnostics = PlanDiagnostics {
        total_refs: refs.len(),
        up_to_date,
        updates_planned: updates.len(),
        resolver_failures: failures.len(),
    };

    PlanResult {
        updates,
        failures,
        diagnostics,
    }
}

/// Outcome of one [`run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scan: ScanDiagnostics,
    pub plan: PlanDiagnostics,
    /// Updates actually written to disk.
    pub applied: usize,
    pub published: bool,
}

/// Scans the repository, rewrites outdated references, and publishes them.
///
/// Files that fail to scan are skipped. Only updates that were written are
/// published. If any rewrite fails, nothing is published and the error is
/// returned.
pub fn run(
    config: &Config,
    resolver: &dyn VersionResolver,
    publisher: &dyn PullRequestPublisher,
) -> Result<RunSummary> {
    let report = scan_repository(config).with_context(|| {
        format!(
            "Failed to scan workflows in {}",
            config.workflows_path().display()
        )
    })?;
    info!(
        files = report.diagnostics.files_scanned,
        references = report.diagnostics.total_refs,
        "scanned workflows"
    );

    let manager = UpdateManager::from_config(config);
    let plan = plan_updates(&report.references, resolver, &manager);

    let mut summary = RunSummary {
        scan: report.diagnostics,
        plan: plan.diagnostics,
        applied: 0,
        published: false,
    };
    if plan.updates.is_empty() {
        info!("all actions are up to date");
        return Ok(summary);
    }

    let applied = manager
        .apply_updates(&plan.updates)
        .context("Failed to apply updates")?;
    summary.applied = applied.len();
    if applied.is_empty() {
        info!("planned updates are already present");
        return Ok(summary);
    }
    publisher
        .create_pr(&applied)
        .context("Failed to create pull request")?;
    summary.published = true;
    info!(updates = applied.len(), "published updates");

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const SHA: &str = "11bd71901bbe5b1630ceea73d27597364c9af683";

    struct StaticResolver {
        latest: HashMap<String, LatestVersion>,
    }

    impl StaticResolver {
        fn new(entries: &[(&str, &str, Option<&str>)]) -> Self {
            let latest = entries
                .iter()
                .map(|(name, tag, hash)| {
                    (
                        name.to_string(),
                        LatestVersion {
                            tag: tag.to_string(),
                            commit_hash: hash.map(str::to_string),
                        },
                    )
                })
                .collect();
            Self { latest }
        }
    }

    impl VersionResolver for StaticResolver {
        fn latest_version(&self, action: &ActionReference) -> Result<LatestVersion> {
            self.latest
                .get(&action.full_name())
                .cloned()
                .ok_or_else(|| anyhow!("no releases for {}", action.full_name()))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Update>>,
    }

    impl PullRequestPublisher for RecordingPublisher {
        fn create_pr(&self, updates: &[Update]) -> Result<()> {
            self.published.lock().extend_from_slice(updates);
            Ok(())
        }
    }

    fn make_ref(name: &str, version: &str) -> ActionReference {
        let (owner, name) = name.split_once('/').unwrap();
        ActionReference {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            commit_hash: None,
            path: PathBuf::from("/repo/.github/workflows/ci.yml"),
            line: 1,
            comments: Vec::new(),
        }
    }

    fn repo_with(workflow: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".github/workflows");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("ci.yml");
        std::fs::write(&file, workflow).unwrap();
        (tmp, file)
    }

    #[test]
    fn default_availability_compares_tag_and_hash() {
        let resolver = StaticResolver::new(&[
            ("actions/checkout", "v4", None),
            ("actions/cache", "v4", Some(SHA)),
        ]);
        let current = resolver
            .is_update_available(&make_ref("actions/checkout", "v4"))
            .unwrap();
        assert!(!current.available);

        let unpinned = resolver
            .is_update_available(&make_ref("actions/cache", "v4"))
            .unwrap();
        assert!(unpinned.available);
        assert_eq!(unpinned.commit_hash.as_deref(), Some(SHA));
    }

    #[test]
    fn plan_counts_outcomes() {
        let resolver = StaticResolver::new(&[
            ("actions/checkout", "v4", None),
            ("actions/setup-node", "v4", None),
        ]);
        let refs = vec![
            make_ref("actions/checkout", "v4"),
            make_ref("actions/setup-node", "v3"),
            make_ref("actions/unknown", "v1"),
        ];
        let plan = plan_updates(&refs, &resolver, &UpdateManager::new("/repo"));

        assert_eq!(plan.diagnostics.total_refs, 3);
        assert_eq!(plan.diagnostics.up_to_date, 1);
        assert_eq!(plan.diagnostics.updates_planned, 1);
        assert_eq!(plan.diagnostics.resolver_failures, 1);
        assert_eq!(plan.updates[0].new_version, "v4");
        assert!(plan.failures[0].reason.contains("no releases for actions/unknown"));
    }

    #[test]
    fn run_rewrites_and_publishes() {
        let (tmp, file) = repo_with(
            "jobs:\n  build:\n    steps:\n      - uses: actions/checkout@v3\n      - uses: actions/cache@v4\n",
        );
        let resolver = StaticResolver::new(&[
            ("actions/checkout", "v4", None),
            ("actions/cache", "v4", None),
        ]);
        let publisher = RecordingPublisher::default();

        let summary = run(&Config::for_repository(tmp.path()), &resolver, &publisher).unwrap();
        assert!(summary.published);
        assert_eq!(summary.scan.total_refs, 2);
        assert_eq!(summary.plan.updates_planned, 1);
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "jobs:\n  build:\n    steps:\n      - uses: actions/checkout@v4 # v4\n      - uses: actions/cache@v4\n"
        );
        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].description, "Update actions/checkout from v3 to v4");
    }

    #[test]
    fn run_rewrites_anchor_behind_merge_aliases() {
        let (tmp, file) = repo_with(
            "\
x-checkout: &checkout
  uses: actions/checkout@v2
jobs:
  a:
    steps:
      - <<: *checkout
  b:
    steps:
      - <<: *checkout
",
        );
        let resolver = StaticResolver::new(&[("actions/checkout", "v4", None)]);
        let publisher = RecordingPublisher::default();

        let summary = run(&Config::for_repository(tmp.path()), &resolver, &publisher).unwrap();
        assert_eq!(summary.plan.updates_planned, 2);
        assert_eq!(summary.applied, 1);
        assert!(summary.published);
        let content = std::fs::read_to_string(&file).unwrap();
        assert_eq!(
            content.lines().nth(1),
            Some("  uses: actions/checkout@v4 # v4")
        );
        assert_eq!(publisher.published.lock().len(), 1);
    }

    /// Rewrites the workflow while versions are being resolved.
    struct EditingResolver {
        file: PathBuf,
        replacement: &'static str,
    }

    impl VersionResolver for EditingResolver {
        fn latest_version(&self, _action: &ActionReference) -> Result<LatestVersion> {
            std::fs::write(&self.file, self.replacement)?;
            Ok(LatestVersion {
                tag: "v4".to_string(),
                commit_hash: None,
            })
        }
    }

    #[test]
    fn run_does_not_publish_unwritten_updates() {
        let (tmp, file) = repo_with("steps:\n  - uses: actions/checkout@v2\n");
        let replacement = "steps:\n  - uses: actions/checkout@v3\n";
        let resolver = EditingResolver {
            file: file.clone(),
            replacement,
        };
        let publisher = RecordingPublisher::default();

        let err = run(&Config::for_repository(tmp.path()), &resolver, &publisher).unwrap_err();
        assert!(err.to_string().contains("Failed to apply updates"));
        assert!(matches!(
            err.downcast_ref::<crate::Error>(),
            Some(crate::Error::ReferenceNotFound { line: 2, .. })
        ));
        assert!(publisher.published.lock().is_empty());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), replacement);
    }

    #[test]
    fn run_skips_publishing_when_current() {
        let workflow = "steps:\n  - uses: actions/checkout@v4\n";
        let (tmp, file) = repo_with(workflow);
        let resolver = StaticResolver::new(&[("actions/checkout", "v4", None)]);
        let publisher = RecordingPublisher::default();

        let summary = run(&Config::for_repository(tmp.path()), &resolver, &publisher).unwrap();
        assert!(!summary.published);
        assert_eq!(summary.plan.up_to_date, 1);
        assert!(publisher.published.lock().is_empty());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), workflow);
    }

    #[test]
    fn run_fails_without_workflow_directory() {
        let tmp = TempDir::new().unwrap();
        let resolver = StaticResolver::new(&[]);
        let publisher = RecordingPublisher::default();
        let err = run(&Config::for_repository(tmp.path()), &resolver, &publisher).unwrap_err();
        assert!(err.to_string().contains("Failed to scan workflows"));
    }
}
