//! workflow-pin library for finding and updating GitHub Actions references.
//!
//! The core workflow involves three phases:
//!
//! 1. **Scanning**: Collect workflow files and extract `uses: owner/name@version`
//!    references, including ones reached through YAML anchors and aliases
//! 2. **Planning**: Ask a [`VersionResolver`] for the latest release of every
//!    reference and turn newer versions into [`Update`]s
//! 3. **Applying**: Rewrite the affected lines in place, under a per-file lock,
//!    with provenance comments when pinning to a commit hash
//!
//! # Example
//!
//! ```no_run
//! use workflow_pin::{scanner, Config, UpdateManager};
//!
//! let config = Config::for_repository("/src/project");
//! let report = scanner::scan_repository(&config).unwrap();
//!
//! let manager = UpdateManager::from_config(&config);
//! let updates: Vec<_> = report
//!     .references
//!     .iter()
//!     .filter(|r| r.owner == "actions" && r.version == "v3")
//!     .filter_map(|r| manager.create_update(&r.path, r, "v4", None))
//!     .collect();
//!
//! let applied = manager.apply_updates(&updates).unwrap();
//! println!("Applied {} of {} updates", applied.len(), updates.len());
//! ```

pub mod comments;
pub mod config;
pub mod error;
pub mod io;
pub mod locks;
pub mod plan;
pub mod reference;
pub mod scanner;
pub mod update;
pub mod yaml;

// Re-export commonly used types at crate root
pub use config::Config;
pub use error::{Error, ErrorCategory, Result};
pub use locks::FileLocks;
pub use plan::{
    Availability, LatestVersion, PlanResult, PullRequestPublisher, RunSummary, VersionResolver,
    plan_updates, run,
};
pub use reference::{ActionReference, is_commit_hash, parse_action_reference};
pub use scanner::{
    ScanReport, parse_action_references, parse_action_references_from_str, scan_repository,
    scan_workflows,
};
pub use update::{Update, UpdateManager};
