// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Collaborator adapters.
//!
//! Strapper never installs anything by itself. It drives external tools,
//! e.g., a package manager, an app store client, Git, and `chsh`, and asks
//! them to do the real work. Each of these tools signals success and failure
//! in its own ad hoc way, so every one of them sits behind an __adapter__
//! that normalizes its answers:
//!
//! - State queries return a plain `bool`.
//! - Remediation actions return `Ok(detail)` or an [`ActionError`] value.
//!
//! Adapters never abort the process. A missing tool, an unreachable network,
//! or a rejected password all come back as values that the caller records
//! and moves past.
//!
//! # Action Registry
//!
//! The [`ActionRegistry`] bundles one adapter per capability. Production
//! code builds it through [`ActionRegistry::system`], while tests plug in
//! fakes that implement the same traits.

pub mod clone;
pub mod system;

use crate::{
    action::{
        clone::Git2Clone,
        system::{CommandToolchain, FsLinker, Homebrew, Mas, SystemPrerequisites, SystemShell},
    },
    config::Settings,
    link::{LinkError, SymlinkSpec},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Kind of package handled by primary package manager.
///
/// Command-line packages and GUI applications are listed and installed
/// through different queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    Formula,
    Cask,
}

impl Display for PackageKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Formula => fmt.write_str("formula"),
            Self::Cask => fmt.write_str("cask"),
        }
    }
}

/// Tools that must exist before anything else can be installed.
pub trait Prerequisites: Send + Sync {
    /// Check if OS developer tools are installed.
    fn developer_tools_installed(&self) -> bool;

    /// Install OS developer tools, waiting until installer finishes.
    fn install_developer_tools(&self) -> Result<String>;

    /// Check if primary package manager is installed.
    fn package_manager_installed(&self) -> bool;

    /// Install primary package manager.
    fn install_package_manager(&self) -> Result<String>;
}

/// Primary package manager.
pub trait PackageManager: Send + Sync {
    /// Check if package is installed.
    fn is_installed(&self, kind: PackageKind, name: &str) -> bool;

    /// Install package.
    fn install(&self, kind: PackageKind, name: &str) -> Result<String>;

    /// Check if package index and installed packages are current.
    fn is_up_to_date(&self) -> bool;

    /// Update package index and upgrade installed packages.
    fn update(&self) -> Result<String>;

    /// Check if there is nothing left to clean up.
    fn is_clean(&self) -> bool;

    /// Remove stale downloads and old package versions.
    fn cleanup(&self) -> Result<String>;
}

/// App store client.
pub trait AppStore: Send + Sync {
    /// Search store by name, and return identifier of best match.
    fn search(&self, name: &str) -> Result<u64>;

    /// Check if app is installed.
    fn is_installed(&self, id: u64) -> bool;

    /// Install app by identifier.
    fn install(&self, id: u64) -> Result<String>;
}

/// Secondary language toolchain.
pub trait Toolchain: Send + Sync {
    /// Check if toolchain package is installed.
    fn is_installed(&self, name: &str) -> bool;

    /// Install toolchain package.
    fn install(&self, name: &str) -> Result<String>;
}

/// Version control system.
pub trait VersionControl: Send + Sync {
    /// Check if local path already holds a repository.
    fn is_cloned(&self, path: &Path) -> bool;

    /// Clone remote repository to local path.
    ///
    /// Refuses to touch local path if it already exists.
    fn clone_repository(&self, url: &str, path: &Path) -> Result<String>;
}

/// Login shell of current account.
pub trait ShellAccount: Send + Sync {
    /// Current default shell of account.
    fn current_shell(&self) -> Option<PathBuf>;

    /// Check if shell is listed as an allowed login shell.
    fn is_registered(&self, shell: &Path) -> bool;

    /// List shell as an allowed login shell. Needs elevated privileges.
    fn register(&self, shell: &Path) -> Result<String>;

    /// Change default shell of account. Needs elevated privileges.
    fn change(&self, shell: &Path) -> Result<String>;
}

/// File system symlinks.
pub trait Linker: Send + Sync {
    /// Check if symlink is in place.
    fn is_linked(&self, spec: &SymlinkSpec) -> bool;

    /// Backup destination if needed, and place symlink.
    fn link(&self, spec: &SymlinkSpec) -> Result<String>;
}

/// Set of collaborator adapters used by a run.
pub struct ActionRegistry {
    pub prerequisites: Box<dyn Prerequisites>,
    pub packages: Box<dyn PackageManager>,
    pub store: Box<dyn AppStore>,
    pub toolchain: Box<dyn Toolchain>,
    pub vcs: Box<dyn VersionControl>,
    pub shell: Box<dyn ShellAccount>,
    pub linker: Box<dyn Linker>,
}

impl ActionRegistry {
    /// Construct registry of adapters over the real system tools.
    pub fn system(settings: &Settings) -> Self {
        let homebrew = Homebrew::new(&settings.package_manager.program);
        Self {
            prerequisites: Box::new(SystemPrerequisites::new(
                settings.developer_tools.clone(),
                settings.package_manager.clone(),
                homebrew.clone(),
            )),
            packages: Box::new(homebrew),
            store: Box::new(Mas::default()),
            toolchain: Box::new(CommandToolchain::new(settings.toolchain.clone())),
            vcs: Box::new(Git2Clone),
            shell: Box::new(SystemShell),
            linker: Box::new(FsLinker),
        }
    }
}

/// Adapter error types.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Required tool is missing.
    #[error("{program:?} is not installed or not in PATH")]
    PrerequisiteMissing { program: String },

    /// Tool ran, but did not do what was asked.
    #[error("{0}")]
    ActionFailed(String),

    /// Search yielded no match.
    #[error("no match found for {0:?}")]
    NotFound(String),

    /// Privileged operation was rejected.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Gave up waiting on an external installer.
    #[error("gave up waiting for {what} after {secs} seconds")]
    Timeout { what: String, secs: u64 },

    /// Backup-and-link failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = ActionError> = std::result::Result<T, E>;
