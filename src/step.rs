// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Convergence steps.
//!
//! A __convergence step__ is the atomic unit of work in Strapper. It pairs a
//! check, "is this piece of the machine already in its desired state?", with
//! a remediation action that brings it there. The action only runs when the
//! check says the state diverges, which makes every step safe to repeat.
//!
//! Executing a step never fails outright. Whatever goes wrong inside the
//! action is captured into the [`ExecutionResult`] of that step, and the
//! caller moves on to the next one.

use crate::{
    action::{ActionError, ActionRegistry, PackageKind, Result},
    config::{Repository, StoreApp},
    link::SymlinkSpec,
};

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{debug, instrument};

/// Ordered phases of a run.
///
/// Later phases lean on earlier ones, e.g., symlinks point into the dotfiles
/// clone. Phases always run in declaration order of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Prerequisites,
    SelfUpdate,
    Packages,
    Toolchain,
    Apps,
    StoreApps,
    Repository,
    Symlinks,
    ShellConfiguration,
    DefaultShell,
    Cleanup,
}

impl Display for Phase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Prerequisites => "prerequisites",
            Self::SelfUpdate => "package manager update",
            Self::Packages => "packages",
            Self::Toolchain => "toolchain packages",
            Self::Apps => "applications",
            Self::StoreApps => "app store applications",
            Self::Repository => "dotfiles repository",
            Self::Symlinks => "symlinks",
            Self::ShellConfiguration => "shell configuration",
            Self::DefaultShell => "default shell",
            Self::Cleanup => "cleanup",
        };
        fmt.write_str(name)
    }
}

/// Kind of collaborator a step works through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Prerequisite,
    Maintenance,
    Package,
    Cask,
    StoreApp,
    Toolchain,
    VcsClone,
    Symlink,
    ShellDefault,
}

impl Display for Category {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Prerequisite => "prerequisite",
            Self::Maintenance => "maintenance",
            Self::Package => "package",
            Self::Cask => "cask",
            Self::StoreApp => "store-app",
            Self::Toolchain => "toolchain",
            Self::VcsClone => "vcs-clone",
            Self::Symlink => "symlink",
            Self::ShellDefault => "shell-default",
        };
        fmt.write_str(name)
    }
}

/// Piece of machine state that a step converges towards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredState {
    DeveloperTools,
    PackageManager,
    PackagesCurrent,
    Package { kind: PackageKind, name: String },
    StoreApp(StoreApp),
    ToolchainPackage(String),
    Cloned(Repository),
    Linked(SymlinkSpec),
    DefaultShell(PathBuf),
    CacheClean,
}

impl DesiredState {
    /// Category of collaborator that handles this state.
    pub fn category(&self) -> Category {
        match self {
            Self::DeveloperTools | Self::PackageManager => Category::Prerequisite,
            Self::PackagesCurrent | Self::CacheClean => Category::Maintenance,
            Self::Package {
                kind: PackageKind::Formula,
                ..
            } => Category::Package,
            Self::Package {
                kind: PackageKind::Cask,
                ..
            } => Category::Cask,
            Self::StoreApp(_) => Category::StoreApp,
            Self::ToolchainPackage(_) => Category::Toolchain,
            Self::Cloned(_) => Category::VcsClone,
            Self::Linked(_) => Category::Symlink,
            Self::DefaultShell(_) => Category::ShellDefault,
        }
    }
}

impl Display for DesiredState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::DeveloperTools => fmt.write_str("developer tools"),
            Self::PackageManager => fmt.write_str("package manager"),
            Self::PackagesCurrent => fmt.write_str("package manager update"),
            Self::Package { kind, name } => write!(fmt, "{kind} {name}"),
            Self::StoreApp(app) => write!(fmt, "store app {}", app.label()),
            Self::ToolchainPackage(name) => write!(fmt, "toolchain {name}"),
            Self::Cloned(repo) => write!(fmt, "clone {}", repo.path.display()),
            Self::Linked(spec) => write!(fmt, "symlink {spec}"),
            Self::DefaultShell(shell) => write!(fmt, "default shell {}", shell.display()),
            Self::CacheClean => fmt.write_str("package manager cleanup"),
        }
    }
}

/// Check paired with remediation action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceStep {
    name: String,
    phase: Phase,
    state: DesiredState,
}

impl ConvergenceStep {
    /// Construct new step for desired state in target phase.
    pub fn new(phase: Phase, state: DesiredState) -> Self {
        Self {
            name: state.to_string(),
            phase,
            state,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn category(&self) -> Category {
        self.state.category()
    }

    pub fn state(&self) -> &DesiredState {
        &self.state
    }

    /// Check if desired state is already reached.
    pub fn check(&self, registry: &ActionRegistry) -> bool {
        match &self.state {
            DesiredState::DeveloperTools => registry.prerequisites.developer_tools_installed(),
            DesiredState::PackageManager => registry.prerequisites.package_manager_installed(),
            DesiredState::PackagesCurrent => registry.packages.is_up_to_date(),
            DesiredState::Package { kind, name } => registry.packages.is_installed(*kind, name),
            DesiredState::StoreApp(app) => match (app.id, &app.name) {
                (Some(id), _) => registry.store.is_installed(id),
                (None, Some(name)) => registry
                    .store
                    .search(name)
                    .map(|id| registry.store.is_installed(id))
                    .unwrap_or(false),
                (None, None) => false,
            },
            DesiredState::ToolchainPackage(name) => registry.toolchain.is_installed(name),
            DesiredState::Cloned(repo) => registry.vcs.is_cloned(&repo.path),
            DesiredState::Linked(spec) => registry.linker.is_linked(spec),
            DesiredState::DefaultShell(shell) => {
                registry.shell.current_shell().as_deref() == Some(shell.as_path())
            }
            DesiredState::CacheClean => registry.packages.is_clean(),
        }
    }

    /// Perform remediation action.
    ///
    /// # Errors
    ///
    /// - Return [`ActionError`] from whichever adapter performs the action.
    pub fn act(&self, registry: &ActionRegistry) -> Result<String> {
        match &self.state {
            DesiredState::DeveloperTools => registry.prerequisites.install_developer_tools(),
            DesiredState::PackageManager => registry.prerequisites.install_package_manager(),
            DesiredState::PackagesCurrent => registry.packages.update(),
            DesiredState::Package { kind, name } => registry.packages.install(*kind, name),
            DesiredState::StoreApp(app) => match (app.id, &app.name) {
                (Some(id), _) => registry.store.install(id),
                (None, Some(name)) => {
                    // INVARIANT: Name search is best effort, so report what it picked.
                    let id = registry.store.search(name)?;
                    let detail = registry.store.install(id)?;
                    Ok(format!("{detail} (first match for {name:?})"))
                }
                (None, None) => Err(ActionError::NotFound(app.label())),
            },
            DesiredState::ToolchainPackage(name) => registry.toolchain.install(name),
            DesiredState::Cloned(repo) => registry.vcs.clone_repository(&repo.url, &repo.path),
            DesiredState::Linked(spec) => registry.linker.link(spec),
            DesiredState::DefaultShell(shell) => {
                let mut details = Vec::new();
                if !registry.shell.is_registered(shell) {
                    details.push(registry.shell.register(shell)?);
                }
                details.push(registry.shell.change(shell)?);
                Ok(details.join("; "))
            }
            DesiredState::CacheClean => registry.packages.cleanup(),
        }
    }

    /// Check, act if needed, and capture the outcome.
    #[instrument(skip(self, registry), fields(step = %self.name), level = "debug")]
    pub fn execute(&self, registry: &ActionRegistry) -> ExecutionResult {
        let outcome = if self.check(registry) {
            debug!("already satisfied");
            Outcome::AlreadySatisfied
        } else {
            match self.act(registry) {
                Ok(detail) => Outcome::Success(detail),
                Err(err) => Outcome::Failed(error_chain(&err)),
            }
        };

        ExecutionResult {
            step: self.name.clone(),
            category: self.category(),
            outcome,
        }
    }
}

/// Outcome of executing a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Action ran and reached desired state.
    Success(String),

    /// Check passed, so no action was needed.
    AlreadySatisfied,

    /// Action ran and failed.
    Failed(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub step: String,
    pub category: Category,
    pub outcome: Outcome,
}

/// Render error with all of its sources.
pub(crate) fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(cause.to_string().as_str());
        source = cause.source();
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkError;
    use simple_test_case::test_case;
    use std::io::{Error as IoError, ErrorKind};

    #[test_case(
        DesiredState::Package { kind: PackageKind::Formula, name: "bat".into() },
        "formula bat",
        Category::Package;
        "formula"
    )]
    #[test_case(
        DesiredState::Package { kind: PackageKind::Cask, name: "iterm2".into() },
        "cask iterm2",
        Category::Cask;
        "cask"
    )]
    #[test_case(
        DesiredState::StoreApp(StoreApp { id: Some(497799835), name: Some("Xcode".into()) }),
        "store app Xcode (497799835)",
        Category::StoreApp;
        "store app"
    )]
    #[test_case(
        DesiredState::Linked(SymlinkSpec::new("/dotfiles/.zshrc", "/home/blah/.zshrc")),
        "symlink /home/blah/.zshrc -> /dotfiles/.zshrc",
        Category::Symlink;
        "symlink"
    )]
    #[test_case(
        DesiredState::DefaultShell("/bin/zsh".into()),
        "default shell /bin/zsh",
        Category::ShellDefault;
        "shell"
    )]
    #[test]
    fn step_identity(state: DesiredState, name: &str, category: Category) {
        let step = ConvergenceStep::new(Phase::Packages, state);
        assert_eq!(step.name(), name);
        assert_eq!(step.category(), category);
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = ActionError::Link(LinkError::Link {
            source: IoError::new(ErrorKind::PermissionDenied, "permission denied"),
            path: "/home/blah/.zshrc".into(),
        });
        assert_eq!(
            error_chain(&err),
            "failed to create symlink at \"/home/blah/.zshrc\": permission denied"
        );
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Prerequisites < Phase::SelfUpdate);
        assert!(Phase::Repository < Phase::Symlinks);
        assert!(Phase::Symlinks < Phase::ShellConfiguration);
        assert!(Phase::DefaultShell < Phase::Cleanup);
    }
}
