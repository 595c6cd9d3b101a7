// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Run planning.
//!
//! Turn resolved manifest declarations into the ordered list of convergence
//! steps that a run executes. Steps are grouped by [`Phase`], and keep their
//! declaration order inside of each phase.

use crate::{
    action::PackageKind,
    config::{Declarations, Settings},
    step::{ConvergenceStep, DesiredState, Phase},
};

/// Ordered convergence steps of one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<ConvergenceStep>,
}

impl Plan {
    /// Build plan from settings and resolved declarations.
    pub fn build(settings: &Settings, declarations: &Declarations) -> Self {
        let mut plan = Self::default();

        if settings.developer_tools.enabled {
            plan.push(Phase::Prerequisites, DesiredState::DeveloperTools);
        }
        plan.push(Phase::Prerequisites, DesiredState::PackageManager);

        if settings.update {
            plan.push(Phase::SelfUpdate, DesiredState::PackagesCurrent);
        }

        for name in &declarations.packages {
            plan.push(
                Phase::Packages,
                DesiredState::Package {
                    kind: PackageKind::Formula,
                    name: name.clone(),
                },
            );
        }

        for name in &declarations.toolchain {
            plan.push(Phase::Toolchain, DesiredState::ToolchainPackage(name.clone()));
        }

        for name in &declarations.casks {
            plan.push(
                Phase::Apps,
                DesiredState::Package {
                    kind: PackageKind::Cask,
                    name: name.clone(),
                },
            );
        }

        for app in &declarations.store_apps {
            plan.push(Phase::StoreApps, DesiredState::StoreApp(app.clone()));
        }

        if let Some(dotfiles) = &declarations.dotfiles {
            plan.push(Phase::Repository, DesiredState::Cloned(dotfiles.clone()));
        }

        for link in &declarations.links {
            plan.push(Phase::Symlinks, DesiredState::Linked(link.clone()));
        }

        for plugin in &declarations.shell_plugins {
            plan.push(Phase::ShellConfiguration, DesiredState::Cloned(plugin.clone()));
        }

        if let Some(shell) = &declarations.default_shell {
            plan.push(Phase::DefaultShell, DesiredState::DefaultShell(shell.clone()));
        }

        if settings.cleanup {
            plan.push(Phase::Cleanup, DesiredState::CacheClean);
        }

        plan
    }

    /// Construct plan from already ordered steps.
    pub fn from_steps(steps: impl IntoIterator<Item = ConvergenceStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    pub fn steps(&self) -> &[ConvergenceStep] {
        self.steps.as_slice()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, phase: Phase, state: DesiredState) {
        self.steps.push(ConvergenceStep::new(phase, state));
    }
}

impl IntoIterator for Plan {
    type Item = ConvergenceStep;
    type IntoIter = std::vec::IntoIter<ConvergenceStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}
