// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Declarative machine bootstrap.
//!
//! Strapper converges a development machine towards the state declared in a
//! manifest: developer tools, a package manager, packages, applications,
//! a dotfiles clone, symlinks into that clone, shell plugins, and the default
//! login shell.
//!
//! # Convergence
//!
//! Every piece of desired state becomes one [`ConvergenceStep`]. A step
//! first checks whether its state is already reached, and only acts when it
//! is not. Steps run one at a time in a fixed phase order. A failing step is
//! recorded and skipped past, never escalated, so a run always attempts
//! every step and ends with a summary of what failed.
//!
//! Running Strapper twice is safe. The second run finds everything that
//! succeeded the first time already satisfied, and retries only what failed.
//!
//! # See Also
//!
//! 1. [`Manifest`]
//! 2. [`ActionRegistry`]
//! 3. [`Runner`]

pub mod action;
pub mod config;
pub mod link;
pub mod logger;
pub mod path;
pub mod plan;
pub mod runner;
pub mod step;

pub use action::ActionRegistry;
pub use config::Manifest;
pub use logger::Logger;
pub use plan::Plan;
pub use runner::{RunReport, Runner};
pub use step::ConvergenceStep;
