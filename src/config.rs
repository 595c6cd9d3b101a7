// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest layout.
//!
//! Specify the layout of the manifest file that Strapper converges a machine
//! towards. The manifest is the only input data of a run: it lists what
//! packages, applications, repositories, symlinks, and shell settings the
//! machine should end up with.
//!
//! # General Layout
//!
//! A manifest is composed of three parts: settings, base declarations, and
//! profiles. Settings tune how the collaborator tools are invoked. Base
//! declarations live at the top-level of the manifest and always apply.
//! Profiles are named tables under `[profile.<name>]` that carry the same
//! declaration keys as the base, and are layered on top of it when selected.
//!
//! Profiles exist so that slightly different machines, e.g., a work laptop
//! and a personal desktop, can share one manifest instead of keeping
//! near-duplicate copies around.

use crate::link::SymlinkSpec;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Starter manifest written by `strapper init`.
pub const STARTER_MANIFEST: &str = r#"# Strapper manifest.
#
# Top-level declarations always apply. Tables under [profile.<name>] are
# layered on top when selected with `strapper apply --profile <name>`.

packages = ["bat", "git", "neovim", "ripgrep"]
casks = ["iterm2"]
toolchain = []
default_shell = "/bin/zsh"

[settings]
update = true
cleanup = true

[settings.developer_tools]
enabled = true
poll_interval_secs = 5
timeout_secs = 1800

[settings.package_manager]
program = "brew"
install_script = "https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh"

[settings.toolchain]
program = "cargo"
list = ["install", "--list"]
install = ["install"]

[dotfiles]
url = "<put url to dotfiles remote here>"
path = "~/.dotfiles"

[[link]]
source = ".zshrc"
destination = "~/.zshrc"
"#;

/// Manifest layout.
///
/// Full parsed manifest, including every profile. Use [`Manifest::resolve`]
/// to obtain the declarations for one run.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// Settings for collaborator tools.
    #[serde(default)]
    pub settings: Settings,

    /// Base declarations that always apply.
    #[serde(flatten)]
    pub declarations: Declarations,

    /// Named declaration overlays.
    #[serde(default, rename = "profile")]
    pub profiles: BTreeMap<String, Declarations>,
}

impl Manifest {
    /// Load manifest from file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if manifest file cannot be read.
    /// - Return any parsing error from [`Manifest::from_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_to_string(path.as_ref()).map_err(|err| ConfigError::Read {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

        data.parse()
    }

    /// Resolve declarations for a run.
    ///
    /// Layers selected profile on top of base declarations. Lists are
    /// appended without duplicates, while single values are overridden if
    /// the profile sets them. Relative link sources are then anchored to the
    /// dotfiles checkout path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownProfile`] if profile is not declared.
    /// - Return [`ConfigError::RelativeLinkSource`] if a link source is
    ///   relative, but no dotfiles checkout is declared to anchor it to.
    pub fn resolve(&self, profile: Option<&str>) -> Result<Declarations> {
        let mut resolved = self.declarations.clone();
        if let Some(name) = profile {
            let overlay = self
                .profiles
                .get(name)
                .ok_or_else(|| ConfigError::UnknownProfile {
                    name: name.to_string(),
                    known: self.profile_names().collect::<Vec<_>>().join(", "),
                })?;
            resolved.merge(overlay);
        }

        // INVARIANT: Relative sources would otherwise resolve against the
        // directory of the symlink itself.
        for link in &mut resolved.links {
            if link.source.is_relative() {
                let dotfiles = resolved
                    .dotfiles
                    .as_ref()
                    .ok_or_else(|| ConfigError::RelativeLinkSource(link.source.clone()))?;
                link.source = dotfiles.path.join(&link.source);
            }
        }

        Ok(resolved)
    }

    /// Names of all declared profiles.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: Manifest = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        if let Some(log_file) = &manifest.settings.log_file {
            manifest.settings.log_file = Some(expand_path(log_file)?);
        }
        manifest.declarations.expand_paths()?;
        for declarations in manifest.profiles.values_mut() {
            declarations.expand_paths()?;
        }

        // INVARIANT: Store apps need an identifier or a name to search by.
        let store_apps = manifest
            .profiles
            .values()
            .flat_map(|declarations| declarations.store_apps.iter())
            .chain(manifest.declarations.store_apps.iter());
        for app in store_apps {
            if app.id.is_none() && app.name.is_none() {
                return Err(ConfigError::InvalidStoreApp);
            }
        }

        Ok(manifest)
    }
}

/// Collaborator tool settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Path to append-only log file, defaults to XDG data directory.
    pub log_file: Option<PathBuf>,

    /// Update and upgrade package manager before installing packages.
    pub update: bool,

    /// Clean package manager caches at the end of the run.
    pub cleanup: bool,

    /// Developer tools installation policy.
    pub developer_tools: DeveloperToolsSettings,

    /// Primary package manager settings.
    pub package_manager: PackageManagerSettings,

    /// Secondary toolchain settings.
    pub toolchain: ToolchainSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_file: None,
            update: true,
            cleanup: true,
            developer_tools: DeveloperToolsSettings::default(),
            package_manager: PackageManagerSettings::default(),
            toolchain: ToolchainSettings::default(),
        }
    }
}

/// Developer tools installation policy.
///
/// The developer tools installer runs outside of our control, so completion
/// is detected by polling at a fixed interval until a timeout elapses.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeveloperToolsSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for DeveloperToolsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 5,
            timeout_secs: 1800,
        }
    }
}

/// Primary package manager settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageManagerSettings {
    /// Package manager binary.
    pub program: String,

    /// URL of shell script that installs the package manager.
    pub install_script: String,
}

impl Default for PackageManagerSettings {
    fn default() -> Self {
        Self {
            program: "brew".into(),
            install_script: "https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh"
                .into(),
        }
    }
}

/// Secondary language toolchain settings.
///
/// Used for packages that the primary package manager does not carry.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolchainSettings {
    /// Toolchain binary.
    pub program: String,

    /// Arguments that list installed packages, one per line.
    pub list: Vec<String>,

    /// Arguments that install a package, followed by package name.
    pub install: Vec<String>,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            program: "cargo".into(),
            list: vec!["install".into(), "--list".into()],
            install: vec!["install".into()],
        }
    }
}

/// Declarations of desired machine state.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Declarations {
    /// Command-line packages from primary package manager.
    pub packages: Vec<String>,

    /// GUI applications from primary package manager.
    pub casks: Vec<String>,

    /// Packages from secondary toolchain.
    pub toolchain: Vec<String>,

    /// App store applications.
    #[serde(rename = "store_app")]
    pub store_apps: Vec<StoreApp>,

    /// Dotfiles repository to clone.
    pub dotfiles: Option<Repository>,

    /// Symlinks to place into the file system.
    #[serde(rename = "link")]
    pub links: Vec<SymlinkSpec>,

    /// Shell plugin repositories to clone.
    #[serde(rename = "plugin")]
    pub shell_plugins: Vec<Repository>,

    /// Path to shell that should become the default login shell.
    pub default_shell: Option<PathBuf>,
}

impl Declarations {
    /// Layer other declarations on top of these ones.
    pub fn merge(&mut self, other: &Declarations) {
        extend_unique(&mut self.packages, &other.packages);
        extend_unique(&mut self.casks, &other.casks);
        extend_unique(&mut self.toolchain, &other.toolchain);
        extend_unique(&mut self.store_apps, &other.store_apps);
        extend_unique(&mut self.links, &other.links);
        extend_unique(&mut self.shell_plugins, &other.shell_plugins);

        if other.dotfiles.is_some() {
            self.dotfiles.clone_from(&other.dotfiles);
        }

        if other.default_shell.is_some() {
            self.default_shell.clone_from(&other.default_shell);
        }
    }

    fn expand_paths(&mut self) -> Result<()> {
        if let Some(dotfiles) = &mut self.dotfiles {
            dotfiles.path = expand_path(&dotfiles.path)?;
        }

        for link in &mut self.links {
            link.source = expand_path(&link.source)?;
            link.destination = expand_path(&link.destination)?;
        }

        for plugin in &mut self.shell_plugins {
            plugin.path = expand_path(&plugin.path)?;
        }

        if let Some(shell) = &self.default_shell {
            self.default_shell = Some(expand_path(shell)?);
        }

        Ok(())
    }
}

/// App store application.
///
/// Prefer numeric identifiers. A name alone makes Strapper search the store
/// and pick the first match, which may not be the application intended.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct StoreApp {
    /// Numeric store identifier.
    pub id: Option<u64>,

    /// Name to search for when identifier is absent.
    pub name: Option<String>,
}

impl StoreApp {
    /// Human readable label for logging.
    pub fn label(&self) -> String {
        match (&self.name, self.id) {
            (Some(name), Some(id)) => format!("{name} ({id})"),
            (Some(name), None) => name.clone(),
            (None, Some(id)) => id.to_string(),
            (None, None) => "<unnamed>".into(),
        }
    }
}

/// Remote repository and its local clone path.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Repository {
    /// Remote URL to clone from.
    pub url: String,

    /// Local path to clone into.
    pub path: PathBuf,
}

fn extend_unique<T: PartialEq + Clone>(target: &mut Vec<T>, items: &[T]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Manifest file cannot be read.
    #[error("failed to read manifest at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Store app declared without identifier or name.
    #[error("store app entry needs an 'id' or a 'name'")]
    InvalidStoreApp,

    /// Selected profile does not exist in manifest.
    #[error("profile {name:?} is not declared in manifest, known profiles: [{known}]")]
    UnknownProfile { name: String, known: String },

    /// Relative link source without dotfiles checkout to anchor it to.
    #[error("link source {:?} is relative, but no dotfiles checkout is declared", .0.display())]
    RelativeLinkSource(PathBuf),
}

/// Friendly result alias :3
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
