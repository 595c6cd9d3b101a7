// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Adapters over real system tools.
//!
//! Each adapter shells out to an external program. Programs that may prompt
//! the user, e.g., for a password or a license agreement, are run
//! interactively with inherited standard streams. Programs whose output we
//! need to inspect are run non-interactively with captured output.

use crate::{
    action::{
        ActionError, AppStore, Linker, PackageKind, PackageManager, Prerequisites, Result,
        ShellAccount, Toolchain,
    },
    config::{DeveloperToolsSettings, PackageManagerSettings, ToolchainSettings},
    link::SymlinkSpec,
};

use std::{
    env,
    ffi::{OsStr, OsString},
    fs::read_to_string,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument};

/// Homebrew package manager.
#[derive(Debug, Clone)]
pub struct Homebrew {
    program: String,
}

impl Homebrew {
    /// Construct new Homebrew adapter using target binary.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate Homebrew binary.
    ///
    /// A fresh Homebrew install is not on `PATH` until the shell profile is
    /// reloaded, so the standard prefixes are searched as a fallback.
    fn locate(&self) -> OsString {
        if self.program.contains('/') || which(&self.program).is_some() {
            return self.program.clone().into();
        }

        ["/opt/homebrew/bin", "/usr/local/bin", "/home/linuxbrew/.linuxbrew/bin"]
            .iter()
            .map(|prefix| Path::new(prefix).join(&self.program))
            .find(|path| path.is_file())
            .map(PathBuf::into_os_string)
            .unwrap_or_else(|| self.program.clone().into())
    }
}

impl Default for Homebrew {
    fn default() -> Self {
        Self::new("brew")
    }
}

impl PackageManager for Homebrew {
    fn is_installed(&self, kind: PackageKind, name: &str) -> bool {
        syscall_status(self.locate(), ["list", kind_flag(kind), name])
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, kind: PackageKind, name: &str) -> Result<String> {
        syscall_interactive(self.locate(), ["install", kind_flag(kind), name])?;
        Ok(format!("installed {kind} {name}"))
    }

    fn is_up_to_date(&self) -> bool {
        syscall_non_interactive(self.locate(), ["outdated", "--quiet"])
            .map(|output| output.trim().is_empty())
            .unwrap_or(false)
    }

    #[instrument(skip(self), level = "debug")]
    fn update(&self) -> Result<String> {
        syscall_interactive(self.locate(), ["update"])?;
        syscall_interactive(self.locate(), ["upgrade"])?;
        Ok("package index updated and packages upgraded".into())
    }

    fn is_clean(&self) -> bool {
        syscall_non_interactive(self.locate(), ["cleanup", "--dry-run"])
            .map(|output| output.trim().is_empty())
            .unwrap_or(false)
    }

    #[instrument(skip(self), level = "debug")]
    fn cleanup(&self) -> Result<String> {
        syscall_interactive(self.locate(), ["cleanup"])?;
        Ok("removed stale downloads and old versions".into())
    }
}

fn kind_flag(kind: PackageKind) -> &'static str {
    match kind {
        PackageKind::Formula => "--formula",
        PackageKind::Cask => "--cask",
    }
}

/// Developer tools and package manager bootstrap.
#[derive(Debug, Clone)]
pub struct SystemPrerequisites {
    developer_tools: DeveloperToolsSettings,
    package_manager: PackageManagerSettings,
    homebrew: Homebrew,
}

impl SystemPrerequisites {
    /// Construct new prerequisites adapter.
    pub fn new(
        developer_tools: DeveloperToolsSettings,
        package_manager: PackageManagerSettings,
        homebrew: Homebrew,
    ) -> Self {
        Self {
            developer_tools,
            package_manager,
            homebrew,
        }
    }
}

impl Prerequisites for SystemPrerequisites {
    fn developer_tools_installed(&self) -> bool {
        syscall_status("xcode-select", ["-p"])
    }

    /// Start developer tools installer, and poll until it finishes.
    ///
    /// The installer runs as a separate GUI process, so completion can only
    /// be observed by polling. Polling stops after the configured timeout.
    #[instrument(skip(self), level = "debug")]
    fn install_developer_tools(&self) -> Result<String> {
        syscall_non_interactive("xcode-select", ["--install"])?;

        let interval = Duration::from_secs(self.developer_tools.poll_interval_secs.max(1));
        let timeout = Duration::from_secs(self.developer_tools.timeout_secs);
        info!("waiting for developer tools installer to finish");
        let waited = poll_until(|| self.developer_tools_installed(), interval, timeout)
            .ok_or_else(|| ActionError::Timeout {
                what: "developer tools installer".into(),
                secs: self.developer_tools.timeout_secs,
            })?;

        Ok(format!("developer tools installed after {}s", waited.as_secs()))
    }

    fn package_manager_installed(&self) -> bool {
        syscall_status(self.homebrew.locate(), ["--version"])
    }

    #[instrument(skip(self), level = "debug")]
    fn install_package_manager(&self) -> Result<String> {
        // INVARIANT: Fetch installer before running it, so a failed download
        // never turns into an empty script that exits cleanly.
        let script = syscall_non_interactive(
            "curl",
            ["-fsSL", self.package_manager.install_script.as_str()],
        )?;
        if script.trim().is_empty() {
            return Err(ActionError::ActionFailed(format!(
                "installer script {:?} is empty",
                self.package_manager.install_script
            )));
        }
        syscall_interactive("/bin/bash", ["-c", script.as_str()])?;
        Ok(format!("installed {}", self.package_manager.program))
    }
}

/// Poll `ready` every `interval` until it holds, or `timeout` passes.
///
/// Returns time spent waiting, or `None` on timeout.
pub(crate) fn poll_until(
    mut ready: impl FnMut() -> bool,
    interval: Duration,
    timeout: Duration,
) -> Option<Duration> {
    let start = Instant::now();
    while !ready() {
        if start.elapsed() >= timeout {
            return None;
        }
        debug!("not ready, polling again in {interval:?}");
        sleep(interval);
    }

    Some(start.elapsed())
}

/// Mac App Store command-line client.
#[derive(Debug, Clone)]
pub struct Mas {
    program: String,
}

impl Default for Mas {
    fn default() -> Self {
        Self {
            program: "mas".into(),
        }
    }
}

impl AppStore for Mas {
    fn search(&self, name: &str) -> Result<u64> {
        let output = syscall_non_interactive(&self.program, ["search", name])?;
        parse_store_search(&output).ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    fn is_installed(&self, id: u64) -> bool {
        syscall_non_interactive(&self.program, ["list"])
            .map(|output| parse_store_list(&output).contains(&id))
            .unwrap_or(false)
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, id: u64) -> Result<String> {
        syscall_interactive(&self.program, ["install", id.to_string().as_str()])?;
        Ok(format!("installed store app {id}"))
    }
}

/// Extract identifier of first match from store search output.
///
/// Each line looks like `  497799835  Xcode  (15.0)`.
pub(crate) fn parse_store_search(output: &str) -> Option<u64> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find_map(|token| token.parse().ok())
}

/// Extract identifiers from store listing of installed apps.
pub(crate) fn parse_store_list(output: &str) -> Vec<u64> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse().ok())
        .collect()
}

/// Secondary toolchain driven by configurable commands.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    settings: ToolchainSettings,
}

impl CommandToolchain {
    /// Construct new toolchain adapter.
    pub fn new(settings: ToolchainSettings) -> Self {
        Self { settings }
    }
}

impl Toolchain for CommandToolchain {
    fn is_installed(&self, name: &str) -> bool {
        syscall_non_interactive(&self.settings.program, &self.settings.list)
            .map(|output| listed_packages(&output).any(|package| package == name))
            .unwrap_or(false)
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, name: &str) -> Result<String> {
        let mut args = self.settings.install.clone();
        args.push(name.to_string());
        syscall_interactive(&self.settings.program, args)?;
        Ok(format!("installed {name} with {}", self.settings.program))
    }
}

/// Package names in toolchain listing output.
///
/// Takes the first word of every unindented line, e.g., `ripgrep v14.1.0:`
/// yields `ripgrep`. Indented lines describe the package above them.
pub(crate) fn listed_packages(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(|line| line.split_whitespace().next())
        .map(|word| word.trim_end_matches(':'))
}

/// Login shell management through `/etc/shells` and `chsh`.
#[derive(Debug, Default, Clone)]
pub struct SystemShell;

const ALLOWED_SHELLS: &str = "/etc/shells";

impl ShellAccount for SystemShell {
    fn current_shell(&self) -> Option<PathBuf> {
        let user = env::var("USER").ok()?;

        #[cfg(target_os = "macos")]
        let recorded = syscall_non_interactive(
            "dscl",
            [".", "-read", format!("/Users/{user}").as_str(), "UserShell"],
        )
        .ok()
        .and_then(|output| parse_dscl_shell(&output));

        #[cfg(not(target_os = "macos"))]
        let recorded = syscall_non_interactive("getent", ["passwd", user.as_str()])
            .ok()
            .and_then(|output| parse_passwd_shell(&output));

        recorded.or_else(|| env::var_os("SHELL").map(PathBuf::from))
    }

    fn is_registered(&self, shell: &Path) -> bool {
        read_to_string(ALLOWED_SHELLS)
            .map(|content| shells_contain(&content, shell))
            .unwrap_or(false)
    }

    #[instrument(skip(self), level = "debug")]
    fn register(&self, shell: &Path) -> Result<String> {
        let mut child = Command::new("sudo")
            .args(["tee", "-a", ALLOWED_SHELLS])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|err| spawn_error("sudo", err))?;

        if let Some(stdin) = child.stdin.as_mut() {
            writeln!(stdin, "{}", shell.display()).map_err(|err| {
                ActionError::ActionFailed(format!("cannot write to {ALLOWED_SHELLS}: {err}"))
            })?;
        }

        let status = child
            .wait()
            .map_err(|err| ActionError::ActionFailed(err.to_string()))?;
        if !status.success() {
            return Err(ActionError::PermissionDenied(format!(
                "cannot add {} to {ALLOWED_SHELLS}",
                shell.display()
            )));
        }

        Ok(format!("registered {} in {ALLOWED_SHELLS}", shell.display()))
    }

    #[instrument(skip(self), level = "debug")]
    fn change(&self, shell: &Path) -> Result<String> {
        let user = env::var("USER").map_err(|_| {
            ActionError::ActionFailed("cannot determine current user from $USER".into())
        })?;

        let status = Command::new("sudo")
            .args([OsStr::new("chsh"), OsStr::new("-s"), shell.as_os_str()])
            .arg(&user)
            .status()
            .map_err(|err| spawn_error("sudo", err))?;
        if !status.success() {
            return Err(ActionError::PermissionDenied(format!(
                "cannot change default shell of {user} to {}",
                shell.display()
            )));
        }

        Ok(format!("default shell of {user} is now {}", shell.display()))
    }
}

/// Extract shell from `dscl . -read /Users/<user> UserShell` output.
pub(crate) fn parse_dscl_shell(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("UserShell:"))
        .map(str::trim)
        .filter(|shell| !shell.is_empty())
        .map(PathBuf::from)
}

/// Extract shell from `getent passwd <user>` output.
pub(crate) fn parse_passwd_shell(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .next()
        .and_then(|line| line.split(':').nth(6))
        .map(str::trim)
        .filter(|shell| !shell.is_empty())
        .map(PathBuf::from)
}

/// Check if allowed shells listing contains target shell.
pub(crate) fn shells_contain(content: &str, shell: &Path) -> bool {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| Path::new(line) == shell)
}

/// Symlinks through backup-and-link.
#[derive(Debug, Default, Clone)]
pub struct FsLinker;

impl Linker for FsLinker {
    fn is_linked(&self, spec: &SymlinkSpec) -> bool {
        spec.is_linked()
    }

    fn link(&self, spec: &SymlinkSpec) -> Result<String> {
        Ok(spec.link()?.to_string())
    }
}

fn which(program: &str) -> Option<PathBuf> {
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|path| path.is_file())
    })
}

fn spawn_error(cmd: impl AsRef<OsStr>, err: std::io::Error) -> ActionError {
    if err.kind() == ErrorKind::NotFound {
        ActionError::PrerequisiteMissing {
            program: cmd.as_ref().to_string_lossy().into_owned(),
        }
    } else {
        ActionError::ActionFailed(format!(
            "cannot run {:?}: {err}",
            cmd.as_ref().to_string_lossy()
        ))
    }
}

fn syscall_status(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> bool {
    Command::new(cmd.as_ref())
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn syscall_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<()> {
    let status = Command::new(cmd.as_ref())
        .args(args)
        .status()
        .map_err(|err| spawn_error(cmd.as_ref(), err))?;
    if !status.success() {
        return Err(ActionError::ActionFailed(format!(
            "command {:?} failed with {status}",
            cmd.as_ref().to_string_lossy()
        )));
    }

    Ok(())
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .output()
        .map_err(|err| spawn_error(cmd.as_ref(), err))?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        // INVARIANT: Chomp trailing newlines.
        let message = stderr.trim_end();
        return Err(ActionError::ActionFailed(format!(
            "command {:?} failed: {message}",
            cmd.as_ref().to_string_lossy()
        )));
    }

    Ok(stdout)
}
