// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup-and-link file system logic.
//!
//! Tracked configuration files live inside the dotfiles checkout, but the
//! programs that read them expect them at fixed locations, e.g., `~/.zshrc`
//! or `~/.config/nvim`. Strapper bridges the two with symlinks.
//!
//! # Linking Rules
//!
//! Linking is repeatable and never silently destroys user data:
//!
//! 1. The parent directory of the destination is created if missing.
//! 2. A destination that is already a symlink is replaced outright, since it
//!    only ever held a pointer to somewhere else.
//! 3. A destination that is a regular file or directory is renamed to
//!    `<destination>.backup.<timestamp>` first. The timestamp has second
//!    resolution, so a counter is appended when that name is already taken.
//! 4. The new symlink is created under an unused staging name next to the
//!    destination and renamed over it, which makes the swap atomic on Unix.
//!
//! A destination that already points at the desired source is considered
//! linked, and should not be touched at all. See [`SymlinkSpec::is_linked`].

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_link, remove_file, rename, symlink_metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Symlink to place into the file system.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SymlinkSpec {
    /// Path that the symlink points to.
    pub source: PathBuf,

    /// Path where the symlink itself is placed.
    pub destination: PathBuf,
}

impl SymlinkSpec {
    /// Construct new symlink specification.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Check if destination is already a symlink to source.
    pub fn is_linked(&self) -> bool {
        read_link(&self.destination)
            .map(|target| target == self.source)
            .unwrap_or(false)
    }

    /// Backup destination if needed, and link it to source.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::CreateParent`] if parent directory of destination
    ///   cannot be created, or something other than a directory is in its
    ///   place.
    /// - Return [`LinkError::Inspect`] if destination cannot be inspected.
    /// - Return [`LinkError::Backup`] if existing destination cannot be moved
    ///   out of the way.
    /// - Return [`LinkError::Link`] if symlink cannot be created.
    pub fn link(&self) -> Result<Linked> {
        self.link_at(Local::now())
    }

    /// Backup destination if needed, and link it to source.
    ///
    /// Same as [`SymlinkSpec::link`], but uses given time to stamp backups.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError`] under the same conditions as
    ///   [`SymlinkSpec::link`].
    #[instrument(skip(self, now), level = "debug")]
    pub fn link_at(&self, now: DateTime<Local>) -> Result<Linked> {
        let destination = self.destination.as_path();
        if let Some(parent) = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            mkdirp::mkdirp(parent).map_err(|err| LinkError::CreateParent {
                source: err,
                path: parent.to_path_buf(),
            })?;

            // INVARIANT: mkdirp accepts any existing entry, so a file in the
            // way must be caught here.
            if !parent.is_dir() {
                return Err(LinkError::CreateParent {
                    source: std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "path exists but is not a directory",
                    ),
                    path: parent.to_path_buf(),
                });
            }
        }

        let linked = match symlink_metadata(destination) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let previous = read_link(destination).unwrap_or_default();
                debug!("replace symlink {:?} -> {:?}", destination, previous);
                Linked::Replaced { previous }
            }
            Ok(_) => {
                let backup = backup_path(destination, now);
                debug!("backup {:?} to {:?}", destination, backup);
                rename(destination, &backup).map_err(|err| LinkError::Backup {
                    source: err,
                    path: destination.to_path_buf(),
                    backup: backup.clone(),
                })?;
                Linked::BackedUp { backup }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Linked::Created,
            Err(err) => {
                return Err(LinkError::Inspect {
                    source: err,
                    path: destination.to_path_buf(),
                })
            }
        };

        // INVARIANT: Stage new symlink under an unused name, and rename it
        // over the destination. Whatever sits at a taken name is left alone.
        let staging = unused_path(append_to_path(destination, ".strapper-staging"));
        make_symlink(&self.source, &staging).map_err(|err| LinkError::Link {
            source: err,
            path: destination.to_path_buf(),
        })?;
        rename(&staging, destination).map_err(|err| {
            let _ = remove_file(&staging);
            LinkError::Link {
                source: err,
                path: destination.to_path_buf(),
            }
        })?;

        Ok(linked)
    }
}

impl Display for SymlinkSpec {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} -> {}",
            self.destination.display(),
            self.source.display()
        )
    }
}

/// What linking did to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linked {
    /// Nothing existed at destination.
    Created,

    /// Destination was a symlink to somewhere else.
    Replaced { previous: PathBuf },

    /// Destination was moved to a backup path first.
    BackedUp { backup: PathBuf },
}

impl Display for Linked {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Created => fmt.write_str("linked"),
            Self::Replaced { previous } => {
                write!(fmt, "relinked, was pointing at {}", previous.display())
            }
            Self::BackedUp { backup } => {
                write!(fmt, "linked, original kept at {}", backup.display())
            }
        }
    }
}

fn backup_path(destination: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y%m%d%H%M%S");
    unused_path(append_to_path(destination, format!(".backup.{stamp}")))
}

/// First of `path`, `path.1`, `path.2`, ... that nothing occupies.
fn unused_path(path: PathBuf) -> PathBuf {
    if symlink_metadata(&path).is_err() {
        return path;
    }

    let mut counter = 1_usize;
    loop {
        let candidate = append_to_path(&path, format!(".{counter}"));
        if symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        counter += 1;
    }
}

fn append_to_path(path: &Path, suffix: impl AsRef<str>) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix.as_ref());
    PathBuf::from(raw)
}

#[cfg(unix)]
fn make_symlink(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, destination)
}

#[cfg(windows)]
fn make_symlink(source: &Path, destination: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, destination)
    } else {
        std::os::windows::fs::symlink_file(source, destination)
    }
}

/// Backup-and-link error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Parent directory of destination cannot be created.
    #[error("failed to create parent directory {:?}", path.display())]
    CreateParent {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Destination cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Existing destination cannot be moved to backup path.
    #[error("failed to backup {:?} to {:?}", path.display(), backup.display())]
    Backup {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        backup: PathBuf,
    },

    /// Symlink cannot be created.
    #[error("failed to create symlink at {:?}", path.display())]
    Link {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_dir, read_to_string, write};
    use std::os::unix::fs::symlink;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn link_creates_missing_parent_directories() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("dotfiles/nvim");
        create_dir_all(&source)?;
        let spec = SymlinkSpec::new(&source, root.path().join("home/.config/nvim"));

        let result = spec.link()?;

        assert_eq!(result, Linked::Created);
        assert_eq!(read_link(&spec.destination)?, source);
        assert!(spec.is_linked());

        Ok(())
    }

    #[test]
    fn link_backs_up_regular_file() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("dotfiles/.zshrc");
        let destination = root.path().join(".zshrc");
        create_dir_all(root.path().join("dotfiles"))?;
        write(&source, "export EDITOR=nvim\n")?;
        write(&destination, "export EDITOR=nano\n")?;
        let spec = SymlinkSpec::new(&source, &destination);

        let result = spec.link_at(fixed_time())?;

        let backup = root.path().join(".zshrc.backup.20250314150926");
        assert_eq!(result, Linked::BackedUp { backup: backup.clone() });
        assert_eq!(read_to_string(&backup)?, "export EDITOR=nano\n");
        assert_eq!(read_link(&destination)?, source);
        assert_eq!(read_to_string(&destination)?, "export EDITOR=nvim\n");

        Ok(())
    }

    #[test]
    fn link_backs_up_directory() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("dotfiles/nvim");
        let destination = root.path().join(".config/nvim");
        create_dir_all(&source)?;
        create_dir_all(&destination)?;
        write(destination.join("init.lua"), "vim.o.number = true\n")?;
        let spec = SymlinkSpec::new(&source, &destination);

        spec.link_at(fixed_time())?;

        let backup = root.path().join(".config/nvim.backup.20250314150926");
        assert_eq!(
            read_to_string(backup.join("init.lua"))?,
            "vim.o.number = true\n"
        );
        assert!(spec.is_linked());

        Ok(())
    }

    #[test]
    fn link_replaces_foreign_symlink_without_backup() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let old = root.path().join("old/.gitconfig");
        let source = root.path().join("dotfiles/.gitconfig");
        let destination = root.path().join(".gitconfig");
        symlink(&old, &destination)?;
        let spec = SymlinkSpec::new(&source, &destination);

        assert!(!spec.is_linked());
        let result = spec.link_at(fixed_time())?;

        assert_eq!(result, Linked::Replaced { previous: old });
        assert_eq!(read_link(&destination)?, source);
        let entries = read_dir(root.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(entries, vec![".gitconfig".to_string()]);

        Ok(())
    }

    #[test]
    fn link_counts_up_on_backup_collision() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("dotfiles/.vimrc");
        let destination = root.path().join(".vimrc");
        let spec = SymlinkSpec::new(&source, &destination);

        write(&destination, "first")?;
        spec.link_at(fixed_time())?;
        remove_file(&destination)?;
        write(&destination, "second")?;
        let result = spec.link_at(fixed_time())?;

        let first = root.path().join(".vimrc.backup.20250314150926");
        let second = root.path().join(".vimrc.backup.20250314150926.1");
        assert_eq!(result, Linked::BackedUp { backup: second.clone() });
        assert_eq!(read_to_string(first)?, "first");
        assert_eq!(read_to_string(second)?, "second");

        Ok(())
    }

    #[test]
    fn link_reports_blocked_parent() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write(root.path().join("blocker"), "not a directory")?;
        let spec = SymlinkSpec::new(
            root.path().join("dotfiles/config"),
            root.path().join("blocker/config"),
        );

        let result = spec.link();

        assert!(matches!(result, Err(LinkError::CreateParent { .. })));
        assert_eq!(read_to_string(root.path().join("blocker"))?, "not a directory");

        Ok(())
    }

    #[test]
    fn link_keeps_file_sitting_at_staging_name() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("dotfiles/.tmux.conf");
        let destination = root.path().join(".tmux.conf");
        let squatter = root.path().join(".tmux.conf.strapper-staging");
        write(&squatter, "set -g mouse on\n")?;
        let spec = SymlinkSpec::new(&source, &destination);

        let result = spec.link_at(fixed_time())?;

        assert_eq!(result, Linked::Created);
        assert_eq!(read_link(&destination)?, source);
        assert_eq!(read_to_string(&squatter)?, "set -g mouse on\n");
        assert!(symlink_metadata(root.path().join(".tmux.conf.strapper-staging.1")).is_err());

        Ok(())
    }
}
