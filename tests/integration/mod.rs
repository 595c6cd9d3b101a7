// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{full_manifest, FakeSystem};

use strapper::{
    action::PackageKind,
    config::{Declarations, Settings, StoreApp},
    link::SymlinkSpec,
    step::{Category, Outcome},
    Logger, Plan, RunReport, Runner,
};

use pretty_assertions::assert_eq;
use std::{
    fs::{create_dir_all, read_dir, read_link, read_to_string, write},
    os::unix::fs::symlink,
    path::Path,
};

fn quiet_settings() -> Settings {
    let mut settings = Settings::default();
    settings.update = false;
    settings.cleanup = false;
    settings.developer_tools.enabled = false;
    settings
}

fn packages(names: &[&str]) -> Declarations {
    Declarations {
        packages: names.iter().map(ToString::to_string).collect(),
        ..Default::default()
    }
}

fn run(fake: &FakeSystem, plan: Plan) -> RunReport {
    let registry = fake.registry();
    Runner::new(&registry, Logger::console()).run(plan)
}

fn outcome_of<'a>(report: &'a RunReport, step: &str) -> &'a Outcome {
    &report
        .results()
        .iter()
        .find(|result| result.step == step)
        .unwrap_or_else(|| panic!("no result for {step:?}"))
        .outcome
}

fn backups_of(dir: &Path, name: &str) -> Vec<String> {
    let prefix = format!("{name}.backup.");
    let mut backups = read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|entry| entry.starts_with(&prefix))
        .collect::<Vec<_>>();
    backups.sort();
    backups
}

#[test]
fn installed_package_is_already_satisfied() {
    let fake = FakeSystem::bootstrapped();
    fake.state()
        .installed
        .insert((PackageKind::Formula, "bat".into()));

    let report = run(&fake, Plan::build(&quiet_settings(), &packages(&["bat"])));

    assert_eq!(outcome_of(&report, "formula bat"), &Outcome::AlreadySatisfied);
    assert!(!fake.calls().contains(&"install formula bat".to_string()));
}

#[test]
fn failed_install_moves_on_to_next_package() {
    let fake = FakeSystem::bootstrapped();
    fake.state().unavailable.insert("zzz-nonexistent".into());

    let plan = Plan::build(&quiet_settings(), &packages(&["zzz-nonexistent", "bat"]));
    let report = run(&fake, plan);

    assert_eq!(
        outcome_of(&report, "formula zzz-nonexistent"),
        &Outcome::Failed("formula zzz-nonexistent not found".into())
    );
    assert_eq!(
        outcome_of(&report, "formula bat"),
        &Outcome::Success("installed formula bat".into())
    );
    assert_eq!(
        fake.calls(),
        vec!["install formula zzz-nonexistent", "install formula bat"]
    );
}

#[test]
fn failing_step_never_stops_later_steps() {
    let names = ["a", "b", "c", "d", "e"];
    for broken in 0..names.len() {
        let fake = FakeSystem::bootstrapped();
        fake.state().unavailable.insert(names[broken].into());

        let report = run(&fake, Plan::build(&quiet_settings(), &packages(&names)));

        // Package manager prerequisite, then every package.
        assert_eq!(report.results().len(), names.len() + 1);
        for (index, name) in names.iter().enumerate() {
            let outcome = outcome_of(&report, format!("formula {name}").as_str());
            assert_eq!(outcome.is_failed(), index == broken, "package {name}");
        }
    }
}

#[test]
fn summary_counts_every_failure() {
    let fake = FakeSystem::bootstrapped();
    {
        let mut state = fake.state();
        state.unavailable.insert("b".into());
        state.unavailable.insert("d".into());
        state.deny_shell_change = true;
    }
    let mut declarations = packages(&["a", "b", "c", "d"]);
    declarations.default_shell = Some("/bin/zsh".into());
    declarations.store_apps.push(StoreApp {
        id: None,
        name: Some("Nonexistent".into()),
    });

    let report = run(&fake, Plan::build(&quiet_settings(), &declarations));

    let failed = report
        .results()
        .iter()
        .filter(|result| result.outcome.is_failed())
        .count();
    assert_eq!(failed, 4);
    assert_eq!(report.failures().len(), failed);
    assert!(!report.is_clean());
    assert!(report.to_string().starts_with("4 of 7 steps failed"));
}

#[test]
fn second_run_finds_everything_satisfied() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let manifest = full_manifest(root.path());
    let declarations = manifest.resolve(None)?;
    let fake = FakeSystem::default();
    fake.state().shell = Some("/bin/bash".into());

    let first = run(&fake, Plan::build(&manifest.settings, &declarations));
    assert!(first.is_clean(), "{first}");

    let second = run(&fake, Plan::build(&manifest.settings, &declarations));
    assert!(second.is_clean(), "{second}");
    assert_eq!(first.results().len(), second.results().len());
    for result in second.results() {
        assert_eq!(result.outcome, Outcome::AlreadySatisfied, "{}", result.step);
    }

    Ok(())
}

#[test]
fn first_run_installs_in_phase_order() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let manifest = full_manifest(root.path());
    let declarations = manifest.resolve(None)?;
    let fake = FakeSystem::default();
    {
        let mut state = fake.state();
        state.shell = Some("/bin/bash".into());
        state.registered_shells.insert("/bin/bash".into());
    }

    run(&fake, Plan::build(&manifest.settings, &declarations));

    let expect = vec![
        "install developer tools",
        "install package manager",
        "update",
        "install formula bat",
        "install formula git",
        "install toolchain stylua",
        "install cask iterm2",
        "install store app 441258766",
        "clone https://blah.org/dotfiles.git",
        "clone https://blah.org/zsh-autosuggestions.git",
        "register shell /bin/zsh",
        "change shell /bin/zsh",
        "cleanup",
    ];
    assert_eq!(fake.calls(), expect);

    Ok(())
}

#[test]
fn plain_file_destination_is_backed_up() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let dotfiles = root.path().join("dotfiles");
    let home = root.path().join("home");
    create_dir_all(&dotfiles)?;
    create_dir_all(&home)?;
    write(dotfiles.join(".zshrc"), "source ~/.zsh/aliases\n")?;
    write(home.join(".zshrc"), "# hand written\n")?;
    let declarations = Declarations {
        links: vec![SymlinkSpec::new(dotfiles.join(".zshrc"), home.join(".zshrc"))],
        ..Default::default()
    };

    let report = run(
        &FakeSystem::bootstrapped(),
        Plan::build(&quiet_settings(), &declarations),
    );

    assert!(report.is_clean(), "{report}");
    let backups = backups_of(&home, ".zshrc");
    assert_eq!(backups.len(), 1);
    assert_eq!(read_to_string(home.join(&backups[0]))?, "# hand written\n");
    assert_eq!(read_link(home.join(".zshrc"))?, dotfiles.join(".zshrc"));

    Ok(())
}

#[test]
fn correct_symlink_is_left_alone() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let source = root.path().join("dotfiles/nvim");
    let destination = root.path().join("home/.config/nvim");
    create_dir_all(&source)?;
    create_dir_all(root.path().join("home/.config"))?;
    symlink(&source, &destination)?;
    let spec = SymlinkSpec::new(&source, &destination);
    let declarations = Declarations {
        links: vec![spec.clone()],
        ..Default::default()
    };

    let report = run(
        &FakeSystem::bootstrapped(),
        Plan::build(&quiet_settings(), &declarations),
    );

    let result = report
        .results()
        .iter()
        .find(|result| result.category == Category::Symlink)
        .unwrap();
    assert_eq!(result.outcome, Outcome::AlreadySatisfied);
    assert!(backups_of(&root.path().join("home/.config"), "nvim").is_empty());
    assert_eq!(read_link(&destination)?, source);

    Ok(())
}

#[test]
fn broken_symlink_does_not_stop_run() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    write(root.path().join("blocker"), "not a directory")?;
    let declarations = Declarations {
        links: vec![
            SymlinkSpec::new(root.path().join("a"), root.path().join("blocker/a")),
            SymlinkSpec::new(root.path().join("b"), root.path().join("home/b")),
        ],
        default_shell: Some("/bin/bash".into()),
        ..Default::default()
    };

    let report = run(
        &FakeSystem::bootstrapped(),
        Plan::build(&quiet_settings(), &declarations),
    );

    let outcomes = report
        .results()
        .iter()
        .map(|result| (result.category, result.outcome.is_failed()))
        .collect::<Vec<_>>();
    let expect = vec![
        (Category::Prerequisite, false),
        (Category::Symlink, true),
        (Category::Symlink, false),
        (Category::ShellDefault, false),
    ];
    assert_eq!(outcomes, expect);
    assert_eq!(read_link(root.path().join("home/b"))?, root.path().join("b"));

    Ok(())
}

#[test]
fn store_app_name_search_is_best_effort() {
    let fake = FakeSystem::bootstrapped();
    fake.state().store_catalog.insert("Magnet".into(), 441258766);
    let declarations = Declarations {
        store_apps: vec![
            StoreApp {
                id: None,
                name: Some("Magnet".into()),
            },
            StoreApp {
                id: None,
                name: Some("Nonexistent".into()),
            },
        ],
        ..Default::default()
    };

    let report = run(&fake, Plan::build(&quiet_settings(), &declarations));

    assert_eq!(
        outcome_of(&report, "store app Magnet"),
        &Outcome::Success("installed store app 441258766 (first match for \"Magnet\")".into())
    );
    assert_eq!(
        outcome_of(&report, "store app Nonexistent"),
        &Outcome::Failed("no match found for \"Nonexistent\"".into())
    );
}

#[test]
fn registered_shell_is_changed_without_registering() {
    let fake = FakeSystem::bootstrapped();
    fake.state().registered_shells.insert("/bin/zsh".into());
    let declarations = Declarations {
        default_shell: Some("/bin/zsh".into()),
        ..Default::default()
    };

    let report = run(&fake, Plan::build(&quiet_settings(), &declarations));

    assert!(report.is_clean());
    assert_eq!(fake.calls(), vec!["change shell /bin/zsh"]);
}

#[test]
fn missing_package_manager_fails_its_dependents() {
    let fake = FakeSystem::default();
    let registry = fake.registry();
    let steps = Plan::build(&quiet_settings(), &packages(&["bat"]))
        .into_iter()
        .filter(|step| step.category() != Category::Prerequisite);

    let report = Runner::new(&registry, Logger::console()).run(Plan::from_steps(steps));

    assert_eq!(
        outcome_of(&report, "formula bat"),
        &Outcome::Failed("\"brew\" is not installed or not in PATH".into())
    );
}

#[test]
fn run_log_is_appended_to_file() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let log = root.path().join("strapper.log");
    let fake = FakeSystem::bootstrapped();
    fake.state().unavailable.insert("zzz-nonexistent".into());
    let registry = fake.registry();

    for _ in 0..2 {
        let plan = Plan::build(&quiet_settings(), &packages(&["zzz-nonexistent", "bat"]));
        Runner::new(&registry, Logger::open(&log)).run(plan);
    }

    let content = read_to_string(&log)?;
    let failures = content
        .lines()
        .filter(|line| line.contains("[FAIL] formula zzz-nonexistent"))
        .count();
    assert_eq!(failures, 2);
    assert!(content.contains("[INFO] formula bat: installed formula bat"));
    assert!(content.contains("[INFO] formula bat: already satisfied"));

    Ok(())
}

#[test]
fn survey_checks_without_acting() {
    let fake = FakeSystem::bootstrapped();
    fake.state()
        .installed
        .insert((PackageKind::Formula, "bat".into()));
    let registry = fake.registry();
    let plan = Plan::build(&quiet_settings(), &packages(&["bat", "git"]));

    let survey = Runner::new(&registry, Logger::console()).survey(&plan);

    let diverged = survey
        .diverged()
        .map(|entry| entry.step.as_str())
        .collect::<Vec<_>>();
    assert_eq!(diverged, vec!["formula git"]);
    assert!(fake.calls().is_empty());
}

#[test]
fn existing_checkout_is_not_cloned_again() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let manifest = full_manifest(root.path());
    let declarations = manifest.resolve(None)?;
    let fake = FakeSystem::bootstrapped();
    fake.state().cloned.insert(root.path().join("dotfiles"));

    let plan = Plan::from_steps(
        Plan::build(&quiet_settings(), &declarations)
            .into_iter()
            .filter(|step| step.category() == Category::VcsClone),
    );
    let report = run(&fake, plan);

    let dotfiles = format!("clone {}", root.path().join("dotfiles").display());
    assert_eq!(outcome_of(&report, &dotfiles), &Outcome::AlreadySatisfied);
    assert_eq!(
        fake.calls(),
        vec!["clone https://blah.org/zsh-autosuggestions.git"]
    );

    Ok(())
}
