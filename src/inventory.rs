// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package inventory.
//!
//! Tie declared packages of a flake to installed packages of the live
//! system, one reconciled list per [`PackageKind`]. Probes of different kinds
//! run concurrently and fail independently of one another.

use crate::{
    flake::{edit::FlakeFile, DeclaredPackages, PackageKind},
    probe::PackageProbe,
    reconcile::{reconcile, Item, Record, SortMode, Status},
};

use futures::future::join3;
use tracing::{debug, instrument};

/// Reconciled packages of every kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub brews: Vec<Item>,
    pub casks: Vec<Item>,
    pub mas_apps: Vec<Item>,
    pub nix: Vec<Item>,
}

impl Inventory {
    /// Read flake, probe installed packages, and reconcile each kind.
    ///
    /// # Errors
    ///
    /// - Return [`crate::flake::edit::Error::Read`] if flake cannot be read.
    #[instrument(skip(flake, probe), level = "debug")]
    pub async fn collect(
        flake: &FlakeFile,
        probe: &impl PackageProbe,
        mode: SortMode,
    ) -> crate::flake::edit::Result<Self> {
        let declared = flake.declared()?;
        let (formulae, casks, mas_apps) = join3(
            probe.installed_formulae(),
            probe.installed_casks(),
            probe.installed_mas_apps(),
        )
        .await;
        debug!(
            "probed {} formulae, {} casks, {} app store apps",
            formulae.len(),
            casks.len(),
            mas_apps.len()
        );

        let installed = Installed {
            formulae,
            casks,
            mas_apps,
        };
        Ok(Self::reconcile(&declared, &installed, mode))
    }

    /// Reconcile already gathered declared and installed sets.
    pub fn reconcile(declared: &DeclaredPackages, installed: &Installed, mode: SortMode) -> Self {
        let formulae = installed
            .formulae
            .iter()
            .map(Record::package)
            .collect::<Vec<_>>();
        let casks = installed.casks.iter().map(Record::named).collect::<Vec<_>>();
        let mas_apps = installed
            .mas_apps
            .iter()
            .map(|(id, name)| Record::identified(name, *id))
            .collect::<Vec<_>>();

        // INVARIANT: Nothing probes nixpkgs, so every declared one counts as
        //   synced.
        let nix = declared.records(PackageKind::Nix);

        Self {
            brews: reconcile(&declared.records(PackageKind::Brew), &formulae, mode),
            casks: reconcile(&declared.records(PackageKind::Cask), &casks, mode),
            mas_apps: reconcile(&declared.records(PackageKind::MasApp), &mas_apps, mode),
            nix: reconcile(&nix, &nix, mode),
        }
    }

    pub fn items(&self, kind: PackageKind) -> &[Item] {
        match kind {
            PackageKind::Brew => &self.brews,
            PackageKind::Cask => &self.casks,
            PackageKind::MasApp => &self.mas_apps,
            PackageKind::Nix => &self.nix,
        }
    }

    /// Count items by status and by kind.
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            brews: self.brews.len(),
            casks: self.casks.len(),
            mas_apps: self.mas_apps.len(),
            nix: self.nix.len(),
            ..Default::default()
        };

        for item in PackageKind::ALL.iter().flat_map(|kind| self.items(*kind)) {
            match item.status {
                Status::Synced => summary.synced += 1,
                Status::Extra => summary.extra += 1,
                Status::Missing => summary.missing += 1,
            }
        }

        summary
    }
}

/// Installed packages as reported by a probe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Installed {
    pub formulae: Vec<String>,
    pub casks: Vec<String>,
    pub mas_apps: Vec<(u64, String)>,
}

/// Item counts of an [`Inventory`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub synced: usize,
    pub extra: usize,
    pub missing: usize,
    pub brews: usize,
    pub casks: usize,
    pub mas_apps: usize,
    pub nix: usize,
}

impl Summary {
    pub fn is_synced(&self) -> bool {
        self.extra == 0 && self.missing == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::PackageInfo;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs::write;

    struct FakeProbe;

    impl PackageProbe for FakeProbe {
        async fn installed_formulae(&self) -> Vec<String> {
            vec!["git".into(), "bun".into(), "htop".into()]
        }

        async fn installed_casks(&self) -> Vec<String> {
            Vec::new()
        }

        async fn installed_mas_apps(&self) -> Vec<(u64, String)> {
            vec![(904280696, "Things".into())]
        }

        async fn package_info(&self, _: &str) -> Option<PackageInfo> {
            None
        }
    }

    #[tokio::test]
    async fn collect_reconciles_each_kind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flake.nix");
        write(
            &path,
            indoc! {r#"
                environment.systemPackages = [ pkgs.fd ];
                homebrew.brews = [ "git" "oven-sh/bun/bun" "wget" ];
                homebrew.casks = [ "zed" ];
                homebrew.masApps = { "Things 3" = 904280696; };
            "#},
        )?;

        let inventory =
            Inventory::collect(&FlakeFile::new(&path), &FakeProbe, SortMode::Name).await?;

        let brews = inventory
            .brews
            .iter()
            .map(|item| (item.full_name.as_str(), item.status))
            .collect::<Vec<_>>();
        assert_eq!(
            brews,
            vec![
                ("oven-sh/bun/bun", Status::Synced),
                ("git", Status::Synced),
                ("htop", Status::Extra),
                ("wget", Status::Missing),
            ]
        );
        assert_eq!(inventory.casks[0].status, Status::Missing);
        assert_eq!(inventory.mas_apps.len(), 1);
        assert_eq!(inventory.mas_apps[0].status, Status::Synced);
        assert_eq!(inventory.nix[0].status, Status::Synced);

        let summary = inventory.summary();
        assert_eq!(
            summary,
            Summary {
                synced: 4,
                extra: 1,
                missing: 2,
                brews: 4,
                casks: 1,
                mas_apps: 1,
                nix: 1,
            }
        );
        assert!(!summary.is_synced());

        Ok(())
    }

    #[tokio::test]
    async fn collect_fails_on_missing_flake() {
        let result =
            Inventory::collect(&FlakeFile::new("/no/such/flake.nix"), &FakeProbe, SortMode::Name)
                .await;
        assert!(result.is_err());
    }
}
