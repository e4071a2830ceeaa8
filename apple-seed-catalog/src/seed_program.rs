// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! macOS seed programs and their catalogs.

use {
    crate::{os_version::SystemVersion, CatalogResult},
    log::{debug, info},
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
    },
};

/// URL prefix of all seed program catalogs.
pub const CATALOG_URL_PREFIX: &str = "https://swscan.apple.com/content/catalogs/others/";

/// Enrollment plist location relative to a volume root.
pub const SEED_ENROLLMENT_PLIST: &str = "Users/Shared/.SeedEnrollment.plist";

/// Enrollment plist location on 10.9.
pub const SEED_ENROLLMENT_PLIST_10_9: &str =
    "Library/Application Support/App Store/.SeedEnrollment.plist";

/// A software update channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeedProgram {
    DeveloperSeed,
    PublicSeed,
    CustomerSeed,
    Regular,
}

impl SeedProgram {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeveloperSeed => "DeveloperSeed",
            Self::PublicSeed => "PublicSeed",
            Self::CustomerSeed => "CustomerSeed",
            Self::Regular => "Regular",
        }
    }

    /// File name of the catalog serving this program.
    pub fn catalog_file_name(&self) -> &'static str {
        match self {
            Self::DeveloperSeed => "index-10.13seed-10.13-10.12-10.11-10.10-10.9-mountainlion-lion-snowleopard-leopard.merged-1.sucatalog",
            Self::PublicSeed => "index-10.13beta-10.13-10.12-10.11-10.10-10.9-mountainlion-lion-snowleopard-leopard.merged-1.sucatalog",
            Self::CustomerSeed => "index-10.13customerseed-10.13-10.12-10.11-10.10-10.9-mountainlion-lion-snowleopard-leopard.merged-1.sucatalog",
            Self::Regular => "index-10.13-10.12-10.11-10.10-10.9-mountainlion-lion-snowleopard-leopard.merged-1.sucatalog",
        }
    }

    pub fn catalog_url(&self) -> String {
        format!("{}{}", CATALOG_URL_PREFIX, self.catalog_file_name())
    }
}

impl From<&str> for SeedProgram {
    /// Unrecognized names resolve to [SeedProgram::Regular].
    fn from(s: &str) -> Self {
        match s.trim() {
            "DeveloperSeed" => Self::DeveloperSeed,
            "PublicSeed" => Self::PublicSeed,
            "CustomerSeed" => Self::CustomerSeed,
            _ => Self::Regular,
        }
    }
}

impl Display for SeedProgram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path of the enrollment plist for a volume running `system`.
pub fn seed_enrollment_path(volume: &Path, system: &SystemVersion) -> PathBuf {
    if system.product_version == "10.9" {
        volume.join(SEED_ENROLLMENT_PLIST_10_9)
    } else {
        volume.join(SEED_ENROLLMENT_PLIST)
    }
}

/// Resolve the seed program a volume is enrolled in.
///
/// A volume without an enrollment plist is on the regular channel.
pub fn enrolled_seed_program(volume: &Path, system: &SystemVersion) -> CatalogResult<SeedProgram> {
    let path = seed_enrollment_path(volume, system);

    if !path.exists() {
        debug!("{} does not exist; assuming no enrollment", path.display());
        return Ok(SeedProgram::Regular);
    }

    let value = plist::Value::from_file(&path)?;

    let program = value
        .as_dictionary()
        .and_then(|dict| dict.get("SeedProgram"))
        .and_then(|x| x.as_string())
        .map(SeedProgram::from)
        .unwrap_or(SeedProgram::Regular);

    info!("seed program enrollment: {}", program);

    Ok(program)
}

#[cfg(test)]
mod test {
    use super::*;

    fn system(version: &str) -> SystemVersion {
        SystemVersion {
            product_name: None,
            product_version: version.to_string(),
            product_build_version: "17A365".to_string(),
        }
    }

    #[test]
    fn program_names() {
        assert_eq!(SeedProgram::from("DeveloperSeed"), SeedProgram::DeveloperSeed);
        assert_eq!(SeedProgram::from("PublicSeed"), SeedProgram::PublicSeed);
        assert_eq!(SeedProgram::from("CustomerSeed"), SeedProgram::CustomerSeed);
        assert_eq!(SeedProgram::from("AppleSeed"), SeedProgram::Regular);
        assert_eq!(SeedProgram::from(""), SeedProgram::Regular);

        assert_eq!(
            SeedProgram::PublicSeed.catalog_url(),
            "https://swscan.apple.com/content/catalogs/others/index-10.13beta-10.13-10.12-10.11-10.10-10.9-mountainlion-lion-snowleopard-leopard.merged-1.sucatalog"
        );
        assert!(SeedProgram::Regular
            .catalog_file_name()
            .starts_with("index-10.13-10.12-"));
    }

    #[test]
    fn enrollment() -> CatalogResult<()> {
        let td = tempfile::Builder::new()
            .prefix("apple-seed-catalog-")
            .tempdir()?;
        let volume = td.path();

        assert_eq!(
            enrolled_seed_program(volume, &system("10.13"))?,
            SeedProgram::Regular
        );

        let path = volume.join(SEED_ENROLLMENT_PLIST);
        std::fs::create_dir_all(path.parent().unwrap())?;

        let mut dict = plist::Dictionary::new();
        dict.insert("SeedProgram".into(), "CustomerSeed".into());
        plist::Value::Dictionary(dict).to_file_xml(&path)?;

        assert_eq!(
            enrolled_seed_program(volume, &system("10.13"))?,
            SeedProgram::CustomerSeed
        );

        // 10.9 keeps its enrollment elsewhere.
        assert_eq!(
            seed_enrollment_path(volume, &system("10.9")),
            volume.join(SEED_ENROLLMENT_PLIST_10_9)
        );
        assert_eq!(
            enrolled_seed_program(volume, &system("10.9"))?,
            SeedProgram::Regular
        );

        Ok(())
    }
}
