// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tool settings.
//!
//! Settings come from built-in defaults, optionally overridden by a YAML file
//! given via `--config`. Command line arguments take precedence over both.
//! All keys are optional:
//!
//! ```yaml
//! firmware-dir: /tmp/FirmwareUpdate
//! assistant-dir: /tmp/InstallAssistantAuto
//! macos-version: "10.13"
//! language: English
//! seed-program: DeveloperSeed
//! volumes-dir: /Volumes
//! efiupdater: /usr/libexec/efiupdater
//! platform-resources-dir: /System/Library/Extensions/...
//! ```

use {
    crate::error::Result,
    log::debug,
    serde::Deserialize,
    std::path::{Path, PathBuf},
};

/// Location of EFI images within an expanded firmware update package.
pub const EFI_PAYLOAD_PATH: &str = "Scripts/Tools/EFIPayloads";

/// Location of SMC JSON files within an expanded firmware update package.
pub const SMC_JSON_PATH: &str = "Scripts/Tools/SMCJSONs";

const PLATFORM_RESOURCES_DIR: &str = "/System/Library/Extensions/IOPlatformPluginFamily.kext/Contents/PlugIns/X86PlatformPlugin.kext/Contents/Resources";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Where `FirmwareUpdate.pkg` is expanded.
    pub firmware_dir: PathBuf,
    /// Where `InstallAssistantAuto.pkg` is expanded.
    pub assistant_dir: PathBuf,
    pub macos_version: String,
    /// Distribution language.
    pub language: String,
    /// Seed program to use instead of the volume's enrollment.
    pub seed_program: Option<String>,
    /// Directory whose entries are candidate target volumes.
    pub volumes_dir: PathBuf,
    pub efiupdater: PathBuf,
    pub platform_resources_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from("/tmp/FirmwareUpdate"),
            assistant_dir: PathBuf::from("/tmp/InstallAssistantAuto"),
            macos_version: "10.13".to_string(),
            language: "English".to_string(),
            seed_program: None,
            volumes_dir: PathBuf::from("/Volumes"),
            efiupdater: PathBuf::from("/usr/libexec/efiupdater"),
            platform_resources_dir: PathBuf::from(PLATFORM_RESOURCES_DIR),
        }
    }
}

impl Settings {
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        // An empty document deserializes to unit, not a mapping.
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }

        Ok(serde_yaml::from_slice(data)?)
    }

    /// Resolve settings, reading the YAML file at `path` if given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                debug!("reading settings from {}", path.display());
                Self::from_yaml(&std::fs::read(path)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn efi_payload_dir(&self) -> PathBuf {
        self.firmware_dir.join(EFI_PAYLOAD_PATH)
    }

    pub fn smc_json_dir(&self) -> PathBuf {
        self.firmware_dir.join(SMC_JSON_PATH)
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn defaults() -> Result<()> {
        let settings = Settings::load(None)?;

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.macos_version, "10.13");
        assert_eq!(
            settings.efi_payload_dir(),
            PathBuf::from("/tmp/FirmwareUpdate/Scripts/Tools/EFIPayloads")
        );
        assert_eq!(
            settings.smc_json_dir(),
            PathBuf::from("/tmp/FirmwareUpdate/Scripts/Tools/SMCJSONs")
        );

        assert_eq!(Settings::from_yaml(b"\n")?, Settings::default());

        Ok(())
    }

    #[test]
    fn yaml_overrides() -> Result<()> {
        let td = tempfile::Builder::new().prefix("seedtool-").tempdir()?;
        let path = td.path().join("seedtool.yaml");

        std::fs::write(
            &path,
            indoc! {r#"
                firmware-dir: /var/tmp/fw
                macos-version: "10.13.2"
                seed-program: PublicSeed
            "#},
        )?;

        let settings = Settings::load(Some(&path))?;
        assert_eq!(settings.firmware_dir, PathBuf::from("/var/tmp/fw"));
        assert_eq!(settings.macos_version, "10.13.2");
        assert_eq!(settings.seed_program.as_deref(), Some("PublicSeed"));
        assert_eq!(settings.language, "English");

        assert!(Settings::from_yaml(b"firmware-dir: [1, 2]").is_err());
        assert!(Settings::from_yaml(b"unknown: true").is_ok());

        Ok(())
    }
}
