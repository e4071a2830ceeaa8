// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Distribution XML files.
//!
//! Every catalog product has a per language *distribution* file: an
//! `installer-gui-script` document. We only extract what is needed to
//! identify the macOS build a product delivers:
//!
//! * The `auxinfo` dictionary, holding `BUILD` and `VERSION` keys on products
//!   that carry it.
//! * The `id` of top level `pkg-ref` elements, whose last component is the
//!   build on products lacking `auxinfo`.
//! * The `localization/strings` text, which names beta seeds as such.

use {
    crate::CatalogResult,
    log::warn,
    std::{io::Read, path::Path},
    xml::reader::{EventReader, XmlEvent},
};

/// Package whose `pkg-ref` identifies firmware updates.
pub const FIRMWARE_UPDATE_PACKAGE: &str = "FirmwareUpdate.pkg";

/// Placeholder for builds and versions that couldn't be determined.
pub const UNKNOWN: &str = "Unknown";

/// Metadata extracted from a distribution file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DistributionInfo {
    /// Whether the document has an `auxinfo` element.
    pub has_auxinfo: bool,
    /// `auxinfo` `BUILD` value.
    pub build: Option<String>,
    /// `auxinfo` `VERSION` value.
    pub version: Option<String>,
    /// `id` attributes of top level `pkg-ref` elements, in document order.
    pub pkg_ref_ids: Vec<String>,
    /// Text of the first `strings` element under `localization`.
    pub localization_strings: Option<String>,
}

/// Build and version a product delivers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildVersion {
    pub build: String,
    /// `None` when the distribution doesn't state a version.
    pub version: Option<String>,
}

impl DistributionInfo {
    pub fn from_reader(reader: impl Read) -> CatalogResult<Self> {
        let mut info = Self::default();

        let mut stack: Vec<String> = vec![];
        let mut text = String::new();
        let mut pending_key: Option<String> = None;

        for event in EventReader::new(reader) {
            match event? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    let local = name.local_name;

                    // Children of the root element sit at depth 1.
                    match (stack.len(), local.as_str()) {
                        (1, "auxinfo") => {
                            info.has_auxinfo = true;
                        }
                        (1, "pkg-ref") => {
                            if let Some(id) = attributes
                                .iter()
                                .find(|a| a.name.local_name == "id")
                                .map(|a| a.value.clone())
                            {
                                info.pkg_ref_ids.push(id);
                            }
                        }
                        _ => {}
                    }

                    stack.push(local);
                    text.clear();
                }
                XmlEvent::Characters(s) | XmlEvent::CData(s) => {
                    text.push_str(&s);
                }
                XmlEvent::EndElement { .. } => {
                    let local = stack.pop().unwrap_or_default();
                    let in_auxinfo = stack.get(1).map(|x| x == "auxinfo").unwrap_or(false);
                    let in_localization =
                        stack.get(1).map(|x| x == "localization").unwrap_or(false);

                    if in_auxinfo {
                        if local == "key" {
                            pending_key = Some(text.trim().to_string());
                        } else if let Some(key) = pending_key.take() {
                            let value = Some(text.trim().to_string());

                            match key.as_str() {
                                "BUILD" => info.build = value,
                                "VERSION" => info.version = value,
                                _ => {}
                            }
                        }
                    } else if in_localization
                        && local == "strings"
                        && info.localization_strings.is_none()
                    {
                        info.localization_strings = Some(text.clone());
                    }

                    text.clear();
                }
                _ => {}
            }
        }

        Ok(info)
    }

    pub fn from_bytes(data: &[u8]) -> CatalogResult<Self> {
        Self::from_reader(data)
    }

    pub fn from_path(path: &Path) -> CatalogResult<Self> {
        Self::from_reader(std::io::BufReader::new(std::fs::File::open(path)?))
    }

    /// Whether the product is a beta seed.
    ///
    /// Looks at the first localized string, which is the product title.
    pub fn is_beta(&self) -> bool {
        self.localization_strings
            .as_deref()
            .and_then(|s| s.split(';').next())
            .map(|title| title.to_lowercase().contains("beta"))
            .unwrap_or(false)
    }

    /// Resolve the build and version of the product.
    ///
    /// Distributions without `auxinfo` are identified by their `pkg-ref`
    /// ids. When unpacking a firmware update, the firmware package's id is
    /// used. Otherwise the first id with more than 4 components yields the
    /// build as its last component.
    pub fn build_version(&self, package_name: &str, unpacking: bool) -> BuildVersion {
        if self.has_auxinfo {
            return BuildVersion {
                build: self.build.clone().unwrap_or_else(|| UNKNOWN.to_string()),
                version: self.version.clone(),
            };
        }

        let firmware = package_name == FIRMWARE_UPDATE_PACKAGE && unpacking;

        let build = self.pkg_ref_ids.iter().find_map(|id| {
            let parts = id.split('.').collect::<Vec<_>>();
            let last = parts.last().copied().unwrap_or_default();

            if firmware {
                if last == "FirmwareUpdate" {
                    Some(last.to_string())
                } else {
                    None
                }
            } else if parts.len() > 4 {
                Some(last.to_string())
            } else {
                None
            }
        });

        match build {
            Some(build) => BuildVersion {
                build,
                version: None,
            },
            None => {
                warn!("unable to determine build from distribution");
                BuildVersion {
                    build: UNKNOWN.to_string(),
                    version: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const INSTALLER_DIST: &str = indoc! {r#"
        <?xml version="1.0" encoding="utf-8"?>
        <installer-gui-script minSpecVersion="2">
            <title>SU_TITLE</title>
            <auxinfo>
                <dict>
                    <key>BUILD</key>
                    <string>17B1002</string>
                    <key>VERSION</key>
                    <string>10.13.1</string>
                </dict>
            </auxinfo>
            <pkg-ref id="com.apple.pkg.InstallAssistantAuto" auth="root">InstallAssistantAuto.pkg</pkg-ref>
            <choices-outline>
                <line choice="manual"/>
            </choices-outline>
            <localization>
                <strings language="English"><![CDATA["SU_TITLE" = "macOS High Sierra Beta";
        "SU_VERS" = "10.13.1";]]></strings>
            </localization>
        </installer-gui-script>
    "#};

    const UPDATE_DIST: &str = indoc! {r#"
        <?xml version="1.0" encoding="utf-8"?>
        <installer-gui-script minSpecVersion="1">
            <options hostArchitectures="i386"/>
            <pkg-ref id="com.apple.pkg.FirmwareUpdate">FirmwareUpdate.pkg</pkg-ref>
            <pkg-ref id="com.apple.pkg.update.os.10.13.2.17C67">macOSUpd10.13.2.pkg</pkg-ref>
            <choice id="su">
                <pkg-ref id="com.apple.pkg.update.os.10.13.2.17C999"/>
            </choice>
            <localization>
                <strings language="English">"SU_TITLE" = "macOS High Sierra 10.13.2 Update";</strings>
                <strings language="French">"SU_TITLE" = "beta";</strings>
            </localization>
        </installer-gui-script>
    "#};

    #[test]
    fn parse_auxinfo() -> CatalogResult<()> {
        let info = DistributionInfo::from_bytes(INSTALLER_DIST.as_bytes())?;

        assert!(info.has_auxinfo);
        assert_eq!(info.build.as_deref(), Some("17B1002"));
        assert_eq!(info.version.as_deref(), Some("10.13.1"));
        assert_eq!(info.pkg_ref_ids, vec!["com.apple.pkg.InstallAssistantAuto"]);
        assert!(info.is_beta());

        assert_eq!(
            info.build_version("*", false),
            BuildVersion {
                build: "17B1002".into(),
                version: Some("10.13.1".into())
            }
        );

        Ok(())
    }

    #[test]
    fn parse_pkg_refs() -> CatalogResult<()> {
        let info = DistributionInfo::from_bytes(UPDATE_DIST.as_bytes())?;

        assert!(!info.has_auxinfo);
        assert_eq!(
            info.pkg_ref_ids,
            vec![
                "com.apple.pkg.FirmwareUpdate",
                "com.apple.pkg.update.os.10.13.2.17C67"
            ]
        );
        assert!(!info.is_beta());

        assert_eq!(info.build_version("*", false).build, "17C67");
        assert_eq!(info.build_version("FirmwareUpdate.pkg", false).build, "17C67");
        assert_eq!(
            info.build_version("FirmwareUpdate.pkg", true),
            BuildVersion {
                build: "FirmwareUpdate".into(),
                version: None
            }
        );

        Ok(())
    }

    #[test]
    fn unknown_build() -> CatalogResult<()> {
        let info = DistributionInfo::from_bytes(
            br#"<installer-gui-script><pkg-ref id="com.apple.pkg"/></installer-gui-script>"#,
        )?;

        assert_eq!(info.build_version("*", false).build, UNKNOWN);
        assert!(!info.is_beta());

        assert!(DistributionInfo::from_bytes(b"<installer-gui-script>").is_err());

        Ok(())
    }
}
