// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! macOS versions and build numbers.

use {
    crate::{CatalogError, CatalogResult},
    serde::Deserialize,
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        path::Path,
        str::FromStr,
    },
};

/// Location of the system version plist relative to a volume root.
pub const SYSTEM_VERSION_PLIST: &str = "System/Library/CoreServices/SystemVersion.plist";

/// A dotted numeric version like `10.13.1`.
///
/// Missing trailing components compare as zero, so `10.13` equals `10.13.0`.
#[derive(Clone, Debug)]
pub struct OsVersion {
    raw: String,
    components: Vec<u32>,
}

impl OsVersion {
    pub fn parse(s: &str) -> CatalogResult<Self> {
        let raw = s.trim().to_string();

        let components = raw
            .split('.')
            .map(|x| x.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CatalogError::BadVersion(raw.clone()))?;

        Ok(Self { raw, components })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn major(&self) -> u32 {
        self.components.first().copied().unwrap_or(0)
    }

    pub fn minor(&self) -> u32 {
        self.components.get(1).copied().unwrap_or(0)
    }

    /// The marketing name of this version's major release.
    pub fn name(&self) -> &'static str {
        os_name(self.major(), self.minor())
    }
}

impl FromStr for OsVersion {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for OsVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for OsVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());

        (0..len)
            .map(|i| {
                let a = self.components.get(i).copied().unwrap_or(0);
                let b = other.components.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|x| *x != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for OsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OsVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OsVersion {}

/// Resolve the marketing name of a Mac OS X / macOS release.
pub fn os_name(major: u32, minor: u32) -> &'static str {
    if major != 10 {
        return "Unknown";
    }

    match minor {
        0 => "Cheetah",
        1 => "Puma",
        2 => "Jaguar",
        3 => "Panther",
        4 => "Tiger",
        5 => "Leopard",
        6 => "Snow Leopard",
        7 => "Lion",
        8 => "Mountain Lion",
        9 => "Mavericks",
        10 => "Yosemite",
        11 => "El Capitan",
        12 => "Sierra",
        13 => "High Sierra",
        _ => "Unknown",
    }
}

/// Content of `SystemVersion.plist`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemVersion {
    pub product_name: Option<String>,
    pub product_version: String,
    pub product_build_version: String,
}

impl SystemVersion {
    pub fn from_path(path: &Path) -> CatalogResult<Self> {
        Ok(plist::from_file(path)?)
    }

    /// Read the system version of the OS installed on a volume.
    pub fn from_volume(volume: &Path) -> CatalogResult<Self> {
        Self::from_path(&volume.join(SYSTEM_VERSION_PLIST))
    }

    pub fn version(&self) -> CatalogResult<OsVersion> {
        OsVersion::parse(&self.product_version)
    }
}

/// How a candidate build relates to the installed one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildComparison {
    Same,
    Older,
    Newer,
}

/// Split a build number like `17B1003a` into comparable parts.
///
/// Builds are a major number, a letter for the minor release, a build number
/// and an optional suffix.
fn build_parts(build: &str) -> Option<(u32, char, u32, &str)> {
    let letter_index = build.find(|c: char| c.is_ascii_alphabetic())?;
    let (major, rest) = build.split_at(letter_index);
    let mut chars = rest.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let rest = chars.as_str();

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(digits_end);

    Some((
        major.parse().ok()?,
        letter,
        if number.is_empty() {
            0
        } else {
            number.parse().ok()?
        },
        suffix,
    ))
}

/// Compare a candidate build against the currently installed build.
pub fn compare_builds(candidate: &str, installed: &str) -> BuildComparison {
    let ordering = match (build_parts(candidate), build_parts(installed)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => candidate.cmp(installed),
    };

    match ordering {
        Ordering::Equal => BuildComparison::Same,
        Ordering::Less => BuildComparison::Older,
        Ordering::Greater => BuildComparison::Newer,
    }
}
