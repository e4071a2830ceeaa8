// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SMC firmware metadata.
//!
//! Firmware updates ship one JSON file per board, named `<board-id>.json`,
//! under `Scripts/Tools/SMCJSONs`. The document is keyed by the board ID:
//!
//! ```json
//! { "Mac-DB15BD556843C820": { "smc-version": "2.39f6", ... } }
//! ```

use {
    crate::{Error, PayloadResult},
    serde::Deserialize,
    std::{
        cmp::Ordering,
        collections::{BTreeMap, HashMap},
        fmt::{Display, Formatter},
        path::Path,
    },
};

/// An SMC firmware version like `2.41f2`.
///
/// Versions of the form `MAJOR.MINOR<stage>BUILD` compare numerically with
/// stages ordered `a` < `b` < `f`. Versions that don't parse sort after all
/// parsed ones and compare as strings among themselves. Numerically equal
/// versions spelled differently (`2.41f02`, `2.41f2`) are ordered by text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SmcVersion {
    raw: String,
    parts: Option<(u32, u32, u8, u32)>,
}

impl SmcVersion {
    pub fn parse(s: &str) -> Self {
        let raw = s.trim().trim_matches('\0').to_string();
        let parts = Self::parse_parts(&raw);

        Self { raw, parts }
    }

    fn parse_parts(s: &str) -> Option<(u32, u32, u8, u32)> {
        let (major, rest) = s.split_once('.')?;
        let stage_index = rest.find(|c: char| c.is_ascii_alphabetic())?;
        let (minor, rest) = rest.split_at(stage_index);
        let mut chars = rest.chars();

        let stage = match chars.next()? {
            'a' => 0,
            'b' => 1,
            'f' => 2,
            _ => return None,
        };

        Some((
            major.parse().ok()?,
            minor.parse().ok()?,
            stage,
            chars.as_str().parse().ok()?,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn sort_key(&self) -> (bool, Option<(u32, u32, u8, u32)>, &str) {
        (self.parts.is_none(), self.parts, &self.raw)
    }
}

impl Display for SmcVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for SmcVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for SmcVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Deserialize)]
struct BoardEntry {
    #[serde(rename = "smc-version")]
    smc_version: String,
    #[serde(flatten)]
    other: BTreeMap<String, serde_json::Value>,
}

/// SMC metadata for a single board.
#[derive(Clone, Debug)]
pub struct SmcPayload {
    pub board_id: String,
    pub smc_version: SmcVersion,
    /// Remaining keys of the board's entry.
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl SmcPayload {
    /// Parse the JSON document describing `board_id`.
    pub fn from_json(board_id: &str, data: &[u8]) -> PayloadResult<Self> {
        let mut document: HashMap<String, BoardEntry> = serde_json::from_slice(data)?;

        let entry = document.remove(board_id).ok_or_else(|| {
            Error::BadSmcPayload(format!("{}.json", board_id), board_id.to_string())
        })?;

        Ok(Self {
            board_id: board_id.to_string(),
            smc_version: SmcVersion::parse(&entry.smc_version),
            properties: entry.other,
        })
    }

    /// Read a `<board-id>.json` file.
    pub fn from_path(path: &Path) -> PayloadResult<Self> {
        let board_id = path
            .file_stem()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();

        let data = std::fs::read(path)?;

        Self::from_json(&board_id, &data).map_err(|e| match e {
            Error::BadSmcPayload(_, board) => {
                Error::BadSmcPayload(path.display().to_string(), board)
            }
            e => e,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_ordering() {
        let v = SmcVersion::parse;

        assert!(v("2.39f6") < v("2.41f2"));
        assert!(v("2.9f1") < v("2.41f2"));
        assert!(v("2.41b1") < v("2.41f1"));
        assert!(v("3.1a9") > v("2.99f99"));
        assert_eq!(
            v("2.41f2").partial_cmp(&v("2.41f2")),
            Some(Ordering::Equal)
        );
        assert_eq!(v("2.41f2\0").as_str(), "2.41f2");

        // Unparseable values sort last and compare as strings.
        assert!(v("unknown") > v("2.41f2"));
        assert!(v("1.x") < v("1.y"));
    }

    #[test]
    fn ordering_is_total() {
        let v = SmcVersion::parse;

        let a = v("2.9f1");
        let b = v("2.41f2");
        let c = v("2.5x");
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);

        let mut versions = vec![v("2.5x"), v("2.41f2"), v("1.x"), v("2.9f1"), v("2.41b1")];
        versions.sort();
        assert_eq!(
            versions.iter().map(|x| x.as_str()).collect::<Vec<_>>(),
            vec!["2.9f1", "2.41b1", "2.41f2", "1.x", "2.5x"]
        );

        // Ordering agrees with equality.
        let padded = v("2.41f02");
        let plain = v("2.41f2");
        assert_ne!(padded, plain);
        assert_ne!(padded.cmp(&plain), Ordering::Equal);
        assert_eq!(plain.cmp(&v("2.41f2")), Ordering::Equal);
    }

    #[test]
    fn parse_payload() -> PayloadResult<()> {
        let json = br#"{"Mac-DB15BD556843C820": {"smc-version": "2.39f6", "smc-branch": "j95"}}"#;

        let payload = SmcPayload::from_json("Mac-DB15BD556843C820", json)?;
        assert_eq!(payload.smc_version.as_str(), "2.39f6");
        assert_eq!(
            payload.properties.get("smc-branch"),
            Some(&serde_json::Value::String("j95".into()))
        );

        assert!(matches!(
            SmcPayload::from_json("Mac-F221DCC8", json),
            Err(Error::BadSmcPayload(_, _))
        ));
        assert!(matches!(
            SmcPayload::from_json("Mac-F221DCC8", b"[]"),
            Err(Error::Json(_))
        ));

        Ok(())
    }

    #[test]
    fn payload_from_file() -> PayloadResult<()> {
        let td = tempfile::Builder::new()
            .prefix("apple-firmware-payload-")
            .tempdir()?;

        let path = td.path().join("Mac-F221DCC8.json");
        std::fs::write(&path, br#"{"Mac-F221DCC8": {"smc-version": "1.39f11"}}"#)?;

        let payload = SmcPayload::from_path(&path)?;
        assert_eq!(payload.board_id, "Mac-F221DCC8");
        assert_eq!(payload.smc_version.to_string(), "1.39f11");
        assert!(payload.properties.is_empty());

        let path = td.path().join("Mac-7BA5B2D9E42DDD94.json");
        std::fs::write(&path, br#"{"Mac-F221DCC8": {"smc-version": "1.39f11"}}"#)?;
        assert!(SmcPayload::from_path(&path).is_err());

        Ok(())
    }
}
