// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BIOS ID records.
//!
//! Apple EFI images embed an Intel style BIOS ID record: the ASCII signature
//! `$IBIOSI$` followed by the identification string. Apple images store the
//! string as UTF-16LE. The string has the form
//! `MODEL.OEM.MAJOR.BUILD.DATE`, e.g. `IM171.88Z.0110.B00.1708080012`, where
//! `DATE` is `YYMMDDhhmm`.

use {
    crate::{board, Error, PayloadResult},
    std::fmt::{Display, Formatter},
};

/// Signature introducing a BIOS ID record.
pub const BIOS_ID_SIGNATURE: &[u8; 8] = b"$IBIOSI$";

/// Number of bytes of identification data following the signature.
pub const BIOS_ID_RECORD_SIZE: usize = 0x41;

/// Model code prefixes and the model identifier family they denote.
///
/// Order matters: longer prefixes sharing a shorter prefix come first.
static MODEL_CODE_PREFIXES: &[(&str, &str)] = &[
    ("IMP", "iMacPro"),
    ("IM", "iMac"),
    ("MBP", "MacBookPro"),
    ("MBA", "MacBookAir"),
    ("MB", "MacBook"),
    ("MM", "Macmini"),
    ("MP", "MacPro"),
];

/// A parsed BIOS ID string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BiosId {
    raw: String,
    fields: Vec<String>,
}

impl BiosId {
    /// Parse a BIOS ID from its string form.
    pub fn parse(s: &str) -> PayloadResult<Self> {
        let raw = s.trim().to_string();

        let fields = raw
            .split('.')
            .map(|x| x.trim().to_string())
            .collect::<Vec<_>>();

        if fields.first().map(|x| x.is_empty()).unwrap_or(true) {
            return Err(Error::BadBiosId(raw));
        }

        Ok(Self { raw, fields })
    }

    /// Decode the identification data following a `$IBIOSI$` signature.
    ///
    /// Both UTF-16LE and single byte encodings are recognized. Decoding stops
    /// at the first NUL character.
    pub fn from_record(data: &[u8]) -> PayloadResult<Self> {
        let data = &data[..data.len().min(BIOS_ID_RECORD_SIZE)];

        let s = if data.len() >= 2 && data[0] != 0 && data[1] == 0 {
            let units = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .take_while(|unit| *unit != 0)
                .collect::<Vec<_>>();

            String::from_utf16_lossy(&units)
        } else {
            let bytes = data
                .iter()
                .copied()
                .take_while(|b| *b != 0)
                .collect::<Vec<_>>();

            String::from_utf8_lossy(&bytes).to_string()
        };

        Self::parse(&s)
    }

    /// The full BIOS ID string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The model code component, e.g. `IM171`.
    pub fn model_code(&self) -> &str {
        &self.fields[0]
    }

    /// The build date component (`YYMMDDhhmm`), if present.
    pub fn date(&self) -> Option<&str> {
        self.fields.get(4).map(|x| x.as_str())
    }

    /// The model identifier derived from the model code, e.g. `iMac17,1`.
    pub fn model_identifier(&self) -> String {
        model_identifier_for_code(self.model_code())
    }

    /// The board ID derived from the model code.
    pub fn board_id(&self) -> &'static str {
        board::board_id_for_model(&self.model_identifier())
    }

    /// Whether an installed ROM version string predates this BIOS ID.
    ///
    /// Only the date components are compared. If either string lacks a date
    /// component, no update is assumed.
    pub fn is_newer_than(&self, installed: &str) -> bool {
        let installed_date = installed.split('.').nth(4).map(|x| x.trim_matches('\0').trim());

        match (installed_date, self.date()) {
            (Some(installed), Some(ours)) if !installed.is_empty() => installed < ours,
            _ => false,
        }
    }
}

impl Display for BiosId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Format the numeric part of a model code as `major,minor`.
///
/// `51` becomes `5,1` and `171` becomes `17,1`.
fn model_number(digits: &str) -> Option<String> {
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    match digits.len() {
        2 | 3 => {
            let (major, minor) = digits.split_at(digits.len() - 1);
            Some(format!("{},{}", major, minor))
        }
        _ => None,
    }
}

/// Resolve the model identifier denoted by a firmware model code.
///
/// Returns [board::UNKNOWN] if the code isn't recognized.
pub fn model_identifier_for_code(code: &str) -> String {
    let code = code.trim_start();

    MODEL_CODE_PREFIXES
        .iter()
        .find_map(|(prefix, family)| {
            code.strip_prefix(prefix)
                .and_then(model_number)
                .map(|number| format!("{}{}", family, number))
        })
        .unwrap_or_else(|| board::UNKNOWN.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn model_codes() {
        assert_eq!(model_identifier_for_code("IM171"), "iMac17,1");
        assert_eq!(model_identifier_for_code("  MBP143"), "MacBookPro14,3");
        assert_eq!(model_identifier_for_code("MBA71"), "MacBookAir7,1");
        assert_eq!(model_identifier_for_code("MB101"), "MacBook10,1");
        assert_eq!(model_identifier_for_code("MM71"), "Macmini7,1");
        assert_eq!(model_identifier_for_code("MP51"), "MacPro5,1");
        assert_eq!(model_identifier_for_code("IMP11"), "iMacPro1,1");
        assert_eq!(model_identifier_for_code("XS11"), board::UNKNOWN);
        assert_eq!(model_identifier_for_code("IM1"), board::UNKNOWN);
        assert_eq!(model_identifier_for_code("IM1711"), board::UNKNOWN);
    }

    #[test]
    fn parse_utf16_record() -> PayloadResult<()> {
        let mut record = utf16("IM171.88Z.0110.B00.1708080012");
        record.extend_from_slice(&[0, 0, 0x41, 0x42]);

        let id = BiosId::from_record(&record)?;
        assert_eq!(id.as_str(), "IM171.88Z.0110.B00.1708080012");
        assert_eq!(id.model_code(), "IM171");
        assert_eq!(id.date(), Some("1708080012"));
        assert_eq!(id.model_identifier(), "iMac17,1");
        assert_eq!(id.board_id(), "Mac-DB15BD556843C820");

        Ok(())
    }

    #[test]
    fn parse_ascii_record() -> PayloadResult<()> {
        let id = BiosId::from_record(b"MP51.88Z.007F.B03.1010071432\0\0garbage")?;
        assert_eq!(id.to_string(), "MP51.88Z.007F.B03.1010071432");
        assert_eq!(id.board_id(), "Mac-F221DCC8");

        assert!(BiosId::from_record(b"\0\0\0\0").is_err());

        Ok(())
    }

    #[test]
    fn update_detection() -> PayloadResult<()> {
        let payload = BiosId::parse("IM171.88Z.0110.B00.1708080012")?;

        assert!(payload.is_newer_than("IM171.88Z.0105.B00.1702271524"));
        assert!(!payload.is_newer_than("IM171.88Z.0110.B00.1708080012"));
        assert!(!payload.is_newer_than("IM171.88Z.0111.B00.1710200101"));
        assert!(!payload.is_newer_than("garbage"));

        let short = BiosId::parse("IM171.88Z")?;
        assert_eq!(short.date(), None);
        assert!(!short.is_newer_than("IM171.88Z.0105.B00.1702271524"));

        Ok(())
    }
}
