// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware properties of the running machine.
//!
//! Values are read from the I/O Registry via `ioreg` and from the output of
//! `efiupdater`.

use {
    crate::error::Result,
    duct::cmd,
    log::{debug, warn},
    std::path::Path,
};

/// Decode an `ioreg` property value.
///
/// Handles quoted strings (`"2.41f2"`), string data (`<"Mac-...">`) and hex
/// data (`<4d61632d00>`). NUL padding is removed.
pub fn decode_ioreg_value(value: &str) -> String {
    let value = value.trim();

    let decoded = if let Some(inner) = value
        .strip_prefix("<\"")
        .and_then(|x| x.strip_suffix("\">"))
    {
        inner.to_string()
    } else if let Some(inner) = value.strip_prefix('"').and_then(|x| x.strip_suffix('"')) {
        inner.to_string()
    } else if let Some(inner) = value.strip_prefix('<').and_then(|x| x.strip_suffix('>')) {
        match hex::decode(inner) {
            Ok(data) => String::from_utf8_lossy(&data).to_string(),
            Err(_) => inner.to_string(),
        }
    } else {
        value.to_string()
    };

    decoded.trim_matches('\0').to_string()
}

fn property_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.trim_start_matches(|c: char| c.is_whitespace() || c == '|')
        .strip_prefix(&format!("\"{}\" = ", name))
}

/// Find the first value of a property in `ioreg` output.
pub fn parse_ioreg_property(output: &str, name: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| property_value(line, name))
        .map(decode_ioreg_value)
}

/// Find a property of a named node in `ioreg -l` output.
///
/// `node` matches the node name with or without its `@unit` suffix.
pub fn parse_node_property(output: &str, node: &str, name: &str) -> Option<String> {
    let mut in_node = false;

    for line in output.lines() {
        if let Some(index) = line.find("+-o ") {
            let rest = &line[index + 4..];
            let node_name = rest.split("  <").next().unwrap_or(rest).trim();

            in_node = node_name == node
                || node_name
                    .strip_prefix(node)
                    .map(|x| x.starts_with('@'))
                    .unwrap_or(false);
            continue;
        }

        if in_node {
            if let Some(value) = property_value(line, name) {
                return Some(decode_ioreg_value(value));
            }
        }
    }

    None
}

/// EFI ROM versions as reported by `efiupdater`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EfiVersions {
    /// Full BIOS ID of the installed ROM.
    pub raw: String,
    pub current: String,
    pub update: String,
}

impl EfiVersions {
    /// Parse `efiupdater` output.
    ///
    /// Older `efiupdater` releases don't print the raw version string, in
    /// which case `rom_version` supplies it.
    pub fn parse(output: &str, rom_version: impl FnOnce() -> Option<String>) -> Option<Self> {
        let mut lines = output
            .lines()
            .filter(|x| !x.trim().is_empty())
            .map(|x| x.to_string())
            .collect::<Vec<_>>();
        let count = lines.len();

        if count < 3 {
            lines.insert(
                0,
                format!("Raw EFI Version string: {}", rom_version().unwrap_or_default()),
            );
        }

        let value = |line: &str| -> Option<String> {
            line.split_once(": ").map(|(_, v)| v.to_string())
        };
        let bracketed = |s: String| s.trim_matches(|c| c == '[' || c == ']' || c == ' ').to_string();

        let raw = value(lines.get(0)?)?.trim_matches(' ').to_string();
        let current = bracketed(value(lines.get(1)?)?);
        let update = if count == 3 {
            bracketed(value(lines.get(2)?)?)
        } else {
            current.clone()
        };

        Some(Self {
            raw,
            current,
            update,
        })
    }
}

fn ioreg(args: &[&str]) -> Result<String> {
    debug!("running ioreg {}", args.join(" "));
    Ok(cmd("ioreg", args.iter().copied()).stderr_null().read()?)
}

/// The board ID of this machine.
pub fn board_id() -> Result<Option<String>> {
    let output = ioreg(&["-rd1", "-c", "IOPlatformExpertDevice"])?;

    Ok(parse_ioreg_property(&output, "board-id"))
}

/// The BIOS ID of the installed EFI ROM (`IODeviceTree:/rom`).
pub fn rom_version() -> Result<Option<String>> {
    let output = ioreg(&["-l", "-p", "IODeviceTree", "-d", "2"])?;

    Ok(parse_node_property(&output, "rom", "version"))
}

/// The SMC firmware version of this machine.
pub fn smc_version() -> Result<Option<String>> {
    let output = ioreg(&["-rd1", "-c", "AppleSMC"])?;

    Ok(parse_ioreg_property(&output, "smc-version"))
}

/// Run `efiupdater` to obtain EFI ROM versions.
pub fn efi_versions(efiupdater: &Path) -> Result<Option<EfiVersions>> {
    let output = match cmd!(efiupdater).stderr_null().unchecked().read() {
        Ok(output) => output,
        Err(e) => {
            warn!("unable to run {}: {}", efiupdater.display(), e);
            String::new()
        }
    };

    Ok(EfiVersions::parse(&output, || {
        rom_version().unwrap_or_else(|e| {
            warn!("unable to read ROM version: {}", e);
            None
        })
    }))
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const PLATFORM_EXPERT: &str = indoc! {r#"
        +-o iMac17,1  <class IOPlatformExpertDevice, id 0x100000112, registered, matched, active, busy 0 (1021 ms), retain 32>
            {
              "compatible" = <"iMac17,1">
              "version" = <"1.0">
              "board-id" = <"Mac-DB15BD556843C820">
              "IOPlatformSerialNumber" = "C02SERIAL"
            }
    "#};

    const DEVICE_TREE: &str = indoc! {r#"
        +-o Root  <class IORegistryEntry, id 0x100000100, retain 21>
          +-o iMac17,1  <class IOPlatformExpertDevice, id 0x100000112, registered>
            | {
            |   "version" = <"1.0">
            | }
            |
            +-o rom@0  <class IOService, id 0x100000118, !registered, !matched, active>
            |   {
            |     "vendor" = <"Apple Inc.">
            |     "version" = <"IM171.88Z.0110.B00.1708080012">
            |   }
            |
            +-o chosen  <class IOService, id 0x100000119>
    "#};

    #[test]
    fn ioreg_values() {
        assert_eq!(decode_ioreg_value("<\"Mac-F221DCC8\">"), "Mac-F221DCC8");
        assert_eq!(decode_ioreg_value("\"2.41f2\""), "2.41f2");
        assert_eq!(decode_ioreg_value("<4d61632d4631000000>"), "Mac-F1");
        assert_eq!(decode_ioreg_value("<zz>"), "zz");
        assert_eq!(decode_ioreg_value("Yes"), "Yes");

        assert_eq!(
            parse_ioreg_property(PLATFORM_EXPERT, "board-id").as_deref(),
            Some("Mac-DB15BD556843C820")
        );
        assert_eq!(parse_ioreg_property(PLATFORM_EXPERT, "smc-version"), None);
    }

    #[test]
    fn node_property() {
        assert_eq!(
            parse_node_property(DEVICE_TREE, "rom", "version").as_deref(),
            Some("IM171.88Z.0110.B00.1708080012")
        );
        assert_eq!(
            parse_node_property(DEVICE_TREE, "iMac17,1", "version").as_deref(),
            Some("1.0")
        );
        assert_eq!(parse_node_property(DEVICE_TREE, "chosen", "version"), None);
        assert_eq!(parse_node_property(DEVICE_TREE, "ro", "version"), None);
    }

    #[test]
    fn efiupdater_output() {
        let output = indoc! {"
            Raw EFI Version string: IM171.88Z.0110.B00.1708080012
            Current EFI Version: [ 0110.B00 ]
            Update EFI Version: [ 0111.B00 ]
        "};

        assert_eq!(
            EfiVersions::parse(output, || panic!("raw version present")),
            Some(EfiVersions {
                raw: "IM171.88Z.0110.B00.1708080012".into(),
                current: "0110.B00".into(),
                update: "0111.B00".into(),
            })
        );

        // Older releases only print the current version.
        let output = "Current EFI Version: [ 0110.B00 ]\n";
        assert_eq!(
            EfiVersions::parse(output, || Some("IM171.88Z.0110.B00.1708080012".into())),
            Some(EfiVersions {
                raw: "IM171.88Z.0110.B00.1708080012".into(),
                current: "0110.B00".into(),
                update: "0110.B00".into(),
            })
        );

        assert_eq!(EfiVersions::parse("", || None), None);
    }
}
