// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! EFI and SMC firmware reports.

use {
    crate::{
        download::{run_download, DownloadRequest},
        error::Result,
        report::{BoardTable, TableStyle},
        settings::Settings,
    },
    apple_firmware_payload::{
        board,
        pbzx::extract_payload_firmware,
        Error as PayloadError, FirmwareImage, FirmwareKind, FirmwareReport, SmcPayload,
        SmcVersion,
    },
    apple_seed_catalog::{catalog::ProductKind, seed_program::SeedProgram},
    log::{info, warn},
    reqwest::blocking::Client,
    std::{
        io::Write,
        path::{Path, PathBuf},
    },
};

pub const FIRMWARE_UPDATE_PACKAGE: &str = "FirmwareUpdate.pkg";

pub const INSTALL_ASSISTANT_PACKAGE: &str = "InstallAssistantAuto.pkg";

/// Name of the pbzx payload in an expanded install assistant package.
pub const PAYLOAD_FILE_NAME: &str = "Payload";

/// Firmware state of the machine being reported on.
#[derive(Clone, Debug, Default)]
pub struct HostFirmware {
    pub board_id: Option<String>,
    /// Full BIOS ID of the installed EFI ROM.
    pub rom_version: Option<String>,
    pub smc_version: Option<String>,
}

fn unpack_request(
    settings: &Settings,
    seed_program: Option<SeedProgram>,
    kind: ProductKind,
    package: &str,
    unpack: &Path,
) -> DownloadRequest {
    DownloadRequest {
        kind,
        package: package.to_string(),
        volume: PathBuf::from("/"),
        unpack: Some(unpack.to_path_buf()),
        macos_version: settings.macos_version.clone(),
        seed_program,
        language: settings.language.clone(),
        confirm: false,
    }
}

/// Download and expand `FirmwareUpdate.pkg` if it is missing.
pub fn ensure_firmware_update(
    client: &Client,
    settings: &Settings,
    seed_program: Option<SeedProgram>,
) -> Result<()> {
    if !settings.firmware_dir.exists() {
        run_download(
            client,
            &unpack_request(
                settings,
                seed_program,
                ProductKind::Update,
                FIRMWARE_UPDATE_PACKAGE,
                &settings.firmware_dir,
            ),
        )?;
    }

    Ok(())
}

/// Download and expand the packages carrying firmware if they are missing.
///
/// Firmware images bundled in the install assistant payload are copied next
/// to those of the firmware update.
pub fn ensure_firmware_payloads(
    client: &Client,
    settings: &Settings,
    seed_program: Option<SeedProgram>,
) -> Result<()> {
    ensure_firmware_update(client, settings, seed_program)?;

    if !settings.assistant_dir.exists() {
        run_download(
            client,
            &unpack_request(
                settings,
                seed_program,
                ProductKind::Install,
                INSTALL_ASSISTANT_PACKAGE,
                &settings.assistant_dir,
            ),
        )?;
    }

    copy_assistant_firmware(settings)?;

    Ok(())
}

/// Extract firmware images from the install assistant payload.
pub fn copy_assistant_firmware(settings: &Settings) -> Result<Vec<PathBuf>> {
    let payload = settings.assistant_dir.join(PAYLOAD_FILE_NAME);

    if !payload.exists() {
        warn!("{} does not exist; skipping extraction", payload.display());
        return Ok(vec![]);
    }

    let dest = settings.efi_payload_dir();
    std::fs::create_dir_all(&dest)?;

    let written = extract_payload_firmware(&payload, &dest)?;
    info!(
        "extracted {} firmware images from {}",
        written.len(),
        payload.display()
    );

    Ok(written)
}

/// Firmware images in a directory, `.scap` images first.
pub fn firmware_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];

    for kind in [FirmwareKind::Scap, FirmwareKind::Fd] {
        let pattern = format!("{}/*.{}", dir.display(), kind.extension());
        let mut found = glob::glob(&pattern)?
            .filter_map(|x| x.ok())
            .collect::<Vec<_>>();
        found.sort();
        files.extend(found);
    }

    Ok(files)
}

/// Scan the firmware images in `dir`. Unreadable images are skipped.
pub fn scan_directory(dir: &Path) -> Result<Vec<FirmwareReport>> {
    let mut reports = vec![];

    for path in firmware_files(dir)? {
        match FirmwareImage::from_path(&path).and_then(|image| image.scan()) {
            Ok(report) => reports.push(report),
            Err(e) => warn!("skipping {}: {}", path.display(), e),
        }
    }

    Ok(reports)
}

/// Scan a single image, preferring its board ID table.
pub fn scan_file(path: &Path) -> Result<FirmwareReport> {
    let image = FirmwareImage::from_path(path)?;

    match image.scan_board_table() {
        Ok(report) => Ok(report),
        Err(PayloadError::MarkerNotFound(_)) => {
            info!(
                "{} has no board ID table; using its BIOS ID",
                image.name()
            );
            Ok(image.scan()?)
        }
        Err(e) => Err(e.into()),
    }
}

fn warn_missing_host<W: Write>(table: &BoardTable<W>, host: &HostFirmware) {
    if let Some(board_id) = &host.board_id {
        if table.host_rows() == 0 {
            warn!("board {} is not covered by any payload", board_id);
        }
    }
}

/// Write the EFI table. Returns whether the installed ROM is outdated.
pub fn write_efi_table<W: Write>(
    out: W,
    reports: &[FirmwareReport],
    host: &HostFirmware,
) -> Result<bool> {
    let mut table = BoardTable::new(
        out,
        TableStyle::Efi,
        &format!("seedtool efiver v{}", env!("CARGO_PKG_VERSION")),
        host.board_id.clone(),
    )?;

    let mut outdated = false;

    for report in reports {
        for entry in &report.boards {
            let is_host = table.row(&entry.board_id, &entry.model, report.bios_id.as_str())?;

            if is_host {
                if let Some(installed) = &host.rom_version {
                    outdated |= report.bios_id.is_newer_than(installed);
                }
            }
        }
    }

    warn_missing_host(&table, host);

    table.finish(if outdated {
        host.rom_version.as_deref()
    } else {
        None
    })?;

    Ok(outdated)
}

/// Load the SMC payloads in `dir`. Unreadable files are skipped.
pub fn smc_payloads(dir: &Path) -> Result<Vec<SmcPayload>> {
    let pattern = format!("{}/*.json", dir.display());
    let mut paths = glob::glob(&pattern)?
        .filter_map(|x| x.ok())
        .collect::<Vec<_>>();
    paths.sort();

    let mut payloads = vec![];
    for path in paths {
        match SmcPayload::from_path(&path) {
            Ok(payload) => payloads.push(payload),
            Err(e) => warn!("skipping {}: {}", path.display(), e),
        }
    }

    Ok(payloads)
}

/// Write the SMC table. Returns whether the installed SMC firmware is outdated.
pub fn write_smc_table<W: Write>(
    out: W,
    payloads: &[SmcPayload],
    host: &HostFirmware,
) -> Result<bool> {
    let mut table = BoardTable::new(
        out,
        TableStyle::Smc,
        &format!("seedtool smcver v{}", env!("CARGO_PKG_VERSION")),
        host.board_id.clone(),
    )?;

    let installed = host.smc_version.as_deref().map(SmcVersion::parse);
    let mut outdated = false;

    for payload in payloads {
        let model = board::model_for_board_id(&payload.board_id);
        let is_host = table.row(&payload.board_id, model, payload.smc_version.as_str())?;

        if is_host {
            if let Some(installed) = &installed {
                outdated |= installed < &payload.smc_version;
            }
        }
    }

    warn_missing_host(&table, host);

    table.finish(if outdated {
        host.smc_version.as_deref()
    } else {
        None
    })?;

    Ok(outdated)
}

/// Write the result of scanning a single image.
pub fn write_report<W: Write>(out: &mut W, report: &FirmwareReport) -> std::io::Result<()> {
    writeln!(out, "{}", report.file_name)?;
    writeln!(out, "  BIOS ID: {}", report.bios_id)?;
    writeln!(out, "  Model:   {}", report.bios_id.model_identifier())?;

    if let Some(date) = report.bios_id.date() {
        writeln!(out, "  Date:    {}", date)?;
    }

    for entry in &report.boards {
        writeln!(out, "  {:>20} | {}", entry.board_id, entry.model)?;
    }

    Ok(())
}
