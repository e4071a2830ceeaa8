// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Apple firmware payloads.
//!
//! macOS installers and firmware updates ship the EFI ROM images and SMC
//! metadata for every supported Mac model. This crate knows how to pull
//! metadata out of those payloads.
//!
//! # EFI Images
//!
//! EFI ROM images are shipped as `.scap` (signed capsule) and `.fd` (flash
//! device) files under `Scripts/Tools/EFIPayloads` of `FirmwareUpdate.pkg`
//! or under `Contents/Resources/Firmware` of the install assistant payload.
//!
//! Each image carries an Intel style BIOS ID record introduced by the
//! `$IBIOSI$` signature. See [BiosId] for the format of that record.
//!
//! Newer images also carry a table of the board IDs the image applies to.
//! The table is anchored by a marker GUID whose position depends on the
//! hardware generation and the file layout. See [scanner] for the search
//! strategy. Older images (see [board::OLD_STYLE_FIRMWARE_MODELS]) have no
//! such table and the applicable board is derived from the BIOS ID.
//!
//! # Payload Archives
//!
//! Install assistant packages carry their files in a `Payload` member that is
//! a `pbzx` stream wrapping a cpio archive. See [pbzx].
//!
//! # SMC Metadata
//!
//! SMC firmware metadata is shipped as one JSON file per board ID. See [smc].

pub mod bios_id;
pub use bios_id::BiosId;
pub mod board;
pub mod pbzx;
pub mod scanner;
pub use scanner::{FirmwareImage, FirmwareKind, FirmwareReport};
pub mod smc;
pub use smc::{SmcPayload, SmcVersion};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data structure parse error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cpio archive error: {0}")]
    Cpio(#[from] cpio_archive::Error),

    #[error("bad magic value in {0}")]
    BadMagic(&'static str),

    #[error("not a .scap or .fd firmware image: {0}")]
    UnknownImageKind(String),

    #[error("board ID table marker not found in {0}")]
    MarkerNotFound(String),

    #[error("$IBIOSI$ signature not found in {0}")]
    BiosIdNotFound(String),

    #[error("malformed BIOS ID: {0}")]
    BadBiosId(String),

    #[error("SMC payload {0} does not describe board {1}")]
    BadSmcPayload(String, String),
}

/// Result type for this crate.
pub type PayloadResult<T> = std::result::Result<T, Error>;
