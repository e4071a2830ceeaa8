// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scanning of EFI firmware images.
//!
//! # Board ID Table
//!
//! Images covering multiple boards carry a table of board IDs. The table is
//! anchored by a marker GUID (stored in its little endian byte form). After
//! the GUID comes a 4 byte field, an 8 byte structure header and then up to
//! 14 records of 8 bytes each, each record being the raw board ID. The list is
//! terminated by a record of all `0xff` bytes. In the *padded* layout, every
//! record is followed by 2 extra bytes.
//!
//! The anchor position differs between hardware generations and between the
//! `.scap` and `.fd` layouts. Candidates are probed in this order:
//!
//! 1. For `MP51*` images, a forward scan for the MacPro5,1 marker.
//! 2. The current marker at `0x98`.
//! 3. The padded layout marker at `0x1200`.
//! 4. The current marker at `0x1048`.
//! 5. A backward scan from the end of the image for the current marker.
//!
//! # BIOS ID
//!
//! The `$IBIOSI$` record is found by scanning in 4 byte steps from a start
//! offset: `0xb0` for `.scap` images and 44 bytes before the end for `.fd`
//! images. Start offsets beyond 4096 are scanned backward, others forward.
//! Old style images (no board ID table) are always scanned forward from
//! `0xb0`, whatever their kind.

use {
    crate::{
        bios_id::{BiosId, BIOS_ID_RECORD_SIZE, BIOS_ID_SIGNATURE},
        board, Error, PayloadResult,
    },
    log::{debug, trace},
    std::path::Path,
    uuid::Uuid,
};

/// Marker GUID of the board ID table in current images.
pub const BOARD_TABLE_GUID: Uuid = Uuid::from_u128(0x781F254A_C457_5D13_9275_1BF5D56E0724);

/// Marker GUID of the board ID table in images using the padded layout.
pub const PADDED_BOARD_TABLE_GUID: Uuid = Uuid::from_u128(0x11380FF9_CFBF_5CD5_997E_83FD089569F0);

/// Marker GUID of the board ID table in MacPro5,1 images.
pub const MACPRO_BOARD_TABLE_GUID: Uuid = Uuid::from_u128(0xC3E36D09_8294_4B97_A857_D5288FE33E28);

/// Scan granularity for all heuristic searches.
const SCAN_STEP: usize = 4;

/// Maximum number of board ID records walked in a table.
const MAX_BOARD_RECORDS: usize = 14;

/// Offset of the first board ID record relative to the marker GUID.
const FIRST_RECORD_OFFSET: usize = 16 + 4 + 8;

const BOARD_RECORD_SIZE: usize = 8;

const END_OF_TABLE: [u8; BOARD_RECORD_SIZE] = [0xff; BOARD_RECORD_SIZE];

/// BIOS ID search start for `.scap` and old style images.
const SCAP_BIOS_ID_START: usize = 0xb0;

/// Start offsets above this value are scanned backward.
const BACKWARD_SCAN_THRESHOLD: usize = 4096;

/// The on-disk flavor of a firmware image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FirmwareKind {
    /// A `.scap` signed capsule.
    Scap,
    /// A `.fd` flash device image.
    Fd,
}

impl FirmwareKind {
    /// Resolve the kind from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|x| x.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("scap") => Some(Self::Scap),
            Some(ext) if ext.eq_ignore_ascii_case("fd") => Some(Self::Fd),
            _ => None,
        }
    }

    /// The file extension for this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Scap => "scap",
            Self::Fd => "fd",
        }
    }

    /// Offset where the BIOS ID search starts for an image of `len` bytes.
    pub fn bios_id_search_start(&self, len: usize) -> usize {
        match self {
            Self::Scap => SCAP_BIOS_ID_START,
            Self::Fd => len.saturating_sub(44),
        }
    }
}

/// Layout of board ID records following the marker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableLayout {
    /// Records are contiguous.
    Packed,
    /// Records are followed by 2 bytes of padding.
    Padded,
}

impl TableLayout {
    fn record_stride(&self) -> usize {
        match self {
            Self::Packed => BOARD_RECORD_SIZE,
            Self::Padded => BOARD_RECORD_SIZE + 2,
        }
    }
}

/// Describes a located board ID table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BoardTable {
    /// The marker GUID that was found.
    pub marker: Uuid,
    /// Offset of the marker GUID in the image.
    pub offset: usize,
    /// Layout of the records.
    pub layout: TableLayout,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
    Forward,
    Backward,
}

/// Find `needle` by probing offsets from `start` in [SCAN_STEP] increments.
///
/// Offsets where `needle` would extend past the end of `data` are skipped,
/// never read.
fn scan_for(data: &[u8], needle: &[u8], start: usize, direction: Direction) -> Option<usize> {
    let fits = |position: usize| position + needle.len() <= data.len();
    let matches =
        |position: usize| fits(position) && &data[position..position + needle.len()] == needle;

    let mut position = start;

    match direction {
        Direction::Forward => {
            while fits(position) {
                if matches(position) {
                    return Some(position);
                }
                position += SCAN_STEP;
            }
        }
        Direction::Backward => loop {
            if matches(position) {
                return Some(position);
            }
            if position < SCAN_STEP {
                break;
            }
            position -= SCAN_STEP;
        },
    }

    None
}

/// A board ID found in an image along with its model identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoardEntry {
    pub board_id: String,
    pub model: String,
}

impl BoardEntry {
    fn from_board_id(board_id: String) -> Self {
        let model = board::model_for_board_id(&board_id).to_string();

        Self { board_id, model }
    }
}

/// Metadata extracted from a single firmware image.
#[derive(Clone, Debug)]
pub struct FirmwareReport {
    /// File name of the image.
    pub file_name: String,
    /// BIOS ID embedded in the image.
    pub bios_id: BiosId,
    /// Boards the image applies to.
    pub boards: Vec<BoardEntry>,
}

/// An in-memory EFI firmware image.
#[derive(Clone, Debug)]
pub struct FirmwareImage {
    name: String,
    kind: FirmwareKind,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Construct an instance from its parts.
    pub fn new(name: impl ToString, kind: FirmwareKind, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            data,
        }
    }

    /// Read an image from a `.scap` or `.fd` file.
    pub fn from_path(path: &Path) -> PayloadResult<Self> {
        let kind = FirmwareKind::from_path(path)
            .ok_or_else(|| Error::UnknownImageKind(path.display().to_string()))?;

        let name = path
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();

        let data = std::fs::read(path)?;

        Ok(Self::new(name, kind, data))
    }

    /// File name of the image.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FirmwareKind {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether this image is expected to carry a board ID table.
    pub fn uses_board_table(&self) -> bool {
        board::uses_board_table(&self.name)
    }

    /// Offset where the BIOS ID search starts.
    pub fn bios_id_search_start(&self) -> usize {
        if self.uses_board_table() {
            self.kind.bios_id_search_start(self.data.len())
        } else {
            SCAP_BIOS_ID_START
        }
    }

    /// Locate the offset of the `$IBIOSI$` signature.
    pub fn find_bios_id_offset(&self) -> PayloadResult<usize> {
        let start = self.bios_id_search_start();

        let direction = if start > BACKWARD_SCAN_THRESHOLD {
            Direction::Backward
        } else {
            Direction::Forward
        };

        trace!(
            "{}: searching {:?} for BIOS ID from {:#x}",
            self.name,
            direction,
            start
        );

        scan_for(&self.data, BIOS_ID_SIGNATURE, start, direction)
            .ok_or_else(|| Error::BiosIdNotFound(self.name.clone()))
    }

    /// Resolve the BIOS ID embedded in this image.
    pub fn bios_id(&self) -> PayloadResult<BiosId> {
        let offset = self.find_bios_id_offset()? + BIOS_ID_SIGNATURE.len();
        let end = (offset + BIOS_ID_RECORD_SIZE).min(self.data.len());

        BiosId::from_record(&self.data[offset..end])
    }

    fn marker_at(&self, marker: Uuid, offset: usize) -> bool {
        let needle = marker.to_bytes_le();

        self.data.get(offset..offset + needle.len()) == Some(&needle[..])
    }

    /// Locate the board ID table.
    pub fn find_board_table(&self) -> PayloadResult<BoardTable> {
        if self.name.starts_with("MP51") {
            if let Some(offset) = scan_for(
                &self.data,
                &MACPRO_BOARD_TABLE_GUID.to_bytes_le(),
                0,
                Direction::Forward,
            ) {
                return Ok(BoardTable {
                    marker: MACPRO_BOARD_TABLE_GUID,
                    offset,
                    layout: TableLayout::Packed,
                });
            }
        }

        let fixed = [
            (BOARD_TABLE_GUID, 0x98, TableLayout::Packed),
            (PADDED_BOARD_TABLE_GUID, 0x1200, TableLayout::Padded),
            (BOARD_TABLE_GUID, 0x1048, TableLayout::Packed),
        ];

        for (marker, offset, layout) in fixed {
            if self.marker_at(marker, offset) {
                return Ok(BoardTable {
                    marker,
                    offset,
                    layout,
                });
            }
        }

        debug!("{}: no marker at fixed offsets; scanning backward", self.name);

        scan_for(
            &self.data,
            &BOARD_TABLE_GUID.to_bytes_le(),
            self.data.len().saturating_sub(8),
            Direction::Backward,
        )
        .map(|offset| BoardTable {
            marker: BOARD_TABLE_GUID,
            offset,
            layout: TableLayout::Packed,
        })
        .ok_or_else(|| Error::MarkerNotFound(self.name.clone()))
    }

    /// Walk the records of a board ID table.
    pub fn board_ids_in(&self, table: &BoardTable) -> Vec<String> {
        let mut res = vec![];
        let mut position = table.offset + FIRST_RECORD_OFFSET;

        for _ in 0..MAX_BOARD_RECORDS {
            let record = match self.data.get(position..position + BOARD_RECORD_SIZE) {
                Some(record) => record,
                None => break,
            };

            if record == END_OF_TABLE {
                break;
            }

            res.push(format!("Mac-{}", hex::encode_upper(record)));
            position += table.layout.record_stride();
        }

        res
    }

    /// Locate the board ID table and return all board IDs in it.
    pub fn board_ids(&self) -> PayloadResult<Vec<String>> {
        let table = self.find_board_table()?;
        debug!(
            "{}: board table marker {} at {:#x}",
            self.name,
            table.marker.hyphenated(),
            table.offset
        );

        Ok(self.board_ids_in(&table))
    }

    /// Scan the image using the board ID table.
    ///
    /// This is attempted regardless of the image's naming.
    pub fn scan_board_table(&self) -> PayloadResult<FirmwareReport> {
        let bios_id = self.bios_id()?;

        let boards = self
            .board_ids()?
            .into_iter()
            .map(BoardEntry::from_board_id)
            .collect::<Vec<_>>();

        Ok(FirmwareReport {
            file_name: self.name.clone(),
            bios_id,
            boards,
        })
    }

    /// Scan the image, deriving the applicable board from the BIOS ID for
    /// images predating the board ID table.
    pub fn scan(&self) -> PayloadResult<FirmwareReport> {
        if self.uses_board_table() {
            self.scan_board_table()
        } else {
            let bios_id = self.bios_id()?;

            let boards = vec![BoardEntry {
                board_id: bios_id.board_id().to_string(),
                model: bios_id.model_identifier(),
            }];

            Ok(FirmwareReport {
                file_name: self.name.clone(),
                bios_id,
                boards,
            })
        }
    }
}
