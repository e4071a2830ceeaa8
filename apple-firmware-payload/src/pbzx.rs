// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `pbzx` payload streams.
//!
//! The `Payload` member of install assistant packages is a `pbzx` stream:
//!
//! * The 4 byte magic `pbzx`.
//! * A big endian u64 of flags.
//! * A series of chunks, each a big endian u64 of flags, a big endian u64
//!   length and `length` bytes of data.
//!
//! Chunk data is an XZ stream if it begins with the XZ magic and is stored
//! verbatim otherwise. The concatenation of decoded chunks is a cpio archive.

use {
    crate::{scanner::FirmwareKind, Error, PayloadResult},
    log::{debug, warn},
    scroll::{Pread, BE},
    std::{
        io::{Cursor, Read},
        path::{Path, PathBuf},
    },
};

/// Magic at the start of a pbzx stream.
pub const PBZX_MAGIC: &[u8; 4] = b"pbzx";

const XZ_MAGIC: &[u8; 6] = b"\xfd7zXZ\x00";

const XZ_FOOTER: &[u8; 2] = b"YZ";

/// Directory under an application bundle holding firmware images.
pub const FIRMWARE_DIRECTORY: &str = "Contents/Resources/Firmware/";

/// Decode a pbzx stream into the raw archive it wraps.
pub fn decode_pbzx(data: &[u8]) -> PayloadResult<Vec<u8>> {
    if !data.starts_with(PBZX_MAGIC) {
        return Err(Error::BadMagic("pbzx stream"));
    }

    let mut offset = PBZX_MAGIC.len();
    let _flags: u64 = data.gread_with(&mut offset, BE)?;

    let mut res = vec![];
    let mut chunk_count = 0;

    while offset < data.len() {
        let _chunk_flags: u64 = data.gread_with(&mut offset, BE)?;
        let length: u64 = data.gread_with(&mut offset, BE)?;
        let chunk: &[u8] = data.gread_with(&mut offset, length as usize)?;

        if chunk.starts_with(XZ_MAGIC) {
            if !chunk.ends_with(XZ_FOOTER) {
                warn!("pbzx chunk {} lacks XZ footer", chunk_count);
            }

            xz2::read::XzDecoder::new(chunk).read_to_end(&mut res)?;
        } else {
            res.extend_from_slice(chunk);
        }

        chunk_count += 1;
    }

    debug!(
        "decoded {} pbzx chunks into {} bytes",
        chunk_count,
        res.len()
    );

    Ok(res)
}

/// Whether an archive member path denotes a bundled firmware image.
pub fn is_firmware_member(name: &str) -> bool {
    name.contains(FIRMWARE_DIRECTORY) && FirmwareKind::from_path(Path::new(name)).is_some()
}

/// Write all bundled firmware images in a cpio archive to a directory.
///
/// Images are written flat, by file name. Returns the paths written.
pub fn extract_firmware_images(archive: Vec<u8>, dest_dir: &Path) -> PayloadResult<Vec<PathBuf>> {
    let mut reader = cpio_archive::reader(Cursor::new(archive))?;
    let mut written = vec![];

    while let Some(header) = reader.read_next()? {
        let name = header.name().to_string();

        if !is_firmware_member(&name) {
            continue;
        }

        let file_name = match Path::new(&name).file_name() {
            Some(x) => x.to_owned(),
            None => continue,
        };

        let mut data = Vec::with_capacity(header.file_size() as usize);
        reader.read_to_end(&mut data)?;

        let dest_path = dest_dir.join(file_name);
        debug!("extracting {} to {}", name, dest_path.display());
        std::fs::write(&dest_path, &data)?;

        written.push(dest_path);
    }

    Ok(written)
}

/// Decode a pbzx payload file and extract its firmware images.
pub fn extract_payload_firmware(payload: &Path, dest_dir: &Path) -> PayloadResult<Vec<PathBuf>> {
    let data = std::fs::read(payload)?;
    let archive = decode_pbzx(&data)?;

    extract_firmware_images(archive, dest_dir)
}

#[cfg(test)]
mod test {
    use {super::*, std::io::Write};

    fn pbzx_chunk(out: &mut Vec<u8>, data: &[u8]) {
        out.extend_from_slice(&0x0100_0000u64.to_be_bytes());
        out.extend_from_slice(&(data.len() as u64).to_be_bytes());
        out.extend_from_slice(data);
    }

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut encoder = xz2::write::XzEncoder::new(vec![], 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn odc_entry(out: &mut Vec<u8>, name: &str, data: &[u8]) {
        out.extend_from_slice(b"070707");
        // dev, ino, mode, uid, gid, nlink, rdev
        for value in [0, 1, 0o100644, 0, 0, 1, 0] {
            out.extend_from_slice(format!("{:06o}", value).as_bytes());
        }
        out.extend_from_slice(format!("{:011o}", 0).as_bytes());
        out.extend_from_slice(format!("{:06o}", name.len() + 1).as_bytes());
        out.extend_from_slice(format!("{:011o}", data.len()).as_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(data);
    }

    fn odc_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut out = vec![];
        for (name, data) in entries {
            odc_entry(&mut out, name, data.as_bytes());
        }
        odc_entry(&mut out, "TRAILER!!!", &[]);
        out
    }

    #[test]
    fn decode_chunks() -> PayloadResult<()> {
        let mut stream = PBZX_MAGIC.to_vec();
        stream.extend_from_slice(&0x0100_0000u64.to_be_bytes());
        pbzx_chunk(&mut stream, &xz(b"hello, "));
        pbzx_chunk(&mut stream, b"world");

        assert_eq!(decode_pbzx(&stream)?, b"hello, world");

        Ok(())
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_pbzx(b"xbzp\0\0\0\0\0\0\0\0"),
            Err(Error::BadMagic(_))
        ));

        // Chunk length beyond the end of the stream.
        let mut stream = PBZX_MAGIC.to_vec();
        stream.extend_from_slice(&0u64.to_be_bytes());
        stream.extend_from_slice(&0u64.to_be_bytes());
        stream.extend_from_slice(&64u64.to_be_bytes());
        stream.extend_from_slice(b"short");
        assert!(decode_pbzx(&stream).is_err());
    }

    #[test]
    fn member_names() {
        assert!(is_firmware_member(
            "./Install macOS High Sierra.app/Contents/Resources/Firmware/IM171_0110_00B.scap"
        ));
        assert!(is_firmware_member(
            "./Install.app/Contents/Resources/Firmware/MBP143_0173_B00.fd"
        ));
        assert!(!is_firmware_member(
            "./Install.app/Contents/Resources/Firmware/Info.plist"
        ));
        assert!(!is_firmware_member("./Install.app/Contents/MacOS/IM171.scap"));
    }

    #[test]
    fn extract_from_payload() -> PayloadResult<()> {
        let td = tempfile::Builder::new()
            .prefix("apple-firmware-payload-")
            .tempdir()?;

        let archive = odc_archive(&[
            ("./Install.app/Contents/Info.plist", "<plist/>"),
            (
                "./Install.app/Contents/Resources/Firmware/IM171_0110_00B.scap",
                "scap data",
            ),
            (
                "./Install.app/Contents/Resources/Firmware/MBP143_0173_B00.fd",
                "fd data",
            ),
        ]);

        let mut stream = PBZX_MAGIC.to_vec();
        stream.extend_from_slice(&0x0100_0000u64.to_be_bytes());
        let (first, second) = archive.split_at(archive.len() / 2);
        pbzx_chunk(&mut stream, &xz(first));
        pbzx_chunk(&mut stream, &xz(second));

        let payload = td.path().join("Payload");
        std::fs::write(&payload, &stream)?;

        let dest = td.path().join("EFIPayloads");
        std::fs::create_dir(&dest)?;

        let written = extract_payload_firmware(&payload, &dest)?;
        assert_eq!(
            written,
            vec![dest.join("IM171_0110_00B.scap"), dest.join("MBP143_0173_B00.fd")]
        );
        assert_eq!(std::fs::read(dest.join("IM171_0110_00B.scap"))?, b"scap data");
        assert_eq!(std::fs::read(dest.join("MBP143_0173_B00.fd"))?, b"fd data");
        assert!(!dest.join("Info.plist").exists());

        Ok(())
    }
}
