//! On-disk framing of a bundle artifact.
//!
//! ```text
//! +----------+---------+-------------+--------+-----------------+
//! | magic 8B | ver u32 | payload u64 | crc u32| bincode payload |
//! +----------+---------+-------------+--------+-----------------+
//! ```
//!
//! Integers are little-endian. The checksum is CRC-32 of the payload.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{MedisightError, Result};

/// Leading bytes of every bundle artifact.
pub const MAGIC: &[u8; 8] = b"MDSGHTB\0";

/// Current artifact format version.
pub const FORMAT_VERSION: u32 = 1;

/// Header length in bytes.
pub const HEADER_LEN: usize = 8 + 4 + 8 + 4;

/// Frame a payload with the artifact header.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.write_all(MAGIC)?;
    out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    out.write_u64::<LittleEndian>(payload.len() as u64)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(payload))?;
    out.write_all(payload)?;
    Ok(out)
}

/// Check the header and return the payload slice.
pub fn decode(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < HEADER_LEN {
        return Err(MedisightError::corrupt(format!(
            "artifact is {} bytes, shorter than its header",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 8];
    cursor.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(MedisightError::corrupt("not a medisight bundle (bad magic)"));
    }

    let version = cursor.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(MedisightError::corrupt(format!(
            "unsupported format version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let length = cursor.read_u64::<LittleEndian>()?;
    let checksum = cursor.read_u32::<LittleEndian>()?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != length {
        return Err(MedisightError::corrupt(format!(
            "payload is {} bytes, header says {length}",
            payload.len()
        )));
    }
    if crc32fast::hash(payload) != checksum {
        return Err(MedisightError::corrupt("payload checksum mismatch"));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_and_unframe() {
        let framed = encode(b"payload").unwrap();
        assert_eq!(framed.len(), HEADER_LEN + 7);
        assert_eq!(decode(&framed).unwrap(), b"payload");
    }

    #[test]
    fn test_damaged_frames_are_corrupt() {
        let framed = encode(b"payload").unwrap();

        let mut flipped = framed.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xff;
        assert_eq!(decode(&flipped).unwrap_err().kind(), "corrupt_artifact");

        assert_eq!(decode(&framed[..framed.len() - 2]).unwrap_err().kind(), "corrupt_artifact");
        assert_eq!(decode(&framed[..5]).unwrap_err().kind(), "corrupt_artifact");

        let mut wrong_version = framed.clone();
        wrong_version[8] = 99;
        assert_eq!(decode(&wrong_version).unwrap_err().kind(), "corrupt_artifact");

        let mut wrong_magic = framed;
        wrong_magic[0] = b'X';
        assert_eq!(decode(&wrong_magic).unwrap_err().kind(), "corrupt_artifact");
    }
}
