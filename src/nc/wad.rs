//! WAD directory parsing and the `WadSource` collaborator trait.
//!
//! The cache never opens a file itself. It talks to whatever implements
//! [`WadSource`], the same separation the reference port drew between its
//! cache code and a single-function `WR_Init`/`WR_Read` pair supplied per
//! platform (a headless build backed it with `fopen`/`fread`).

use std::convert::TryInto;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::CacheError;

const LUMP_NAME_LEN: usize = 8;
const DIRECTORY_ENTRY_LEN: usize = 16;
/// Directory entries are scanned in batches of this many for a linear name
/// lookup, mirroring the reference cache's batched comparison loop.
const NAME_SCAN_BATCH: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct WadHeader {
    pub num_lumps: u32,
    pub dir_offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub file_pos: u32,
    pub size: u32,
    pub name: [u8; LUMP_NAME_LEN],
}

impl DirEntry {
    fn packed_name(&self) -> u64 {
        u64::from_le_bytes(self.name)
    }
}

/// Abstracts the byte source a [`crate::nc::ContentCache`] reads lumps from.
/// `read` must fill `dst` completely or fail; partial reads are treated as
/// corruption by callers.
pub trait WadSource {
    fn header(&mut self) -> Result<WadHeader, CacheError>;
    fn read(&mut self, dst: &mut [u8], offset: u32) -> Result<(), CacheError>;

    fn directory_entry(&mut self, header: &WadHeader, lump: u32) -> Result<DirEntry, CacheError> {
        if lump >= header.num_lumps {
            return Err(CacheError::LumpNotFound(lump as i32));
        }
        let mut raw = [0u8; DIRECTORY_ENTRY_LEN];
        let entry_offset = header.dir_offset + lump * DIRECTORY_ENTRY_LEN as u32;
        self.read(&mut raw, entry_offset)?;
        Ok(parse_dir_entry(&raw))
    }

    /// Scan the directory from lump 0 forward, batching reads
    /// `NAME_SCAN_BATCH` entries at a time, and return the lowest-numbered
    /// match. Stops as soon as a match is found, rather than scanning the
    /// whole directory.
    fn find_by_name(&mut self, header: &WadHeader, name: &str) -> Result<Option<u32>, CacheError> {
        let target = pack_name(name);
        let mut lump = 0u32;
        let mut batch = [0u8; DIRECTORY_ENTRY_LEN * NAME_SCAN_BATCH];
        while lump < header.num_lumps {
            let this_batch = (header.num_lumps - lump).min(NAME_SCAN_BATCH as u32) as usize;
            let bytes = this_batch * DIRECTORY_ENTRY_LEN;
            let offset = header.dir_offset + lump * DIRECTORY_ENTRY_LEN as u32;
            self.read(&mut batch[..bytes], offset)?;
            for i in 0..this_batch {
                let raw = &batch[i * DIRECTORY_ENTRY_LEN..(i + 1) * DIRECTORY_ENTRY_LEN];
                let entry = parse_dir_entry(raw);
                if entry.packed_name() == target {
                    return Ok(Some(lump + i as u32));
                }
            }
            lump += this_batch as u32;
        }
        Ok(None)
    }
}

fn pack_name(name: &str) -> u64 {
    let mut buf = [0u8; LUMP_NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(LUMP_NAME_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

fn parse_dir_entry(raw: &[u8]) -> DirEntry {
    let file_pos = u32::from_le_bytes(raw[0..4].try_into().unwrap());
    let size = u32::from_le_bytes(raw[4..8].try_into().unwrap());
    let mut name = [0u8; LUMP_NAME_LEN];
    name.copy_from_slice(&raw[8..16]);
    DirEntry { file_pos, size, name }
}

/// Reads lumps from a real WAD file on disk via `std::fs`.
pub struct FileWadSource {
    file: File,
    header: Option<WadHeader>,
}

impl FileWadSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(FileWadSource { file: File::open(path)?, header: None })
    }
}

impl WadSource for FileWadSource {
    fn header(&mut self) -> Result<WadHeader, CacheError> {
        if let Some(h) = self.header {
            return Ok(h);
        }
        let mut raw = [0u8; 12];
        self.read_raw(&mut raw, 0)?;
        if &raw[0..4] != b"IWAD" && &raw[0..4] != b"PWAD" {
            return Err(CacheError::Wad("missing IWAD/PWAD magic".into()));
        }
        let num_lumps = u32::from_le_bytes(raw[4..8].try_into().unwrap());
        let dir_offset = u32::from_le_bytes(raw[8..12].try_into().unwrap());
        let header = WadHeader { num_lumps, dir_offset };
        self.header = Some(header);
        Ok(header)
    }

    fn read(&mut self, dst: &mut [u8], offset: u32) -> Result<(), CacheError> {
        self.read_raw(dst, offset)
    }
}

impl FileWadSource {
    fn read_raw(&mut self, dst: &mut [u8], offset: u32) -> Result<(), CacheError> {
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|e| CacheError::Wad(e.to_string()))?;
        self.file.read_exact(dst).map_err(|e| CacheError::Wad(e.to_string()))
    }
}

/// A `WadSource` backed by an in-memory byte buffer, for tests.
#[cfg(any(test, feature = "test-util"))]
pub struct InMemoryWad {
    bytes: Vec<u8>,
}

#[cfg(any(test, feature = "test-util"))]
impl InMemoryWad {
    /// Build a WAD from `(name, data)` pairs, laying lumps out back to back
    /// after a directory that immediately follows the 12-byte header.
    pub fn build(lumps: &[(&str, &[u8])]) -> Self {
        let dir_offset = 12 + lumps.len() * DIRECTORY_ENTRY_LEN;
        let mut bytes = vec![0u8; dir_offset];
        bytes[0..4].copy_from_slice(b"PWAD");
        bytes[4..8].copy_from_slice(&(lumps.len() as u32).to_le_bytes());
        bytes[8..12].copy_from_slice(&(12u32).to_le_bytes());

        let mut cursor = dir_offset;
        for (i, (name, data)) in lumps.iter().enumerate() {
            let entry_off = 12 + i * DIRECTORY_ENTRY_LEN;
            bytes[entry_off..entry_off + 4].copy_from_slice(&(cursor as u32).to_le_bytes());
            bytes[entry_off + 4..entry_off + 8].copy_from_slice(&(data.len() as u32).to_le_bytes());
            let mut packed_name = [0u8; LUMP_NAME_LEN];
            let n = name.len().min(LUMP_NAME_LEN);
            packed_name[..n].copy_from_slice(&name.as_bytes()[..n]);
            bytes[entry_off + 8..entry_off + 16].copy_from_slice(&packed_name);

            bytes.extend_from_slice(data);
            cursor += data.len();
        }
        InMemoryWad { bytes }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl WadSource for InMemoryWad {
    fn header(&mut self) -> Result<WadHeader, CacheError> {
        let num_lumps = u32::from_le_bytes(self.bytes[4..8].try_into().unwrap());
        let dir_offset = u32::from_le_bytes(self.bytes[8..12].try_into().unwrap());
        Ok(WadHeader { num_lumps, dir_offset })
    }

    fn read(&mut self, dst: &mut [u8], offset: u32) -> Result<(), CacheError> {
        let offset = offset as usize;
        if offset + dst.len() > self.bytes.len() {
            return Err(CacheError::Wad("read past end of in-memory wad".into()));
        }
        dst.copy_from_slice(&self.bytes[offset..offset + dst.len()]);
        Ok(())
    }
}
