//! Append-only write-ahead log of committed mutations.
//!
//! Layout: an 8-byte magic header followed by records framed as
//! `[u32 payload length][4-byte checksum][payload]`. The checksum is the first
//! four bytes of the payload's SHA-256. A record cut short at the end of the
//! file is a crash mid-append and is truncated away; a record whose checksum
//! does not match is corruption.
//!
//! Upserts carry the document text rather than its postings: segmentation is
//! deterministic, so replay re-derives the postings.

use crate::error::{Result, StoreError};
use crate::index::types::{Document, Generation};
use crate::utils::encoding::{
    write_long_str, write_short_str, write_u32_le, write_u64_le, ByteReader,
};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const JOURNAL_FILE: &str = "journal.bin";

const MAGIC: &[u8; 8] = b"CFJRNL01";
const HEADER_LEN: u64 = MAGIC.len() as u64;
const FRAME_LEN: usize = 8;

const TAG_UPSERT: u8 = 1;
const TAG_REMOVE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    Upsert {
        generation: Generation,
        document: Document,
        content: Arc<str>,
    },
    Remove {
        generation: Generation,
        path: PathBuf,
    },
}

impl JournalRecord {
    pub fn generation(&self) -> Generation {
        match self {
            Self::Upsert { generation, .. } | Self::Remove { generation, .. } => *generation,
        }
    }
}

pub struct Journal {
    file: File,
    path: PathBuf,
    len: u64,
    records: usize,
    sync: bool,
}

impl Journal {
    /// Open (or create) the journal in `dir` and return the records it holds
    pub fn open(dir: &Path, sync: bool) -> Result<(Self, Vec<JournalRecord>)> {
        let path = dir.join(JOURNAL_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if (buf.len() as u64) < HEADER_LEN {
            // Empty, or a crash while the header was being written
            if !MAGIC.starts_with(&buf) {
                return Err(StoreError::corrupt("journal header is invalid"));
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(MAGIC)?;
            file.sync_data()?;
            let journal = Self {
                file,
                path,
                len: HEADER_LEN,
                records: 0,
                sync,
            };
            return Ok((journal, Vec::new()));
        }

        if &buf[..MAGIC.len()] != MAGIC {
            return Err(StoreError::corrupt("journal magic mismatch"));
        }

        let (records, valid_len) = decode_records(&buf)?;
        if valid_len < buf.len() {
            warn!(
                path = %path.display(),
                kept = valid_len,
                dropped = buf.len() - valid_len,
                "journal ends with a torn record, truncating"
            );
            file.set_len(valid_len as u64)?;
        }
        file.seek(SeekFrom::Start(valid_len as u64))?;

        debug!(records = records.len(), bytes = valid_len, "journal opened");

        let journal = Self {
            file,
            path,
            len: valid_len as u64,
            records: records.len(),
            sync,
        };
        Ok((journal, records))
    }

    /// Append records as one write. On failure the file is cut back to its
    /// previous length so no partial batch survives.
    ///
    /// A file whose length no longer matches what this handle wrote was
    /// changed by someone else and is reported as corruption.
    pub fn append(&mut self, records: &[JournalRecord]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            encode_record(record, &mut buf)?;
        }

        let on_disk = self.file.metadata()?.len();
        if on_disk != self.len {
            return Err(StoreError::corrupt(format!(
                "journal is {on_disk} bytes, expected {}",
                self.len
            )));
        }

        let result = self
            .file
            .seek(SeekFrom::Start(self.len))
            .and_then(|_| self.file.write_all(&buf))
            .and_then(|_| if self.sync { self.file.sync_data() } else { Ok(()) });

        if let Err(e) = result {
            if let Err(rollback) = self.file.set_len(self.len) {
                warn!(path = %self.path.display(), error = %rollback, "journal rollback failed");
            }
            return Err(e.into());
        }

        self.len += buf.len() as u64;
        self.records += records.len();
        Ok(())
    }

    /// Drop every record and rewrite the header
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(MAGIC)?;
        self.file.sync_data()?;
        self.len = HEADER_LEN;
        self.records = 0;
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn byte_len(&self) -> u64 {
        self.len
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

fn path_str(path: &Path) -> io::Result<&str> {
    path.to_str().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("path is not valid UTF-8: {}", path.display()),
        )
    })
}

fn encode_record(record: &JournalRecord, out: &mut Vec<u8>) -> io::Result<()> {
    let mut payload = Vec::new();
    match record {
        JournalRecord::Upsert {
            generation,
            document,
            content,
        } => {
            payload.push(TAG_UPSERT);
            write_u64_le(&mut payload, *generation)?;
            write_u32_le(&mut payload, document.doc_id)?;
            write_short_str(&mut payload, path_str(&document.path)?)?;
            payload.extend_from_slice(&document.content_hash);
            write_u64_le(&mut payload, document.mtime)?;
            write_u64_le(&mut payload, document.size)?;
            write_u64_le(&mut payload, document.indexed_at)?;
            write_long_str(&mut payload, content)?;
        }
        JournalRecord::Remove { generation, path } => {
            payload.push(TAG_REMOVE);
            write_u64_le(&mut payload, *generation)?;
            write_short_str(&mut payload, path_str(path)?)?;
        }
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "journal record too large"))?;
    write_u32_le(out, len)?;
    out.extend_from_slice(&checksum(&payload));
    out.extend_from_slice(&payload);
    Ok(())
}

/// Decode all complete records; returns them with the length of the valid prefix
fn decode_records(buf: &[u8]) -> Result<(Vec<JournalRecord>, usize)> {
    let mut records = Vec::new();
    let mut pos = HEADER_LEN as usize;

    while pos < buf.len() {
        let rest = &buf[pos..];
        if rest.len() < FRAME_LEN {
            break;
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if rest.len() - FRAME_LEN < len {
            break;
        }
        let payload = &rest[FRAME_LEN..FRAME_LEN + len];
        if checksum(payload) != rest[4..FRAME_LEN] {
            return Err(StoreError::corrupt(format!(
                "journal checksum mismatch at byte {pos}"
            )));
        }
        records.push(decode_payload(payload)?);
        pos += FRAME_LEN + len;
    }

    Ok((records, pos))
}

fn decode_payload(payload: &[u8]) -> Result<JournalRecord> {
    let mut reader = ByteReader::new(payload, "journal record");
    let tag = reader.u8()?;
    let generation = reader.u64()?;

    let record = match tag {
        TAG_UPSERT => {
            let doc_id = reader.u32()?;
            let path = PathBuf::from(reader.short_str()?);
            let content_hash = reader.array::<32>()?;
            let mtime = reader.u64()?;
            let size = reader.u64()?;
            let indexed_at = reader.u64()?;
            let content: Arc<str> = Arc::from(reader.long_str()?);
            JournalRecord::Upsert {
                generation,
                document: Document {
                    doc_id,
                    path,
                    content_hash,
                    mtime,
                    size,
                    indexed_at,
                },
                content,
            }
        }
        TAG_REMOVE => JournalRecord::Remove {
            generation,
            path: PathBuf::from(reader.short_str()?),
        },
        other => {
            return Err(StoreError::corrupt(format!("unknown journal record tag {other}")));
        }
    };

    if !reader.is_empty() {
        return Err(StoreError::corrupt("trailing bytes in journal record"));
    }
    Ok(record)
}
