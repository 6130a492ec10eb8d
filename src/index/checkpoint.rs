//! Full on-disk image of an index snapshot.
//!
//! Three files, each stamped with the snapshot generation:
//! - `docs.bin`: document records with their text
//! - `terms.dict`: sorted term dictionary (term, postings offset, length, doc freq)
//! - `terms.postings`: per term, doc ids and delta-encoded occurrence offsets
//!
//! Files are written under temporary names and renamed into place. A set whose
//! generations disagree, or with a member missing, is treated as corruption.

use crate::error::{Result, StoreError};
use crate::index::snapshot::{IndexSnapshot, IndexedDoc, TermOffsets};
use crate::index::types::{DocId, Document, Generation};
use crate::utils::encoding::{
    delta_encode, encode_varint, write_long_str, write_short_str, write_u32_le, write_u64_le,
    ByteReader,
};
use memmap2::Mmap;
use rustc_hash::FxHashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DOCS_FILE: &str = "docs.bin";
pub const DICT_FILE: &str = "terms.dict";
pub const POSTINGS_FILE: &str = "terms.postings";

const DOCS_MAGIC: &[u8; 8] = b"CFDOCS01";
const DICT_MAGIC: &[u8; 8] = b"CFDICT01";
const POSTINGS_MAGIC: &[u8; 8] = b"CFPOST01";

const FILES: [&str; 3] = [DOCS_FILE, DICT_FILE, POSTINGS_FILE];

/// Whether any checkpoint file is present
pub fn exists(dir: &Path) -> bool {
    FILES.iter().any(|name| dir.join(name).exists())
}

/// Delete all checkpoint files
pub fn remove(dir: &Path) -> Result<()> {
    for name in FILES {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn tmp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.tmp"))
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

fn finish(writer: BufWriter<File>) -> Result<()> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Write a checkpoint of `snapshot` into `dir`
pub fn write(dir: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    let generation = snapshot.generation();

    // Documents
    let mut docs = create(&tmp_path(dir, DOCS_FILE))?;
    docs.write_all(DOCS_MAGIC)?;
    write_u64_le(&mut docs, generation)?;
    write_u32_le(&mut docs, snapshot.next_doc_id())?;
    write_u32_le(&mut docs, snapshot.document_count() as u32)?;
    for document in snapshot.documents() {
        let Some(doc) = snapshot.get(document.doc_id) else {
            continue;
        };
        let path = document.path.to_str().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("path is not valid UTF-8: {}", document.path.display()),
            ))
        })?;
        write_u32_le(&mut docs, document.doc_id)?;
        write_short_str(&mut docs, path)?;
        docs.write_all(&document.content_hash)?;
        write_u64_le(&mut docs, document.mtime)?;
        write_u64_le(&mut docs, document.size)?;
        write_u64_le(&mut docs, document.indexed_at)?;
        write_long_str(&mut docs, &doc.content)?;
    }
    finish(docs)?;

    // Dictionary and postings, terms in sorted order
    let mut terms: Vec<_> = snapshot.terms().collect();
    terms.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut postings = create(&tmp_path(dir, POSTINGS_FILE))?;
    postings.write_all(POSTINGS_MAGIC)?;
    write_u64_le(&mut postings, generation)?;
    let mut offset = (POSTINGS_MAGIC.len() + 8) as u64;

    let mut dict = create(&tmp_path(dir, DICT_FILE))?;
    dict.write_all(DICT_MAGIC)?;
    write_u64_le(&mut dict, generation)?;
    write_u32_le(&mut dict, terms.len() as u32)?;

    let mut buf = Vec::new();
    for (term, bitmap) in terms {
        buf.clear();
        let mut prev_doc: DocId = 0;
        for doc_id in bitmap.iter() {
            let occurrences = snapshot.get(doc_id).map(|d| d.occurrences(term)).unwrap_or(&[]);
            encode_varint(doc_id - prev_doc, &mut buf);
            delta_encode(occurrences, &mut buf);
            prev_doc = doc_id;
        }
        postings.write_all(&buf)?;

        write_short_str(&mut dict, term)?;
        write_u64_le(&mut dict, offset)?;
        write_u32_le(&mut dict, buf.len() as u32)?;
        write_u32_le(&mut dict, bitmap.len() as u32)?;
        offset += buf.len() as u64;
    }
    finish(postings)?;
    finish(dict)?;

    for name in FILES {
        fs::rename(tmp_path(dir, name), dir.join(name))?;
    }
    Ok(())
}

struct DictEntry {
    term: String,
    offset: u64,
    length: u32,
    doc_freq: u32,
}

fn check_magic(reader: &mut ByteReader<'_>, magic: &[u8; 8], name: &str) -> Result<()> {
    if reader.bytes(magic.len())? != magic {
        return Err(StoreError::corrupt(format!("{name}: bad magic")));
    }
    Ok(())
}

/// Load the checkpoint in `dir`; `None` if there is none
pub fn read(dir: &Path) -> Result<Option<IndexSnapshot>> {
    if !exists(dir) {
        return Ok(None);
    }
    for name in FILES {
        if !dir.join(name).exists() {
            return Err(StoreError::corrupt(format!("checkpoint file {name} is missing")));
        }
    }

    // Documents
    let docs_bytes = fs::read(dir.join(DOCS_FILE))?;
    let mut reader = ByteReader::new(&docs_bytes, DOCS_FILE);
    check_magic(&mut reader, DOCS_MAGIC, DOCS_FILE)?;
    let generation = reader.u64()?;
    let next_doc_id = reader.u32()?;
    let doc_count = reader.u32()? as usize;

    let mut documents: FxHashMap<DocId, (Document, Arc<str>)> = FxHashMap::default();
    for _ in 0..doc_count {
        let doc_id = reader.u32()?;
        let path = PathBuf::from(reader.short_str()?);
        let content_hash = reader.array::<32>()?;
        let mtime = reader.u64()?;
        let size = reader.u64()?;
        let indexed_at = reader.u64()?;
        let content: Arc<str> = Arc::from(reader.long_str()?);
        if doc_id >= next_doc_id {
            return Err(StoreError::corrupt(format!("doc id {doc_id} beyond allocator")));
        }
        let document = Document {
            doc_id,
            path,
            content_hash,
            mtime,
            size,
            indexed_at,
        };
        if documents.insert(doc_id, (document, content)).is_some() {
            return Err(StoreError::corrupt(format!("duplicate doc id {doc_id}")));
        }
    }

    // Dictionary
    let dict_bytes = fs::read(dir.join(DICT_FILE))?;
    let mut reader = ByteReader::new(&dict_bytes, DICT_FILE);
    check_magic(&mut reader, DICT_MAGIC, DICT_FILE)?;
    check_generation(reader.u64()?, generation, DICT_FILE)?;
    let term_count = reader.u32()? as usize;
    let mut entries = Vec::with_capacity(term_count.min(reader.remaining()));
    for _ in 0..term_count {
        entries.push(DictEntry {
            term: reader.short_str()?.to_string(),
            offset: reader.u64()?,
            length: reader.u32()?,
            doc_freq: reader.u32()?,
        });
    }

    // Postings
    let file = File::open(dir.join(POSTINGS_FILE))?;
    let postings = unsafe { Mmap::map(&file)? };
    let mut reader = ByteReader::new(&postings, POSTINGS_FILE);
    check_magic(&mut reader, POSTINGS_MAGIC, POSTINGS_FILE)?;
    check_generation(reader.u64()?, generation, POSTINGS_FILE)?;

    let mut doc_terms: FxHashMap<DocId, TermOffsets> = FxHashMap::default();
    for entry in entries {
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        let bytes = postings
            .get(start..end)
            .ok_or_else(|| StoreError::corrupt(format!("postings of {:?} out of bounds", entry.term)))?;

        let mut reader = ByteReader::new(bytes, POSTINGS_FILE);
        let mut doc_id: DocId = 0;
        for i in 0..entry.doc_freq {
            let delta = reader.varint()?;
            if i > 0 && delta == 0 {
                return Err(StoreError::corrupt("postings doc ids not increasing"));
            }
            doc_id = doc_id
                .checked_add(delta)
                .ok_or_else(|| StoreError::corrupt("postings doc id overflow"))?;
            let offsets = reader.delta_list()?;

            let Some((_, content)) = documents.get(&doc_id) else {
                return Err(StoreError::corrupt(format!(
                    "term {:?} points at unknown doc {doc_id}",
                    entry.term
                )));
            };
            if offsets.is_empty() || offsets.last().is_some_and(|&o| o as usize >= content.len()) {
                return Err(StoreError::corrupt(format!(
                    "term {:?} has invalid offsets in doc {doc_id}",
                    entry.term
                )));
            }
            doc_terms.entry(doc_id).or_default().insert(entry.term.clone(), offsets);
        }
        if !reader.is_empty() {
            return Err(StoreError::corrupt(format!("trailing postings for {:?}", entry.term)));
        }
    }

    let mut snapshot = IndexSnapshot::default();
    for (doc_id, (document, content)) in documents {
        snapshot.insert(IndexedDoc {
            document,
            content,
            terms: doc_terms.remove(&doc_id).unwrap_or_default(),
        });
    }
    snapshot.set_generation(generation);
    snapshot.set_next_doc_id(next_doc_id);

    Ok(Some(snapshot))
}

fn check_generation(found: Generation, expected: Generation, name: &str) -> Result<()> {
    if found != expected {
        return Err(StoreError::corrupt(format!(
            "{name} is at generation {found}, documents at {expected}"
        )));
    }
    Ok(())
}
