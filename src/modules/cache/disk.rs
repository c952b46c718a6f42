// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! File-backed overflow store for large part bodies.
//!
//! Bodies above the combined cache's size threshold land here as
//! zlib-compressed files named
//! `<cacheDir>/parts/<mailbox-b64>/<uid>_<partId>.cache`. The file
//! names are ASCII-safe, so an entry can be invalidated out-of-band by
//! deleting the file.

use crate::modules::error::{code::ErrorCode, MailBeamResult};
use crate::modules::utils::mailbox_dir_name;
use crate::raise_error;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
pub struct PartFileStore {
    root: PathBuf,
}

impl PartFileStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join("parts"),
        }
    }

    fn file_path(&self, mailbox: &str, uid: u32, part_id: &str) -> PathBuf {
        // part ids are digits, dots and HEADER/TEXT/MIME, all safe
        self.root
            .join(mailbox_dir_name(mailbox))
            .join(format!("{}_{}.cache", uid, part_id))
    }

    pub fn load(&self, mailbox: &str, uid: u32, part_id: &str) -> MailBeamResult<Option<Vec<u8>>> {
        let path = self.file_path(mailbox, uid, part_id);
        let compressed = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(raise_error!(
                    format!("cannot read {}: {}", path.display(), err),
                    ErrorCode::CacheError
                ))
            }
        };
        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut data = Vec::new();
        decoder.read_to_end(&mut data).map_err(|err| {
            raise_error!(
                format!("corrupt part file {}: {}", path.display(), err),
                ErrorCode::CacheError
            )
        })?;
        Ok(Some(data))
    }

    pub fn store(
        &self,
        mailbox: &str,
        uid: u32,
        part_id: &str,
        data: &[u8],
    ) -> MailBeamResult<()> {
        let path = self.file_path(mailbox, uid, part_id);
        let dir = path.parent().expect("part files always have a parent");
        std::fs::create_dir_all(dir).map_err(|err| {
            raise_error!(
                format!("cannot create {}: {}", dir.display(), err),
                ErrorCode::CacheError
            )
        })?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).map_err(|err| {
            raise_error!(format!("compression failed: {}", err), ErrorCode::CacheError)
        })?;
        let compressed = encoder.finish().map_err(|err| {
            raise_error!(format!("compression failed: {}", err), ErrorCode::CacheError)
        })?;

        debug!(
            "storing part {}/{}/{} ({} -> {} bytes)",
            mailbox,
            uid,
            part_id,
            data.len(),
            compressed.len()
        );
        std::fs::write(&path, compressed).map_err(|err| {
            raise_error!(
                format!("cannot write {}: {}", path.display(), err),
                ErrorCode::CacheError
            )
        })
    }

    /// Remove every stored part of a mailbox.
    pub fn clear_mailbox(&self, mailbox: &str) -> MailBeamResult<()> {
        let dir = self.root.join(mailbox_dir_name(mailbox));
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(raise_error!(
                format!("cannot clear {}: {}", dir.display(), err),
                ErrorCode::CacheError
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartFileStore::new(dir.path());

        let data = vec![42u8; 2 * 1024 * 1024];
        store.store("INBOX", 17, "1.2", &data).unwrap();
        assert_eq!(store.load("INBOX", 17, "1.2").unwrap(), Some(data));
        assert_eq!(store.load("INBOX", 17, "9").unwrap(), None);
    }

    #[test]
    fn files_are_ascii_safe_and_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartFileStore::new(dir.path());

        let data = vec![0u8; 64 * 1024];
        store.store("Šta/novog", 3, "2.HEADER", &data).unwrap();

        let mailbox_dir = dir.path().join("parts").join(mailbox_dir_name("Šta/novog"));
        let file = mailbox_dir.join("3_2.HEADER.cache");
        assert!(file.exists());
        assert!(file
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .is_ascii());
        // zeroes compress well below the raw size
        assert!(std::fs::metadata(&file).unwrap().len() < 64 * 1024);
    }

    #[test]
    fn out_of_band_removal_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartFileStore::new(dir.path());
        store.store("INBOX", 1, "1", b"payload").unwrap();
        store.clear_mailbox("INBOX").unwrap();
        assert_eq!(store.load("INBOX", 1, "1").unwrap(), None);
    }
}
