//! In-memory batch of operations and its file encoding.
//!
//! A batch file holds the JSON array of its operations. Its name encodes
//! the creation timestamp to the millisecond, prefixed with `0_` for
//! priority batches, so a lexical sort of a directory yields priority
//! batches first and the rest oldest-first:
//!
//! ```text
//! 0_2026_10_18_09_15_02_117.pbt   priority
//! 2026_10_18_09_14_58_004.pbt
//! 2026_10_18_09_15_03_990.pbt
//! ```

use crate::operation::{Operation, OperationKey};
use crate::OutboxResult;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, NaiveDate, NaiveTime, SubsecRound, TimeZone, Utc};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use stream_config_and_utils::BATCH_EXTENSION;

/// Filename prefix marking a priority batch.
pub const PRIORITY_PREFIX: &str = "0";

const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%3f";

/// Encode a creation timestamp and priority flag as a batch filename.
pub fn encode_filename(created_at: DateTime<Utc>, priority: bool) -> String {
    let stamp = created_at.format(TIMESTAMP_FORMAT);
    if priority {
        format!("{PRIORITY_PREFIX}_{stamp}.{BATCH_EXTENSION}")
    } else {
        format!("{stamp}.{BATCH_EXTENSION}")
    }
}

/// Decode a batch filename (or path) back into its timestamp and priority.
///
/// Returns `None` for anything that is not a well-formed batch name.
pub fn decode_filename(path: &Path) -> Option<(DateTime<Utc>, bool)> {
    let name = path.file_name()?.to_str()?;
    let extension = format!(".{BATCH_EXTENSION}");
    let stem = name.strip_suffix(extension.as_str()).unwrap_or(name);

    let parts: Vec<&str> = stem.split('_').collect();
    let (priority, fields) = match parts.len() {
        7 => (false, &parts[..]),
        8 if parts[0] == PRIORITY_PREFIX => (true, &parts[1..]),
        _ => return None,
    };

    let mut numbers = [0u32; 7];
    for (slot, field) in numbers.iter_mut().zip(fields) {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = field.parse().ok()?;
    }
    let [year, month, day, hour, minute, second, millis] = numbers;

    let date = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, millis)?;
    let created_at = Utc.from_utc_datetime(&date.and_time(time));

    // Only the exact encoded form is accepted, so a decoded batch is always
    // stored under the name it was listed by.
    if encode_filename(created_at, priority) != format!("{stem}{extension}") {
        return None;
    }
    Some((created_at, priority))
}

fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// An ordered collection of operations plus its creation time and priority.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    created_at: DateTime<Utc>,
    priority: bool,
    items: Vec<Operation>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self::with_items(Vec::new(), false)
    }

    pub fn with_items(items: Vec<Operation>, priority: bool) -> Self {
        Self {
            created_at: now_millis(),
            priority,
            items,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_created_at(&mut self, created_at: DateTime<Utc>) {
        self.created_at = created_at.trunc_subsecs(3);
    }

    pub fn is_priority(&self) -> bool {
        self.priority
    }

    pub fn items(&self) -> &[Operation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append `op`, first dropping any pending operation on the same record.
    pub fn push(&mut self, op: Operation) {
        if let Some(key) = op.key() {
            self.remove(&key);
        }
        self.items.push(op);
    }

    /// Drop every operation with the given identity.
    pub fn remove(&mut self, key: &OperationKey) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.key().as_ref() != Some(key));
        before - self.items.len()
    }

    /// Clone out the operations named by any of the `reported` keys, in
    /// batch order. See [`OperationKey::matches`].
    pub fn find(&self, reported: &[OperationKey]) -> Vec<Operation> {
        self.items
            .iter()
            .filter(|item| {
                item.key()
                    .is_some_and(|key| reported.iter().any(|r| key.matches(r)))
            })
            .cloned()
            .collect()
    }

    /// Serialized size in bytes of the operations array.
    pub fn size(&self) -> usize {
        serde_json::to_vec(&self.items).map_or(0, |bytes| bytes.len())
    }

    /// Empty the batch and restart its clock.
    pub fn reset(&mut self) {
        self.items.clear();
        self.created_at = now_millis();
    }

    /// Digest of the serialized contents, used to skip redundant writes.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.items).unwrap_or_default();
        BASE64.encode(Sha1::digest(&bytes))
    }

    pub fn filename(&self) -> String {
        encode_filename(self.created_at, self.priority)
    }

    /// Adopt the timestamp and priority encoded in `path`. Non-conforming
    /// names leave the batch untouched.
    pub fn set_filename(&mut self, path: &Path) -> bool {
        match decode_filename(path) {
            Some((created_at, priority)) => {
                self.created_at = created_at;
                self.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Write the operations array to `path`, creating parent directories.
    ///
    /// The file is written next to its destination and renamed into place.
    pub fn save_to_file(&self, path: &Path) -> OutboxResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(&self.items)?;
        let staging = path.with_extension("tmp");
        std::fs::write(&staging, bytes)?;
        std::fs::rename(&staging, path)?;
        Ok(())
    }

    /// Write the batch into `dir` under its encoded filename.
    pub fn save_to_directory(&self, dir: &Path) -> OutboxResult<PathBuf> {
        let path = dir.join(self.filename());
        self.save_to_file(&path)?;
        Ok(path)
    }

    /// Load a batch file. A missing file yields a fresh empty batch.
    pub fn load_from_file(path: &Path) -> OutboxResult<Self> {
        let mut batch = Self::new();
        if !path.exists() {
            return Ok(batch);
        }
        let bytes = std::fs::read(path)?;
        batch.items = serde_json::from_slice(&bytes)?;
        batch.set_filename(path);
        Ok(batch)
    }

    /// Remove this batch's file from `dir`, if present.
    pub fn delete_from_directory(&self, dir: &Path) -> OutboxResult<()> {
        match std::fs::remove_file(dir.join(self.filename())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move this batch's file from `from` to `to`.
    ///
    /// The destination is written before the source is removed, so a crash
    /// in between leaves a duplicate rather than a lost batch.
    pub fn move_between_directories(&self, from: &Path, to: &Path) -> OutboxResult<PathBuf> {
        let path = self.save_to_directory(to)?;
        self.delete_from_directory(from)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Record;
    use chrono::Timelike;
    use serde_json::json;

    fn update(kind: &str, id: &str, extra: &str) -> Operation {
        Operation::update(&Record::new(kind, json!({ "id": id, "extra": extra })), None)
    }

    #[test]
    fn filename_encodes_twenty_four_hour_clock() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 21, 5, 9).unwrap()
            + chrono::Duration::milliseconds(7);

        assert_eq!(encode_filename(at, false), "2026_10_18_21_05_09_007.pbt");
        assert_eq!(encode_filename(at, true), "0_2026_10_18_21_05_09_007.pbt");
    }

    #[test]
    fn filename_decodes_back_to_timestamp_and_priority() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(678);

        for priority in [false, true] {
            let name = encode_filename(at, priority);
            let decoded = decode_filename(&PathBuf::from("/tmp/outbox/sent").join(&name));
            assert_eq!(decoded, Some((at, priority)));
        }
    }

    #[test]
    fn non_conforming_names_are_rejected() {
        for name in [
            "current.pbt",
            "1_2026_01_02_03_04_05_678.pbt",
            "2026_13_02_03_04_05_678.pbt",
            "2026_01_02_25_04_05_678.pbt",
            "2026_01_02_03_04_05.pbt",
            "2026_01_02_03_04_05_x78.pbt",
            "2026_01_02_03_04_05_+78.pbt",
            "2026_1_2_3_4_5_6.pbt",
            "2026_01_02_03_04_05_0678.pbt",
            "00_2026_01_02_03_04_05_678.pbt",
        ] {
            assert_eq!(decode_filename(Path::new(name)), None, "{name}");
        }
    }

    #[test]
    fn set_filename_is_lenient() {
        let mut batch = Batch::new();
        let before = batch.clone();

        assert!(!batch.set_filename(Path::new("garbage.pbt")));
        assert_eq!(batch, before);

        assert!(batch.set_filename(Path::new("0_2025_12_31_23_59_59_999.pbt")));
        assert!(batch.is_priority());
        assert_eq!(batch.created_at().hour(), 23);
    }

    #[test]
    fn push_replaces_pending_operation_on_same_record() {
        let mut batch = Batch::new();
        batch.push(update("PRODUTO", "1", "a"));
        batch.push(update("PRODUTO", "2", "b"));
        batch.push(Operation::delete("PRODUTO", "1", None));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.items()[0].id().as_deref(), Some("2"));
        assert!(batch.items()[1].is_delete());
    }

    #[test]
    fn push_keeps_same_id_across_kinds_and_tenants() {
        let mut batch = Batch::new();
        batch.push(update("PRODUTO", "1", "a"));
        batch.push(update("SECAO", "1", "b"));
        batch.push(Operation::update(
            &Record::new("PRODUTO", json!({ "id": "1" })),
            Some("other".into()),
        ));

        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn find_matches_trimmed_identities() {
        let mut batch = Batch::new();
        batch.push(update("PRODUTO", "1", "a"));
        batch.push(update("PRODUTO", "2", "b"));
        batch.push(update("PRODUTO", "3", "c"));

        let found = batch.find(&[
            OperationKey::new(None, "PRODUTO", " 3 "),
            OperationKey::new(None, "PRODUTO", "1"),
        ]);
        let ids: Vec<_> = found.iter().filter_map(Operation::id).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn size_is_serialized_length() {
        let mut batch = Batch::new();
        assert_eq!(batch.size(), 2);

        let op = update("LOJA", "1", "x");
        let expected = serde_json::to_vec(&vec![op.clone()]).unwrap().len();
        batch.push(op);
        assert_eq!(batch.size(), expected);
    }

    #[test]
    fn content_hash_tracks_contents() {
        let mut batch = Batch::new();
        let empty = batch.content_hash();
        batch.push(update("LOJA", "1", "x"));
        assert_ne!(batch.content_hash(), empty);

        batch.reset();
        assert_eq!(batch.content_hash(), empty);
    }

    #[test]
    fn save_and_load_round_trip_through_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("accumulated");

        let mut batch = Batch::with_items(Vec::new(), true);
        batch.push(update("LOJA", "1", "x"));
        batch.push(Operation::delete("LOJA", "2", None));
        let path = batch.save_to_directory(&dir).unwrap();

        let loaded = Batch::load_from_file(&path).unwrap();
        assert_eq!(loaded, batch);
        assert!(!dir.join(batch.filename()).with_extension("tmp").exists());
    }

    #[test]
    fn load_missing_file_yields_empty_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = Batch::load_from_file(&tmp.path().join("current.pbt")).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn move_between_directories_relocates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("accumulated");
        let to = tmp.path().join("sent");

        let mut batch = Batch::new();
        batch.push(update("LOJA", "1", "x"));
        batch.save_to_directory(&from).unwrap();

        let moved = batch.move_between_directories(&from, &to).unwrap();
        assert!(moved.exists());
        assert!(!from.join(batch.filename()).exists());

        // deleting an absent file is not an error
        batch.delete_from_directory(&from).unwrap();
    }
}
