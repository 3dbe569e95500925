//! Dataset and model manifests kept inside the project document.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::document::atomic_write_text;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetGroup {
    Datasets,
    Models,
}

impl AssetGroup {
    /// Project subdirectory holding this group's channels; also the remote
    /// subpath root used by push/pull.
    pub fn dir_name(self) -> &'static str {
        match self {
            AssetGroup::Datasets => "data",
            AssetGroup::Models => "model",
        }
    }
}

impl fmt::Display for AssetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetGroup::Datasets => write!(f, "datasets"),
            AssetGroup::Models => write!(f, "models"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifestEntry {
    pub channel: String,
    pub filename: String,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

impl AssetManifestEntry {
    pub fn new(channel: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            filename: filename.into(),
            mime_type: None,
            remote: None,
            remote_path: None,
            compression: None,
        }
    }

    /// Fill the mime type from the file name and the remote path from the
    /// channel where they were not given.
    pub fn with_defaults(mut self) -> Self {
        if self.mime_type.is_none() {
            self.mime_type = mime_guess::from_path(&self.filename)
                .first_raw()
                .map(str::to_string);
        }
        if self.remote_path.is_none() {
            self.remote_path = Some(self.channel.clone());
        }
        self
    }

    fn matches(&self, channel: &str, filename: &str) -> bool {
        self.channel == channel && self.filename == filename
    }

    // Fields set on `other` replace ours; unset fields are kept.
    fn merge_from(&mut self, other: AssetManifestEntry) {
        if other.mime_type.is_some() {
            self.mime_type = other.mime_type;
        }
        if other.remote.is_some() {
            self.remote = other.remote;
        }
        if other.remote_path.is_some() {
            self.remote_path = other.remote_path;
        }
        if other.compression.is_some() {
            self.compression = other.compression;
        }
    }

    pub fn is_zipped(&self) -> bool {
        self.compression == Some(Compression::Zip)
    }
}

/// One manifest list; `(channel, filename)` is unique within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    group: AssetGroup,
    entries: Vec<AssetManifestEntry>,
}

impl AssetManifest {
    pub fn new(group: AssetGroup, entries: Vec<AssetManifestEntry>) -> Self {
        Self { group, entries }
    }

    pub fn group(&self) -> AssetGroup {
        self.group
    }

    pub fn entries(&self) -> &[AssetManifestEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<AssetManifestEntry> {
        self.entries
    }

    fn position(&self, channel: &str, filename: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.matches(channel, filename))
    }

    fn not_found(&self, channel: &str, filename: &str) -> Error {
        Error::AssetNotFound {
            channel: channel.to_string(),
            filename: filename.to_string(),
            group: self.group.to_string(),
        }
    }

    /// Add `entry`. An existing `(channel, filename)` is an error unless
    /// `update` is set, in which case the entries are merged.
    pub fn add(&mut self, entry: AssetManifestEntry, update: bool) -> Result<()> {
        match self.position(&entry.channel, &entry.filename) {
            Some(idx) if update => {
                self.entries[idx].merge_from(entry);
                Ok(())
            }
            Some(_) => Err(Error::DuplicateAsset {
                channel: entry.channel,
                filename: entry.filename,
                group: self.group.to_string(),
            }),
            None => {
                self.entries.push(entry);
                Ok(())
            }
        }
    }

    pub fn update(&mut self, entry: AssetManifestEntry) -> Result<()> {
        let idx = self
            .position(&entry.channel, &entry.filename)
            .ok_or_else(|| self.not_found(&entry.channel, &entry.filename))?;
        self.entries[idx].merge_from(entry);
        Ok(())
    }

    /// Remove the first matching entry.
    pub fn remove(&mut self, channel: &str, filename: &str) -> Result<AssetManifestEntry> {
        let idx = self
            .position(channel, filename)
            .ok_or_else(|| self.not_found(channel, filename))?;
        Ok(self.entries.remove(idx))
    }

    pub fn get(&self, channel: &str, filename: &str) -> Result<&AssetManifestEntry> {
        self.entries
            .iter()
            .find(|e| e.matches(channel, filename))
            .ok_or_else(|| self.not_found(channel, filename))
    }

    /// Sorted, de-duplicated `<channel>/<filename>` lines.
    pub fn gitignore_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{}/{}", e.channel, e.filename))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rewrite `<project>/<data|model>/.gitignore` from the manifest.
    pub fn write_gitignore(&self, project_dir: &Path) -> Result<()> {
        let path = project_dir.join(self.group.dir_name()).join(".gitignore");
        let mut body = self.gitignore_lines().join("\n");
        body.push('\n');
        atomic_write_text(&path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(channel: &str, filename: &str) -> AssetManifestEntry {
        AssetManifestEntry::new(channel, filename)
    }

    #[test]
    fn duplicate_add_is_rejected_and_leaves_one_entry() {
        let mut m = AssetManifest::new(AssetGroup::Datasets, Vec::new());
        m.add(entry("train", "data.csv"), false).expect("first add");
        let err = m.add(entry("train", "data.csv"), false).unwrap_err();
        assert!(matches!(err, Error::DuplicateAsset { .. }));
        assert_eq!(
            m.entries()
                .iter()
                .filter(|e| e.matches("train", "data.csv"))
                .count(),
            1
        );
    }

    #[test]
    fn add_with_update_merges_fields() {
        let mut m = AssetManifest::new(AssetGroup::Models, Vec::new());
        let mut first = entry("m1", "model.pkl");
        first.remote = Some("origin".into());
        m.add(first, false).expect("add");

        let mut second = entry("m1", "model.pkl");
        second.compression = Some(Compression::Zip);
        m.add(second, true).expect("update");

        let got = m.get("m1", "model.pkl").expect("get");
        assert_eq!(got.remote.as_deref(), Some("origin"));
        assert!(got.is_zipped());
    }

    #[test]
    fn update_and_remove_require_existing_entry() {
        let mut m = AssetManifest::new(AssetGroup::Datasets, Vec::new());
        assert!(matches!(
            m.update(entry("a", "b")).unwrap_err(),
            Error::AssetNotFound { .. }
        ));
        assert!(matches!(
            m.remove("a", "b").unwrap_err(),
            Error::AssetNotFound { .. }
        ));
        assert!(m.get("a", "b").is_err());
    }

    #[test]
    fn remove_takes_first_match_only() {
        let mut m = AssetManifest::new(
            AssetGroup::Datasets,
            vec![entry("a", "b"), entry("c", "d"), entry("a", "b")],
        );
        m.remove("a", "b").expect("remove");
        assert_eq!(m.entries().len(), 2);
        assert_eq!(m.entries()[0], entry("c", "d"));
    }

    #[test]
    fn defaults_guess_mime_and_remote_path() {
        let e = entry("train", "data.csv").with_defaults();
        assert_eq!(e.mime_type.as_deref(), Some("text/csv"));
        assert_eq!(e.remote_path.as_deref(), Some("train"));
    }

    #[test]
    fn gitignore_lines_are_sorted_and_unique() {
        let m = AssetManifest::new(
            AssetGroup::Datasets,
            vec![entry("z", "1.csv"), entry("a", "2.csv"), entry("z", "1.csv")],
        );
        assert_eq!(m.gitignore_lines(), vec!["a/2.csv", "z/1.csv"]);

        let tmp = tempfile::tempdir().expect("tempdir");
        m.write_gitignore(tmp.path()).expect("write");
        let body = std::fs::read_to_string(tmp.path().join("data/.gitignore")).expect("read");
        assert_eq!(body, "a/2.csv\nz/1.csv\n");
    }
}
