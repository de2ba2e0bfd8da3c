/*
 * tofu.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gemella, a Gemini protocol server and client.
 *
 * Gemella is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gemella is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gemella.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Trust-On-First-Use store: a persistent `(hostname, port)` →
//! fingerprint map backed by SQLite. `verify` classifies a presented
//! certificate as first use, match or changed; `trust` records it
//! (preserving `first_seen` on replacement). All operations serialize
//! behind the connection mutex. Export/import speak a self-describing
//! key/table text format with a `[_metadata]` section.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::certificates;

/// Version stamped into exports.
pub const EXPORT_VERSION: &str = "1.0";

/// One known host record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TofuEntry {
    pub hostname: String,
    pub port: u16,
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Outcome of verifying a presented certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TofuVerdict {
    /// No record for this host yet. Not an error; policy decides.
    FirstUse,
    /// Fingerprint matches the stored record; `last_seen` was updated.
    Match,
    /// Fingerprint differs from the stored record. The caller must NOT
    /// silently trust the new certificate.
    Changed {
        old_fingerprint: String,
        new_fingerprint: String,
    },
}

/// Store failure.
#[derive(Debug)]
pub enum TofuError {
    Database(String),
    Io(io::Error),
    Format(String),
}

impl fmt::Display for TofuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TofuError::Database(reason) => write!(f, "TOFU database error: {}", reason),
            TofuError::Io(e) => write!(f, "TOFU I/O error: {}", e),
            TofuError::Format(reason) => write!(f, "TOFU import format error: {}", reason),
        }
    }
}

impl std::error::Error for TofuError {}

impl From<rusqlite::Error> for TofuError {
    fn from(e: rusqlite::Error) -> Self {
        TofuError::Database(e.to_string())
    }
}

impl From<io::Error> for TofuError {
    fn from(e: io::Error) -> Self {
        TofuError::Io(e)
    }
}

/// Import strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Keep existing entries, consulting the conflict callback where the
    /// imported fingerprint differs.
    Merge,
    /// Drop all existing entries first.
    Replace,
}

/// Counts reported by `import`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// SQLite-backed TOFU database.
pub struct TofuStore {
    conn: Mutex<Connection>,
}

impl TofuStore {
    /// Open (creating if necessary) the database at `path`. Parent
    /// directories are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TofuError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, TofuError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), TofuError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS known_hosts (
                hostname TEXT NOT NULL,
                port INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (hostname, port)
            )",
            [],
        )?;
        Ok(())
    }

    /// Classify a presented certificate. A match refreshes `last_seen`;
    /// a change leaves the stored record untouched.
    pub fn verify(
        &self,
        hostname: &str,
        port: u16,
        cert_der: &[u8],
    ) -> Result<TofuVerdict, TofuError> {
        let fingerprint = certificates::fingerprint(cert_der);
        let conn = self.conn.lock().expect("tofu mutex poisoned");
        let stored: Option<String> = conn
            .query_row(
                "SELECT fingerprint FROM known_hosts WHERE hostname = ?1 AND port = ?2",
                params![hostname, port],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            None => Ok(TofuVerdict::FirstUse),
            Some(stored) if stored == fingerprint => {
                conn.execute(
                    "UPDATE known_hosts SET last_seen = ?1 WHERE hostname = ?2 AND port = ?3",
                    params![now_rfc3339(), hostname, port],
                )?;
                Ok(TofuVerdict::Match)
            }
            Some(stored) => Ok(TofuVerdict::Changed {
                old_fingerprint: stored,
                new_fingerprint: fingerprint,
            }),
        }
    }

    /// Record (or replace) the certificate for a host. `first_seen` of an
    /// existing record is preserved.
    pub fn trust(&self, hostname: &str, port: u16, cert_der: &[u8]) -> Result<(), TofuError> {
        let fingerprint = certificates::fingerprint(cert_der);
        let now = now_rfc3339();
        let conn = self.conn.lock().expect("tofu mutex poisoned");
        let updated = conn.execute(
            "UPDATE known_hosts SET fingerprint = ?1, last_seen = ?2
             WHERE hostname = ?3 AND port = ?4",
            params![fingerprint, now, hostname, port],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO known_hosts (hostname, port, fingerprint, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![hostname, port, fingerprint, now, now],
            )?;
        }
        Ok(())
    }

    /// Remove a host. Returns whether a record existed.
    pub fn revoke(&self, hostname: &str, port: u16) -> Result<bool, TofuError> {
        let conn = self.conn.lock().expect("tofu mutex poisoned");
        let removed = conn.execute(
            "DELETE FROM known_hosts WHERE hostname = ?1 AND port = ?2",
            params![hostname, port],
        )?;
        Ok(removed > 0)
    }

    /// Look up one host record.
    pub fn get(&self, hostname: &str, port: u16) -> Result<Option<TofuEntry>, TofuError> {
        let conn = self.conn.lock().expect("tofu mutex poisoned");
        let entry = conn
            .query_row(
                "SELECT hostname, port, fingerprint, first_seen, last_seen
                 FROM known_hosts WHERE hostname = ?1 AND port = ?2",
                params![hostname, port],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// All known hosts, most recently seen first.
    pub fn list(&self) -> Result<Vec<TofuEntry>, TofuError> {
        let conn = self.conn.lock().expect("tofu mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT hostname, port, fingerprint, first_seen, last_seen
             FROM known_hosts ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Remove every record, returning how many were removed.
    pub fn clear(&self) -> Result<usize, TofuError> {
        let conn = self.conn.lock().expect("tofu mutex poisoned");
        let removed = conn.execute("DELETE FROM known_hosts", [])?;
        Ok(removed)
    }

    /// Write all records in the export format: a `[_metadata]` section
    /// followed by one table per `hostname:port` key, ordered by key.
    pub fn export(&self, writer: &mut dyn Write) -> Result<(), TofuError> {
        let mut entries = self.list()?;
        entries.sort_by(|a, b| (&a.hostname, a.port).cmp(&(&b.hostname, b.port)));

        writeln!(writer, "[_metadata]")?;
        writeln!(writer, "exported_at = \"{}\"", now_rfc3339())?;
        writeln!(writer, "version = \"{}\"", EXPORT_VERSION)?;
        for entry in entries {
            writeln!(writer)?;
            writeln!(writer, "[\"{}:{}\"]", entry.hostname, entry.port)?;
            writeln!(writer, "fingerprint = \"{}\"", entry.fingerprint)?;
            writeln!(
                writer,
                "first_seen = \"{}\"",
                entry.first_seen.to_rfc3339_opts(SecondsFormat::Secs, true)
            )?;
            writeln!(
                writer,
                "last_seen = \"{}\"",
                entry.last_seen.to_rfc3339_opts(SecondsFormat::Secs, true)
            )?;
        }
        Ok(())
    }

    /// Read records in the export format. In `Merge` mode, a record whose
    /// fingerprint conflicts with an existing one is resolved by
    /// `on_conflict(existing, incoming)`; `true` takes the incoming
    /// record. Matching fingerprints merge timestamps (earliest
    /// `first_seen`, latest `last_seen`).
    pub fn import(
        &self,
        reader: impl BufRead,
        mode: ImportMode,
        mut on_conflict: impl FnMut(&TofuEntry, &TofuEntry) -> bool,
    ) -> Result<ImportSummary, TofuError> {
        let entries = parse_export(reader)?;
        if mode == ImportMode::Replace {
            self.clear()?;
        }

        let mut summary = ImportSummary::default();
        for incoming in entries {
            let existing = self.get(&incoming.hostname, incoming.port)?;
            let keep = match &existing {
                None => Some(incoming.clone()),
                Some(existing) if existing.fingerprint == incoming.fingerprint => {
                    Some(TofuEntry {
                        first_seen: existing.first_seen.min(incoming.first_seen),
                        last_seen: existing.last_seen.max(incoming.last_seen),
                        ..incoming.clone()
                    })
                }
                Some(existing) => {
                    if on_conflict(existing, &incoming) {
                        Some(incoming.clone())
                    } else {
                        None
                    }
                }
            };
            match keep {
                Some(entry) => {
                    self.put_entry(&entry)?;
                    summary.imported += 1;
                }
                None => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    fn put_entry(&self, entry: &TofuEntry) -> Result<(), TofuError> {
        let conn = self.conn.lock().expect("tofu mutex poisoned");
        conn.execute(
            "INSERT INTO known_hosts (hostname, port, fingerprint, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (hostname, port) DO UPDATE SET
                 fingerprint = excluded.fingerprint,
                 first_seen = excluded.first_seen,
                 last_seen = excluded.last_seen",
            params![
                entry.hostname,
                entry.port,
                entry.fingerprint,
                entry.first_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
                entry.last_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        )?;
        Ok(())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<TofuEntry> {
    let first_seen: String = row.get(3)?;
    let last_seen: String = row.get(4)?;
    Ok(TofuEntry {
        hostname: row.get(0)?,
        port: row.get::<_, i64>(1)? as u16,
        fingerprint: row.get(2)?,
        first_seen: parse_rfc3339_lossy(&first_seen),
        last_seen: parse_rfc3339_lossy(&last_seen),
    })
}

fn parse_rfc3339_lossy(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch"))
}

/// Parse the export format: `[section]` headers and `key = "value"` lines.
fn parse_export(reader: impl BufRead) -> Result<Vec<TofuEntry>, TofuError> {
    struct Partial {
        hostname: String,
        port: u16,
        fingerprint: Option<String>,
        first_seen: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    }

    fn finish(partial: Partial) -> Result<TofuEntry, TofuError> {
        let fingerprint = partial.fingerprint.ok_or_else(|| {
            TofuError::Format(format!("{}: missing fingerprint", partial.hostname))
        })?;
        let now = Utc::now();
        Ok(TofuEntry {
            hostname: partial.hostname,
            port: partial.port,
            fingerprint,
            first_seen: partial.first_seen.unwrap_or(now),
            last_seen: partial.last_seen.unwrap_or(now),
        })
    }

    let mut entries = Vec::new();
    let mut current: Option<Partial> = None;
    let mut in_metadata = false;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            if let Some(partial) = current.take() {
                entries.push(finish(partial)?);
            }
            let name = line[1..line.len() - 1].trim_matches('"');
            if name == "_metadata" {
                in_metadata = true;
                continue;
            }
            in_metadata = false;
            let (hostname, port) = name.rsplit_once(':').ok_or_else(|| {
                TofuError::Format(format!("line {}: bad section key {}", lineno + 1, name))
            })?;
            let port: u16 = port.parse().map_err(|_| {
                TofuError::Format(format!("line {}: bad port in {}", lineno + 1, name))
            })?;
            current = Some(Partial {
                hostname: hostname.to_string(),
                port,
                fingerprint: None,
                first_seen: None,
                last_seen: None,
            });
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            TofuError::Format(format!("line {}: expected key = value", lineno + 1))
        })?;
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        if in_metadata {
            if key == "version" && value != EXPORT_VERSION {
                return Err(TofuError::Format(format!(
                    "unsupported export version {}",
                    value
                )));
            }
            continue;
        }
        let partial = current.as_mut().ok_or_else(|| {
            TofuError::Format(format!("line {}: value outside any section", lineno + 1))
        })?;
        match key {
            "fingerprint" => partial.fingerprint = Some(value.to_string()),
            "first_seen" => {
                partial.first_seen = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            "last_seen" => {
                partial.last_seen = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            _ => {}
        }
    }
    if let Some(partial) = current.take() {
        entries.push(finish(partial)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der(seed: u8) -> Vec<u8> {
        vec![seed; 64]
    }

    #[test]
    fn first_use_then_match() {
        let store = TofuStore::open_in_memory().unwrap();
        assert_eq!(
            store.verify("example.org", 1965, &der(1)).unwrap(),
            TofuVerdict::FirstUse
        );
        store.trust("example.org", 1965, &der(1)).unwrap();
        assert_eq!(
            store.verify("example.org", 1965, &der(1)).unwrap(),
            TofuVerdict::Match
        );
    }

    #[test]
    fn changed_certificate_detected() {
        let store = TofuStore::open_in_memory().unwrap();
        store.trust("example.org", 1965, &der(1)).unwrap();
        match store.verify("example.org", 1965, &der(2)).unwrap() {
            TofuVerdict::Changed {
                old_fingerprint,
                new_fingerprint,
            } => {
                assert_eq!(old_fingerprint, certificates::fingerprint(&der(1)));
                assert_eq!(new_fingerprint, certificates::fingerprint(&der(2)));
            }
            other => panic!("expected Changed, got {:?}", other),
        }
        // The stored record is untouched by a failed verify.
        let entry = store.get("example.org", 1965).unwrap().unwrap();
        assert_eq!(entry.fingerprint, certificates::fingerprint(&der(1)));
    }

    #[test]
    fn trust_preserves_first_seen() {
        let store = TofuStore::open_in_memory().unwrap();
        store.trust("example.org", 1965, &der(1)).unwrap();
        let before = store.get("example.org", 1965).unwrap().unwrap();
        store.trust("example.org", 1965, &der(2)).unwrap();
        let after = store.get("example.org", 1965).unwrap().unwrap();
        assert_eq!(before.first_seen, after.first_seen);
        assert_eq!(after.fingerprint, certificates::fingerprint(&der(2)));
    }

    #[test]
    fn revoke_resets_to_first_use() {
        let store = TofuStore::open_in_memory().unwrap();
        store.trust("example.org", 1965, &der(1)).unwrap();
        assert!(store.revoke("example.org", 1965).unwrap());
        assert!(!store.revoke("example.org", 1965).unwrap());
        assert_eq!(
            store.verify("example.org", 1965, &der(1)).unwrap(),
            TofuVerdict::FirstUse
        );
    }

    #[test]
    fn ports_are_distinct_identities() {
        let store = TofuStore::open_in_memory().unwrap();
        store.trust("example.org", 1965, &der(1)).unwrap();
        assert_eq!(
            store.verify("example.org", 1966, &der(2)).unwrap(),
            TofuVerdict::FirstUse
        );
    }

    #[test]
    fn clear_counts_entries() {
        let store = TofuStore::open_in_memory().unwrap();
        store.trust("a.org", 1965, &der(1)).unwrap();
        store.trust("b.org", 1965, &der(2)).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn export_import_roundtrip() {
        let store = TofuStore::open_in_memory().unwrap();
        store.trust("a.org", 1965, &der(1)).unwrap();
        store.trust("b.org", 300, &der(2)).unwrap();
        let mut buf = Vec::new();
        store.export(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("[_metadata]"));
        assert!(text.contains("version = \"1.0\""));
        assert!(text.contains("[\"a.org:1965\"]"));

        let other = TofuStore::open_in_memory().unwrap();
        let summary = other
            .import(&buf[..], ImportMode::Replace, |_, _| false)
            .unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(
            other.get("a.org", 1965).unwrap().unwrap().fingerprint,
            certificates::fingerprint(&der(1))
        );
    }

    #[test]
    fn merge_conflict_respects_callback() {
        let store = TofuStore::open_in_memory().unwrap();
        store.trust("a.org", 1965, &der(1)).unwrap();
        let mut buf = Vec::new();
        store.export(&mut buf).unwrap();

        let other = TofuStore::open_in_memory().unwrap();
        other.trust("a.org", 1965, &der(9)).unwrap();

        // Refuse the incoming record: existing fingerprint survives.
        let summary = other
            .import(&buf[..], ImportMode::Merge, |_, _| false)
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            other.get("a.org", 1965).unwrap().unwrap().fingerprint,
            certificates::fingerprint(&der(9))
        );

        // Accept it: incoming fingerprint wins.
        let summary = other
            .import(&buf[..], ImportMode::Merge, |_, _| true)
            .unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(
            other.get("a.org", 1965).unwrap().unwrap().fingerprint,
            certificates::fingerprint(&der(1))
        );
    }
}
