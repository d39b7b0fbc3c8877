// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Decoded log entries from the leader's operation log.
//!
//! A tail batch body is newline-delimited JSON, one object per entry,
//! optionally terminated by a NUL sentinel byte. Each line decodes into a
//! [`LogEntry`] with a leader-assigned tick and a closed [`MarkerKind`].
//!
//! # Wire Format
//!
//! ```text
//! {"tick":"10","type":"tx-start","db":"shop","tid":"7"}
//! {"tick":"11","type":"document-upsert","db":"shop","cuid":"orders","tid":"7","data":{"_key":"a"}}
//! {"tick":"12","type":"tx-commit","db":"shop","tid":"7"}
//! ```
//!
//! `tick` and `tid` are 64-bit values encoded as decimal strings (plain
//! JSON numbers are also accepted). An unknown `type` string fails the
//! whole batch with `UnexpectedMarkerKind` — a closed enum is the point:
//! a new kind added to the leader protocol cannot silently fall through.

use crate::error::{ApplierError, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch bodies may be terminated by a single NUL sentinel byte.
const BODY_SENTINEL: u8 = 0x00;

/// Prefix marking system collections (tolerant apply rules).
pub const SYSTEM_COLLECTION_PREFIX: char = '_';

/// The closed set of operation kinds in the leader's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerKind {
    DocumentUpsert,
    DocumentRemove,
    TxStart,
    TxAbort,
    TxCommit,
    CollectionCreate,
    CollectionDrop,
    CollectionRename,
    CollectionChange,
    CollectionTruncate,
    IndexCreate,
    IndexDrop,
    ViewCreate,
    ViewDrop,
    ViewChange,
    DatabaseCreate,
    DatabaseDrop,
}

impl MarkerKind {
    /// Kinds that participate in multi-entry transactions.
    ///
    /// Only these are eligible for the below-`firstRegular` exemption: an
    /// old-tick entry is still applied when it belongs to a transaction
    /// that was open at the resume point.
    pub fn is_transactional(self) -> bool {
        matches!(
            self,
            Self::DocumentUpsert
                | Self::DocumentRemove
                | Self::TxStart
                | Self::TxAbort
                | Self::TxCommit
        )
    }

    /// Document-level kinds (as opposed to transaction control and DDL).
    pub fn is_document_op(self) -> bool {
        matches!(self, Self::DocumentUpsert | Self::DocumentRemove)
    }

    /// Schema/DDL kinds, applied immediately outside any transaction scope.
    pub fn is_ddl(self) -> bool {
        !self.is_transactional()
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde kebab-case names on the wire and in logs.
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(s.trim_matches('"'))
    }
}

/// One decoded unit of the leader's log. Immutable; consumed exactly once.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Leader-assigned logical timestamp. Strictly ordered, not
    /// necessarily contiguous.
    pub tick: u64,
    /// Operation kind.
    pub kind: MarkerKind,
    /// Target database name.
    pub database: String,
    /// Target collection name or stable id, where applicable.
    pub collection: Option<String>,
    /// Remote transaction id for kinds participating in a multi-entry
    /// transaction. `None` for standalone operations and DDL.
    pub tid: Option<u64>,
    /// Kind-specific body: document fields for document kinds, a
    /// definition object for DDL kinds.
    pub data: serde_json::Value,
}

impl LogEntry {
    /// Document key from the payload (`_key` field), for document kinds.
    pub fn document_key(&self) -> Option<&str> {
        self.data.get("_key").and_then(|v| v.as_str())
    }

    /// Whether the entry targets a system collection.
    pub fn is_system_collection(&self) -> bool {
        self.collection
            .as_deref()
            .is_some_and(|c| c.starts_with(SYSTEM_COLLECTION_PREFIX))
    }

    /// Raw JSON of this entry, truncated for diagnostics.
    ///
    /// The cut lands on a char boundary; payloads are raw UTF-8, not
    /// ASCII-escaped.
    pub fn raw_truncated(&self, max: usize) -> String {
        let raw = serde_json::to_string(&RawEntry::from(self)).unwrap_or_default();
        if raw.len() <= max {
            return raw;
        }
        let mut cut = max;
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &raw[..cut])
    }
}

/// Serde shape of one wire line.
#[derive(Debug, Serialize, Deserialize)]
struct RawEntry {
    #[serde(deserialize_with = "de_u64_str", serialize_with = "ser_u64_str")]
    tick: u64,
    #[serde(rename = "type")]
    kind: MarkerKind,
    #[serde(default)]
    db: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cuid: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_u64_str",
        serialize_with = "ser_opt_u64_str",
        skip_serializing_if = "Option::is_none"
    )]
    tid: Option<u64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    data: serde_json::Value,
}

impl From<&LogEntry> for RawEntry {
    fn from(e: &LogEntry) -> Self {
        Self {
            tick: e.tick,
            kind: e.kind,
            db: e.database.clone(),
            cuid: e.collection.clone(),
            tid: e.tid,
            data: e.data.clone(),
        }
    }
}

impl From<RawEntry> for LogEntry {
    fn from(raw: RawEntry) -> Self {
        Self {
            tick: raw.tick,
            kind: raw.kind,
            database: raw.db,
            collection: raw.cuid,
            tid: raw.tid,
            data: raw.data,
        }
    }
}

/// Decode one line of a batch body.
pub fn decode_entry(line: &[u8]) -> Result<LogEntry> {
    let raw: RawEntry = serde_json::from_slice(line).map_err(|e| {
        // Distinguish "unknown kind" from generally malformed JSON: the
        // former is a protocol-level invariant, not a parse hiccup.
        let msg = e.to_string();
        if msg.contains("unknown variant") {
            ApplierError::UnexpectedMarkerKind {
                kind: unknown_variant_name(&msg),
            }
        } else {
            ApplierError::InvalidResponse(format!("malformed log entry: {}", msg))
        }
    })?;
    Ok(raw.into())
}

/// Decode a full batch body into ordered entries.
///
/// Empty lines and the trailing NUL sentinel are skipped. Order is the
/// leader's order; it is preserved exactly.
pub fn decode_batch_body(body: &[u8]) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for line in body.split(|&b| b == b'\n') {
        let line = trim_sentinel(line);
        if line.is_empty() {
            continue;
        }
        entries.push(decode_entry(line)?);
    }
    Ok(entries)
}

fn trim_sentinel(line: &[u8]) -> &[u8] {
    let line = match line.last() {
        Some(&b'\r') => &line[..line.len() - 1],
        _ => line,
    };
    match line.last() {
        Some(&BODY_SENTINEL) => &line[..line.len() - 1],
        _ => line,
    }
}

/// Pull the variant name out of serde's "unknown variant `x`, expected ..."
/// message.
fn unknown_variant_name(msg: &str) -> String {
    msg.split('`')
        .nth(1)
        .unwrap_or("unknown")
        .to_string()
}

fn de_u64_str<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    de_opt_u64_str(deserializer)?
        .ok_or_else(|| de::Error::custom("expected u64 or decimal string, got null"))
}

/// 64-bit values arrive as decimal strings (JSON numbers lose precision
/// past 2^53 in some producers); plain numbers are accepted too.
fn de_opt_u64_str<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    match Option::<NumOrStr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid u64 string: {:?}", s))),
    }
}

fn ser_u64_str<S: serde::Serializer>(v: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&v.to_string())
}

fn ser_opt_u64_str<S: serde::Serializer>(
    v: &Option<u64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match v {
        Some(v) => serializer.serialize_str(&v.to_string()),
        None => serializer.serialize_none(),
    }
}
