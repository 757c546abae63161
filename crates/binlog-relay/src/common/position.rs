//! # Position Set
//!
//! Per-source interval set of processed transaction sequence numbers (GNOs).
//!
//! Each replication source (identified by a 16-byte [`Sid`]) owns a sorted
//! list of disjoint, non-adjacent closed [`Interval`]s. Inserting a GNO
//! either extends a neighbouring interval, creates a singleton, or is a
//! no-op when already covered; neighbours are then coalesced so the list
//! stays minimal.
//!
//! ## Textual encoding
//!
//! ```text
//! 3fa85f64-5717-4562-b3fc-2c963f66afa6:1-4:6-8,9b2e5f1a-0000-4000-8000-000000000001:1-20
//! ```
//!
//! Sources are sorted by their dashed hex form and joined by `,`; each
//! interval is `:<from>-<to>`. The empty set encodes as the empty string.
//!
//! ```rust
//! use binlog_relay::common::{PositionSet, Sid};
//!
//! let sid: Sid = "3fa85f64-5717-4562-b3fc-2c963f66afa6".parse().unwrap();
//! let mut set = PositionSet::new();
//! for gno in [1, 2, 3, 4, 6, 7, 8] {
//!     set.add(sid, gno);
//! }
//! assert_eq!(set.to_string(), "3fa85f64-5717-4562-b3fc-2c963f66afa6:1-4:6-8");
//!
//! set.add(sid, 5);
//! assert_eq!(set.to_string(), "3fa85f64-5717-4562-b3fc-2c963f66afa6:1-8");
//! ```

use crate::common::{CdcError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Replication source identifier (the server UUID of a GTID).
///
/// Ordering is byte order, which matches the ordering of the lower-case
/// dashed hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sid([u8; 16]);

impl Sid {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from_bytes(self.0).hyphenated(), f)
    }
}

impl FromStr for Sid {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(|uuid| Self(uuid.into_bytes()))
            .map_err(|e| CdcError::decode(format!("invalid source id '{}': {}", s, e)))
    }
}

/// Closed range `[from, to]` of consecutive GNOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub from: i64,
    pub to: i64,
}

impl Interval {
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from > to {
            return Err(CdcError::decode(format!(
                "inverted interval {}-{}",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    pub const fn single(gno: i64) -> Self {
        Self { from: gno, to: gno }
    }

    pub fn contains(&self, gno: i64) -> bool {
        self.from <= gno && gno <= self.to
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// One committed transaction's place in its source's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionMarker {
    pub sid: Sid,
    pub gno: i64,
}

impl PositionMarker {
    pub fn new(sid: Sid, gno: i64) -> Self {
        Self { sid, gno }
    }
}

impl fmt::Display for PositionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sid, self.gno)
    }
}

/// Where a GNO falls relative to a source's interval list.
enum Slot {
    /// Already covered by the interval at this index
    Covered,
    /// Directly follows the interval at this index
    Extends(usize),
    /// Needs a new singleton inserted at this index
    Insert(usize),
}

/// Set of processed GNOs, per source.
///
/// Sources are created lazily on first insertion and never hold an empty
/// interval list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionSet {
    sources: BTreeMap<Sid, Vec<Interval>>,
}

impl PositionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `gno` as processed for `sid`.
    ///
    /// Returns `false` when `gno` was already covered, in which case the set
    /// is left untouched.
    pub fn add(&mut self, sid: Sid, gno: i64) -> bool {
        let intervals = self.sources.entry(sid).or_default();

        let index = match locate(intervals, gno) {
            Slot::Covered => return false,
            Slot::Extends(index) => {
                intervals[index].to = gno;
                index
            }
            Slot::Insert(index) => {
                intervals.insert(index, Interval::single(gno));
                index
            }
        };

        coalesce_forward(intervals, index);
        true
    }

    /// Record a position marker as processed.
    pub fn add_marker(&mut self, marker: PositionMarker) -> bool {
        self.add(marker.sid, marker.gno)
    }

    /// Merge a whole closed range into the set.
    ///
    /// Unlike [`add`](Self::add) this may absorb any number of existing
    /// intervals, so every interval touched by the range is folded into one.
    pub fn add_interval(&mut self, sid: Sid, interval: Interval) {
        let intervals = self.sources.entry(sid).or_default();

        let start = intervals.partition_point(|iv| iv.to.saturating_add(1) < interval.from);
        let mut end = start;
        let mut merged = interval;
        while end < intervals.len() && intervals[end].from <= merged.to.saturating_add(1) {
            merged.from = merged.from.min(intervals[end].from);
            merged.to = merged.to.max(intervals[end].to);
            end += 1;
        }

        intervals.splice(start..end, [merged]);
    }

    /// Check whether `gno` has been processed for `sid`.
    pub fn contains(&self, sid: &Sid, gno: i64) -> bool {
        self.sources
            .get(sid)
            .is_some_and(|intervals| matches!(locate(intervals, gno), Slot::Covered))
    }

    /// Check whether a position marker has been processed.
    pub fn contains_marker(&self, marker: &PositionMarker) -> bool {
        self.contains(&marker.sid, marker.gno)
    }

    /// Intervals recorded for `sid`, ascending. Empty for unknown sources.
    pub fn intervals(&self, sid: &Sid) -> &[Interval] {
        self.sources.get(sid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All sources with their intervals, in canonical order.
    pub fn sources(&self) -> impl Iterator<Item = (&Sid, &[Interval])> + '_ {
        self.sources.iter().map(|(sid, list)| (sid, list.as_slice()))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Find the slot for `gno`: the first interval whose `to + 1 >= gno` is the
/// only one that can cover or be extended by it.
fn locate(intervals: &[Interval], gno: i64) -> Slot {
    let index = intervals.partition_point(|iv| iv.to.saturating_add(1) < gno);
    match intervals.get(index) {
        Some(iv) if iv.contains(gno) => Slot::Covered,
        Some(iv) if iv.to < gno => Slot::Extends(index),
        _ => Slot::Insert(index),
    }
}

/// Absorb successors into `intervals[index]` until the next one is no
/// longer adjacent or overlapping.
fn coalesce_forward(intervals: &mut Vec<Interval>, index: usize) {
    while let Some(next) = intervals.get(index + 1).copied() {
        if next.from > intervals[index].to.saturating_add(1) {
            break;
        }
        intervals[index].to = intervals[index].to.max(next.to);
        intervals.remove(index + 1);
    }
}

impl fmt::Display for PositionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (sid, intervals)) in self.sources.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", sid)?;
            for interval in intervals {
                write!(f, ":{}", interval)?;
            }
        }
        Ok(())
    }
}

impl FromStr for PositionSet {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = PositionSet::new();

        for entry in s.split(',') {
            // MySQL wraps @@gtid_executed over several lines
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let mut parts = entry.split(':');
            let sid: Sid = parts.next().unwrap_or_default().parse()?;
            for segment in parts {
                set.add_interval(sid, parse_interval(segment.trim())?);
            }
        }

        Ok(set)
    }
}

/// Parse `<from>-<to>` or a bare `<n>`. Bounds may be negative, so the
/// separator is the first `-` after the first character.
fn parse_interval(segment: &str) -> Result<Interval> {
    let parse_bound = |text: &str| {
        text.parse::<i64>()
            .map_err(|_| CdcError::decode(format!("invalid interval bound '{}'", text)))
    };

    match segment.get(1..).and_then(|rest| rest.find('-')) {
        Some(offset) => {
            let (from, to) = segment.split_at(offset + 1);
            Interval::new(parse_bound(from)?, parse_bound(&to[1..])?)
        }
        None => Ok(Interval::single(parse_bound(segment)?)),
    }
}

impl Serialize for PositionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PositionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
