// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The ranked union of table layers
//!
//! An overlay presents `N` sub-tables as one ordered view, with lower-indexed
//! tables taking priority: an entry shadows every equal-keyed entry in less
//! important tables, *including* tombstones, which is what makes deletion
//! work across layered snapshots. The merge cursor walks all sub-cursors in
//! either direction; shadowed candidates are marked and consumed without ever
//! being surfaced, and direction reversals re-prime the sub-cursors so that a
//! forward walk and a backward walk yield exactly reversed sequences.

use crate::{
    dtable::{Cursor, DTable, Lookup, Presence, ValueMeta},
    dtype::{BlobComparator, KeyType},
    Blob, Dtype,
};
use std::{cmp::Ordering, sync::Arc};

/// Ranked union over sub-tables; index 0 has the highest priority
pub struct OverlayDTable {
    tables: Vec<Box<dyn DTable>>,
    key_type: KeyType,
    blob_cmp: Option<Arc<dyn BlobComparator>>,
}

impl OverlayDTable {
    /// Stacks `tables` into one view.
    ///
    /// All sub-tables must share one key type. The comparator of the first
    /// sub-table is adopted for the merge.
    ///
    /// # Panics
    ///
    /// Panics if `tables` is empty.
    pub fn new(tables: Vec<Box<dyn DTable>>) -> crate::Result<Self> {
        assert!(!tables.is_empty(), "an overlay needs at least one sub-table");

        #[allow(clippy::indexing_slicing)]
        let key_type = tables[0].key_type();

        if tables.iter().any(|table| table.key_type() != key_type) {
            return Err(crate::Error::KeyTypeMismatch);
        }

        #[allow(clippy::indexing_slicing)]
        let blob_cmp = tables[0].blob_cmp();

        Ok(Self {
            tables,
            key_type,
            blob_cmp,
        })
    }

    /// Hands the sub-tables back, e.g. for restacking after a flush.
    #[must_use]
    pub fn into_tables(self) -> Vec<Box<dyn DTable>> {
        self.tables
    }
}

impl DTable for OverlayDTable {
    fn iter(&self) -> Box<dyn Cursor + '_> {
        Box::new(OverlayCursor::new(self))
    }

    fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Total entry count across sub-tables; shadowed duplicates are counted.
    fn len(&self) -> usize {
        self.tables.iter().map(|table| table.len()).sum()
    }

    fn lookup(&self, key: &Dtype) -> crate::Result<Lookup> {
        // priority order; the first table that knows the key decides,
        // even when its answer is a tombstone
        for table in &self.tables {
            let result = table.lookup(key)?;
            if result.found() {
                return Ok(result);
            }
        }

        Ok(Lookup::Absent)
    }

    fn present(&self, key: &Dtype) -> crate::Result<Presence> {
        for table in &self.tables {
            let result = table.present(key)?;
            if result.found() {
                return Ok(result);
            }
        }

        Ok(Presence::Absent)
    }

    fn set_blob_cmp(&mut self, cmp: Arc<dyn BlobComparator>) -> crate::Result<()> {
        for table in &mut self.tables {
            table.set_blob_cmp(cmp.clone())?;
        }

        self.blob_cmp = Some(cmp);
        Ok(())
    }

    fn blob_cmp(&self) -> Option<Arc<dyn BlobComparator>> {
        self.blob_cmp.clone()
    }
}

/// Per-slot merge state
///
/// `empty` marks a slot that must refetch its candidate from the sub-cursor
/// before it can compete again; `shadow` marks a candidate dominated by a
/// higher-priority slot at the current merge step.
struct Sub<'a> {
    cursor: Box<dyn Cursor + 'a>,
    key: Option<Dtype>,
    valid: bool,
    empty: bool,
    shadow: bool,
}

impl Sub<'_> {
    /// Adopts the sub-cursor's current position as the slot candidate.
    fn prime(&mut self) {
        self.valid = self.cursor.valid();
        self.empty = !self.valid;
        self.key = self.valid.then(|| self.cursor.key());
        self.shadow = false;
    }
}

/// Traversal state; `AtBegin` encodes "one step before the first entry",
/// reached by stepping backward past the beginning.
#[derive(Copy, Clone, Eq, PartialEq)]
enum Direction {
    AtBegin,
    Forward,
    Backward,
}

struct OverlayCursor<'a> {
    table: &'a OverlayDTable,
    subs: Vec<Sub<'a>>,
    current: Option<usize>,
    direction: Direction,
}

impl<'a> OverlayCursor<'a> {
    fn new(table: &'a OverlayDTable) -> Self {
        let subs = table
            .tables
            .iter()
            .map(|sub_table| {
                let mut sub = Sub {
                    cursor: sub_table.iter(),
                    key: None,
                    valid: false,
                    empty: true,
                    shadow: false,
                };
                sub.prime();
                sub
            })
            .collect();

        let mut cursor = Self {
            table,
            subs,
            current: None,
            direction: Direction::Forward,
        };

        // position at the first entry; every slot is already primed,
        // so the first merge step cannot touch the sub-cursors
        #[allow(clippy::expect_used)]
        cursor
            .step_forward()
            .expect("primed merge step does not advance sub-cursors");
        cursor
    }

    /// Direction flip after backward traversal.
    ///
    /// A slot that exhausted backward has its sub-cursor parked on the first
    /// entry, which is exactly the candidate to re-adopt. Any other slot is
    /// sitting on a key at or before the merge position, so it must step
    /// forward before competing again.
    fn flip_forward(&mut self) {
        for sub in &mut self.subs {
            debug_assert!(sub.empty || sub.valid);

            if sub.empty && !sub.valid {
                sub.prime();
            } else {
                sub.empty = true;
                sub.valid = true;
                sub.shadow = false;
            }
        }
    }

    /// Direction flip after forward traversal: every sub-cursor sits at or
    /// after the merge position, so every slot refetches backward.
    fn flip_backward(&mut self) {
        for sub in &mut self.subs {
            debug_assert!(sub.empty || sub.valid);

            sub.empty = true;
            sub.valid = true;
            sub.shadow = false;
        }
    }

    fn step_forward(&mut self) -> crate::Result<bool> {
        let blob_cmp = self.table.blob_cmp.as_deref();
        let mut winner: Option<(usize, Dtype)> = None;

        // stepping forward off the end leaves the cursor invalid; a failed
        // *backward* step instead stays parked on the first entry
        self.current = None;

        for i in 0..self.subs.len() {
            #[allow(clippy::indexing_slicing)]
            let sub = &mut self.subs[i];

            if sub.empty && sub.valid {
                sub.valid = sub.cursor.next()?;
                sub.empty = !sub.valid;
                if sub.valid {
                    sub.key = Some(sub.cursor.key());
                }
            }

            if !sub.valid || sub.shadow {
                continue;
            }

            #[allow(clippy::expect_used)]
            let key = sub.key.clone().expect("non-empty slot has a key");

            match &winner {
                None => winner = Some((i, key)),
                Some((_, min_key)) => match key.compare(min_key, blob_cmp) {
                    Ordering::Less => winner = Some((i, key)),
                    Ordering::Equal => sub.shadow = true,
                    Ordering::Greater => {}
                },
            }
        }

        self.settle(winner)
    }

    fn step_backward(&mut self) -> crate::Result<bool> {
        let blob_cmp = self.table.blob_cmp.as_deref();
        let mut winner: Option<(usize, Dtype)> = None;

        for i in 0..self.subs.len() {
            #[allow(clippy::indexing_slicing)]
            let sub = &mut self.subs[i];

            if sub.empty && sub.valid {
                sub.valid = sub.cursor.prev()?;
                sub.empty = !sub.valid;
                if sub.valid {
                    sub.key = Some(sub.cursor.key());
                }
            }

            if !sub.valid || sub.shadow {
                continue;
            }

            #[allow(clippy::expect_used)]
            let key = sub.key.clone().expect("non-empty slot has a key");

            match &winner {
                None => winner = Some((i, key)),
                Some((_, max_key)) => match key.compare(max_key, blob_cmp) {
                    Ordering::Greater => winner = Some((i, key)),
                    Ordering::Equal => sub.shadow = true,
                    Ordering::Less => {}
                },
            }
        }

        if winner.is_none() {
            // stepped past the beginning; the next forward step must return
            // the first entry again, not the second
            self.direction = Direction::AtBegin;
        }

        self.settle(winner)
    }

    /// Consumes the winning slot and every candidate it shadowed.
    fn settle(&mut self, winner: Option<(usize, Dtype)>) -> crate::Result<bool> {
        let Some((index, _)) = winner else {
            return Ok(false);
        };

        self.current = Some(index);

        #[allow(clippy::indexing_slicing)]
        {
            self.subs[index].empty = true;
        }

        #[allow(clippy::indexing_slicing)]
        for sub in &mut self.subs[index + 1..] {
            if sub.shadow {
                sub.empty = true;
                sub.shadow = false;
            }
        }

        Ok(true)
    }

    #[allow(clippy::expect_used, clippy::indexing_slicing)]
    fn winning_sub(&self) -> &Sub<'a> {
        &self.subs[self.current.expect("cursor is not valid")]
    }
}

impl Cursor for OverlayCursor<'_> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> crate::Result<bool> {
        match self.direction {
            Direction::Forward => {}
            Direction::Backward => {
                self.flip_forward();
                self.direction = Direction::Forward;
            }
            Direction::AtBegin => {
                self.flip_forward();
                self.direction = Direction::Forward;

                // we conceptually sit on the first entry: consume it so the
                // step below surfaces its successor
                self.step_forward()?;
            }
        }

        self.step_forward()
    }

    fn prev(&mut self) -> crate::Result<bool> {
        match self.direction {
            Direction::Backward => {}
            // still before the first entry
            Direction::AtBegin => return self.step_backward(),
            Direction::Forward => {
                self.flip_backward();
                self.direction = Direction::Backward;
            }
        }

        self.step_backward()
    }

    fn first(&mut self) -> crate::Result<bool> {
        for sub in &mut self.subs {
            sub.cursor.first()?;
            sub.prime();
        }

        self.direction = Direction::Forward;
        self.step_forward()
    }

    fn last(&mut self) -> crate::Result<bool> {
        for sub in &mut self.subs {
            // park past the end so the backward step lands on the maximum
            if sub.cursor.last()? {
                sub.cursor.next()?;
            }
            sub.valid = false;
            sub.empty = true;
            sub.shadow = false;
            sub.key = None;
        }

        self.direction = Direction::Forward;
        self.prev()
    }

    #[allow(clippy::expect_used)]
    fn key(&self) -> Dtype {
        self.winning_sub()
            .key
            .clone()
            .expect("winning slot has a key")
    }

    fn value(&self) -> crate::Result<Option<Blob>> {
        self.winning_sub().cursor.value()
    }

    fn meta(&self) -> crate::Result<ValueMeta> {
        self.winning_sub().cursor.meta()
    }

    fn seek(&mut self, key: &Dtype) -> crate::Result<bool> {
        let mut found = false;

        for sub in &mut self.subs {
            if sub.cursor.seek(key)? {
                found = true;
            }
            sub.prime();
        }

        self.direction = Direction::Forward;
        self.step_forward()?;
        Ok(found)
    }

    fn seek_by(&mut self, test: &dyn Fn(&Dtype) -> Ordering) -> crate::Result<bool> {
        let mut found = false;

        for sub in &mut self.subs {
            if sub.cursor.seek_by(test)? {
                found = true;
            }
            sub.prime();
        }

        self.direction = Direction::Forward;
        self.step_forward()?;
        Ok(found)
    }

    fn key_type(&self) -> KeyType {
        self.table.key_type
    }

    /// The leaf the current entry actually lives in.
    fn source(&self) -> &dyn DTable {
        self.winning_sub().cursor.source()
    }
}
