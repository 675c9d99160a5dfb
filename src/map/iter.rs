//! Iteration over map entries

use super::table::ShmMap;
use crate::{layout::Bucket, offset::Offset};

/// Borrowing iterator over `(key, value)` pairs
///
/// Visits buckets in index order and each chain from head to tail. A damaged
/// chain is logged and ends the iteration early; use
/// [`ShmMap::for_each`] to get the error instead.
#[derive(Debug)]
pub struct Iter<'a> {
    map: &'a ShmMap,
    bucket: usize,
    current: Bucket,
    next: Offset,
    steps: i32,
    done: bool,
}

impl<'a> Iter<'a> {
    pub(super) fn new(map: &'a ShmMap) -> Self {
        Self {
            map,
            bucket: 0,
            current: Bucket::EMPTY,
            next: Offset::NIL,
            steps: 0,
            done: false,
        }
    }

    /// Next entry offset, moving on to later buckets as chains run out
    fn advance(&mut self) -> crate::Result<Option<(&'a str, &'a str)>> {
        let map = self.map;
        while self.next.is_nil() {
            if self.bucket >= map.bucket_count() {
                return Ok(None);
            }
            self.current = map.read_bucket(self.bucket)?;
            self.next = self.current.head;
            self.steps = 0;
            self.bucket += 1;
        }

        self.steps += 1;
        map.check_chain(self.bucket - 1, self.steps, &self.current)?;
        let entry = map.read_entry(self.next)?;
        self.next = entry.next;
        Ok(Some((map.read_text(entry.key)?, map.read_text(entry.value)?)))
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(pair)) => Some(pair),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(_) => {
                // already logged where it was detected
                self.done = true;
                None
            }
        }
    }
}

impl std::iter::FusedIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a ShmMap {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
