use crate::error::{Result, TrackingError};
use crate::types::{TimeDelta, TimeStamp, time_delta};

/// Result of a nearest-neighbour search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestTimeStamp {
    pub time_stamp: TimeStamp,
    pub index: usize,
    /// `query - time_stamp`.
    pub delta: TimeDelta,
}

/// The stored pair enclosing a query and where the query sits between them.
///
/// Outside the recorded range both ends are the nearest boundary sample and
/// `in_bounds` is false. An exact hit has `before == after`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounding {
    pub before: TimeStamp,
    pub before_index: usize,
    pub after: TimeStamp,
    pub after_index: usize,
    pub proportion: f64,
    pub in_bounds: bool,
}

/// Ascending list of time stamps with logarithmic nearest lookups.
///
/// Equidistant queries resolve to the earlier stamp. Duplicates are kept,
/// a new duplicate lands after the existing equal values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeStampsContainer {
    time_stamps: Vec<TimeStamp>,
}

impl TimeStampsContainer {
    pub fn new() -> TimeStampsContainer {
        TimeStampsContainer::default()
    }

    pub fn from_unsorted(mut time_stamps: Vec<TimeStamp>) -> TimeStampsContainer {
        time_stamps.sort_unstable();
        TimeStampsContainer { time_stamps }
    }

    /// Inserts keeping ascending order and returns the position used.
    pub fn insert(&mut self, time_stamp: TimeStamp) -> usize {
        let idx = self.insertion_index(time_stamp);
        self.time_stamps.insert(idx, time_stamp);
        idx
    }

    /// Upper bound of `time_stamp`, the slot an insert would use.
    pub(crate) fn insertion_index(&self, time_stamp: TimeStamp) -> usize {
        match self.time_stamps.last() {
            Some(last) if *last <= time_stamp => self.time_stamps.len(),
            _ => self.time_stamps.partition_point(|t| *t <= time_stamp),
        }
    }

    pub fn clear(&mut self) {
        self.time_stamps.clear();
    }

    pub fn len(&self) -> usize {
        self.time_stamps.len()
    }

    pub fn get_size(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_stamps.is_empty()
    }

    pub fn first(&self) -> Option<TimeStamp> {
        self.time_stamps.first().copied()
    }

    pub fn last(&self) -> Option<TimeStamp> {
        self.time_stamps.last().copied()
    }

    pub fn as_slice(&self) -> &[TimeStamp] {
        &self.time_stamps
    }

    pub fn iter(&self) -> impl Iterator<Item = TimeStamp> + '_ {
        self.time_stamps.iter().copied()
    }

    pub fn get_time_stamp(&self, index: usize) -> Result<TimeStamp> {
        self.time_stamps
            .get(index)
            .copied()
            .ok_or(TrackingError::IndexOutOfRange {
                index,
                len: self.time_stamps.len(),
            })
    }

    /// Index of an exact match, no tolerance.
    pub fn get_frame_number(&self, time_stamp: TimeStamp) -> Option<usize> {
        let idx = self.time_stamps.partition_point(|t| *t < time_stamp);
        match self.time_stamps.get(idx) {
            Some(t) if *t == time_stamp => Some(idx),
            _ => None,
        }
    }

    pub fn get_nearest_time_stamp(&self, query: TimeStamp) -> Result<NearestTimeStamp> {
        if self.time_stamps.is_empty() {
            return Err(TrackingError::EmptyContainer);
        }
        let idx = self.time_stamps.partition_point(|t| *t < query);
        let index = if idx == 0 {
            0
        } else if idx == self.time_stamps.len() {
            idx - 1
        } else if self.time_stamps[idx] == query {
            idx
        } else {
            let before = query - self.time_stamps[idx - 1];
            let after = self.time_stamps[idx] - query;
            if before <= after { idx - 1 } else { idx }
        };
        let time_stamp = self.time_stamps[index];
        Ok(NearestTimeStamp {
            time_stamp,
            index,
            delta: time_delta(query, time_stamp),
        })
    }

    pub fn get_bounding_time_stamps(&self, query: TimeStamp) -> Result<Bounding> {
        let (Some(first), Some(last)) = (self.first(), self.last()) else {
            return Err(TrackingError::EmptyContainer);
        };
        let boundary = |index: usize, in_bounds: bool| Bounding {
            before: self.time_stamps[index],
            before_index: index,
            after: self.time_stamps[index],
            after_index: index,
            proportion: 0.0,
            in_bounds,
        };
        if query < first {
            return Ok(boundary(0, false));
        }
        if query > last {
            return Ok(boundary(self.time_stamps.len() - 1, false));
        }
        let idx = self.time_stamps.partition_point(|t| *t < query);
        if self.time_stamps[idx] == query {
            return Ok(boundary(idx, true));
        }
        let before = self.time_stamps[idx - 1];
        let after = self.time_stamps[idx];
        Ok(Bounding {
            before,
            before_index: idx - 1,
            after,
            after_index: idx,
            proportion: (query - before) as f64 / (after - before) as f64,
            in_bounds: true,
        })
    }
}

impl FromIterator<TimeStamp> for TimeStampsContainer {
    fn from_iter<I: IntoIterator<Item = TimeStamp>>(iter: I) -> Self {
        TimeStampsContainer::from_unsorted(iter.into_iter().collect())
    }
}
