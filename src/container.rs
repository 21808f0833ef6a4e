use std::fmt::Debug;

/// A typed record stored in a tag container.
///
/// Terminology varies by format: FLAC calls these blocks, ID3 frames, and APE items. Every
/// record knows its kind discriminant and its external length in bytes.
pub trait Record {
    /// The kind discriminant distinguishing record types within one container format.
    type Kind: PartialEq + Debug;

    /// Returns the kind of the record.
    fn kind(&self) -> Self::Kind;

    /// Returns the external length of the record in bytes, including its header.
    fn len(&self) -> u64;
}

/// An ordered, mutable sequence of records shared by all container formats.
///
/// The concrete containers embed one of these and delegate to it, layering their own ordering
/// and uniqueness rules on top.
#[derive(Clone, Debug, PartialEq)]
pub struct TagContainer<R: Record> {
    records: Vec<R>,
    /// The exact on-disk byte length of the structure as last read.
    ///
    /// Used only to compute update deltas. This becomes stale if the same container is reused
    /// to update two different files; it is not revalidated automatically.
    pub origin_length: Option<u64>,
}

impl<R: Record> Default for TagContainer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> TagContainer<R> {
    /// Creates a new empty container.
    pub fn new() -> Self {
        Self { records: Vec::new(), origin_length: None }
    }

    /// Returns the records in order.
    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Returns a mutable reference to the records.
    pub fn records_mut(&mut self) -> &mut Vec<R> {
        &mut self.records
    }

    /// Consumes the container, returning the records.
    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    /// Appends a record at the end.
    pub fn push(&mut self, record: R) {
        self.records.push(record);
    }

    /// Inserts a record at its canonical position according to the rank function.
    ///
    /// The record lands after the last existing record of equal or lower rank, so repeated
    /// inserts of equally ranked records preserve their relative order.
    pub fn insert_ranked(&mut self, record: R, rank: impl Fn(R::Kind) -> u8) {
        let r = rank(record.kind());
        let idx = self
            .records
            .iter()
            .rposition(|other| rank(other.kind()) <= r)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.records.insert(idx, record);
    }

    /// Returns the first record of the kind, if present.
    pub fn get_first(&self, kind: &R::Kind) -> Option<&R> {
        self.records.iter().find(|r| r.kind() == *kind)
    }

    /// Returns a mutable reference to the first record of the kind, if present.
    pub fn get_first_mut(&mut self, kind: &R::Kind) -> Option<&mut R> {
        self.records.iter_mut().find(|r| r.kind() == *kind)
    }

    /// Returns all records of the kind in order.
    pub fn get_all<'a>(&'a self, kind: &'a R::Kind) -> impl Iterator<Item = &'a R> {
        self.records.iter().filter(move |r| r.kind() == *kind)
    }

    /// Removes every record of the kind, returning the number removed. Removing an absent kind
    /// is a no-op.
    pub fn remove(&mut self, kind: &R::Kind) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.kind() != *kind);
        before - self.records.len()
    }

    /// Removes every record matching the predicate. Matching nothing is a no-op.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&R) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !pred(r));
        before - self.records.len()
    }

    /// Removes every record of the kind and reinserts the new records at the position of the
    /// first removed one, preserving the surrounding order. If there are more new records than
    /// were removed, the extras are inserted through `add`; if no record of the kind existed,
    /// all new records are.
    pub fn replace_all(
        &mut self,
        kind: &R::Kind,
        new_records: Vec<R>,
        mut add: impl FnMut(&mut Self, R),
    ) {
        let first = self.records.iter().position(|r| r.kind() == *kind);
        let removed = self.remove(kind);

        match first {
            Some(idx) => {
                let in_place = new_records.len().min(removed);
                let mut iter = new_records.into_iter();
                for (offset, record) in iter.by_ref().take(in_place).enumerate() {
                    self.records.insert(idx + offset, record);
                }
                for record in iter {
                    add(self, record);
                }
            }
            None => {
                for record in new_records {
                    add(self, record);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Rec(u8, &'static str);

    impl Record for Rec {
        type Kind = u8;

        fn kind(&self) -> u8 {
            self.0
        }

        fn len(&self) -> u64 {
            self.1.len() as u64
        }
    }

    #[test]
    fn ranked_insert_keeps_relative_order() {
        let mut c = TagContainer::new();
        let rank = |k: u8| k;
        c.insert_ranked(Rec(2, "a"), rank);
        c.insert_ranked(Rec(1, "b"), rank);
        c.insert_ranked(Rec(2, "c"), rank);
        c.insert_ranked(Rec(0, "d"), rank);

        let order: Vec<_> = c.records().iter().map(|r| r.1).collect();
        assert_eq!(order, ["d", "b", "a", "c"]);
    }

    #[test]
    fn replace_all_reinserts_at_first_position() {
        let mut c = TagContainer::new();
        c.push(Rec(1, "a"));
        c.push(Rec(2, "b"));
        c.push(Rec(1, "c"));
        c.push(Rec(3, "d"));

        c.replace_all(&1, vec![Rec(1, "x"), Rec(1, "y"), Rec(1, "z")], TagContainer::push);

        let order: Vec<_> = c.records().iter().map(|r| r.1).collect();
        assert_eq!(order, ["x", "y", "b", "d", "z"]);
    }

    #[test]
    fn replace_all_without_existing_records_appends() {
        let mut c = TagContainer::new();
        c.push(Rec(2, "b"));

        c.replace_all(&1, vec![Rec(1, "x")], TagContainer::push);

        let order: Vec<_> = c.records().iter().map(|r| r.1).collect();
        assert_eq!(order, ["b", "x"]);
    }

    #[test]
    fn remove_is_noop_safe() {
        let mut c: TagContainer<Rec> = TagContainer::new();
        assert_eq!(c.remove(&7), 0);
    }
}
