use std::collections::VecDeque;

use crate::Document;

/// Documents of one namespace in natural (insertion) order
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    docs: VecDeque<Document>,
    /// Maximum document count for capped collections
    capacity: Option<usize>,
    /// Documents rotated out of a capped collection
    evicted: u64,
}

impl Collection {
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            name: name.into(),
            docs: VecDeque::new(),
            capacity,
            evicted: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_capped(&self) -> bool {
        self.capacity.is_some()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, Document> {
        self.docs.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::collections::vec_deque::IterMut<'_, Document> {
        self.docs.iter_mut()
    }

    /// Append a document, rotating the oldest out of a full capped collection
    pub fn push(&mut self, doc: Document) {
        self.docs.push_back(doc);
        if let Some(cap) = self.capacity {
            while self.docs.len() > cap {
                self.docs.pop_front();
                self.evicted += 1;
            }
        }
    }

    /// Keep only documents for which `keep` holds, returning how many were dropped
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&Document) -> bool) -> usize {
        let before = self.docs.len();
        self.docs.retain(|d| keep(d));
        before - self.docs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(n: i64) -> Document {
        json!({ "n": n }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_uncapped_keeps_everything() {
        let mut coll = Collection::new("test.c", None);
        for n in 0..10 {
            coll.push(doc(n));
        }
        assert_eq!(coll.len(), 10);
        assert_eq!(coll.evicted(), 0);
    }

    #[test]
    fn test_capped_rotates_oldest() {
        let mut coll = Collection::new("test.c", Some(3));
        for n in 0..5 {
            coll.push(doc(n));
        }
        let kept: Vec<_> = coll.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(coll.evicted(), 2);
    }

    #[test]
    fn test_retain_counts_removed() {
        let mut coll = Collection::new("test.c", None);
        for n in 0..6 {
            coll.push(doc(n));
        }
        let removed = coll.retain(|d| d["n"].as_i64().unwrap() % 2 == 0);
        assert_eq!(removed, 3);
        assert_eq!(coll.len(), 3);
    }
}
