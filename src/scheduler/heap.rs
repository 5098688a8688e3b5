use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Array-backed binary max-heap with a comparator supplied at construction.
///
/// Every item is stored under a key; the heap keeps track of each key's
/// position so an item can be mutated in place and re-sifted with [`fix`].
/// The item the comparator ranks greatest is popped first.
///
/// [`fix`]: PriorityHeap::fix
pub struct PriorityHeap<K, T> {
    items: Vec<(K, T)>,
    positions: HashMap<K, usize>,
    compare: Comparator<T>,
}

impl<K, T> fmt::Debug for PriorityHeap<K, T>
where
    K: fmt::Debug,
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityHeap")
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

impl<K, T> PriorityHeap<K, T>
where
    K: Eq + Hash + Clone,
{
    pub fn new<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
            compare: Box::new(compare),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first().map(|(_, item)| item)
    }

    /// Insert `item` under `key`. An item already stored under the same key
    /// is replaced and returned.
    pub fn push(&mut self, key: K, item: T) -> Option<T> {
        if let Some(&pos) = self.positions.get(&key) {
            let old = std::mem::replace(&mut self.items[pos].1, item);
            self.restore(pos);
            return Some(old);
        }
        let pos = self.items.len();
        self.positions.insert(key.clone(), pos);
        self.items.push((key, item));
        self.sift_up(pos);
        None
    }

    /// Remove and return the greatest item.
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.swap(0, last);
        let (key, item) = self.items.pop()?;
        self.positions.remove(&key);
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        Some(item)
    }

    /// Mutate the item stored under `key` and restore heap order.
    /// Returns false if no such item is queued.
    pub fn fix<F>(&mut self, key: &K, mutate: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let Some(&pos) = self.positions.get(key) else {
            return false;
        };
        mutate(&mut self.items[pos].1);
        self.restore(pos);
        true
    }

    fn restore(&mut self, pos: usize) {
        let pos = self.sift_up(pos);
        self.sift_down(pos);
    }

    fn greater(&self, a: usize, b: usize) -> bool {
        (self.compare)(&self.items[a].1, &self.items[b].1) == Ordering::Greater
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.items.swap(a, b);
        self.positions.insert(self.items[a].0.clone(), a);
        self.positions.insert(self.items[b].0.clone(), b);
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.greater(pos, parent) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut largest = pos;
            if left < len && self.greater(left, largest) {
                largest = left;
            }
            if right < len && self.greater(right, largest) {
                largest = right;
            }
            if largest == pos {
                break;
            }
            self.swap(pos, largest);
            pos = largest;
        }
    }
}
