//! Lock-free work queue for distributing units across parallel workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free work queue handing out items in order.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next item
/// together with its position, which the orchestrator uses to reassemble
/// results in unit order.
#[derive(Debug)]
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    pub fn new(items: Vec<S>) -> Self {
        log::debug!("{} items in work queue", items.len());
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item and its position (lock-free)
    pub fn next(&self) -> Option<(usize, &S)> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i).map(|item| (i, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn hands_out_in_order() {
        let q = WorkQueue::new(vec!['a', 'b', 'c']);
        assert_eq!(q.next(), Some((0, &'a')));
        assert_eq!(q.next(), Some((1, &'b')));
        assert_eq!(q.next(), Some((2, &'c')));
        assert_eq!(q.next(), None);
        assert_eq!(q.next(), None);
    }

    #[test]
    fn empty_queue() {
        let q: WorkQueue<i32> = WorkQueue::new(vec![]);
        assert_eq!(q.next(), None);
    }

    #[test]
    fn each_item_claimed_once_across_threads() {
        let q = WorkQueue::new((0..1000).collect::<Vec<u32>>());
        let seen = Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while let Some((pos, item)) = q.next() {
                        assert_eq!(pos as u32, *item);
                        seen.lock().unwrap().push(*item);
                    }
                });
            }
        });
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
