//! Blocking priority queue shared between producers and dispatcher threads.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use super::priority::{Priority, PriorityQueue};

pub(crate) struct BlockingQueue<T> {
    items: Mutex<PriorityQueue<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(PriorityQueue::new()),
            available: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, item: T, priority: Priority, sequence: u64) {
        let mut items = self.items.lock();
        items.push(item, priority, sequence);
        self.available.notify_one();
    }

    /// Block until an item is available or `quit` is raised.
    ///
    /// `quit` is read under the lock and `wake_all` takes the lock before
    /// notifying, so a raised flag is never missed.
    pub(crate) fn take(&self, quit: &AtomicBool) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if quit.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = items.pop() {
                return Some(item);
            }
            self.available.wait(&mut items);
        }
    }

    pub(crate) fn wake_all(&self) {
        let _items = self.items.lock();
        self.available.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn take_returns_highest_priority() {
        let queue = BlockingQueue::new();
        let quit = AtomicBool::new(false);
        queue.push(1, Priority::Low, 0);
        queue.push(2, Priority::High, 1);
        assert_eq!(queue.take(&quit), Some(2));
        assert_eq!(queue.take(&quit), Some(1));
    }

    #[test]
    fn quit_wakes_blocked_taker() {
        let queue = Arc::new(BlockingQueue::<u32>::new());
        let quit = Arc::new(AtomicBool::new(false));
        let taker = {
            let queue = queue.clone();
            let quit = quit.clone();
            thread::spawn(move || queue.take(&quit))
        };
        thread::sleep(Duration::from_millis(20));
        quit.store(true, Ordering::Release);
        queue.wake_all();
        assert_eq!(taker.join().unwrap(), None);
    }

    #[test]
    fn push_wakes_blocked_taker() {
        let queue = Arc::new(BlockingQueue::new());
        let quit = Arc::new(AtomicBool::new(false));
        let taker = {
            let queue = queue.clone();
            let quit = quit.clone();
            thread::spawn(move || queue.take(&quit))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(7, Priority::Normal, 0);
        assert_eq!(taker.join().unwrap(), Some(7));
    }

    #[test]
    fn quit_takes_precedence_over_items() {
        let queue = BlockingQueue::new();
        queue.push(1, Priority::Normal, 0);
        assert_eq!(queue.take(&AtomicBool::new(true)), None);
        assert_eq!(queue.len(), 1);
    }
}
