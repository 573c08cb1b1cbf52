//! Blocking work queue with completion tracking

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Item handed to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Process this row index
    Row(usize),
    /// Exit the worker loop
    Stop,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    unfinished: usize,
}

/// FIFO queue shared by the workers of one batch
///
/// Every pushed item counts as unfinished until a worker calls
/// [`WorkQueue::task_done`]; [`WorkQueue::join`] blocks until that count
/// reaches zero.
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    finished: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            available: Condvar::new(),
            finished: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        let mut state = self.lock();
        state.items.push_back(item);
        state.unfinished += 1;
        self.available.notify_one();
    }

    /// Take the next item, blocking while the queue is empty
    pub fn pop(&self) -> T {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            state = self.available.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Take the next item if there is one
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Mark one popped item as finished
    pub fn task_done(&self) {
        let mut state = self.lock();
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.finished.notify_all();
        }
    }

    /// Block until every pushed item has been marked finished
    pub fn join(&self) {
        let mut state = self.lock();
        while state.unfinished > 0 {
            state = self.finished.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Items pushed but not yet marked finished
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push(Job::Row(2));
        queue.push(Job::Row(3));
        queue.push(Job::Stop);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Job::Row(2));
        assert_eq!(queue.pop(), Job::Row(3));
        assert_eq!(queue.try_pop(), Some(Job::Stop));
        assert_eq!(queue.try_pop(), None);
        assert_eq!(queue.unfinished(), 3);
    }

    #[test]
    fn test_join_waits_for_task_done() {
        let queue = Arc::new(WorkQueue::new());
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..20 {
            queue.push(Job::Row(i));
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            let done = done.clone();
            handles.push(thread::spawn(move || {
                loop {
                    match queue.pop() {
                        Job::Row(_) => {
                            done.fetch_add(1, Ordering::SeqCst);
                            queue.task_done();
                        }
                        Job::Stop => {
                            queue.task_done();
                            break;
                        }
                    }
                }
            }));
        }

        queue.join();
        assert_eq!(done.load(Ordering::SeqCst), 20);

        for _ in 0..4 {
            queue.push(Job::Stop);
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(queue.is_empty());
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn test_join_on_empty_queue_returns() {
        let queue: WorkQueue<Job> = WorkQueue::new();
        queue.join();
        queue.task_done();
        assert_eq!(queue.unfinished(), 0);
    }
}
