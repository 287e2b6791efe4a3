use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{BridgeError, Result};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO handed between threads, signalled with a condition variable.
///
/// Once closed, pushes fail with `Disconnected` and waiting consumers wake
/// up; items already queued can still be popped.
pub struct CommandQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(BridgeError::Disconnected);
        }
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Block until an item arrives, the queue is closed, or `timeout`
    /// elapses. `None` waits without bound.
    pub fn wait_pop(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CommandQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CommandQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn preserves_fifo_order_across_threads() {
        let queue = Arc::new(CommandQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for value in 0..100 {
                    queue.push(value).expect("push");
                }
            })
        };
        let mut seen = Vec::new();
        while seen.len() < 100 {
            if let Some(value) = queue.wait_pop(Some(Duration::from_secs(5))) {
                seen.push(value);
            } else {
                break;
            }
        }
        producer.join().expect("producer");
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn close_wakes_waiters_and_rejects_pushes() {
        let queue: Arc<CommandQueue<u8>> = Arc::new(CommandQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop(None))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(waiter.join().expect("waiter"), None);
        assert_eq!(queue.push(1), Err(BridgeError::Disconnected));
    }

    #[test]
    fn wait_pop_times_out() {
        let queue: CommandQueue<u8> = CommandQueue::new();
        let started = Instant::now();
        assert_eq!(queue.wait_pop(Some(Duration::from_millis(30))), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn drain_empties_in_order() {
        let queue = CommandQueue::new();
        queue.push("a").expect("push");
        queue.push("b").expect("push");
        assert_eq!(queue.drain(), vec!["a", "b"]);
        assert!(queue.is_empty());
    }
}
