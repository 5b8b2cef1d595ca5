use std::{
    borrow::Borrow,
    collections::{HashSet, VecDeque},
    hash::Hash,
    pin::pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::Notify;

use self::rate_limiter::ExponentialBackoff;

pub mod rate_limiter;

/// A deduplicating, rate-limited work queue shared by any number of workers.
///
/// An item is never handed to two workers at once: adding an item that is
/// already queued is a no-op, and adding an item that is being processed
/// marks it dirty so it gets queued again once [`WorkQueue::done`] is called.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    rate_limiter: ExponentialBackoff<T>,
}

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

impl<T> WorkQueue<T>
where
    T: Hash + Eq + Clone + Send + 'static,
{
    pub fn new(rate_limiter: ExponentialBackoff<T>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            rate_limiter,
        }
    }

    pub fn add(&self, item: T) {
        let mut state = self.lock();

        if state.shutting_down || !state.dirty.insert(item.clone()) {
            return;
        }

        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        drop(state);

        self.notify.notify_one();
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// shut down and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();

                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());

                    return Some(item);
                }

                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks `item` as no longer being processed, queueing it again if it
    /// was added in the meantime.
    pub fn done<Q>(&self, item: &Q)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.lock();

        state.processing.remove(item);

        if let Some(dirty) = state.dirty.get(item).cloned() {
            state.queue.push_back(dirty);
            drop(state);

            self.notify.notify_one();
        }
    }

    pub fn forget<Q>(&self, item: &Q)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.rate_limiter.forget(item);
    }

    pub fn num_requeues<Q>(&self, item: &Q) -> u32
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.rate_limiter.num_requeues(item)
    }

    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.rate_limiter.when(&item);

        self.add_after(item, delay);
    }

    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let queue = Arc::downgrade(self);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Some(queue) = queue.upgrade() {
                queue.add(item);
            }
        });
    }

    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Hash + Eq + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{rate_limiter::ExponentialBackoff, WorkQueue};

    #[tokio::test]
    async fn queued_items_are_deduplicated() {
        let queue = WorkQueue::<String>::default();

        queue.add("worker-1".to_owned());
        queue.add("worker-1".to_owned());
        queue.add("worker-2".to_owned());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("worker-1"));
        assert_eq!(queue.get().await.as_deref(), Some("worker-2"));
    }

    #[tokio::test]
    async fn items_added_while_processing_are_requeued_on_done() {
        let queue = WorkQueue::<String>::default();

        queue.add("worker-1".to_owned());
        let item = queue.get().await.unwrap();

        queue.add("worker-1".to_owned());
        queue.add("worker-1".to_owned());
        assert!(queue.is_empty());

        queue.done(&item);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn shutdown_drains_before_stopping_workers() {
        let queue = WorkQueue::<String>::default();

        queue.add("worker-1".to_owned());
        queue.shut_down();
        queue.add("worker-2".to_owned());

        assert_eq!(queue.get().await.as_deref(), Some("worker-1"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_workers() {
        let queue = Arc::new(WorkQueue::<String>::default());
        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });

        tokio::task::yield_now().await;
        queue.shut_down();

        assert_eq!(worker.await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocked_workers_receive_new_items() {
        let queue = Arc::new(WorkQueue::<String>::default());
        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });

        tokio::task::yield_now().await;
        queue.add("worker-1".to_owned());

        assert_eq!(worker.await.unwrap().as_deref(), Some("worker-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_items_come_back_after_the_backoff() {
        let queue = Arc::new(WorkQueue::new(ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
        )));

        queue.add_rate_limited("worker-1".to_owned());
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.num_requeues("worker-1"), 1);

        queue.forget("worker-1");
        assert_eq!(queue.num_requeues("worker-1"), 0);
    }
}
