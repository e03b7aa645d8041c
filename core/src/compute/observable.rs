use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A shared value that tasks can await until it reaches a threshold.
///
/// Cloning an `ObservableValue` yields another handle to the same value.
/// Producers call [`advance_to`](Self::advance_to) (monotonic) or
/// [`set`](Self::set); consumers either poll [`get`](Self::get), block with
/// [`wait_at_least`](Self::wait_at_least), or `.await` the future returned by
/// [`at_least`](Self::at_least).
///
/// Any number of futures may wait on the same threshold. Each registered
/// waiter is woken exactly once, when the value first reaches its threshold;
/// later updates never wake it again.
///
/// # Example
///
/// ```
/// use kiln_core::compute::ObservableValue;
///
/// let completed = ObservableValue::new(0u64);
/// let observer = completed.clone();
/// completed.advance_to(3);
/// assert_eq!(observer.get(), 3);
/// assert_eq!(observer.wait_at_least(2, None), Some(3));
/// ```
pub struct ObservableValue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    changed: Condvar,
}

struct State<T> {
    value: T,
    waiters: Vec<Waiter<T>>,
    next_waiter_id: u64,
    wakes_issued: u64,
}

struct Waiter<T> {
    id: u64,
    threshold: T,
    waker: Waker,
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Copy + Ord + fmt::Debug> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableValue")
            .field("value", &self.get())
            .finish()
    }
}

impl<T: Copy + Ord + Default> Default for ObservableValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + Ord> ObservableValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    value,
                    waiters: Vec::new(),
                    next_waiter_id: 0,
                    wakes_issued: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.shared.state.lock().value
    }

    /// Replace the value and wake every waiter whose threshold is now met.
    pub fn set(&self, value: T) {
        let mut state = self.shared.state.lock();
        state.value = value;
        Self::wake_satisfied(&mut state);
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Raise the value to `value` if it is larger. Returns `true` on change.
    pub fn advance_to(&self, value: T) -> bool {
        let mut state = self.shared.state.lock();
        if value <= state.value {
            return false;
        }
        state.value = value;
        Self::wake_satisfied(&mut state);
        drop(state);
        self.shared.changed.notify_all();
        true
    }

    /// Future that resolves once the value is at least `threshold`.
    pub fn at_least(&self, threshold: T) -> AtLeast<T> {
        AtLeast {
            shared: Arc::clone(&self.shared),
            threshold,
            waiter_id: None,
        }
    }

    /// Block the calling thread until the value reaches `threshold`.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub fn wait_at_least(&self, threshold: T, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            if state.value >= threshold {
                return Some(state.value);
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return (state.value >= threshold).then_some(state.value);
                    }
                }
                None => self.shared.changed.wait(&mut state),
            }
        }
    }

    /// Number of futures currently parked on this value.
    pub fn waiter_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Total wake notifications issued so far.
    pub fn wakes_issued(&self) -> u64 {
        self.shared.state.lock().wakes_issued
    }

    fn wake_satisfied(state: &mut State<T>) {
        let value = state.value;
        let mut woken = 0u64;
        state.waiters.retain(|w| {
            if w.threshold <= value {
                w.waker.wake_by_ref();
                woken += 1;
                false
            } else {
                true
            }
        });
        state.wakes_issued += woken;
    }
}

/// Future returned by [`ObservableValue::at_least`].
///
/// Resolves to the observed value. Dropping a pending future removes its
/// registration.
pub struct AtLeast<T> {
    shared: Arc<Shared<T>>,
    threshold: T,
    waiter_id: Option<u64>,
}

impl<T: Copy + Ord + Unpin> Future for AtLeast<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let mut state = this.shared.state.lock();
        if state.value >= this.threshold {
            if let Some(id) = this.waiter_id.take() {
                state.waiters.retain(|w| w.id != id);
            }
            return Poll::Ready(state.value);
        }

        match this.waiter_id {
            Some(id) => {
                if let Some(w) = state.waiters.iter_mut().find(|w| w.id == id) {
                    if !w.waker.will_wake(cx.waker()) {
                        w.waker = cx.waker().clone();
                    }
                } else {
                    // Woken already but the value regressed through `set`.
                    let threshold = this.threshold;
                    state.waiters.push(Waiter {
                        id,
                        threshold,
                        waker: cx.waker().clone(),
                    });
                }
            }
            None => {
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push(Waiter {
                    id,
                    threshold: this.threshold,
                    waker: cx.waker().clone(),
                });
                this.waiter_id = Some(id);
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for AtLeast<T> {
    fn drop(&mut self) {
        if let Some(id) = self.waiter_id {
            self.shared.state.lock().waiters.retain(|w| w.id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Arc<CountingWaker>, Waker) {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        (counter, waker)
    }

    #[test]
    fn advance_is_monotonic() {
        let v = ObservableValue::new(5u64);
        assert!(!v.advance_to(3));
        assert_eq!(v.get(), 5);
        assert!(v.advance_to(9));
        assert_eq!(v.get(), 9);
    }

    #[test]
    fn ready_immediately_when_threshold_met() {
        let v = ObservableValue::new(10u64);
        let (_, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(v.at_least(10));
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(10));
        assert_eq!(v.waiter_count(), 0);
    }

    #[test]
    fn multiple_awaiters_are_each_woken_once() {
        let v = ObservableValue::new(0u64);
        let (counter, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut a = Box::pin(v.at_least(2));
        let mut b = Box::pin(v.at_least(2));
        assert!(a.as_mut().poll(&mut cx).is_pending());
        assert!(b.as_mut().poll(&mut cx).is_pending());
        // Re-polling does not register a second time.
        assert!(a.as_mut().poll(&mut cx).is_pending());
        assert_eq!(v.waiter_count(), 2);

        v.advance_to(1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        v.advance_to(2);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        v.advance_to(3);
        v.advance_to(4);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(v.wakes_issued(), 2);

        assert_eq!(a.as_mut().poll(&mut cx), Poll::Ready(4));
        assert_eq!(b.as_mut().poll(&mut cx), Poll::Ready(4));
    }

    #[test]
    fn dropping_pending_future_unregisters() {
        let v = ObservableValue::new(0u32);
        let (_, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        {
            let mut fut = Box::pin(v.at_least(1));
            assert!(fut.as_mut().poll(&mut cx).is_pending());
            assert_eq!(v.waiter_count(), 1);
        }
        assert_eq!(v.waiter_count(), 0);
    }

    #[test]
    fn blocking_wait_times_out() {
        let v = ObservableValue::new(0u64);
        assert_eq!(v.wait_at_least(1, Some(Duration::from_millis(5))), None);
    }

    #[test]
    fn blocking_wait_sees_other_thread() {
        let v = ObservableValue::new(0u64);
        let producer = v.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            producer.advance_to(7);
        });
        assert_eq!(v.wait_at_least(7, Some(Duration::from_secs(5))), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn block_on_resolves_ready_future() {
        let v = ObservableValue::new(3u64);
        assert_eq!(block_on(v.at_least(2)), 3);
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        let (_, waker) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(fut);
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
        }
    }
}
