use std::{
    future::Future,
    pin::Pin,
    sync::Mutex,
    task::{Context as TaskContext, Poll},
};

use tokio::sync::oneshot;

use crate::events::lock;

struct Slot<T> {
    generation: u64,
    tx: Option<oneshot::Sender<Option<T>>>,
}

/// A single-slot future that can be re-armed indefinitely.
///
/// Each [reset](ReusableAwaiter::reset) arms a new generation and hands out a [Next] bound to it.
/// Completing the slot only ever reaches the handle of the current generation, so completions that
/// arrive while nobody is waiting are simply dropped. Arming again before the previous handle was
/// completed abandons that handle, it resolves to [None] instead of hanging.
pub struct ReusableAwaiter<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> ReusableAwaiter<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                tx: None,
            }),
        }
    }

    /// Arm the slot, returns a handle for the next completion
    pub fn reset(&self) -> Next<T> {
        let (tx, rx) = oneshot::channel();
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        slot.tx = Some(tx);
        Next {
            generation: slot.generation,
            state: NextState::Waiting(rx),
        }
    }

    /// Complete the outstanding handle with `value`.
    ///
    /// Returns whether a handle actually received it. Never fails, a slot that isn't armed (or whose
    /// handle was dropped) just ignores the value.
    pub fn try_set_result(&self, value: T) -> bool {
        self.complete(Some(value))
    }

    /// Complete the outstanding handle with the end-of-stream sentinel
    pub fn try_finish(&self) -> bool {
        self.complete(None)
    }

    fn complete(&self, value: Option<T>) -> bool {
        let tx = lock(&self.slot).tx.take();
        tx.is_some_and(|tx| tx.send(value).is_ok())
    }

    /// Generation of the most recently armed handle
    pub fn generation(&self) -> u64 {
        lock(&self.slot).generation
    }

    /// Whether an armed handle is still waiting for a completion
    pub fn is_armed(&self) -> bool {
        lock(&self.slot).tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl<T> Default for ReusableAwaiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

enum NextState<T> {
    Ready(Option<T>),
    Waiting(oneshot::Receiver<Option<T>>),
    Done,
}

/// Handle for one completion of a [ReusableAwaiter], [None] marks the end of the stream
pub struct Next<T> {
    generation: u64,
    state: NextState<T>,
}

impl<T> Next<T> {
    /// A handle that is already complete
    pub fn ready(value: Option<T>) -> Self {
        Self {
            generation: 0,
            state: NextState::Ready(value),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// Never pin-projects into `T`
impl<T> Unpin for Next<T> {}

impl<T> Future for Next<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            NextState::Ready(value) => {
                let value = value.take();
                this.state = NextState::Done;
                Poll::Ready(value)
            }
            NextState::Waiting(rx) => {
                let polled = Pin::new(rx).poll(cx);
                if polled.is_ready() {
                    this.state = NextState::Done;
                }
                polled.map(|res| res.ok().flatten())
            }
            NextState::Done => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reset_then_set_resolves_once() {
        let awaiter = ReusableAwaiter::new();
        let next = awaiter.reset();
        assert!(awaiter.is_armed());

        assert!(awaiter.try_set_result(5));
        assert!(!awaiter.try_set_result(6));
        assert_eq!(next.await, Some(5));
    }

    #[test]
    fn test_set_without_handle_is_noop() {
        let awaiter = ReusableAwaiter::<u32>::new();
        assert!(!awaiter.try_set_result(1));
        assert!(!awaiter.try_finish());
        assert!(!awaiter.is_armed());
    }

    #[tokio::test]
    async fn test_rearm_many_times() {
        let awaiter = ReusableAwaiter::new();
        for i in 0..10 {
            let next = awaiter.reset();
            assert_eq!(next.generation(), i + 1);
            awaiter.try_set_result(i);
            assert_eq!(next.await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_stale_handle_resolves_to_none() {
        let awaiter = ReusableAwaiter::new();
        let stale = awaiter.reset();
        let current = awaiter.reset();
        assert_eq!(awaiter.generation(), 2);

        awaiter.try_set_result("fresh");
        assert_eq!(stale.await, None);
        assert_eq!(current.await, Some("fresh"));
    }

    #[tokio::test]
    async fn test_finish_sends_sentinel() {
        let awaiter = ReusableAwaiter::<u32>::new();
        let next = awaiter.reset();
        assert!(awaiter.try_finish());
        assert_eq!(next.await, None);
    }

    #[tokio::test]
    async fn test_dropped_handle_disarms() {
        let awaiter = ReusableAwaiter::<u32>::new();
        drop(awaiter.reset());
        assert!(!awaiter.is_armed());
        assert!(!awaiter.try_set_result(3));
    }

    #[tokio::test]
    async fn test_ready_handle() {
        assert_eq!(Next::ready(Some(1)).await, Some(1));
        assert_eq!(Next::<u32>::ready(None).await, None);
    }
}
