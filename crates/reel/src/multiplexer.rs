//! Bridges callback-driven producers into a pull-based stream.
//!
//! A producer pushes items from event callbacks through a [`ChunkSender`] and signals
//! the end (or failure) through a [`Completion`]. The consumer pulls with
//! [`StreamMultiplexer::next`] or [`StreamMultiplexer::into_stream`]. Items pushed
//! before completion are always delivered before the completion outcome.
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::oneshot;

struct State<T, E> {
    queue: VecDeque<T>,
    finished: bool,
    error: Option<E>,
    waiter: Option<oneshot::Sender<()>>,
}

impl<T, E> State<T, E> {
    fn wake(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(());
        }
    }
}

type Shared<T, E> = Arc<Mutex<State<T, E>>>;

fn lock<T, E>(state: &Shared<T, E>) -> MutexGuard<'_, State<T, E>> {
    // A panicking producer must not wedge the consumer
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StreamMultiplexer<T, E> {
    state: Shared<T, E>,
}

impl<T, E> Default for StreamMultiplexer<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> StreamMultiplexer<T, E> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                finished: false,
                error: None,
                waiter: None,
            })),
        }
    }

    /// Producer handle for event callbacks.
    pub fn sender(&self) -> ChunkSender<T, E> {
        ChunkSender {
            state: Arc::clone(&self.state),
        }
    }

    /// Producer handle for the completion signal.
    pub fn completion(&self) -> Completion<T, E> {
        Completion {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// The next item, the stored error once everything queued has been drained, or
    /// `None` when the producer finished cleanly.
    pub async fn next(&self) -> Option<Result<T, E>> {
        loop {
            {
                let mut state = lock(&self.state);
                if let Some(item) = state.queue.pop_front() {
                    return Some(Ok(item));
                }
                if state.finished {
                    return state.error.take().map(Err);
                }
            }
            self.park().await;
        }
    }

    /// Register the single waiter. The queue and finished flag are checked again
    /// under the lock so a push landing between `next`'s check and here is not missed.
    fn park(&self) -> impl Future<Output = ()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            if !state.queue.is_empty() || state.finished {
                let _ = tx.send(());
            } else {
                state.waiter = Some(tx);
            }
        }
        async move {
            let _ = rx.await;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, E>> {
        futures::stream::unfold(self, |mux| async move {
            let item = mux.next().await?;
            Some((item, mux))
        })
    }
}

pub struct ChunkSender<T, E> {
    state: Shared<T, E>,
}

impl<T, E> Clone for ChunkSender<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> ChunkSender<T, E> {
    /// Queue an item and wake the consumer. Items arriving after completion are
    /// discarded; returns whether the item was accepted.
    pub fn push(&self, item: T) -> bool {
        let mut state = lock(&self.state);
        if state.finished {
            return false;
        }
        state.queue.push_back(item);
        state.wake();
        true
    }
}

/// One-shot completion signal. Dropping it without calling [`Completion::complete`]
/// ends the stream cleanly.
pub struct Completion<T, E> {
    state: Option<Shared<T, E>>,
}

impl<T, E> Completion<T, E> {
    pub fn complete(mut self, result: Result<(), E>) {
        if let Some(state) = self.state.take() {
            Self::finish(&state, result.err());
        }
    }

    fn finish(state: &Shared<T, E>, error: Option<E>) {
        let mut state = lock(state);
        if state.finished {
            return;
        }
        state.finished = true;
        state.error = error;
        state.wake();
    }
}

impl<T, E> Drop for Completion<T, E> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::debug!("stream producer went away without completing");
            Self::finish(&state, None);
        }
    }
}
