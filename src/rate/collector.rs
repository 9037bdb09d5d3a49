//! Idle-timer accumulation with pluggable strategies

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::util::hold;

/// How a [`Collector`] accumulates values between firings.
///
/// `execute` may emit zero or more batches; the strategy must be empty again
/// once it returns.
pub trait CollectStrategy<T>: Send {
    fn add(&mut self, value: T);
    fn execute(&mut self, emit: &mut dyn FnMut(Vec<T>));
    fn clear(&mut self);
}

/// Keeps only the last added value; emits it as a single-element batch.
#[derive(Debug, Default)]
pub struct CollectLast<T> {
    last: Option<T>,
}

impl<T> CollectLast<T> {
    pub fn new() -> Self {
        Self { last: None }
    }
}

impl<T: Send> CollectStrategy<T> for CollectLast<T> {
    fn add(&mut self, value: T) {
        self.last = Some(value);
    }

    fn execute(&mut self, emit: &mut dyn FnMut(Vec<T>)) {
        if let Some(v) = self.last.take() {
            emit(vec![v]);
        }
    }

    fn clear(&mut self) {
        self.last = None;
    }
}

/// Keeps every added value in order; emits consecutive chunks of at most
/// `batch_size`, one callback call per chunk.
#[derive(Debug)]
pub struct CollectBatch<T> {
    items: Vec<T>,
    batch_size: usize,
}

impl<T> CollectBatch<T> {
    pub fn new(batch_size: usize) -> Self {
        assert!(batch_size >= 1, "batch size must be at least 1");
        Self {
            items: Vec::new(),
            batch_size,
        }
    }
}

impl<T: Send> CollectStrategy<T> for CollectBatch<T> {
    fn add(&mut self, value: T) {
        self.items.push(value);
    }

    fn execute(&mut self, emit: &mut dyn FnMut(Vec<T>)) {
        let items = std::mem::take(&mut self.items);
        let mut rest = items;
        while !rest.is_empty() {
            let tail = rest.split_off(rest.len().min(self.batch_size));
            emit(rest);
            rest = tail;
        }
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Generalized Debounce: `add` feeds the strategy and resets an idle timer of
/// `expires`; on expiry the strategy's accumulated batches are handed to the
/// callback. `reset` cancels without firing.
pub struct Collector<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    callback: Box<dyn Fn(Vec<T>) + Send + Sync>,
    expires: Duration,
    state: Mutex<State<T>>,
}

struct State<T> {
    strategy: Box<dyn CollectStrategy<T>>,
    generation: u64,
}

impl<T: Send + 'static> Collector<T> {
    pub fn new(
        expires: Duration,
        strategy: impl CollectStrategy<T> + 'static,
        callback: impl Fn(Vec<T>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                callback: Box::new(callback),
                expires,
                state: Mutex::new(State {
                    strategy: Box::new(strategy),
                    generation: 0,
                }),
            }),
        }
    }

    pub fn add(&self, value: T) {
        let generation = {
            let mut st = hold(&self.shared.state);
            st.strategy.add(value);
            st.generation += 1;
            st.generation
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.expires).await;
            let batches = {
                let mut st = hold(&shared.state);
                if st.generation != generation {
                    return;
                }
                let mut batches = Vec::new();
                st.strategy.execute(&mut |batch| batches.push(batch));
                batches
            };
            for batch in batches {
                (shared.callback)(batch);
            }
        });
    }

    /// Cancel the timer and clear accumulated state without firing.
    pub fn reset(&self) {
        let mut st = hold(&self.shared.state);
        st.generation += 1;
        st.strategy.clear();
    }
}
