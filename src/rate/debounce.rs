//! Trailing-edge call coalescing

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::util::hold;

/// Holds only the most recent call and fires it after `delay` of silence.
///
/// Every `add` replaces the held value and resets the idle timer; values
/// replaced before the timer expires are dropped without notice.
pub struct Debounce<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    callback: Box<dyn Fn(T) + Send + Sync>,
    delay: Duration,
    state: Mutex<State<T>>,
}

struct State<T> {
    pending: Option<T>,
    generation: u64,
}

impl<T: Send + 'static> Debounce<T> {
    pub fn new(delay: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                callback: Box::new(callback),
                delay,
                state: Mutex::new(State {
                    pending: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn add(&self, value: T) {
        let generation = {
            let mut st = hold(&self.shared.state);
            st.pending = Some(value);
            st.generation += 1;
            st.generation
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.delay).await;
            let fired = {
                let mut st = hold(&shared.state);
                if st.generation == generation {
                    st.pending.take()
                } else {
                    None
                }
            };
            if let Some(v) = fired {
                (shared.callback)(v);
            }
        });
    }

    /// Drop the timer and the held value.
    pub fn cancel(&self) {
        let mut st = hold(&self.shared.state);
        st.generation += 1;
        st.pending = None;
    }
}
