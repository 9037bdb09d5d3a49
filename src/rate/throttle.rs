//! Steady-rate call replay

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::queue::Queue;
use crate::util::hold;

/// Replays calls at most once per `delay`, in strict submission order.
///
/// The first call of a quiet period is invoked immediately; later calls queue
/// and drain one per timer expiry. Queue depth is unbounded; backpressure is
/// the caller's responsibility. The replay timer is an explicit loop task,
/// re-armed while work remains, never a self-recursive invocation.
pub struct Throttle<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    callback: Box<dyn Fn(T) + Send + Sync>,
    delay: Duration,
    state: Mutex<State<T>>,
}

struct State<T> {
    pending: Queue<T>,
    timer_active: bool,
    /// Bumped by cancel; orphans any replay loop still sleeping
    generation: u64,
}

impl<T: Send + 'static> Throttle<T> {
    pub fn new(delay: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                callback: Box::new(callback),
                delay,
                state: Mutex::new(State {
                    pending: Queue::new(),
                    timer_active: false,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn add(&self, value: T) {
        let (head, generation) = {
            let mut st = hold(&self.shared.state);
            st.pending.push(value);
            if st.timer_active {
                return;
            }
            st.timer_active = true;
            (st.pending.shift(), st.generation)
        };
        if let Some(v) = head {
            (self.shared.callback)(v);
        }
        Self::spawn_replay(self.shared.clone(), generation);
    }

    /// Drop the timer and every pending call.
    pub fn cancel(&self) {
        let mut st = hold(&self.shared.state);
        st.generation += 1;
        st.timer_active = false;
        st.pending = Queue::new();
    }

    pub fn pending(&self) -> usize {
        hold(&self.shared.state).pending.len()
    }

    fn spawn_replay(shared: Arc<Shared<T>>, generation: u64) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(shared.delay).await;
                let next = {
                    let mut st = hold(&shared.state);
                    if st.generation != generation {
                        return;
                    }
                    match st.pending.shift() {
                        Some(v) => v,
                        None => {
                            st.timer_active = false;
                            return;
                        }
                    }
                };
                (shared.callback)(next);
            }
        });
    }
}
