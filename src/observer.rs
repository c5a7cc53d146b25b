//! Connection up/down tracking.
//!
//! The monitor keeps a single `is_down` flag and notifies observers only on
//! transitions. The liveness prober that brings the connection back up is
//! driven by [`HttpClient`](crate::transport::client::HttpClient).

use std::sync::{Arc, Mutex, RwLock};

/// Receives connection state transitions.
pub trait ConnectionObserver: Send + Sync {
    fn on_down(&self);
    fn on_up(&self);
}

#[derive(Debug, Default)]
struct MonitorState {
    down: bool,
    probing: bool,
}

/// Tracks whether the API is reachable and fans transitions out to observers.
#[derive(Default)]
pub struct ConnectionMonitor {
    state: Mutex<MonitorState>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers
            .write()
            .expect("observer list lock poisoned")
            .push(observer);
    }

    pub fn is_down(&self) -> bool {
        self.state.lock().expect("monitor state poisoned").down
    }

    /// Record a request that got no response at all.
    ///
    /// Returns `true` when the caller must start a liveness prober: the
    /// connection just went down and no prober is running.
    pub fn report_failure(&self) -> bool {
        let start_prober = {
            let mut state = self.state.lock().expect("monitor state poisoned");
            if state.down {
                return false;
            }
            state.down = true;
            let start = !state.probing;
            state.probing = true;
            start
        };
        tracing::info!("API connection is down");
        for observer in self.snapshot() {
            observer.on_down();
        }
        start_prober
    }

    /// Record a received response.
    pub fn report_response(&self) {
        {
            let mut state = self.state.lock().expect("monitor state poisoned");
            if !state.down {
                return;
            }
            state.down = false;
        }
        tracing::info!("API connection is up again");
        for observer in self.snapshot() {
            observer.on_up();
        }
    }

    /// Called by the prober before each ping. Returns `false`, and releases
    /// the prober slot, once the connection is up again.
    pub(crate) fn continue_probing(&self) -> bool {
        let mut state = self.state.lock().expect("monitor state poisoned");
        if !state.down {
            state.probing = false;
        }
        state.down
    }

    pub(crate) fn prober_stopped(&self) {
        self.state.lock().expect("monitor state poisoned").probing = false;
    }

    fn snapshot(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers
            .read()
            .expect("observer list lock poisoned")
            .clone()
    }
}
