//! Broadcast pause gate shared by every polling loop
//!
//! Closed while any supervised link is down, open once every link has
//! recovered. Loops wait on the gate before each unit of work.

use crate::runtime::supervisor::LinkObserver;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
pub struct PauseGate {
    open: watch::Sender<bool>,
    down: Mutex<HashSet<String>>,
}

impl PauseGate {
    /// All listed links start down, so the gate starts closed
    pub fn new<I, S>(links: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let down: HashSet<String> = links.into_iter().map(Into::into).collect();
        let (open, _) = watch::channel(down.is_empty());
        Arc::new(Self {
            open,
            down: Mutex::new(down),
        })
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.open.subscribe()
    }

    /// Close the gate until `link` recovers
    pub fn pause(&self, link: &str) {
        let mut down = self.down.lock();
        down.insert(link.to_string());
        if self.open.send_replace(false) {
            info!("Polling paused: link {} down", link);
        }
    }

    /// Mark `link` up; opens the gate when no link is left down
    pub fn resume(&self, link: &str) {
        let mut down = self.down.lock();
        down.remove(link);
        if down.is_empty() {
            if !self.open.send_replace(true) {
                info!("Polling resumed: all links recovered");
            }
        } else {
            debug!("Link {} up, still waiting for {:?}", link, down);
        }
    }

    /// Wait until the gate is open; `false` when cancelled first
    pub async fn wait_open(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.open.subscribe();
        tokio::select! {
            () = cancel.cancelled() => false,
            res = rx.wait_for(|open| *open) => res.is_ok(),
        }
    }
}

impl LinkObserver for PauseGate {
    fn on_recovered(&self, link: &str) {
        self.resume(link);
    }

    fn on_disconnected(&self, link: &str) {
        self.pause(link);
    }
}
