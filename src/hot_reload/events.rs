//! Lifecycle notifications
//!
//! Notifications are delivered synchronously, in order, on the thread that
//! runs the reloader. Listeners that live elsewhere subscribe to a channel.

use std::path::PathBuf;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::module::Generation;

/// Hot reload lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadEvent {
    /// A compilation job was started for `file`
    CompilationStarted { file: PathBuf },

    /// A compilation job ended; `success` also covers loading the result
    CompilationFinished { file: PathBuf, success: bool },

    /// The previous object and module are about to be torn down
    LibraryPreLoaded { library: PathBuf },

    /// The new module is the active one
    LibraryPostLoaded { library: PathBuf, generation: Generation },

    /// The new object is about to be installed
    ClassPreLoaded { type_name: String },

    /// The new object is installed and started
    ClassPostLoaded { type_name: String, generation: Generation },
}

impl ReloadEvent {
    /// Event type identifier
    pub fn event_type(&self) -> &'static str {
        match self {
            ReloadEvent::CompilationStarted { .. } => "CompilationStarted",
            ReloadEvent::CompilationFinished { .. } => "CompilationFinished",
            ReloadEvent::LibraryPreLoaded { .. } => "LibraryPreLoaded",
            ReloadEvent::LibraryPostLoaded { .. } => "LibraryPostLoaded",
            ReloadEvent::ClassPreLoaded { .. } => "ClassPreLoaded",
            ReloadEvent::ClassPostLoaded { .. } => "ClassPostLoaded",
        }
    }
}

/// Receiver of lifecycle notifications
pub trait ReloadListener {
    fn on_reload_event(&mut self, event: &ReloadEvent);

    /// Closed listeners are dropped before the next dispatch
    fn is_closed(&self) -> bool {
        false
    }

    fn listener_name(&self) -> &str {
        "unnamed_listener"
    }
}

struct ChannelListener {
    tx: Sender<ReloadEvent>,
    closed: bool,
}

impl ReloadListener for ChannelListener {
    fn on_reload_event(&mut self, event: &ReloadEvent) {
        if self.tx.send(event.clone()).is_err() {
            self.closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn listener_name(&self) -> &str {
        "channel"
    }
}

/// Ordered fan-out of lifecycle notifications
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Box<dyn ReloadListener>>,
    published: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: impl ReloadListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Receive every future notification on a channel
    pub fn subscribe(&mut self) -> Receiver<ReloadEvent> {
        let (tx, rx) = unbounded();
        self.add_listener(ChannelListener { tx, closed: false });
        rx
    }

    pub fn publish(&mut self, event: ReloadEvent) {
        self.listeners.retain(|l| {
            let closed = l.is_closed();
            if closed {
                log::debug!("Dropping closed listener {}", l.listener_name());
            }
            !closed
        });

        log::debug!("[hot_reload] {} {:?}", event.event_type(), event);
        self.published += 1;
        for listener in &mut self.listeners {
            listener.on_reload_event(&event);
        }
    }

    /// Number of notifications published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
