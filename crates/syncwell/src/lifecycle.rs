// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

const EVENT_BUFFER: usize = 16;

/// A change in application visibility or network connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The application became visible to the user.
    Visible,
    /// The application was hidden.
    Hidden,
    /// Network connectivity was restored.
    Online,
    /// Network connectivity was lost.
    Offline,
}

/// Broadcasts visibility and connectivity changes to read sessions.
///
/// The host application reports its state through [`set_visible`](Self::set_visible) and
/// [`set_online`](Self::set_online); an event is published only when the state actually
/// changes. Both start out `true`. Clones share the same channel.
///
/// # Examples
///
/// ```
/// use syncwell::{Lifecycle, LifecycleEvent};
///
/// let lifecycle = Lifecycle::new();
/// let mut events = lifecycle.subscribe();
///
/// lifecycle.set_online(false);
/// lifecycle.set_online(false);
/// lifecycle.set_online(true);
///
/// assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Offline);
/// assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Online);
/// assert!(events.try_recv().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

#[derive(Debug)]
struct LifecycleInner {
    events: broadcast::Sender<LifecycleEvent>,
    visible: AtomicBool,
    online: AtomicBool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a hub for a visible, online application.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(LifecycleInner {
                events,
                visible: AtomicBool::new(true),
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Reports whether the application is visible.
    pub fn set_visible(&self, visible: bool) {
        if self.inner.visible.swap(visible, Ordering::AcqRel) != visible {
            self.publish(if visible { LifecycleEvent::Visible } else { LifecycleEvent::Hidden });
        }
    }

    /// Reports whether the network is reachable.
    pub fn set_online(&self, online: bool) {
        if self.inner.online.swap(online, Ordering::AcqRel) != online {
            self.publish(if online { LifecycleEvent::Online } else { LifecycleEvent::Offline });
        }
    }

    /// Returns the last reported visibility.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::Acquire)
    }

    /// Returns the last reported connectivity.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Subscribes to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, event: LifecycleEvent) {
        tracing::debug!(lifecycle.event = ?event, "lifecycle changed");
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
    }
}
