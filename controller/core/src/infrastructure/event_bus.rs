// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Controller Events
//
// In-memory event streaming over tokio broadcast channels. Observers that
// fall behind lose the oldest events; the controller never blocks on them.

use crate::domain::events::ControllerEvent;
use crate::domain::volume::VolumeId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to controller events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ControllerEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ControllerEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all controller events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events about a single volume
    pub fn subscribe_volume(&self, volume_id: VolumeId) -> VolumeEventReceiver {
        VolumeEventReceiver {
            receiver: self.sender.subscribe(),
            volume_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all controller events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ControllerEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<ControllerEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ControllerEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to the mapping events of one volume
pub struct VolumeEventReceiver {
    receiver: broadcast::Receiver<ControllerEvent>,
    volume_id: VolumeId,
}

impl VolumeEventReceiver {
    pub async fn recv(&mut self) -> Result<ControllerEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.subject() == Some(self.volume_id.as_str()) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
