use tokio::sync::broadcast::error::RecvError;

/// In-process fan-out channel. Senders never block; slow receivers lose the
/// oldest messages and are told how many they missed.
pub struct EventBus<T> {
    tx: tokio::sync::broadcast::Sender<T>,
}

pub struct EventListener<T> {
    rx: tokio::sync::broadcast::Receiver<T>,
}

#[derive(Clone)]
pub struct EventEmitter<T> {
    tx: tokio::sync::broadcast::Sender<T>,
}

impl<T: Clone + std::fmt::Debug> EventBus<T> {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(buffer_size);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventListener<T> {
        EventListener {
            rx: self.tx.subscribe(),
        }
    }

    pub fn emitter(&self) -> EventEmitter<T> {
        EventEmitter { tx: self.tx.clone() }
    }
}

impl<T: Clone> EventListener<T> {
    /// Returns None only when every emitter is gone. Lagging is logged and
    /// skipped over so a slow consumer keeps receiving fresh events.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Closed) => {
                    tracing::error!("Event channel of {} closed", std::any::type_name::<T>());
                    return None;
                }
                Err(RecvError::Lagged(count)) => {
                    tracing::warn!("Event listener of {} lagged by {} messages", std::any::type_name::<T>(), count);
                }
            }
        }
    }
}

impl<T: Clone + std::fmt::Debug> EventEmitter<T> {
    /// Sending without any active listener is not an error, the event is
    /// simply dropped.
    pub fn send(&self, event: T) {
        if self.tx.receiver_count() > 0
            && let Err(e) = self.tx.send(event)
        {
            tracing::error!("Error emitting event {:?}", e);
        }
    }
}
