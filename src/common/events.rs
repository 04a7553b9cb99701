use parking_lot::Mutex;

/// Fan-out point for component events.
///
/// Subscribers register a channel via [`subscribe`](Self::subscribe); an
/// emission is delivered to every live subscriber and dropped on the floor
/// when none are registered. Senders whose receiver has gone away are pruned
/// on the next emit.
pub(crate) struct EventSink<T> {
    subscribers: Mutex<Vec<flume::Sender<T>>>,
}

impl<T: Clone> EventSink<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> flume::Receiver<T> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn clear(&self) {
        self.subscribers.lock().clear();
    }
}
