use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub struct EventConsumer<E>(UnboundedReceiver<E>);

impl<E> From<UnboundedReceiver<E>> for EventConsumer<E> {
    fn from(value: UnboundedReceiver<E>) -> Self {
        Self(value)
    }
}

pub struct EventPublisher<E>(UnboundedSender<E>);

impl<E> From<UnboundedSender<E>> for EventPublisher<E> {
    fn from(value: UnboundedSender<E>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EventPublisherError {
    #[error("error while publishing event: {0}")]
    SendError(String),
}

pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (s, r) = unbounded_channel();
    (EventPublisher(s), EventConsumer(r))
}

impl<E> EventPublisher<E> {
    pub fn publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }
}

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        EventPublisher(self.0.clone())
    }
}

impl<E> EventConsumer<E> {
    /// Waits for the next event. Returns `None` once every publisher has been dropped
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<E> {
        self.0.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_received_in_publish_order() {
        let (publisher, mut consumer) = pub_sub();
        publisher.publish(1).unwrap();
        publisher.clone().publish(2).unwrap();

        assert_eq!(consumer.recv().await, Some(1));
        assert_eq!(consumer.recv().await, Some(2));
    }

    #[tokio::test]
    async fn consumer_ends_when_publishers_are_dropped() {
        let (publisher, mut consumer) = pub_sub::<()>();
        drop(publisher);
        assert_eq!(consumer.recv().await, None);
    }

    #[test]
    fn publish_fails_without_consumer() {
        let (publisher, consumer) = pub_sub::<u8>();
        drop(consumer);
        assert!(matches!(
            publisher.publish(7),
            Err(EventPublisherError::SendError(_))
        ));
    }
}
