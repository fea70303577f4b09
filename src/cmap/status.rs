use tokio::sync::watch;

/// Returns a new publisher/subscriber pair for pool generation updates.
pub(super) fn channel(initial_generation: u32) -> (PoolGenerationPublisher, PoolGenerationSubscriber) {
    let (sender, receiver) = watch::channel(initial_generation);
    (
        PoolGenerationPublisher { sender },
        PoolGenerationSubscriber { receiver },
    )
}

/// Publishes the pool's current generation, bumped on each clear.
#[derive(Debug)]
pub(super) struct PoolGenerationPublisher {
    sender: watch::Sender<u32>,
}

impl PoolGenerationPublisher {
    pub(super) fn publish(&self, new_generation: u32) {
        // If nobody is listening, there is nothing to do.
        let _ = self.sender.send(new_generation);
    }
}

/// Subscribes to the pool's current generation without holding the pool open.
#[derive(Clone, Debug)]
pub(crate) struct PoolGenerationSubscriber {
    receiver: watch::Receiver<u32>,
}

impl PoolGenerationSubscriber {
    pub(crate) fn generation(&self) -> u32 {
        *self.receiver.borrow()
    }
}
