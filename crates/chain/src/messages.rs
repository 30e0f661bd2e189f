//! Event fan-out to registered consumers. Each subscriber gets its own
//! unbounded queue; a dropped receiver unsubscribes on the next send.

use crossbeam_channel::{unbounded, Receiver, Sender};
use obol_crypto::Hash256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockchainMessage {
    /// A block was appended to the main chain.
    NewBlock(Hash256),
    /// A block was retained on an alternative chain.
    NewAlternativeBlock(Hash256),
    /// The chain switched; hashes run from the common ancestor forward.
    ChainSwitch(Vec<Hash256>),
}

#[derive(Default)]
pub struct MessageFanOut {
    senders: Vec<Sender<BlockchainMessage>>,
}

impl MessageFanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<BlockchainMessage> {
        let (sender, receiver) = unbounded();
        self.senders.push(sender);
        receiver
    }

    pub fn send(&mut self, message: BlockchainMessage) {
        self.senders.retain(|sender| sender.send(message.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.len()
    }
}
