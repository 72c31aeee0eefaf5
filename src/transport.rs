//! Message delivery between nodes.
//!
//! Messages opening a protocol run (`seq == 1`) go to the receiving node's
//! inbox. Everything else is a reply and is matched to the waiting run by
//! process id. Replies are only kept for runs that registered for them.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

use crate::{keys::ExtendedPublicKey, protocol::ProtocolMessage};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no route to {0}")]
    UnknownPeer(ExtendedPublicKey),
    #[error("{0} no longer accepts messages")]
    Disconnected(ExtendedPublicKey),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &ExtendedPublicKey, message: ProtocolMessage)
        -> Result<(), TransportError>;

    /// Accept replies for `process_id` from now on. Called before sending
    /// the message the reply answers.
    fn expect_reply(&self, process_id: &str);

    /// Stop accepting replies for `process_id` and drop any not yet taken.
    fn forget(&self, process_id: &str);

    /// Next reply for the given process, registering for it if needed.
    /// Cancelled by dropping the future.
    async fn await_reply(&self, process_id: &str) -> Result<ProtocolMessage, TransportError>;
}

#[derive(Debug)]
struct Mailbox {
    inbox: mpsc::UnboundedSender<ProtocolMessage>,
    /// One slot per registered process. A reply arriving while the slot is
    /// full is a duplicate and dropped.
    replies: Mutex<HashMap<String, Option<ProtocolMessage>>>,
    arrived: Notify,
}

/// In-process network connecting any number of [MemoryTransport]s.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    peers: Mutex<HashMap<ExtendedPublicKey, Arc<Mailbox>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach `id`. Returns its transport and the receiver of its inbox.
    pub fn connect(
        self: &Arc<Self>,
        id: ExtendedPublicKey,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<ProtocolMessage>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let mailbox = Arc::new(Mailbox {
            inbox,
            replies: Mutex::new(HashMap::new()),
            arrived: Notify::new(),
        });
        self.peers.lock().insert(id, mailbox.clone());
        let transport = MemoryTransport {
            network: self.clone(),
            mailbox,
        };
        (transport, rx)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    mailbox: Arc<Mailbox>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(
        &self,
        to: &ExtendedPublicKey,
        message: ProtocolMessage,
    ) -> Result<(), TransportError> {
        let peer = self
            .network
            .peers
            .lock()
            .get(to)
            .cloned()
            .ok_or(TransportError::UnknownPeer(*to))?;
        trace!(protocol = %message.protocol, seq = message.seq, "delivering to {}", to);
        if message.seq == 1 {
            peer.inbox
                .send(message)
                .map_err(|_| TransportError::Disconnected(*to))
        } else {
            match peer.replies.lock().get_mut(&message.process_id) {
                Some(slot @ None) => *slot = Some(message),
                Some(Some(_)) => {
                    debug!(process_id = %message.process_id, "dropping duplicate reply")
                }
                None => debug!(process_id = %message.process_id, "dropping unexpected reply"),
            }
            peer.arrived.notify_waiters();
            Ok(())
        }
    }

    fn expect_reply(&self, process_id: &str) {
        self.mailbox
            .replies
            .lock()
            .entry(process_id.to_string())
            .or_default();
    }

    fn forget(&self, process_id: &str) {
        self.mailbox.replies.lock().remove(process_id);
    }

    async fn await_reply(&self, process_id: &str) -> Result<ProtocolMessage, TransportError> {
        self.expect_reply(process_id);
        loop {
            // Registered before checking so a reply arriving in between
            // still wakes us.
            let arrived = self.mailbox.arrived.notified();
            let ready = self
                .mailbox
                .replies
                .lock()
                .get_mut(process_id)
                .and_then(Option::take);
            if let Some(reply) = ready {
                return Ok(reply);
            }
            arrived.await;
        }
    }
}

impl MemoryTransport {
    /// Processes currently registered for replies.
    pub fn pending_replies(&self) -> usize {
        self.mailbox.replies.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::{CustomData, Protocol, UNASSIGNED_SEQ_NO},
        testing::Fixture,
    };
    use serde_json::json;
    use std::time::Duration;

    fn message(fx: &Fixture, seq: i64, process_id: &str) -> ProtocolMessage {
        ProtocolMessage {
            protocol: Protocol::Install,
            process_id: process_id.into(),
            seq,
            to_xpub: fx.bob_xpub(),
            from_xpub: fx.alice_xpub(),
            params: json!({}),
            custom_data: CustomData::default(),
        }
    }

    #[tokio::test]
    async fn openers_go_to_the_inbox() {
        let fx = Fixture::new(0);
        let net = MemoryNetwork::new();
        let (alice, _) = net.connect(fx.alice_xpub());
        let (_bob, mut inbox) = net.connect(fx.bob_xpub());

        alice.send(&fx.bob_xpub(), message(&fx, 1, "p")).await.unwrap();
        assert_eq!(inbox.recv().await.unwrap().process_id, "p");
    }

    #[tokio::test]
    async fn replies_are_matched_by_process_id() {
        let fx = Fixture::new(1);
        let net = MemoryNetwork::new();
        let (alice, _) = net.connect(fx.alice_xpub());
        let (bob, _) = net.connect(fx.bob_xpub());
        bob.expect_reply("first");
        bob.expect_reply("second");

        let waiting = {
            let bob = bob.clone();
            tokio::spawn(async move { bob.await_reply("second").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        alice
            .send(&fx.bob_xpub(), message(&fx, UNASSIGNED_SEQ_NO, "first"))
            .await
            .unwrap();
        alice
            .send(&fx.bob_xpub(), message(&fx, UNASSIGNED_SEQ_NO, "second"))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.process_id, "second");
        assert_eq!(bob.await_reply("first").await.unwrap().process_id, "first");
    }

    #[tokio::test]
    async fn replies_nobody_waits_for_are_dropped() {
        let fx = Fixture::new(3);
        let net = MemoryNetwork::new();
        let (alice, _) = net.connect(fx.alice_xpub());
        let (bob, _) = net.connect(fx.bob_xpub());

        for i in 0..100 {
            alice
                .send(&fx.bob_xpub(), message(&fx, UNASSIGNED_SEQ_NO, &format!("stray-{i}")))
                .await
                .unwrap();
        }
        assert_eq!(bob.pending_replies(), 0);

        // Late replies to a finished run are dropped too.
        bob.expect_reply("done");
        alice
            .send(&fx.bob_xpub(), message(&fx, UNASSIGNED_SEQ_NO, "done"))
            .await
            .unwrap();
        bob.await_reply("done").await.unwrap();
        bob.forget("done");
        alice
            .send(&fx.bob_xpub(), message(&fx, UNASSIGNED_SEQ_NO, "done"))
            .await
            .unwrap();
        assert_eq!(bob.pending_replies(), 0);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), bob.await_reply("stray-0"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn unknown_peer() {
        let fx = Fixture::new(2);
        let net = MemoryNetwork::new();
        let (alice, _) = net.connect(fx.alice_xpub());
        assert_eq!(
            alice.send(&fx.bob_xpub(), message(&fx, 1, "p")).await,
            Err(TransportError::UnknownPeer(fx.bob_xpub()))
        );
    }
}
