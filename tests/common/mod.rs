#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use cfcore::{
    app::{AppRegistry, CoinBalanceRefundApp, UnidirectionalTransferApp},
    chain::{ChainError, ChainProvider, RetryPolicy, TransactionRequest},
    channel::{AbiEncodings, OutcomeType, TokenIndexedBalances},
    keys::{xkey_kth_address, ExtendedPrivateKey, ExtendedPublicKey},
    network::{NetworkContext, CONVENTION_FOR_ETH_TOKEN_ADDRESS, DEFAULT_FREE_BALANCE_TIMEOUT},
    node::{
        AppInstanceRequest, CreateChannelRequest, Node, NodeConfig, NodeEvent,
        ProposeInstallRequest,
    },
    store::MemoryStore,
    transport::MemoryNetwork,
    Address, Hash, U256,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const TRANSFER_APP: Address = Address([0xa1; 20]);
pub const REFUND_APP: Address = Address([0xa2; 20]);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn network() -> NetworkContext {
    NetworkContext {
        proxy_factory: Address([0xf0; 20]),
        multisig_mastercopy: Address([0xc0; 20]),
        proxy_bytecode: vec![0x60, 0x80, 0x60, 0x40, 0x52],
        free_balance_app: Address([0xfb; 20]),
        coin_balance_refund_app: Some(REFUND_APP),
        default_token_address: CONVENTION_FOR_ETH_TOKEN_ADDRESS,
        free_balance_timeout: DEFAULT_FREE_BALANCE_TIMEOUT,
    }
}

pub fn config(prefix: &str) -> NodeConfig {
    let mut config = NodeConfig::new(network());
    config.store_key_prefix = prefix.into();
    config.deposit_retry = RetryPolicy {
        attempts: 3,
        backoff_ms: 1,
    };
    config.deploy_retry = config.deposit_retry;
    config
}

pub struct Peer {
    pub node: Arc<Node>,
    pub keys: ExtendedPrivateKey,
    pub events: broadcast::Receiver<NodeEvent>,
}

impl Peer {
    pub fn xpub(&self) -> ExtendedPublicKey {
        self.node.public_identifier()
    }

    pub fn fb_address(&self) -> Address {
        xkey_kth_address(&self.xpub(), 0).unwrap()
    }

    /// Next event matching `pred`, skipping others.
    pub async fn wait_for(&mut self, pred: impl Fn(&NodeEvent) -> bool) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

/// Two connected nodes serving their inboxes.
pub fn pair(seed: u64) -> (Peer, Peer) {
    pair_with_chain(seed, None)
}

pub fn pair_with_chain(seed: u64, chain: Option<Arc<MockChain>>) -> (Peer, Peer) {
    pair_with_chains(seed, chain.clone(), chain)
}

/// Like [pair_with_chain] but each side may see a different chain, or none.
pub fn pair_with_chains(
    seed: u64,
    alice_chain: Option<Arc<MockChain>>,
    bob_chain: Option<Arc<MockChain>>,
) -> (Peer, Peer) {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(seed);
    let net = MemoryNetwork::new();
    let apps = Arc::new(
        AppRegistry::new()
            .register(TRANSFER_APP, Arc::new(UnidirectionalTransferApp))
            .register(REFUND_APP, Arc::new(CoinBalanceRefundApp)),
    );

    let mut peer = |prefix: &str, chain: Option<Arc<MockChain>>| {
        let keys = ExtendedPrivateKey::random(&mut rng);
        let (transport, inbox) = net.connect(keys.neuter());
        let mut node = Node::new(
            config(prefix),
            keys.clone(),
            apps.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(transport),
        );
        if let Some(chain) = &chain {
            node = node.with_chain_provider(chain.clone());
        }
        let node = Arc::new(node);
        let events = node.subscribe();
        tokio::spawn(node.clone().run_inbox(inbox));
        Peer { node, keys, events }
    };
    let alice = peer("alice", alice_chain);
    let bob = peer("bob", bob_chain);
    (alice, bob)
}

/// Create the channel on both sides and credit both free balances.
pub async fn open_channel(alice: &Peer, bob: &Peer, alice_funds: u64, bob_funds: u64) -> Address {
    let owners = vec![alice.xpub(), bob.xpub()];
    let multisig = alice
        .node
        .create_channel(CreateChannelRequest {
            owners: owners.clone(),
        })
        .await
        .unwrap()
        .multisig_address;
    let again = bob
        .node
        .create_channel(CreateChannelRequest { owners })
        .await
        .unwrap()
        .multisig_address;
    assert_eq!(multisig, again);

    let token = CONVENTION_FOR_ETH_TOKEN_ADDRESS;
    let increments: TokenIndexedBalances = [(
        token,
        [
            (alice.fb_address(), U256::from(alice_funds)),
            (bob.fb_address(), U256::from(bob_funds)),
        ]
        .into_iter()
        .collect(),
    )]
    .into_iter()
    .collect();
    for peer in [alice, bob] {
        let store = peer.node.store();
        let channel = store
            .require_state_channel(&multisig)
            .await
            .unwrap()
            .increment_free_balance(&increments)
            .unwrap();
        store.save_state_channel(&channel).await.unwrap();
    }
    multisig
}

pub fn transfer_state(payer: Address, payee: Address, amount: u64) -> Value {
    json!({
        "transfers": [
            {"to": payer, "amount": U256::from(amount)},
            {"to": payee, "amount": U256::zero()}
        ],
        "turnNum": "0x0"
    })
}

/// `from` pays up to `amount` to `to` through a transfer app.
pub fn payment_request(from: &Peer, to: &Peer, amount: u64) -> ProposeInstallRequest {
    ProposeInstallRequest {
        proposed_to_identifier: to.xpub(),
        app_definition: TRANSFER_APP,
        abi_encodings: AbiEncodings {
            state_encoding: UnidirectionalTransferApp::STATE_ENCODING.into(),
            action_encoding: Some(UnidirectionalTransferApp::ACTION_ENCODING.into()),
        },
        initial_state: transfer_state(from.fb_address(), to.fb_address(), amount),
        outcome_type: OutcomeType::SingleAssetTwoPartyCoinTransfer,
        initiator_deposit: U256::from(amount),
        initiator_deposit_token_address: None,
        responder_deposit: U256::zero(),
        responder_deposit_token_address: None,
        timeout: 100,
    }
}

/// Open a channel funded 100/100 with a payment app from Alice to Bob
/// holding `amount`, installed on both sides.
pub async fn installed_payment(alice: &mut Peer, bob: &mut Peer, amount: u64) -> (Address, Hash) {
    let multisig = open_channel(alice, bob, 100, 100).await;
    let app = alice
        .node
        .propose_install(payment_request(alice, bob, amount))
        .await
        .unwrap()
        .app_identity_hash;
    bob.wait_for(|e| matches!(e, NodeEvent::ProposeInstall { .. }))
        .await;
    bob.node
        .install(AppInstanceRequest {
            app_identity_hash: app,
        })
        .await
        .unwrap();
    alice
        .wait_for(|e| matches!(e, NodeEvent::Install { .. }))
        .await;
    (multisig, app)
}

pub async fn free_balance(peer: &Peer, multisig: Address) -> (U256, U256, U256) {
    let channel = peer.node.store().require_state_channel(&multisig).await.unwrap();
    let fb = channel.get_free_balance_state().unwrap();
    let [a, b] = *channel.user_neutered_extended_keys();
    let token = CONVENTION_FOR_ETH_TOKEN_ADDRESS;
    let a = fb.balance_of(&token, &xkey_kth_address(&a, 0).unwrap());
    let b = fb.balance_of(&token, &xkey_kth_address(&b, 0).unwrap());
    (a, b, a + b)
}

/// Chain where every account starts out holding `balance` and sent value is
/// added to the receiving account. Fails the first `failures` sends and the
/// first `confirmation_failures` waits, and deploys code at `deploys_to` when
/// the proxy factory is called.
pub struct MockChain {
    pub balance: U256,
    failures: AtomicU32,
    confirmation_failures: AtomicU32,
    reject: bool,
    counter: AtomicU8,
    pub sent: Mutex<Vec<TransactionRequest>>,
    pub confirmation_waits: AtomicU32,
    held: Mutex<HashMap<Address, U256>>,
    code: Mutex<HashMap<Address, Vec<u8>>>,
    deploys_to: Mutex<Option<Address>>,
}

impl MockChain {
    pub fn new(balance: u64) -> Self {
        Self {
            balance: U256::from(balance),
            failures: AtomicU32::new(0),
            confirmation_failures: AtomicU32::new(0),
            reject: false,
            counter: AtomicU8::new(0),
            sent: Mutex::new(Vec::new()),
            confirmation_waits: AtomicU32::new(0),
            held: Mutex::new(HashMap::new()),
            code: Mutex::new(HashMap::new()),
            deploys_to: Mutex::new(None),
        }
    }

    pub fn failing(mut self, failures: u32) -> Self {
        self.failures = AtomicU32::new(failures);
        self
    }

    pub fn failing_confirmations(self, failures: u32) -> Self {
        self.confirmation_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    pub fn deploys_to(self, multisig: Address) -> Self {
        *self.deploys_to.lock() = Some(multisig);
        self
    }

    pub fn sent(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn balance_of(&self, address: Address) -> U256 {
        self.held.lock().get(&address).copied().unwrap_or(self.balance)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ChainProvider for MockChain {
    async fn get_balance(&self, address: Address, _: Address) -> Result<U256, ChainError> {
        Ok(self.balance_of(address))
    }

    async fn get_code(&self, address: Address) -> Result<Vec<u8>, ChainError> {
        Ok(self.code.lock().get(&address).cloned().unwrap_or_default())
    }

    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        Ok(U256::one())
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<Hash, ChainError> {
        if self.reject {
            return Err(ChainError::Rejected("user declined".into()));
        }
        if take_one(&self.failures) {
            return Err(ChainError::Failed("node unavailable".into()));
        }
        if tx.to == network().proxy_factory {
            if let Some(multisig) = *self.deploys_to.lock() {
                self.code.lock().insert(multisig, vec![0x60]);
            }
        }
        if !tx.value.is_zero() {
            let mut held = self.held.lock();
            let balance = held.entry(tx.to).or_insert(self.balance);
            *balance = *balance + tx.value;
        }
        self.sent.lock().push(tx);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Hash([n; 32]))
    }

    async fn wait_for_confirmations(&self, _: Hash, _: u64) -> Result<(), ChainError> {
        self.confirmation_waits.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.confirmation_failures) {
            return Err(ChainError::Failed("receipt not found".into()));
        }
        Ok(())
    }
}
