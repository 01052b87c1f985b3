//! Builds encoded transactions of a requested payload type.

use crate::entities::{EntityPool, KeySelection};
use crate::GeneratedPayload;
use rand::{Rng, RngCore};
use replaygate_types::{
    encode_transaction, ActivityKind, CodecError, ControlType, EntityKey, EntityKind, KeyPair,
    LifecycleOp, NodeId, PayloadType, SimpleAction, Transaction, TransactionBody, TreeOp,
};
use thiserror::Error;
use tracing::debug;

/// Amount moved by generated transfers.
pub const TRANSFER_AMOUNT: u64 = 1_000;

/// Length of generated tree leaf values.
pub const TREE_VALUE_LEN: usize = 32;

/// Encoded bytes per padding byte: the padding is hex inside the
/// transaction JSON, which is itself hex inside the envelope.
const PADDING_EXPANSION: usize = 4;

/// Shard holding tree leaves, so they never share keys with entities.
const TREE_SHARD: u64 = 1;

/// Errors building a payload.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{0} payloads are issued by the orchestrator")]
    Unsupported(PayloadType),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Settings shared by every generator on a node.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    pub node: NodeId,
    /// Sign envelopes with this node's key.
    pub sign: bool,
    /// Fraction of payloads whose signature is deliberately broken.
    pub invalid_sig_ratio: f64,
    /// Lease attached to created entities.
    pub lease_secs: Option<u64>,
    pub selection: KeySelection,
}

impl FactoryConfig {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            sign: true,
            invalid_sig_ratio: 0.0,
            lease_secs: None,
            selection: KeySelection::default(),
        }
    }

    pub fn with_signing(mut self, sign: bool) -> Self {
        self.sign = sign;
        self
    }

    pub fn with_invalid_sig_ratio(mut self, ratio: f64) -> Self {
        self.invalid_sig_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_lease_secs(mut self, lease_secs: Option<u64>) -> Self {
        self.lease_secs = lease_secs;
        self
    }

    pub fn with_selection(mut self, selection: KeySelection) -> Self {
        self.selection = selection;
        self
    }
}

/// Turns payload types into signed, padded wire bytes and keeps the
/// generator-side view of entities in step.
#[derive(Debug)]
pub struct PayloadFactory {
    config: FactoryConfig,
    signer: Option<KeyPair>,
    entities: EntityPool,
    tree_keys: Vec<EntityKey>,
    next_tree_account: u64,
    next_seq: u64,
}

impl PayloadFactory {
    pub fn new(config: FactoryConfig) -> Self {
        let signer = config.sign.then(|| KeyPair::for_node(config.node.0));
        let entities = EntityPool::new(config.node, 0).with_selection(config.selection);
        Self {
            config,
            signer,
            entities,
            tree_keys: Vec::new(),
            next_tree_account: 1,
            next_seq: 0,
        }
    }

    pub fn node(&self) -> NodeId {
        self.config.node
    }

    pub fn entities(&self) -> &EntityPool {
        &self.entities
    }

    /// Number of tree leaves created so far.
    pub fn tree_len(&self) -> usize {
        self.tree_keys.len()
    }

    /// Build a payload of `payload_type`, padded toward `size` bytes.
    ///
    /// Operations that need an existing entity fall back to a create when
    /// none is live.
    pub fn build<R: RngCore + ?Sized>(
        &mut self,
        payload_type: PayloadType,
        size: usize,
        rng: &mut R,
    ) -> Result<GeneratedPayload, GenerateError> {
        let (body, key) = match payload_type {
            PayloadType::Bytes => {
                let seq = self.next_seq;
                self.next_seq += 1;
                (
                    TransactionBody::Bytes {
                        seq,
                        data: Vec::new(),
                    },
                    None,
                )
            }
            PayloadType::Dummy => (TransactionBody::Dummy, None),
            PayloadType::EntityCreate => self.create(EntityKind::Account),
            PayloadType::EntityUpdate => self.update(EntityKind::Account, rng),
            PayloadType::EntityTransfer => self.transfer(EntityKind::Account, rng),
            PayloadType::EntityDelete => self.delete(EntityKind::Account, rng),
            PayloadType::EntityAssorted => self.assorted(EntityKind::Account, rng),
            PayloadType::RecordCreate => self.create(EntityKind::Queue),
            PayloadType::RecordUpdate => self.update(EntityKind::Queue, rng),
            PayloadType::RecordTransfer => self.transfer(EntityKind::Queue, rng),
            PayloadType::RecordDelete => self.delete(EntityKind::Queue, rng),
            PayloadType::RecordAssorted => self.assorted(EntityKind::Queue, rng),
            PayloadType::TreeCreate => self.tree_create(rng),
            PayloadType::TreeUpdate => self.tree_update(rng),
            PayloadType::SaveExpectedMap => (
                TransactionBody::Activity {
                    activity: ActivityKind::SaveExpectedMap,
                },
                None,
            ),
            PayloadType::SimpleAction => (
                TransactionBody::SimpleAction {
                    action: SimpleAction::CauseDivergence,
                },
                None,
            ),
            PayloadType::Control | PayloadType::Freeze => {
                return Err(GenerateError::Unsupported(payload_type))
            }
        };

        let invalid_sig =
            self.config.invalid_sig_ratio > 0.0 && rng.gen::<f64>() < self.config.invalid_sig_ratio;
        let tx = Transaction::new(self.config.node, body).with_invalid_sig(invalid_sig);
        let bytes = self.encode_padded(tx, size, rng)?;
        Ok(GeneratedPayload::new(bytes, payload_type, key).with_invalid_sig(invalid_sig))
    }

    /// Encoded control transaction from this node.
    pub fn control(&self, control: ControlType) -> Result<Vec<u8>, GenerateError> {
        let tx = Transaction::control(self.config.node, control);
        Ok(encode_transaction(&tx, self.signer.as_ref())?)
    }

    /// Encoded freeze transaction starting `start_after_secs` after consensus.
    pub fn freeze(&self, start_after_secs: u64) -> Result<Vec<u8>, GenerateError> {
        let tx = Transaction::new(self.config.node, TransactionBody::Freeze { start_after_secs });
        Ok(encode_transaction(&tx, self.signer.as_ref())?)
    }

    fn encode_padded<R: RngCore + ?Sized>(
        &self,
        tx: Transaction,
        size: usize,
        rng: &mut R,
    ) -> Result<Vec<u8>, GenerateError> {
        let bytes = encode_transaction(&tx, self.signer.as_ref())?;
        if bytes.len() >= size {
            return Ok(bytes);
        }
        let mut padding = vec![0u8; (size - bytes.len()) / PADDING_EXPANSION];
        if padding.is_empty() {
            return Ok(bytes);
        }
        rng.fill_bytes(&mut padding);
        Ok(encode_transaction(&tx.with_padding(padding), self.signer.as_ref())?)
    }

    fn create(&mut self, kind: EntityKind) -> (TransactionBody, Option<EntityKey>) {
        let (key, balance) = self.entities.create(kind);
        let op = LifecycleOp::Create {
            key,
            kind,
            balance,
            lease_secs: self.config.lease_secs,
        };
        (TransactionBody::Lifecycle(op), Some(key))
    }

    fn update<R: RngCore + ?Sized>(
        &mut self,
        kind: EntityKind,
        rng: &mut R,
    ) -> (TransactionBody, Option<EntityKey>) {
        let Some(key) = self.entities.pick(kind, rng) else {
            return self.create(kind);
        };
        let balance = self
            .entities
            .balance(kind, &key)
            .unwrap_or(0)
            .saturating_mul(2);
        self.entities.set_balance(kind, &key, balance);
        (
            TransactionBody::Lifecycle(LifecycleOp::Update { key, balance }),
            Some(key),
        )
    }

    fn transfer<R: RngCore + ?Sized>(
        &mut self,
        kind: EntityKind,
        rng: &mut R,
    ) -> (TransactionBody, Option<EntityKey>) {
        let Some((from, to)) = self.entities.pick_pair(kind, rng) else {
            return self.create(kind);
        };
        if !self.entities.transfer(kind, &from, &to, TRANSFER_AMOUNT) {
            debug!(%from, %to, "Generated transfer will fail for insufficient balance");
        }
        (
            TransactionBody::Lifecycle(LifecycleOp::Transfer {
                from,
                to,
                amount: TRANSFER_AMOUNT,
            }),
            Some(from),
        )
    }

    fn delete<R: RngCore + ?Sized>(
        &mut self,
        kind: EntityKind,
        rng: &mut R,
    ) -> (TransactionBody, Option<EntityKey>) {
        let Some(key) = self.entities.pick(kind, rng) else {
            return self.create(kind);
        };
        self.entities.remove(kind, &key);
        (
            TransactionBody::Lifecycle(LifecycleOp::Delete { key }),
            Some(key),
        )
    }

    /// Random lifecycle operation once more than two entities are live.
    fn assorted<R: RngCore + ?Sized>(
        &mut self,
        kind: EntityKind,
        rng: &mut R,
    ) -> (TransactionBody, Option<EntityKey>) {
        if self.entities.live(kind) <= 2 {
            return self.create(kind);
        }
        match rng.gen_range(0..4u8) {
            0 => self.create(kind),
            1 => self.update(kind, rng),
            2 => self.transfer(kind, rng),
            _ => self.delete(kind, rng),
        }
    }

    fn tree_create<R: RngCore + ?Sized>(&mut self, rng: &mut R) -> (TransactionBody, Option<EntityKey>) {
        let key = EntityKey::new(TREE_SHARD, self.config.node.0, self.next_tree_account);
        self.next_tree_account += 1;
        self.tree_keys.push(key);
        let mut value = vec![0u8; TREE_VALUE_LEN];
        rng.fill_bytes(&mut value);
        (TransactionBody::Tree(TreeOp::Create { key, value }), Some(key))
    }

    fn tree_update<R: RngCore + ?Sized>(&mut self, rng: &mut R) -> (TransactionBody, Option<EntityKey>) {
        if self.tree_keys.is_empty() {
            return self.tree_create(rng);
        }
        let key = self.tree_keys[rng.gen_range(0..self.tree_keys.len())];
        let mut value = vec![0u8; TREE_VALUE_LEN];
        rng.fill_bytes(&mut value);
        (TransactionBody::Tree(TreeOp::Update { key, value }), Some(key))
    }
}
