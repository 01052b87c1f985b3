//! Transaction payloads.
//!
//! Every transaction that travels through the ordering engine is a
//! [`Transaction`]: the originating node, whether the submitter deliberately
//! broke its signature, and a [`TransactionBody`] sum type that the replay
//! state machine matches on exhaustively.

use crate::{ControlType, EntityKey, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload type as configured in workload distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadType {
    /// Opaque bytes with a per-origin sequence number.
    Bytes,
    /// Bytes that are never inspected.
    Dummy,
    EntityCreate,
    EntityUpdate,
    EntityTransfer,
    EntityDelete,
    /// One of create/update/transfer/delete, picked per payload.
    EntityAssorted,
    RecordCreate,
    RecordUpdate,
    RecordTransfer,
    RecordDelete,
    /// One of the record operations, picked per payload.
    RecordAssorted,
    TreeCreate,
    TreeUpdate,
    /// Ask every node to write its expected map to disk.
    SaveExpectedMap,
    Control,
    Freeze,
    SimpleAction,
}

impl PayloadType {
    /// Category used for throttling and counters.
    pub fn category(self) -> PayloadCategory {
        match self {
            PayloadType::Bytes | PayloadType::Dummy => PayloadCategory::Bytes,
            PayloadType::EntityCreate
            | PayloadType::EntityUpdate
            | PayloadType::EntityTransfer
            | PayloadType::EntityDelete
            | PayloadType::EntityAssorted => PayloadCategory::Entity,
            PayloadType::RecordCreate
            | PayloadType::RecordUpdate
            | PayloadType::RecordTransfer
            | PayloadType::RecordDelete
            | PayloadType::RecordAssorted => PayloadCategory::Record,
            PayloadType::TreeCreate | PayloadType::TreeUpdate => PayloadCategory::Tree,
            PayloadType::SaveExpectedMap | PayloadType::SimpleAction => PayloadCategory::Activity,
            PayloadType::Control => PayloadCategory::Control,
            PayloadType::Freeze => PayloadCategory::Freeze,
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Coarse payload category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadCategory {
    Bytes,
    Entity,
    Record,
    Tree,
    Activity,
    Control,
    Freeze,
}

impl fmt::Display for PayloadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadCategory::Bytes => "bytes",
            PayloadCategory::Entity => "entity",
            PayloadCategory::Record => "record",
            PayloadCategory::Tree => "tree",
            PayloadCategory::Activity => "activity",
            PayloadCategory::Control => "control",
            PayloadCategory::Freeze => "freeze",
        };
        f.write_str(name)
    }
}

/// Kind of entity stored in the entity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Plain balance-carrying account.
    Account,
    /// Account that also keeps a queue of expiring transaction records.
    Queue,
}

/// Entity lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LifecycleOp {
    Create {
        key: EntityKey,
        kind: EntityKind,
        balance: u64,
        /// Entity is purged (and counted as deleted) this many seconds after
        /// creation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lease_secs: Option<u64>,
    },
    Update {
        key: EntityKey,
        balance: u64,
    },
    Transfer {
        from: EntityKey,
        to: EntityKey,
        amount: u64,
    },
    Delete {
        key: EntityKey,
    },
}

impl LifecycleOp {
    /// The entity this operation is primarily about.
    pub fn primary_key(&self) -> EntityKey {
        match self {
            LifecycleOp::Create { key, .. }
            | LifecycleOp::Update { key, .. }
            | LifecycleOp::Delete { key } => *key,
            LifecycleOp::Transfer { from, .. } => *from,
        }
    }

    /// All entities touched by this operation.
    pub fn keys(&self) -> Vec<EntityKey> {
        match self {
            LifecycleOp::Transfer { from, to, .. } => vec![*from, *to],
            other => vec![other.primary_key()],
        }
    }

    /// Short operation name for logs and counters.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleOp::Create { .. } => "create",
            LifecycleOp::Update { .. } => "update",
            LifecycleOp::Transfer { .. } => "transfer",
            LifecycleOp::Delete { .. } => "delete",
        }
    }
}

/// Operation on the tree/contract map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TreeOp {
    Create {
        key: EntityKey,
        #[serde(with = "crate::codec::hex_bytes")]
        value: Vec<u8>,
    },
    Update {
        key: EntityKey,
        #[serde(with = "crate::codec::hex_bytes")]
        value: Vec<u8>,
    },
}

impl TreeOp {
    /// The leaf this operation writes.
    pub fn key(&self) -> EntityKey {
        match self {
            TreeOp::Create { key, .. } | TreeOp::Update { key, .. } => *key,
        }
    }
}

/// Side effects that do not touch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    SaveExpectedMap,
}

/// Fault-injection actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleAction {
    /// Corrupt one entity on the receiving node so its state diverges.
    CauseDivergence,
}

/// Body of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionBody {
    Bytes {
        /// Per-origin sequence number, checked on replay.
        seq: u64,
        #[serde(with = "crate::codec::hex_bytes")]
        data: Vec<u8>,
    },
    Dummy,
    Lifecycle(LifecycleOp),
    Tree(TreeOp),
    Activity {
        activity: ActivityKind,
    },
    Control {
        control: ControlType,
    },
    Freeze {
        /// Seconds after consensus time at which the freeze begins.
        start_after_secs: u64,
    },
    SimpleAction {
        action: SimpleAction,
    },
}

/// A transaction as generated by a submitter and replayed by every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Node that generated the transaction.
    pub origin: NodeId,
    /// The submitter deliberately corrupted the signature.
    #[serde(default)]
    pub invalid_sig: bool,
    pub body: TransactionBody,
    /// Filler that brings the encoded size up to the configured payload size.
    #[serde(default, with = "crate::codec::hex_bytes")]
    pub padding: Vec<u8>,
}

impl Transaction {
    /// Create an unpadded transaction.
    pub fn new(origin: NodeId, body: TransactionBody) -> Self {
        Self {
            origin,
            invalid_sig: false,
            body,
            padding: Vec::new(),
        }
    }

    /// Create a control transaction.
    pub fn control(origin: NodeId, control: ControlType) -> Self {
        Self::new(origin, TransactionBody::Control { control })
    }

    /// Mark the signature as deliberately invalid.
    pub fn with_invalid_sig(mut self, invalid_sig: bool) -> Self {
        self.invalid_sig = invalid_sig;
        self
    }

    /// Attach padding.
    pub fn with_padding(mut self, padding: Vec<u8>) -> Self {
        self.padding = padding;
        self
    }

    /// Payload type implied by the body.
    pub fn payload_type(&self) -> PayloadType {
        match &self.body {
            TransactionBody::Bytes { .. } => PayloadType::Bytes,
            TransactionBody::Dummy => PayloadType::Dummy,
            // Only creates carry the entity kind; the replay side resolves the
            // rest against the entity map.
            TransactionBody::Lifecycle(op) => match op {
                LifecycleOp::Create {
                    kind: EntityKind::Queue,
                    ..
                } => PayloadType::RecordCreate,
                LifecycleOp::Create { .. } => PayloadType::EntityCreate,
                LifecycleOp::Update { .. } => PayloadType::EntityUpdate,
                LifecycleOp::Transfer { .. } => PayloadType::EntityTransfer,
                LifecycleOp::Delete { .. } => PayloadType::EntityDelete,
            },
            TransactionBody::Tree(TreeOp::Create { .. }) => PayloadType::TreeCreate,
            TransactionBody::Tree(TreeOp::Update { .. }) => PayloadType::TreeUpdate,
            TransactionBody::Activity { .. } => PayloadType::SaveExpectedMap,
            TransactionBody::Control { .. } => PayloadType::Control,
            TransactionBody::Freeze { .. } => PayloadType::Freeze,
            TransactionBody::SimpleAction { .. } => PayloadType::SimpleAction,
        }
    }

    /// Control type carried by this transaction, if any.
    pub fn control_type(&self) -> Option<ControlType> {
        match self.body {
            TransactionBody::Control { control } => Some(control),
            _ => None,
        }
    }
}
