use crate::kv::KvType;
use crate::tree::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    /// The raw value does not match the format of its type.
    #[error("Cannot parse '{value}' as {kv_type} with format '{format}': {reason}")]
    Parse {
        kv_type: KvType,
        format: String,
        value: String,
        reason: String,
    },

    #[error("Node {node} has no metadata key '{key}'")]
    UnknownKey { node: NodeId, key: String },

    /// A descendant write failed mid-walk. Instances written before the
    /// failure stay in place; re-running the propagation is safe.
    #[error("Propagation failed at node {node}: {source}")]
    Propagation {
        node: NodeId,
        #[source]
        source: Box<KvError>,
    },

    #[error("'{format}' is not a valid {kv_type} format")]
    InvalidFormat { kv_type: KvType, format: String },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KvError {
    pub(crate) fn parse(
        kv_type: KvType,
        format: &str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        KvError::Parse {
            kv_type,
            format: format.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Wraps a failure that happened while writing to `node` during a subtree walk.
    ///
    /// An error that is already a propagation error keeps its original node.
    pub(crate) fn at_node(self, node: NodeId) -> Self {
        match self {
            err @ KvError::Propagation { .. } => err,
            other => KvError::Propagation {
                node,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, KvError>;
