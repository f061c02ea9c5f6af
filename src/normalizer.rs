//! Event normalization from raw payloads to typed domain events
//!
//! Malformed or irrelevant payloads are dropped (`None`), never errors.
//! Numeric fields are read defensively: hex strings, decimal strings and JSON
//! numbers are all accepted and anything unreadable becomes zero.

use crate::transport::RawEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable identity of a real-world occurrence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityKey {
    /// Block hash, lower-cased
    Block { hash: String },
    /// A validator proposing a given height
    Proposal { author_id: String, block_number: u64 },
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Block { hash } => write!(f, "block:{}", hash),
            IdentityKey::Proposal {
                author_id,
                block_number,
            } => write!(f, "proposal:{}@{}", author_id, block_number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockObserved {
    pub hash: String,
    pub number: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub timestamp: u64,
    pub tx_count: u64,
    pub miner: Option<String>,
    pub base_fee_per_gas: Option<u64>,
}

impl BlockObserved {
    /// gas_used / gas_limit, zero when the limit is unknown
    pub fn gas_utilization(&self) -> f64 {
        if self.gas_limit == 0 {
            0.0
        } else {
            self.gas_used as f64 / self.gas_limit as f64
        }
    }

    pub fn short_hash(&self) -> String {
        if self.hash.len() > 10 {
            format!("{}...", &self.hash[..10])
        } else {
            self.hash.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    BlockObserved(BlockObserved),
    ValidatorProposal { author_id: String, block_number: u64 },
    Heartbeat { timestamp: Option<u64> },
    /// Upstream-announced connection status (an explicit "open" signal)
    ConnectionNotice { status: String },
}

impl DomainEvent {
    /// Identity used for deduplication; `None` for events that are never
    /// held in the window
    pub fn identity(&self) -> Option<IdentityKey> {
        match self {
            DomainEvent::BlockObserved(block) => Some(IdentityKey::Block {
                hash: block.hash.to_lowercase(),
            }),
            DomainEvent::ValidatorProposal {
                author_id,
                block_number,
            } => Some(IdentityKey::Proposal {
                author_id: author_id.clone(),
                block_number: *block_number,
            }),
            DomainEvent::Heartbeat { .. } | DomainEvent::ConnectionNotice { .. } => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::BlockObserved(_) => EventKind::Block,
            DomainEvent::ValidatorProposal { .. } => EventKind::Proposal,
            DomainEvent::Heartbeat { .. } => EventKind::Heartbeat,
            DomainEvent::ConnectionNotice { .. } => EventKind::Connection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Block,
    Proposal,
    Heartbeat,
    Connection,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Block => "block",
            EventKind::Proposal => "proposal",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Connection => "connection",
        }
    }
}

/// Parse a raw event into a domain event
///
/// The wire tag wins over the payload's own `type` field when both exist.
pub fn normalize(raw: &RawEvent) -> Option<DomainEvent> {
    let value: Value = match serde_json::from_str(&raw.payload) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Dropping raw event #{}: invalid JSON ({})", raw.seq, e);
            return None;
        }
    };

    let tag = raw
        .tag
        .clone()
        .or_else(|| value.get("type").and_then(Value::as_str).map(str::to_string));

    let Some(tag) = tag else {
        log::debug!("Dropping raw event #{}: no type tag", raw.seq);
        return None;
    };

    let event = match tag.as_str() {
        "block" | "new_block" | "block_observed" | "newHeads" => {
            parse_block(unwrap_envelope(&value)).map(DomainEvent::BlockObserved)
        }
        "block_proposal" | "validator_proposal" => parse_proposal(unwrap_envelope(&value)),
        "heartbeat" => Some(DomainEvent::Heartbeat {
            timestamp: value.get("timestamp").map(parse_quantity),
        }),
        "connection" => Some(DomainEvent::ConnectionNotice {
            status: first_string(&value, &["status", "state", "message"])
                .unwrap_or_else(|| "connected".to_string()),
        }),
        other => {
            log::debug!("Dropping raw event #{}: unrecognized type '{}'", raw.seq, other);
            return None;
        }
    };

    if event.is_none() {
        log::debug!("Dropping raw event #{}: malformed '{}' payload", raw.seq, tag);
    }
    event
}

/// Messages may carry the body directly or nested under a known key
fn unwrap_envelope(value: &Value) -> &Value {
    for key in ["block", "data", "result", "payload"] {
        if let Some(inner) = value.get(key).filter(|v| v.is_object()) {
            return inner;
        }
    }
    value
}

fn parse_block(value: &Value) -> Option<BlockObserved> {
    let hash = value.get("hash").and_then(Value::as_str)?;
    if !is_hex_hash(hash) {
        return None;
    }

    let tx_count = match value.get("transactions") {
        Some(Value::Array(txs)) => txs.len() as u64,
        _ => first_quantity(value, &["txCount", "transactionCount", "tx_count"]),
    };

    Some(BlockObserved {
        hash: hash.to_lowercase(),
        number: first_quantity(value, &["number", "blockNumber", "height"]),
        gas_used: first_quantity(value, &["gasUsed", "gas_used"]),
        gas_limit: first_quantity(value, &["gasLimit", "gas_limit"]),
        timestamp: first_quantity(value, &["timestamp"]),
        tx_count,
        miner: first_string(value, &["miner", "author", "proposer"]),
        base_fee_per_gas: value.get("baseFeePerGas").map(parse_quantity),
    })
}

fn parse_proposal(value: &Value) -> Option<DomainEvent> {
    let author_id = first_string(value, &["authorId", "author_id", "author", "validator", "proposer"])?;
    if author_id.is_empty() {
        return None;
    }

    Some(DomainEvent::ValidatorProposal {
        author_id,
        block_number: first_quantity(value, &["blockNumber", "block_number", "number"]),
    })
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn first_quantity(value: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|key| value.get(*key))
        .map(parse_quantity)
        .unwrap_or(0)
}

/// `0x`-prefixed hex with an even number of digits
fn is_hex_hash(hash: &str) -> bool {
    match hash.strip_prefix("0x").or_else(|| hash.strip_prefix("0X")) {
        Some(digits) if !digits.is_empty() => hex::decode(digits).is_ok(),
        _ => false,
    }
}

/// Read a numeric field from whatever encoding the source uses
///
/// Accepts JSON numbers, `0x` hex strings and decimal strings. Invalid
/// encodings yield 0.
pub fn parse_quantity(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => parse_quantity_str(s),
        _ => 0,
    }
}

pub fn parse_quantity_str(s: &str) -> u64 {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => 0,
        Some(digits) => u64::from_str_radix(digits, 16).unwrap_or(0),
        None => s.parse::<u64>().unwrap_or(0),
    }
}
