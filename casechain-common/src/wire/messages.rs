use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::parse::{decode_batch, Batch, Fields, FromWire, ParseError};
use crate::{
    crypto::hash::compute_hash,
    env::{
        block::Block,
        peer::{Peer, PeerRole},
        pool::PoolId,
        vote::Decision,
    },
    utils::time::canonical,
};

/// A pool entry as shipped to a delegate for voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: PoolId,
    pub case_id: String,
    pub sequence_number: u64,
    pub metadata: String,
    pub log: String,
    #[serde(with = "canonical")]
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

impl Candidate {
    pub fn compute_hash(&self) -> String {
        compute_hash(
            &self.case_id,
            self.sequence_number,
            &self.metadata,
            &self.log,
            &self.timestamp,
            &self.previous_hash,
        )
    }
}

impl FromWire for Candidate {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            id: PoolId(f.u64("id")?),
            case_id: f.string("case_id")?,
            sequence_number: f.u64("sequence_number")?,
            metadata: f.string("metadata")?,
            log: f.string("log")?,
            timestamp: f.timestamp("timestamp")?,
            previous_hash: f.string("previous_hash")?,
            hash: f.string("hash")?,
        })
    }
}

/// Coordinator → voter: `{"Pool": [candidate, ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPayload {
    #[serde(rename = "Pool")]
    pub pool: Vec<Candidate>,
}

impl DispatchPayload {
    pub fn single(candidate: Candidate) -> Self {
        Self { pool: vec![candidate] }
    }

    /// Decodes the envelope strictly and its elements leniently.
    pub fn decode(value: &Value) -> Result<Batch<Candidate>, ParseError> {
        let f = Fields::of(value)?;
        Ok(decode_batch(f.array("Pool")?))
    }
}

/// Voter's answer to a dispatch: how many candidates were accepted and how
/// many were dropped as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAck {
    #[serde(rename = "Accepted")]
    pub accepted: usize,
    #[serde(rename = "Errors")]
    pub errors: usize,
}

/// Voter → coordinator: `{"pool_id": .., "response": 0|1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReply {
    pub pool_id: PoolId,
    pub response: Decision,
}

impl FromWire for VoteReply {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            pool_id: PoolId(f.u64("pool_id")?),
            response: Decision::from_flag(f.flag("response")?),
        })
    }
}

/// One case in a chain summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseHead {
    pub id: String,
    pub length: u64,
    pub last: String,
}

impl FromWire for CaseHead {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            id: f.string("id")?,
            length: f.u64("length")?,
            last: f.string("last")?,
        })
    }
}

/// Peer → peer: `{"Blocks": [{"id", "length", "last"}, ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaseSummary {
    #[serde(rename = "Blocks")]
    pub blocks: Vec<CaseHead>,
}

impl CaseSummary {
    pub fn decode(value: &Value) -> Result<Batch<CaseHead>, ParseError> {
        let f = Fields::of(value)?;
        Ok(decode_batch(f.array("Blocks")?))
    }
}

/// Whether a suffix requester stores full blocks or only heads.
/// Travels as the `last` flag: `0` full, `1` heads only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SyncDepth {
    Full,
    HeadsOnly,
}

impl From<SyncDepth> for u8 {
    fn from(d: SyncDepth) -> Self {
        match d {
            SyncDepth::Full => 0,
            SyncDepth::HeadsOnly => 1,
        }
    }
}

impl TryFrom<u8> for SyncDepth {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SyncDepth::Full),
            1 => Ok(SyncDepth::HeadsOnly),
            other => Err(format!("invalid sync depth {other}")),
        }
    }
}

/// `{"id": case_id, "length": local_length, "last": 0|1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixRequest {
    pub id: String,
    pub length: u64,
    pub last: SyncDepth,
}

impl FromWire for SuffixRequest {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        let last = if f.flag("last")? { SyncDepth::HeadsOnly } else { SyncDepth::Full };
        Ok(Self {
            id: f.string("id")?,
            length: f.u64("length")?,
            last,
        })
    }
}

/// Head-only block record served to lightweight clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRecord {
    pub id: String,
    pub previous_hash: String,
    pub hash: String,
    pub sequence_number: u64,
}

impl From<&Block> for HeadRecord {
    fn from(block: &Block) -> Self {
        Self {
            id: block.case_id.clone(),
            previous_hash: block.previous_hash.clone(),
            hash: block.hash.clone(),
            sequence_number: block.sequence_number,
        }
    }
}

impl FromWire for HeadRecord {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            id: f.string("id")?,
            previous_hash: f.string("previous_hash")?,
            hash: f.string("hash")?,
            sequence_number: f.u64("sequence_number")?,
        })
    }
}

impl FromWire for Block {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            case_id: f.string("case_id")?,
            sequence_number: f.u64("sequence_number")?,
            previous_hash: f.string("previous_hash")?,
            metadata: f.string("metadata")?,
            log: f.string("log")?,
            timestamp: f.timestamp("timestamp")?,
            hash: f.string("hash")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuffixBlocks {
    Full(Vec<Block>),
    Heads(Vec<HeadRecord>),
}

impl SuffixBlocks {
    pub fn len(&self) -> usize {
        match self {
            SuffixBlocks::Full(blocks) => blocks.len(),
            SuffixBlocks::Heads(heads) => heads.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `{"Blocks": [...], "length": N, "Count": M}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixResponse {
    #[serde(rename = "Blocks")]
    pub blocks: SuffixBlocks,
    pub length: u64,
    #[serde(rename = "Count")]
    pub count: usize,
}

impl SuffixResponse {
    pub fn new(blocks: SuffixBlocks, length: u64) -> Self {
        let count = blocks.len();
        Self { blocks, length, count }
    }

    /// Decodes a response to a request of the given depth. Malformed block
    /// records are dropped and reported in the returned error count.
    pub fn decode(value: &Value, depth: SyncDepth) -> Result<(Self, usize), ParseError> {
        let f = Fields::of(value)?;
        let raw = f.array("Blocks")?;
        let length = f.u64("length")?;
        let (blocks, errors) = match depth {
            SyncDepth::Full => {
                let batch = decode_batch::<Block>(raw);
                let errors = batch.error_count();
                (SuffixBlocks::Full(batch.items), errors)
            }
            SyncDepth::HeadsOnly => {
                let batch = decode_batch::<HeadRecord>(raw);
                let errors = batch.error_count();
                (SuffixBlocks::Heads(batch.items), errors)
            }
        };
        Ok((Self::new(blocks, length), errors))
    }
}

/// Finalizer push: the new head of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnnouncement {
    pub case_id: String,
    pub previous_hash: String,
    pub hash: String,
    pub sequence_number: u64,
}

impl From<&Block> for BlockAnnouncement {
    fn from(block: &Block) -> Self {
        Self {
            case_id: block.case_id.clone(),
            previous_hash: block.previous_hash.clone(),
            hash: block.hash.clone(),
            sequence_number: block.sequence_number,
        }
    }
}

impl FromWire for BlockAnnouncement {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            case_id: f.string("case_id")?,
            previous_hash: f.string("previous_hash")?,
            hash: f.string("hash")?,
            sequence_number: f.u64("sequence_number")?,
        })
    }
}

/// A new action for a case, as submitted by a client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub case_id: String,
    pub metadata: String,
    pub log: String,
}

impl FromWire for SubmitRequest {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            case_id: f.string("case_id")?,
            metadata: f.string("metadata")?,
            log: f.string("log")?,
        })
    }
}

/// Liveness answer of `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub node: String,
    pub role: PeerRole,
}

impl FromWire for Peer {
    fn from_wire(value: &Value) -> Result<Self, ParseError> {
        let f = Fields::of(value)?;
        Ok(Self {
            address: f.string("ip_address")?,
            port: f.u16("port")?,
            role: f.parsed::<PeerRole>("role")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::now;
    use serde_json::json;

    fn candidate() -> Candidate {
        let timestamp = now();
        Candidate {
            id: PoolId(7),
            case_id: "C1".into(),
            sequence_number: 0,
            metadata: "m1".into(),
            log: "l1".into(),
            timestamp,
            previous_hash: String::new(),
            hash: compute_hash("C1", 0, "m1", "l1", &timestamp, ""),
        }
    }

    #[test]
    fn test_dispatch_payload_shape() {
        let json = serde_json::to_value(DispatchPayload::single(candidate())).unwrap();
        let first = &json["Pool"][0];
        for field in ["id", "case_id", "sequence_number", "metadata", "log", "timestamp", "previous_hash", "hash"] {
            assert!(first.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_dispatch_decode_drops_malformed_elements() {
        let good = serde_json::to_value(candidate()).unwrap();
        let payload = json!({"Pool": [good, {"id": 3, "case_id": "C2"}, "junk"]});
        let batch = DispatchPayload::decode(&payload).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.error_count(), 2);
        assert_eq!(batch.items[0].compute_hash(), batch.items[0].hash);
    }

    #[test]
    fn test_dispatch_decode_requires_envelope() {
        assert_eq!(
            DispatchPayload::decode(&json!({"Blocks": []})).unwrap_err(),
            ParseError::MissingField("Pool")
        );
    }

    #[test]
    fn test_vote_reply_accepts_bool_response() {
        let reply = VoteReply::from_wire(&json!({"pool_id": 4, "response": true})).unwrap();
        assert_eq!(reply.response, Decision::Agree);
        let json = serde_json::to_value(reply).unwrap();
        assert_eq!(json, json!({"pool_id": 4, "response": 1}));
    }

    #[test]
    fn test_suffix_request_last_flag() {
        let req = SuffixRequest::from_wire(&json!({"id": "C1", "length": 2, "last": 1})).unwrap();
        assert_eq!(req.last, SyncDepth::HeadsOnly);
        assert_eq!(serde_json::to_value(&req).unwrap()["last"], 1);
    }

    #[test]
    fn test_suffix_response_decodes_by_depth() {
        let heads = SuffixResponse::new(
            SuffixBlocks::Heads(vec![HeadRecord {
                id: "C1".into(),
                previous_hash: String::new(),
                hash: "h0".into(),
                sequence_number: 0,
            }]),
            1,
        );
        let json = serde_json::to_value(&heads).unwrap();
        assert_eq!(json["Count"], 1);

        let (decoded, errors) = SuffixResponse::decode(&json, SyncDepth::HeadsOnly).unwrap();
        assert_eq!(errors, 0);
        assert_eq!(decoded, heads);

        // head records are not full blocks
        let (as_full, errors) = SuffixResponse::decode(&json, SyncDepth::Full).unwrap();
        assert_eq!(errors, 1);
        assert!(as_full.blocks.is_empty());
    }
}
