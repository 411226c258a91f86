//! Blockchain checkpoints: a `(height, hash)` pair certifying a point on
//! the proof-of-work chain, broadcast as DNS TXT payloads.

pub mod daemon;
pub mod producer;
pub mod publish;
pub mod zmq;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, error, info};

use crate::error::{HighwayError, Result};

/// A 32-byte block id, shown and serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| HighwayError::InvalidCheckpoint("invalid hash hex".into()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HighwayError::InvalidCheckpoint("hash must be 32 bytes".into()))?;
        Ok(BlockHash(bytes))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHash::from_hex(&s).map_err(D::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u64,
    pub id: BlockHash,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, self.id)
    }
}

impl FromStr for Checkpoint {
    type Err = HighwayError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim_matches(|c: char| c == '"' || c.is_whitespace());
        let (height, id) = s
            .split_once(':')
            .ok_or_else(|| HighwayError::InvalidCheckpoint(s.into()))?;
        let height = height
            .parse::<u64>()
            .map_err(|_| HighwayError::InvalidCheckpoint(s.into()))?;
        let id = BlockHash::from_hex(id)?;
        Ok(Checkpoint { height, id })
    }
}

/// An ordered checkpoint list: strictly descending by height, ids non-zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Checkpoints(pub Vec<Checkpoint>);

impl Checkpoints {
    pub fn validate(&self) -> Result<()> {
        if !self.sorted() {
            return Err(HighwayError::InvalidCheckpoint(
                "checkpoints must be sorted".into(),
            ));
        }
        let mut last_height = None;
        for checkpoint in &self.0 {
            if last_height == Some(checkpoint.height) {
                return Err(HighwayError::InvalidCheckpoint(
                    "checkpoints must not be the same height as each other".into(),
                ));
            }
            last_height = Some(checkpoint.height);

            if checkpoint.id.is_zero() {
                return Err(HighwayError::InvalidCheckpoint(
                    "checkpoints must have an id".into(),
                ));
            }
        }
        Ok(())
    }

    fn sorted(&self) -> bool {
        self.0.windows(2).all(|w| w[0].height >= w[1].height)
    }

    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| b.height.cmp(&a.height));
    }
}

/// Producer-side state file, format-compatible with the blockchain daemon's
/// own checkpoint file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashlines: Vec<Hashline>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Hashline {
    pub hash: BlockHash,
    pub height: u64,
}

/// Load the highest checkpoint from the state file.
///
/// A missing or unparseable file is tolerated (the producer starts fresh);
/// a file that parses but violates the checkpoint invariants is fatal.
pub fn load_checkpoint_state(path: &Path) -> Result<Option<Checkpoint>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            error!("Error reading state file: {}", e);
            return Ok(None);
        }
    };

    let state: CheckpointState = match serde_json::from_slice(&data) {
        Ok(state) => state,
        Err(e) => {
            error!("Error parsing state file: {}", e);
            return Ok(None);
        }
    };

    let mut checkpoints = Checkpoints(
        state
            .hashlines
            .iter()
            .map(|line| Checkpoint {
                height: line.height,
                id: line.hash,
            })
            .collect(),
    );
    checkpoints.sort();
    checkpoints
        .validate()
        .map_err(|e| HighwayError::ConfigInvalid(e.to_string()))?;

    let Some(&checkpoint) = checkpoints.0.first() else {
        return Ok(None);
    };
    info!(
        "Loaded checkpoint from state file: height={} id={}",
        checkpoint.height, checkpoint.id
    );
    Ok(Some(checkpoint))
}

/// Atomically rewrite the state file with the current checkpoint.
pub fn write_checkpoint_state(path: &Path, checkpoint: Checkpoint) -> Result<()> {
    let state = CheckpointState {
        hashlines: vec![Hashline {
            hash: checkpoint.id,
            height: checkpoint.height,
        }],
    };
    let blob = serde_json::to_vec_pretty(&state)
        .map_err(|e| HighwayError::StateFile(e.to_string()))?;

    let mut temp_path = path.to_path_buf().into_os_string();
    temp_path.push("_");
    let temp_path = std::path::PathBuf::from(temp_path);

    std::fs::write(&temp_path, &blob)?;
    std::fs::rename(&temp_path, path)?;
    debug!("Saved checkpoint state file");
    Ok(())
}
