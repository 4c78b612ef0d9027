use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{KeyPairError, Keypair, PublicKey};
use crate::hashgraph::participants::Participants;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10;
pub const DEFAULT_CACHE_SIZE: usize = 5000;
pub const DEFAULT_SYNC_LIMIT: usize = 1000;

const ROOT_DIR_NAME: &str = ".hashgraph";

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("ConfigDoesNotExist: '{0}'")]
    DoesNotExist(String),
    #[error("ParsingFailed: {0}")]
    ParsingFailed(#[from] config::ConfigError),
    #[error("TomlError: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("InvalidParticipants: {0}")]
    InvalidParticipants(String),
    #[error("InvalidKey: {0}")]
    InvalidKey(#[from] KeyPairError),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Configuration {
    pub node: NodeConfiguration,
    pub participants: Vec<ParticipantSetting>,
    pub store: StoreConfiguration,
    pub consensus: ConsensusConfiguration,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfiguration {
    /// Participant id of this node, must match the entry with the node's public key.
    pub id: usize,
    /// Base58 encoded secret key.
    pub private_key: String,
    pub heartbeat_interval_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticipantSetting {
    pub id: usize,
    /// Base58 encoded public key.
    pub public_key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreConfiguration {
    /// Window kept per participant and for consensus events and blocks.
    pub cache_size: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConsensusConfiguration {
    /// A peer missing more events than this is sent to fast-forward instead.
    pub sync_limit: usize,
    /// Every how many voting rounds a coin is flipped. Defaults to the number of participants.
    pub coin_round_frequency: Option<usize>,
}

impl Default for StoreConfiguration {
    fn default() -> Self {
        StoreConfiguration {
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl Default for ConsensusConfiguration {
    fn default() -> Self {
        ConsensusConfiguration {
            sync_limit: DEFAULT_SYNC_LIMIT,
            coin_round_frequency: None,
        }
    }
}

impl Configuration {
    pub fn try_load<I: Into<PathBuf>>(path: I) -> Result<Configuration> {
        let path = path.into();
        if !path.exists() {
            return Err(ConfigurationError::DoesNotExist(
                path.to_string_lossy().to_string(),
            ));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        config.try_deserialize().map_err(|err| err.into())
    }

    pub fn try_write<I: Into<PathBuf>>(&self, path: I) -> Result<()> {
        let config = toml::to_string(&self)?;

        let config = format!("#This file is generated by cli\n{config}");

        let mut file = std::fs::File::create(path.into())?;
        file.write_all(config.as_bytes())?;

        Ok(())
    }

    /// Default location of generated configurations, `~/.hashgraph`.
    pub fn root_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(ROOT_DIR_NAME))
            .ok_or_else(|| ConfigurationError::DoesNotExist("home directory".to_string()))
    }

    pub fn keypair(&self) -> Result<Keypair> {
        Ok(Keypair::from_base58(&self.node.private_key)?)
    }

    /// Participant set. Ids must be exactly `0..n` and keys unique.
    pub fn participants(&self) -> Result<Participants> {
        let mut pairs = Vec::with_capacity(self.participants.len());
        for setting in &self.participants {
            let key = PublicKey::from_base58(&setting.public_key)?;
            pairs.push((setting.id, key));
        }
        pairs.sort_by_key(|(id, _)| *id);

        for (expected, (id, _)) in pairs.iter().enumerate() {
            if *id != expected {
                return Err(ConfigurationError::InvalidParticipants(format!(
                    "expected participant id {expected}, found {id}"
                )));
            }
        }
        let unique: BTreeSet<&PublicKey> = pairs.iter().map(|(_, key)| key).collect();
        if unique.len() != pairs.len() {
            return Err(ConfigurationError::InvalidParticipants(
                "duplicate public key".to_string(),
            ));
        }
        let participants = Participants::from_pairs(pairs);
        if participants.is_empty() {
            return Err(ConfigurationError::InvalidParticipants(
                "no participants".to_string(),
            ));
        }
        Ok(participants)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    fn configuration(nodes: usize) -> Configuration {
        let keys: Vec<Keypair> = (0..nodes)
            .map(|i| Keypair::generate(Some(vec![i as u8])))
            .collect();
        Configuration {
            node: NodeConfiguration {
                id: 0,
                private_key: keys[0].to_base58(),
                heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            },
            participants: keys
                .iter()
                .enumerate()
                .map(|(id, key)| ParticipantSetting {
                    id,
                    public_key: key.public_key().to_base58(),
                })
                .collect(),
            store: StoreConfiguration::default(),
            consensus: ConsensusConfiguration {
                sync_limit: 10,
                coin_round_frequency: Some(4),
            },
        }
    }

    #[test]
    fn test_write_then_load() {
        let conf = configuration(3);
        let path = std::env::temp_dir().join(format!("{}.toml", uuid::Uuid::new_v4()));

        conf.try_write(&path).unwrap();
        let loaded = Configuration::try_load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, conf);
        assert_eq!(
            loaded.keypair().unwrap().public_key(),
            conf.participants().unwrap().pub_key(0).copied().unwrap()
        );
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join(format!("{}.toml", uuid::Uuid::new_v4()));
        assert_matches!(
            Configuration::try_load(path),
            Err(ConfigurationError::DoesNotExist(_))
        );
    }

    #[test]
    fn test_participant_ids_must_be_contiguous() {
        let mut conf = configuration(3);
        conf.participants[2].id = 5;
        assert_matches!(
            conf.participants(),
            Err(ConfigurationError::InvalidParticipants(_))
        );
    }

    #[test]
    fn test_duplicate_participant_key() {
        let mut conf = configuration(3);
        conf.participants[2].public_key = conf.participants[1].public_key.clone();
        assert_matches!(
            conf.participants(),
            Err(ConfigurationError::InvalidParticipants(_))
        );
    }

    #[test]
    fn test_participants_ordered_by_id() {
        let mut conf = configuration(3);
        conf.participants.reverse();
        let participants = conf.participants().unwrap();
        let ids: Vec<usize> = participants.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
