//! Chain and world namespaces.
//!
//! A namespace is a chain id plus an optional world (application) address.
//! Its string key names the store schema that holds the namespace's tables
//! and is the lookup key of the schema cache.

use crate::error::ModeError;
use serde::{Deserialize, Serialize};
use std::fmt;

const NAMESPACE_KEY_SEPARATOR: &str = "::";
const MAX_ADDRESS_HEX_DIGITS: usize = 64;

/// What a request needs from its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Multi-table world state: chain id and world address.
    State,
    /// Chain-level state only: chain id. Any world address is ignored.
    ChainState,
    /// One table, which may be chain-level: chain id.
    SingleState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_address: Option<String>,
}

impl Namespace {
    pub fn chain(chain_id: u64) -> Self {
        Self {
            chain_id,
            world_address: None,
        }
    }

    pub fn world(chain_id: u64, world_address: impl Into<String>) -> Self {
        Self {
            chain_id,
            world_address: Some(world_address.into()),
        }
    }

    pub fn is_world(&self) -> bool {
        self.address().is_some()
    }

    /// The world address, with an empty string treated as absent.
    pub fn address(&self) -> Option<&str> {
        self.world_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    pub fn validate(&self, kind: RequestKind) -> Result<(), ModeError> {
        if self.chain_id == 0 {
            return Err(ModeError::InvalidNamespace("chain id is required".into()));
        }
        match (kind, self.address()) {
            (RequestKind::State, None) => Err(ModeError::InvalidNamespace(
                "world address is required for state requests".into(),
            )),
            (RequestKind::ChainState, _) => Ok(()),
            (_, Some(address)) => normalize_address(address).map(|_| ()),
            (_, None) => Ok(()),
        }
    }

    /// Returns a copy with a validated, lowercased world address.
    pub fn normalized(&self) -> Result<Self, ModeError> {
        let world_address = match self.address() {
            Some(address) => Some(normalize_address(address)?),
            None => None,
        };
        Ok(Self {
            chain_id: self.chain_id,
            world_address,
        })
    }

    /// Splits into the chain namespace (address stripped) and the world
    /// namespace (unchanged).
    pub fn to_sub_namespaces(&self) -> (Namespace, Namespace) {
        (Namespace::chain(self.chain_id), self.clone())
    }

    pub fn key(&self) -> String {
        match self.address() {
            Some(address) => format!(
                "{}{NAMESPACE_KEY_SEPARATOR}{}",
                self.chain_id,
                address.to_ascii_lowercase()
            ),
            None => self.chain_id.to_string(),
        }
    }

    pub fn parse_key(key: &str) -> Result<Self, ModeError> {
        let (chain, address) = match key.split_once(NAMESPACE_KEY_SEPARATOR) {
            Some((chain, address)) => (chain, Some(address)),
            None => (key, None),
        };
        let chain_id = chain
            .parse::<u64>()
            .map_err(|_| ModeError::InvalidNamespace(format!("invalid chain id in key '{key}'")))?;
        let namespace = Namespace {
            chain_id,
            world_address: address.map(normalize_address).transpose()?,
        };
        if chain_id == 0 {
            return Err(ModeError::InvalidNamespace(format!(
                "chain id is required in key '{key}'"
            )));
        }
        Ok(namespace)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn normalize_address(address: &str) -> Result<String, ModeError> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| {
            ModeError::InvalidNamespace(format!("world address '{address}' must start with 0x"))
        })?;
    if digits.is_empty() || digits.len() > MAX_ADDRESS_HEX_DIGITS {
        return Err(ModeError::InvalidNamespace(format!(
            "world address '{address}' has invalid length"
        )));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ModeError::InvalidNamespace(format!(
            "world address '{address}' is not hex"
        )));
    }
    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}
