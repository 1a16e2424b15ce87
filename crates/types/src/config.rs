//! Node configuration and consensus parameters.
//!
//! `NodeConfig` is local to one node process and loaded from TOML;
//! `ConsensusParams` is part of the replicated state (stored in the info
//! trie) and therefore marshallable.

use crate::error::MarshallingError;
use crate::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Local, non-replicated configuration of a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the KV store of this node.
    pub dir: PathBuf,
    /// Cap on the gas of `run_*` view calls.
    pub max_gas_per_view_transaction: u64,
    /// Only affects external block packaging; the engine ignores it.
    pub transactions_per_block: u32,
    /// Trie retention: 0 keeps only the head, positive keeps that many
    /// checkout-able commits, negative disables garbage collection.
    pub checkable_depth: i64,
    /// Capacity of the inbound request queue; producers block when full.
    pub mempool_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("arca-store"),
            max_gas_per_view_transaction: 1_000_000,
            transactions_per_block: 10,
            checkable_depth: 10,
            mempool_capacity: 200,
        }
    }
}

/// Replicated consensus parameters, agreed by every node of the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    pub chain_id: String,
    /// Name of the signature suite non-initial requests must carry
    /// (`ed25519`, `ed25519det` or `empty`).
    pub signature: String,
    /// Test switch: accept unsigned faucet calls on the gamete.
    pub allow_unsigned_faucet: bool,
    /// Test switch: let the gamete mint and burn coins.
    pub allow_mint_burn_from_gamete: bool,
    /// Test switch: admit any gas price.
    pub ignore_gas_price: bool,
    /// Test switch: skip module verification entirely.
    pub skips_verification: bool,
    /// Whether `self_charged` methods are allowed at all.
    pub allows_self_charged: bool,
    pub gas_price: u64,
    pub max_gas_per_transaction: u64,
    /// Genesis supplies, decimal strings to keep the TOML readable.
    pub initial_supply: String,
    pub initial_red_supply: String,
    /// Base64 key material of the gamete.
    pub public_key_of_gamete: String,
    pub verification_version: u32,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            signature: "ed25519".into(),
            allow_unsigned_faucet: false,
            allow_mint_burn_from_gamete: false,
            ignore_gas_price: false,
            skips_verification: false,
            allows_self_charged: false,
            gas_price: 100,
            max_gas_per_transaction: 1_000_000_000,
            initial_supply: "0".into(),
            initial_red_supply: "0".into(),
            public_key_of_gamete: String::new(),
            verification_version: 0,
        }
    }
}

impl ConsensusParams {
    pub fn initial_supply(&self) -> Result<BigInt, MarshallingError> {
        parse_supply(&self.initial_supply)
    }

    pub fn initial_red_supply(&self) -> Result<BigInt, MarshallingError> {
        parse_supply(&self.initial_red_supply)
    }
}

fn parse_supply(s: &str) -> Result<BigInt, MarshallingError> {
    s.parse()
        .map_err(|_| MarshallingError::ValueOutOfRange(format!("supply {s:?}")))
}

impl Marshallable for ConsensusParams {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_str(&self.chain_id)?;
        w.write_str(&self.signature)?;
        w.write_bool(self.allow_unsigned_faucet);
        w.write_bool(self.allow_mint_burn_from_gamete);
        w.write_bool(self.ignore_gas_price);
        w.write_bool(self.skips_verification);
        w.write_bool(self.allows_self_charged);
        w.write_u64(self.gas_price);
        w.write_u64(self.max_gas_per_transaction);
        w.write_str(&self.initial_supply)?;
        w.write_str(&self.initial_red_supply)?;
        w.write_str(&self.public_key_of_gamete)?;
        w.write_u32(self.verification_version);
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            chain_id: r.read_str()?,
            signature: r.read_str()?,
            allow_unsigned_faucet: r.read_bool()?,
            allow_mint_burn_from_gamete: r.read_bool()?,
            ignore_gas_price: r.read_bool()?,
            skips_verification: r.read_bool()?,
            allows_self_charged: r.read_bool()?,
            gas_price: r.read_u64()?,
            max_gas_per_transaction: r.read_u64()?,
            initial_supply: r.read_str()?,
            initial_red_supply: r.read_str()?,
            public_key_of_gamete: r.read_str()?,
            verification_version: r.read_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshalling::{from_bytes, to_bytes};

    #[test]
    fn consensus_params_roundtrip() {
        let params = ConsensusParams {
            chain_id: "arca-test".into(),
            signature: "empty".into(),
            initial_supply: "1000000000000000".into(),
            ..Default::default()
        };
        let bytes = to_bytes(&params).unwrap();
        assert_eq!(from_bytes::<ConsensusParams>(&bytes).unwrap(), params);
        assert_eq!(
            params.initial_supply().unwrap(),
            BigInt::from(10u64).pow(15)
        );
    }

    #[test]
    fn node_config_reads_from_toml() {
        let cfg: NodeConfig = toml::from_str(
            r#"
            dir = "/tmp/n0"
            max_gas_per_view_transaction = 500000
            checkable_depth = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_gas_per_view_transaction, 500_000);
        assert_eq!(cfg.checkable_depth, 0);
        assert_eq!(cfg.mempool_capacity, NodeConfig::default().mempool_capacity);
    }
}
