//! Protocol registry for venue attribution
//!
//! Maps on-chain program ids to the venue name shown on the dashboard. The
//! registry is static: lookups never touch the network and never mutate.

use solana_pubkey::{pubkey, Pubkey};
use std::collections::HashMap;
use std::str::FromStr;

/// Attribution used when no top-level instruction targets a registered program
pub const UNKNOWN_PROTOCOL: &str = "Unknown";

const KNOWN_PROGRAMS: &[(Pubkey, &str)] = &[
    (pubkey!("JUP4Fb2cqiRUcaTHdrPC8h2gNsA2ETXiPDD33WcGuJB"), "Jupiter"),
    (pubkey!("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4"), "Jupiter"),
    (pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"), "Raydium"),
    (pubkey!("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"), "Orca"),
    (pubkey!("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc"), "Orca"),
    (pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P"), "PumpFun"),
    (pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA"), "PumpSwap"),
    (pubkey!("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo"), "Meteora"),
];

/// Registry of known trading venues keyed by program id
#[derive(Clone)]
pub struct ProtocolRegistry {
    program_names: HashMap<Pubkey, &'static str>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        let program_names: HashMap<Pubkey, &'static str> =
            KNOWN_PROGRAMS.iter().copied().collect();

        log::debug!("📋 ProtocolRegistry initialized with {} programs", program_names.len());

        Self { program_names }
    }

    /// Venue name for a single program id, if registered
    pub fn lookup(&self, program_id: &str) -> Option<&'static str> {
        let key = Pubkey::from_str(program_id).ok()?;
        self.program_names.get(&key).copied()
    }

    /// First registered venue among `program_ids`, scanned in order
    ///
    /// Ids that are not valid addresses are skipped rather than treated as errors.
    pub fn attribute<S: AsRef<str>>(&self, program_ids: &[S]) -> &'static str {
        program_ids
            .iter()
            .find_map(|id| self.lookup(id.as_ref()))
            .unwrap_or(UNKNOWN_PROTOCOL)
    }

    pub fn program_count(&self) -> usize {
        self.program_names.len()
    }

    /// Distinct venue names, sorted
    pub fn venues(&self) -> Vec<&'static str> {
        let mut venues: Vec<&'static str> = self.program_names.values().copied().collect();
        venues.sort_unstable();
        venues.dedup();
        venues
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
