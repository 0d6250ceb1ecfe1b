//! Chain classification and settlement timing
//!
//! Different chains settle at different speeds:
//! - Ethereum mainnet and testnets: ~12s blocks, slow settlement
//! - Rollups (Arbitrum, Optimism, Base, ...): sub-second to 2s blocks
//!
//! The plan orchestrator uses these to size its polling schedule.

use crate::config::PlanConfig;

use std::time::Duration;

/// Default time for a step to settle on an L1 chain
pub const L1_SETTLEMENT_MS: u64 = 24_000;

/// Default time for a step to settle on an L2 chain
pub const L2_SETTLEMENT_MS: u64 = 12_000;

/// Check whether a chain is a rollup or sidechain with fast blocks
pub fn is_l2_chain(chain_id: u64) -> bool {
    matches!(
        chain_id,
        // Optimism
        10 | 11155420
        // Unichain
        | 130 | 1301
        // Polygon
        | 137 | 80002
        // zkSync
        | 324
        // World Chain
        | 480
        // Base
        | 8453 | 84532
        // Arbitrum
        | 42161 | 421614
        // Blast
        | 81457
        // Zora
        | 7777777
    )
}

/// Expected settlement time for a chain when the plan gives none
pub fn default_settlement(chain_id: u64) -> Duration {
    if is_l2_chain(chain_id) {
        Duration::from_millis(L2_SETTLEMENT_MS)
    } else {
        Duration::from_millis(L1_SETTLEMENT_MS)
    }
}

/// Interval and upper bound for polling the plan after a step on `chain_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    pub fn for_chain(chain_id: u64, expected_duration_ms: Option<u64>, config: &PlanConfig) -> Self {
        let interval = if is_l2_chain(chain_id) {
            Duration::from_millis(config.l2_poll_interval_ms)
        } else {
            Duration::from_millis(config.l1_poll_interval_ms)
        };

        let settlement = expected_duration_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| default_settlement(chain_id));

        Self {
            interval,
            timeout: settlement + Duration::from_millis(config.poll_grace_ms),
        }
    }
}
