//! Chain Economics
//!
//! Block reward schedule and supply projection for the Mochimo chain.
//! Everything here is exact integer arithmetic: results feed ledger totals and
//! supply figures, so floating point never enters the calculation.
//!
//! The reward schedule has three eras:
//! 1. **Launch era** (heights `1..17185`): linearly increasing from 5 MCM
//! 2. **v2.0 era** (heights `17185..373761`): linearly increasing again after the fork
//! 3. **Tail era** (heights `373761..=2097152`): linearly decreasing to the end of emission

use serde::{Deserialize, Serialize};

/// Per-block reward adjustment for each era (nanoMCM)
pub const REWARD_DELTA: [u64; 3] = [56_000, 150_000, 28_488];

/// Reward at the start of each era (nanoMCM)
pub const REWARD_BASE: [u64; 3] = [5_000_000_000, 5_917_392_000, 59_523_942_000];

/// Era boundaries; the last one is the final rewarded height
pub const REWARD_TRIGGER: [u64; 3] = [17_185, 373_761, 2_097_152];

/// Final block height that issues a reward
pub const FINAL_REWARD_HEIGHT: u64 = REWARD_TRIGGER[2];

/// Premine, inclusive of the locked development allocation
pub const INSTAMINE: u128 = 4_757_066_000_000_000;

/// Development allocation locked until [`LOCKED_UNTIL_MS`]
pub const LOCKED: u128 = 1_990_000_000_000_000;

/// 2023-06-25T00:00:00Z in unix milliseconds
pub const LOCKED_UNTIL_MS: u64 = 1_687_651_200_000;

/// Neogenesis blocks occur on every multiple of this height
pub const NEOGENESIS_INTERVAL: u64 = 256;

/// Last height of each era as used by the supply projection
const ERA_END: [u64; 3] = [0x4320, 0x5B400, 0x200000];

/// First neogenesis height inside each era
const ERA_FIRST_NEOGENESIS: [u64; 3] = [0x100, 0x4400, 0x5B500];

/// Is this height a (neo)genesis height
pub fn is_neogenesis_height(height: u64) -> bool {
    height % NEOGENESIS_INTERVAL == 0
}

/// Mining reward scheduled for a block height
///
/// Returns 0 for height 0 and for heights past [`FINAL_REWARD_HEIGHT`].
pub fn block_reward(height: u64) -> u64 {
    if height == 0 || height > REWARD_TRIGGER[2] {
        return 0;
    }
    if height < REWARD_TRIGGER[0] {
        return REWARD_BASE[0] + REWARD_DELTA[0] * (height - 1);
    }
    if height < REWARD_TRIGGER[1] {
        return REWARD_BASE[1] + REWARD_DELTA[1] * (height - REWARD_TRIGGER[0]);
    }
    REWARD_BASE[2] - REWARD_DELTA[2] * (height - REWARD_TRIGGER[1])
}

/// Reward actually issued at a height; neogenesis blocks issue nothing
pub fn issued_reward(height: u64) -> u64 {
    if is_neogenesis_height(height) {
        0
    } else {
        block_reward(height)
    }
}

/// Sum of an arithmetic sequence of `n` rewards from `first` to `last`
fn series_sum(n: u64, first: u64, last: u64) -> u128 {
    if n == 0 {
        return 0;
    }
    n as u128 * (block_reward(first) as u128 + block_reward(last) as u128) / 2
}

/// Projected supply at `height`, using the wall clock for the lock check
pub fn projected_supply(height: u64, exclude_locked: bool) -> u128 {
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    projected_supply_at(height, exclude_locked, now_ms)
}

/// Projected supply at `height` as of `now_ms`
///
/// Sums every scheduled reward up to `height` era by era, subtracts the rewards
/// that neogenesis heights would have carried, and optionally subtracts the
/// locked allocation while it is still locked.
pub fn projected_supply_at(height: u64, exclude_locked: bool, now_ms: u64) -> u128 {
    let mut all_blocks: u128 = 0;
    let mut neogenesis: u128 = 0;
    let mut era_start = 0u64;
    let mut neogen_start = 0u64;

    for era in 0..3 {
        let end = height.min(ERA_END[era]);
        let count = if height > era_start { end - era_start } else { 0 };
        all_blocks += series_sum(count, era_start + 1, end);

        let neogen_end = end / NEOGENESIS_INTERVAL * NEOGENESIS_INTERVAL;
        let neogen_count = if height > neogen_start {
            (neogen_end - neogen_start) / NEOGENESIS_INTERVAL
        } else {
            0
        };
        neogenesis += series_sum(neogen_count, ERA_FIRST_NEOGENESIS[era], neogen_end);

        era_start = ERA_END[era];
        neogen_start = ERA_END[era] / NEOGENESIS_INTERVAL * NEOGENESIS_INTERVAL;
    }

    let locked = if exclude_locked && now_ms < LOCKED_UNTIL_MS {
        LOCKED
    } else {
        0
    };

    INSTAMINE + all_blocks - neogenesis - locked
}

/// Maximum supply once emission has finished
pub fn max_supply() -> u128 {
    projected_supply_at(FINAL_REWARD_HEIGHT, false, LOCKED_UNTIL_MS)
}

/// Supply figures reported alongside chain statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplySummary {
    /// Height the figures were computed for
    pub height: u64,
    /// Sum of all balances actually present on chain
    pub total: u128,
    /// Projected supply minus what has been lost, excluding locked coins
    pub circulating: u128,
    /// Supply once emission completes
    pub max: u128,
}

impl SupplySummary {
    /// `total_supply` is the last neogenesis ledger amount plus rewards issued since
    pub fn compute(height: u64, total_supply: u128, now_ms: u64) -> Self {
        let projected = projected_supply_at(height, false, now_ms);
        let lost = projected.saturating_sub(total_supply);
        let circulating = projected_supply_at(height, true, now_ms).saturating_sub(lost);
        Self {
            height,
            total: total_supply,
            circulating,
            max: max_supply(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_bounds() {
        assert_eq!(block_reward(0), 0);
        assert_eq!(block_reward(1), 5_000_000_000);
        assert_eq!(block_reward(FINAL_REWARD_HEIGHT + 1), 0);
        assert!(block_reward(FINAL_REWARD_HEIGHT) > 0);
    }

    #[test]
    fn test_reward_trigger_boundaries() {
        assert_eq!(block_reward(17_184), 5_000_000_000 + 56_000 * 17_183);
        assert_eq!(block_reward(17_185), 5_917_392_000);
        assert_eq!(block_reward(373_760), 5_917_392_000 + 150_000 * (373_760 - 17_185));
        assert_eq!(block_reward(373_761), 59_523_942_000);
        assert_eq!(
            block_reward(2_097_152),
            59_523_942_000 - 28_488 * (2_097_152 - 373_761)
        );
    }

    #[test]
    fn test_reward_monotone_within_eras() {
        for h in [1u64, 2, 100, 17_000, 17_183] {
            assert!(block_reward(h) < block_reward(h + 1), "era 1 at {}", h);
        }
        for h in [17_185u64, 20_000, 200_000, 373_759] {
            assert!(block_reward(h) < block_reward(h + 1), "era 2 at {}", h);
        }
        for h in [373_761u64, 500_000, 1_500_000, 2_097_151] {
            assert!(block_reward(h) > block_reward(h + 1), "era 3 at {}", h);
        }
    }

    #[test]
    fn test_issued_reward_skips_neogenesis() {
        assert_eq!(issued_reward(256), 0);
        assert_eq!(issued_reward(257), block_reward(257));
    }

    #[test]
    fn test_projected_supply_at_zero() {
        let before_unlock = LOCKED_UNTIL_MS - 1;
        assert_eq!(projected_supply_at(0, false, before_unlock), INSTAMINE);
        assert_eq!(projected_supply_at(0, true, before_unlock), INSTAMINE - LOCKED);
        assert_eq!(projected_supply_at(0, true, LOCKED_UNTIL_MS), INSTAMINE);
    }

    #[test]
    fn test_wall_clock_supply_is_past_unlock() {
        assert_eq!(projected_supply(0, true), INSTAMINE);
        assert_eq!(
            projected_supply(20_000, true),
            projected_supply_at(20_000, false, LOCKED_UNTIL_MS)
        );
    }

    #[test]
    fn test_projected_supply_matches_naive_sum() {
        // brute force across the first era boundary and a few neogenesis heights
        let target = 17_700u64;
        let mut naive = INSTAMINE;
        for h in 1..=target {
            naive += issued_reward(h) as u128;
        }
        assert_eq!(projected_supply_at(target, false, LOCKED_UNTIL_MS), naive);
    }

    #[test]
    fn test_projected_supply_non_decreasing() {
        let mut last = 0u128;
        let mut h = 0u64;
        while h <= FINAL_REWARD_HEIGHT + 512 {
            let supply = projected_supply_at(h, false, LOCKED_UNTIL_MS);
            assert!(supply >= last, "supply decreased at {}", h);
            last = supply;
            h += 4_099;
        }
        assert_eq!(projected_supply_at(FINAL_REWARD_HEIGHT + 10_000, false, 0), max_supply());
    }

    #[test]
    fn test_supply_summary_accounts_for_lost_coins() {
        let height = 300_000;
        let projected = projected_supply_at(height, false, LOCKED_UNTIL_MS);
        let summary = SupplySummary::compute(height, projected - 1_000, LOCKED_UNTIL_MS);
        assert_eq!(summary.circulating, projected - 1_000);
        assert_eq!(summary.max, max_supply());
    }
}
