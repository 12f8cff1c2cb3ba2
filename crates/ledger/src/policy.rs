//! Monetary policy: fee schedule, dynamic minimum transfer, and demurrage.
//!
//! All arithmetic is on integer milli-units. The float `FEE_RATE` exists
//! only for API responses; fee computation itself is integer math.

/// P2P transfer fee rate, burned from the sender (reported in responses).
pub const FEE_RATE: f64 = 0.05;
/// At least this much is burned per P2P transfer.
pub const MIN_FEE: i64 = 1;
/// Absolute floor for the dynamic minimum transfer.
pub const BASE_MIN_TRANSFER: i64 = 10;
/// Demurrage percentage per interval.
pub const DEMURRAGE_RATE_PERCENT: i64 = 2;
/// Balances at or below this are exempt from demurrage.
pub const DEMURRAGE_EXEMPT: i64 = 100;
/// XP at which a device's reward multiplier grows by 0.5x.
pub const XP_PER_HALF_MULTIPLIER: f64 = 1000.0;

/// Burn fee for a P2P transfer: `max(MIN_FEE, ceil(amount * 5%))`.
pub fn calc_fee(amount: i64) -> i64 {
    MIN_FEE.max((amount * 5 + 99) / 100)
}

/// Dynamic minimum transfer: `max(10, circulating / 10_000)`.
pub fn calc_min_transfer(circulating: i64) -> i64 {
    BASE_MIN_TRANSFER.max(circulating / 10_000)
}

/// Demurrage for one wallet: 2% floored, zero when exempt.
pub fn calc_demurrage(balance: i64) -> i64 {
    if balance <= DEMURRAGE_EXEMPT {
        return 0;
    }
    balance * DEMURRAGE_RATE_PERCENT / 100
}

/// Reward multiplier from average zone device XP, clamped to [1.0, 3.0].
pub fn reward_multiplier(avg_xp: i64) -> f64 {
    (1.0 + (avg_xp as f64 / XP_PER_HALF_MULTIPLIER) * 0.5).clamp(1.0, 3.0)
}

/// Prorated infrastructure reward for `uptime_seconds` of verified uptime.
pub fn infra_reward(rate_per_hour: i64, uptime_seconds: i64) -> i64 {
    rate_per_hour * uptime_seconds / 3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_is_ceiled_five_percent_with_floor() {
        assert_eq!(calc_fee(500), 25);
        assert_eq!(calc_fee(501), 26); // 25.05 rounds up
        assert_eq!(calc_fee(10), 1);
        assert_eq!(calc_fee(1), 1); // floor kicks in
    }

    #[test]
    fn min_transfer_scales_with_supply() {
        assert_eq!(calc_min_transfer(0), 10);
        assert_eq!(calc_min_transfer(10_000), 10);
        assert_eq!(calc_min_transfer(250_000), 25);
    }

    #[test]
    fn demurrage_exempts_small_balances() {
        assert_eq!(calc_demurrage(100), 0); // exactly the threshold is exempt
        assert_eq!(calc_demurrage(101), 2);
        assert_eq!(calc_demurrage(10_000), 200);
        assert_eq!(calc_demurrage(50), 0);
    }

    #[test]
    fn multiplier_clamps_between_one_and_three() {
        assert_eq!(reward_multiplier(0), 1.0);
        assert_eq!(reward_multiplier(1000), 1.5);
        assert_eq!(reward_multiplier(4000), 3.0);
        assert_eq!(reward_multiplier(100_000), 3.0);
    }

    #[test]
    fn infra_reward_prorates_by_hour() {
        assert_eq!(infra_reward(5000, 3600), 5000);
        assert_eq!(infra_reward(5000, 1800), 2500);
        assert_eq!(infra_reward(500, 120), 16);
    }
}
