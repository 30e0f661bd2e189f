//! Block reward computation with the size penalty.

use crate::params::Currency;

/// Scales `amount` down when `current_block_size` exceeds the median:
/// `amount * S * (2M - S) / M^2`, zero at `S = 2M`.
fn penalized_amount(amount: u64, median_size: u64, current_block_size: u64) -> u64 {
    debug_assert!(current_block_size <= 2 * median_size);
    if current_block_size <= median_size {
        return amount;
    }
    let amount = amount as u128;
    let median = median_size as u128;
    let current = current_block_size as u128;
    let product = amount * current * (2 * median - current);
    (product / median / median) as u64
}

impl Currency {
    pub fn base_reward(&self, already_generated_coins: u64) -> u64 {
        (self.money_supply - already_generated_coins) >> self.emission_speed_factor
    }

    /// Reward for a block of `current_block_size` against the recent
    /// size median. Returns `(reward, emission_change)`, or `None` when
    /// the block exceeds twice the effective median.
    pub fn block_reward(
        &self,
        median_size: usize,
        current_block_size: usize,
        already_generated_coins: u64,
        fee: u64,
    ) -> Option<(u64, i64)> {
        let base_reward = self.base_reward(already_generated_coins);
        let median_size = median_size.max(self.block_granted_full_reward_zone) as u64;
        let current_block_size = current_block_size as u64;
        if current_block_size > 2 * median_size {
            return None;
        }

        let penalized_base = penalized_amount(base_reward, median_size, current_block_size);
        let reward = penalized_base + fee;
        Some((reward, penalized_base as i64))
    }
}

/// Median of a size sample; the original rounds the midpoint of even
/// samples down via integer average.
pub fn median_value(values: &[usize]) -> usize {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{currency_params, Network};

    #[test]
    fn reward_is_full_inside_the_zone() {
        let currency = currency_params(Network::Mainnet);
        let base = currency.base_reward(0);
        let (reward, emission) = currency.block_reward(0, 1_000, 0, 0).unwrap();
        assert_eq!(reward, base);
        assert_eq!(emission, base as i64);
    }

    #[test]
    fn reward_shrinks_past_the_median_and_dies_at_twice() {
        let currency = currency_params(Network::Mainnet);
        let zone = currency.block_granted_full_reward_zone;
        let base = currency.base_reward(0);

        let (at_median, _) = currency.block_reward(zone, zone, 0, 0).unwrap();
        assert_eq!(at_median, base);

        let (penalized, _) = currency.block_reward(zone, zone + zone / 2, 0, 0).unwrap();
        assert!(penalized < base);
        assert!(penalized > 0);

        let (at_double, _) = currency.block_reward(zone, 2 * zone, 0, 0).unwrap();
        assert_eq!(at_double, 0);

        assert!(currency.block_reward(zone, 2 * zone + 1, 0, 0).is_none());
    }

    #[test]
    fn fee_rides_on_top_of_the_penalized_base() {
        let currency = currency_params(Network::Mainnet);
        let zone = currency.block_granted_full_reward_zone;
        let (without_fee, emission) = currency.block_reward(zone, zone + 100, 0, 0).unwrap();
        let (with_fee, emission_with_fee) = currency.block_reward(zone, zone + 100, 0, 555).unwrap();
        assert_eq!(with_fee, without_fee + 555);
        assert_eq!(emission, emission_with_fee);
    }

    #[test]
    fn emission_decays_as_coins_are_generated() {
        let currency = currency_params(Network::Mainnet);
        let early = currency.base_reward(0);
        let late = currency.base_reward(currency.money_supply / 2);
        assert!(late < early);
    }

    #[test]
    fn median_of_samples() {
        assert_eq!(median_value(&[]), 0);
        assert_eq!(median_value(&[7]), 7);
        assert_eq!(median_value(&[1, 9]), 5);
        assert_eq!(median_value(&[3, 1, 9]), 3);
    }
}
