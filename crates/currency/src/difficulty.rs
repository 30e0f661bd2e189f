//! Difficulty retarget over a trimmed timestamp window.

use crate::params::Currency;

pub type Difficulty = u64;

/// Next-block difficulty from the last `window + lag` blocks:
/// timestamps are sorted, `cut` outliers trimmed from both ends, and
/// the trimmed work/timespan ratio extrapolated to the target spacing.
pub fn next_difficulty(
    currency: &Currency,
    mut timestamps: Vec<u64>,
    cumulative_difficulties: Vec<Difficulty>,
) -> Difficulty {
    let window = currency.difficulty_window;
    let cut = currency.difficulty_cut;
    debug_assert_eq!(timestamps.len(), cumulative_difficulties.len());
    debug_assert!(window >= 2 * cut + 2);

    let mut difficulties = cumulative_difficulties;
    if timestamps.len() > window {
        timestamps.truncate(window);
        difficulties.truncate(window);
    }
    let length = timestamps.len();
    if length <= 1 {
        return 1;
    }

    timestamps.sort_unstable();

    let (cut_begin, cut_end) = if length <= window - 2 * cut {
        (0, length)
    } else {
        let cut_begin = (length - (window - 2 * cut) + 1) / 2;
        (cut_begin, cut_begin + (window - 2 * cut))
    };

    let mut time_span = timestamps[cut_end - 1] - timestamps[cut_begin];
    if time_span == 0 {
        time_span = 1;
    }

    let total_work = difficulties[cut_end - 1] - difficulties[cut_begin];
    let product = total_work as u128 * currency.difficulty_target as u128;
    let next = (product + time_span as u128 - 1) / time_span as u128;
    Difficulty::try_from(next).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{currency_params, Network};

    fn run(currency: &Currency, spacing: u64, difficulty: Difficulty, count: usize) -> Difficulty {
        let timestamps: Vec<u64> = (0..count as u64).map(|i| i * spacing).collect();
        let cumulative: Vec<Difficulty> = (1..=count as u64).map(|i| i * difficulty).collect();
        next_difficulty(currency, timestamps, cumulative)
    }

    #[test]
    fn short_history_yields_unit_difficulty() {
        let currency = currency_params(Network::Regtest);
        assert_eq!(next_difficulty(&currency, vec![], vec![]), 1);
        assert_eq!(next_difficulty(&currency, vec![100], vec![5]), 1);
    }

    #[test]
    fn on_target_spacing_holds_difficulty() {
        let currency = currency_params(Network::Regtest);
        let next = run(&currency, currency.difficulty_target, 1_000, 20);
        let low = 1_000 * 9 / 10;
        let high = 1_000 * 11 / 10;
        assert!((low..=high).contains(&next), "next difficulty {next}");
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let currency = currency_params(Network::Regtest);
        let next = run(&currency, currency.difficulty_target / 4, 1_000, 20);
        assert!(next > 1_000, "next difficulty {next}");
    }

    #[test]
    fn slow_blocks_lower_difficulty() {
        let currency = currency_params(Network::Regtest);
        let next = run(&currency, currency.difficulty_target * 4, 1_000, 20);
        assert!(next < 1_000, "next difficulty {next}");
    }
}
