//! Currency parameter object, one constructor per network.

use obol_crypto::Hash256;

use crate::constants::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct Currency {
    pub network: Network,

    pub money_supply: u64,
    pub emission_speed_factor: u32,
    pub reward_blocks_window: usize,
    pub block_granted_full_reward_zone: usize,
    pub miner_tx_blob_reserved_size: usize,

    pub minimum_fee: u64,
    pub default_dust_threshold: u64,

    pub difficulty_target: u64,
    pub difficulty_window: usize,
    pub difficulty_cut: usize,
    pub difficulty_lag: usize,

    pub timestamp_check_window: usize,
    pub block_future_time_limit: u64,

    pub mined_money_unlock_window: u32,
    pub locked_tx_allowed_delta_blocks: u32,
    pub locked_tx_allowed_delta_seconds: u64,

    pub max_block_size_initial: u64,
    pub max_block_size_growth_per_year: u64,

    pub mempool_tx_live_time: u64,
    pub mempool_tx_from_alt_block_live_time: u64,
    pub number_of_periods_to_forget_tx_deleted_from_pool: u64,

    pub fusion_tx_max_size: usize,
    pub fusion_tx_min_input_count: usize,
    pub fusion_tx_min_in_out_count_ratio: usize,

    pub transaction_spendable_age: u32,

    pub genesis_timestamp: u64,
    pub checkpoints: Vec<Checkpoint>,

    pub blocks_cache_file_name: &'static str,
    pub blockchain_indices_file_name: &'static str,
    pub tx_pool_file_name: &'static str,
}

impl Currency {
    pub fn difficulty_blocks_count(&self) -> usize {
        self.difficulty_window + self.difficulty_lag
    }

    /// Absolute cumulative-size cap for a block at `height`; grows
    /// linearly with chain age.
    pub fn max_block_cumulative_size(&self, height: u64) -> u64 {
        let blocks_per_year = 365 * 24 * 60 * 60 / self.difficulty_target;
        self.max_block_size_initial
            + (height * self.max_block_size_growth_per_year) / blocks_per_year
    }

    pub fn max_transaction_blob_size(&self, current_block_size_limit: u64) -> u64 {
        current_block_size_limit.saturating_sub(self.miner_tx_blob_reserved_size as u64)
    }

    /// Formats atomic units with the display decimal point.
    pub fn format_amount(&self, amount: u64) -> String {
        let unit = 10u64.pow(DISPLAY_DECIMAL_POINT as u32);
        format!(
            "{}.{:0width$}",
            amount / unit,
            amount % unit,
            width = DISPLAY_DECIMAL_POINT
        )
    }
}

pub fn currency_params(network: Network) -> Currency {
    match network {
        Network::Mainnet => mainnet_params(),
        Network::Testnet => testnet_params(),
        Network::Regtest => regtest_params(),
    }
}

fn mainnet_params() -> Currency {
    Currency {
        network: Network::Mainnet,
        money_supply: MONEY_SUPPLY,
        emission_speed_factor: EMISSION_SPEED_FACTOR,
        reward_blocks_window: REWARD_BLOCKS_WINDOW,
        block_granted_full_reward_zone: BLOCK_GRANTED_FULL_REWARD_ZONE,
        miner_tx_blob_reserved_size: COINBASE_BLOB_RESERVED_SIZE,
        minimum_fee: MINIMUM_FEE,
        default_dust_threshold: DEFAULT_DUST_THRESHOLD,
        difficulty_target: DIFFICULTY_TARGET,
        difficulty_window: DIFFICULTY_WINDOW,
        difficulty_cut: DIFFICULTY_CUT,
        difficulty_lag: DIFFICULTY_LAG,
        timestamp_check_window: TIMESTAMP_CHECK_WINDOW,
        block_future_time_limit: BLOCK_FUTURE_TIME_LIMIT,
        mined_money_unlock_window: MINED_MONEY_UNLOCK_WINDOW,
        locked_tx_allowed_delta_blocks: LOCKED_TX_ALLOWED_DELTA_BLOCKS,
        locked_tx_allowed_delta_seconds: DIFFICULTY_TARGET,
        max_block_size_initial: MAX_BLOCK_SIZE_INITIAL,
        max_block_size_growth_per_year: MAX_BLOCK_SIZE_GROWTH_PER_YEAR,
        mempool_tx_live_time: MEMPOOL_TX_LIVE_TIME,
        mempool_tx_from_alt_block_live_time: MEMPOOL_TX_FROM_ALT_BLOCK_LIVE_TIME,
        number_of_periods_to_forget_tx_deleted_from_pool:
            NUMBER_OF_PERIODS_TO_FORGET_TX_DELETED_FROM_POOL,
        fusion_tx_max_size: FUSION_TX_MAX_SIZE,
        fusion_tx_min_input_count: FUSION_TX_MIN_INPUT_COUNT,
        fusion_tx_min_in_out_count_ratio: FUSION_TX_MIN_IN_OUT_COUNT_RATIO,
        transaction_spendable_age: TRANSACTION_SPENDABLE_AGE,
        genesis_timestamp: 1_620_000_000,
        checkpoints: Vec::new(),
        blocks_cache_file_name: "blocks_cache.bin",
        blockchain_indices_file_name: "blockchain_indices.bin",
        tx_pool_file_name: "tx_pool.bin",
    }
}

fn testnet_params() -> Currency {
    let mut params = mainnet_params();
    params.network = Network::Testnet;
    params.genesis_timestamp = 1_620_000_001;
    params.blocks_cache_file_name = "testnet_blocks_cache.bin";
    params.blockchain_indices_file_name = "testnet_blockchain_indices.bin";
    params.tx_pool_file_name = "testnet_tx_pool.bin";
    params
}

fn regtest_params() -> Currency {
    let mut params = mainnet_params();
    params.network = Network::Regtest;
    params.difficulty_window = 30;
    params.difficulty_cut = 5;
    params.difficulty_lag = 2;
    params.timestamp_check_window = 10;
    params.mined_money_unlock_window = 4;
    params.transaction_spendable_age = 2;
    params.genesis_timestamp = 1_620_000_002;
    params.blocks_cache_file_name = "regtest_blocks_cache.bin";
    params.blockchain_indices_file_name = "regtest_blockchain_indices.bin";
    params.tx_pool_file_name = "regtest_tx_pool.bin";
    params
}
