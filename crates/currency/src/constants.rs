//! Network-wide constants shared across validation.

/// Total atomic units that will ever be emitted.
pub const MONEY_SUPPLY: u64 = u64::MAX;
/// Right-shift applied to the remaining supply per block reward.
pub const EMISSION_SPEED_FACTOR: u32 = 18;
/// Decimal places of the display unit.
pub const DISPLAY_DECIMAL_POINT: usize = 8;

/// Unlock times below this value are block heights, at or above it UNIX
/// timestamps.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Block sizes up to this zone carry no reward penalty.
pub const BLOCK_GRANTED_FULL_REWARD_ZONE: usize = 20_000;
/// Bytes reserved in a block template for the coinbase transaction.
pub const COINBASE_BLOB_RESERVED_SIZE: usize = 600;
/// Blocks whose sizes feed the reward median and the size limit.
pub const REWARD_BLOCKS_WINDOW: usize = 100;

/// Blocks whose timestamps feed the median timestamp check.
pub const TIMESTAMP_CHECK_WINDOW: usize = 60;
/// Seconds a block timestamp may run ahead of local time.
pub const BLOCK_FUTURE_TIME_LIMIT: u64 = 2 * 60 * 60;

/// Coinbase outputs stay locked for this many blocks, and outputs
/// younger than this are not offered as ring decoys.
pub const MINED_MONEY_UNLOCK_WINDOW: u32 = 10;
/// Slack applied when comparing a height lock against the chain tip.
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u32 = 1;

pub const DIFFICULTY_TARGET: u64 = 120;
pub const DIFFICULTY_WINDOW: usize = 720;
pub const DIFFICULTY_CUT: usize = 60;
pub const DIFFICULTY_LAG: usize = 15;

pub const MINIMUM_FEE: u64 = 1_000_000;
pub const DEFAULT_DUST_THRESHOLD: u64 = 1_000;

pub const MAX_BLOCK_SIZE_INITIAL: u64 = 500_000;
pub const MAX_BLOCK_SIZE_GROWTH_PER_YEAR: u64 = 100 * 1024;

pub const MEMPOOL_TX_LIVE_TIME: u64 = 60 * 60 * 24;
pub const MEMPOOL_TX_FROM_ALT_BLOCK_LIVE_TIME: u64 = 60 * 60 * 24 * 7;
pub const NUMBER_OF_PERIODS_TO_FORGET_TX_DELETED_FROM_POOL: u64 = 1;

pub const FUSION_TX_MAX_SIZE: usize = BLOCK_GRANTED_FULL_REWARD_ZONE * 30 / 100;
pub const FUSION_TX_MIN_INPUT_COUNT: usize = 12;
pub const FUSION_TX_MIN_IN_OUT_COUNT_RATIO: usize = 4;

/// Confirmations before a wallet treats a confirmed output as spendable.
pub const TRANSACTION_SPENDABLE_AGE: u32 = 10;

/// Sentinel height meaning "not yet in a block".
pub const UNCONFIRMED_TRANSACTION_HEIGHT: u32 = u32::MAX;
/// Sentinel global output index for unconfirmed outputs.
pub const UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX: u32 = u32::MAX;
