//! Currency parameters, emission schedule, and coinbase construction.

pub mod constants;
pub mod difficulty;
pub mod emission;
pub mod fusion;
pub mod miner;
pub mod params;
pub mod time;

pub use difficulty::{next_difficulty, Difficulty};
pub use emission::median_value;
pub use fusion::decompose_amount;
pub use params::{currency_params, Checkpoint, Currency, Network};
pub use time::{ManualTime, TimeProvider, WallClock};
