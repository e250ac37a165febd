//! Revenue model
//!
//! Two reward formulas exist. Pool FPPS pays a fixed amount per TH/s per
//! day; the accepted-shares formula apportions the block reward by the
//! machine's share of network difficulty. A machine gets exactly one of
//! them, resolved from its configuration before any ratio is scored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::{HOURS_PER_DAY, SATS_PER_COIN};
use crate::error::DataGap;
use crate::model::{MachineSpec, MarketQuote};

/// Reward formula bound to one machine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RewardSource {
    /// `hashrate × reward_rate_per_th_per_day`
    Fpps,
    /// `block_reward × (shares × hashrate / nominal) / difficulty`
    AcceptedShares {
        accepted_shares_24h: Decimal,
        nominal_hashrate_th: Decimal,
    },
}

/// Daily income at one hashrate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueEstimate {
    pub coins_per_day: Option<Decimal>,
    pub sats_per_hour: Option<Decimal>,
    pub revenue: Option<Decimal>,
}

impl RewardSource {
    /// Accepted shares take precedence whenever the machine carries them
    pub fn for_machine(spec: &MachineSpec) -> Self {
        match spec.reward.accepted_shares_24h {
            Some(accepted_shares_24h) => RewardSource::AcceptedShares {
                accepted_shares_24h,
                nominal_hashrate_th: spec.nominal_hashrate_th,
            },
            None => RewardSource::Fpps,
        }
    }

    /// Coins earned per day at `hashrate_th`
    pub fn daily_coins(&self, hashrate_th: Decimal, quote: &MarketQuote) -> Option<Decimal> {
        match self {
            RewardSource::Fpps => quote.reward_rate_per_th_per_day.map(|rate| hashrate_th * rate),
            RewardSource::AcceptedShares {
                accepted_shares_24h,
                nominal_hashrate_th,
            } => {
                let network = quote.network.as_ref()?;
                let block_reward = network.block_reward?;
                let difficulty = network.network_difficulty?;
                if difficulty.is_zero() || nominal_hashrate_th.is_zero() {
                    return None;
                }
                let shares = *accepted_shares_24h * hashrate_th / *nominal_hashrate_th;
                Some(block_reward * shares / difficulty)
            }
        }
    }

    pub fn estimate(&self, hashrate_th: Decimal, quote: &MarketQuote) -> RevenueEstimate {
        let coins = self.daily_coins(hashrate_th, quote);
        RevenueEstimate {
            coins_per_day: coins,
            sats_per_hour: coins.map(|c| c * SATS_PER_COIN / HOURS_PER_DAY),
            revenue: coins.zip(quote.price_per_coin).map(|(c, price)| c * price),
        }
    }

    /// Inputs this source needs that the quote lacks
    pub fn gaps(&self, quote: &MarketQuote) -> Vec<DataGap> {
        let mut gaps = Vec::new();
        if quote.price_per_coin.is_none() {
            gaps.push(DataGap::Price);
        }
        match self {
            RewardSource::Fpps => {
                if quote.reward_rate_per_th_per_day.is_none() {
                    gaps.push(DataGap::RewardRate);
                }
            }
            RewardSource::AcceptedShares { .. } => {
                let complete = quote
                    .network
                    .as_ref()
                    .map(|n| n.block_reward.is_some() && n.network_difficulty.is_some())
                    .unwrap_or(false);
                if !complete {
                    gaps.push(DataGap::NetworkStats);
                }
            }
        }
        gaps
    }
}
