//! Fee selection and escalation for on-chain interactions.

use crate::DeployConfig;
use deployment_journal::NetworkFees;
use std::time::Duration;

/// Decides which fees a transaction pays and when they are bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub time_before_bumping: Duration,
    pub max_bumps: u32,
    pub bump_percent: u32,
    pub max_fee_per_gas: Option<u128>,
}

impl FeePolicy {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            time_before_bumping: config.time_before_bumping_fees,
            max_bumps: config.max_fee_bumps,
            bump_percent: config.fee_bump_percent,
            max_fee_per_gas: config.max_fee_per_gas_limit,
        }
    }

    /// Fees of the first attempt: the network suggestion, capped.
    pub fn initial_fees(&self, network: NetworkFees) -> NetworkFees {
        self.cap(network)
    }

    /// Fees of the attempt replacing one that paid `previous`.
    ///
    /// Returns `None` when the cap leaves no room for an increase.
    pub fn bumped_fees(&self, previous: NetworkFees, network: NetworkFees) -> Option<NetworkFees> {
        let bumped = match previous {
            NetworkFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let (network_max, network_priority) = match network {
                    NetworkFees::Eip1559 {
                        max_fee_per_gas,
                        max_priority_fee_per_gas,
                    } => (max_fee_per_gas, max_priority_fee_per_gas),
                    NetworkFees::Legacy { gas_price } => (gas_price, gas_price),
                };
                NetworkFees::Eip1559 {
                    max_fee_per_gas: self.bump(max_fee_per_gas).max(network_max),
                    max_priority_fee_per_gas: self
                        .bump(max_priority_fee_per_gas)
                        .max(network_priority),
                }
            }
            NetworkFees::Legacy { gas_price } => NetworkFees::Legacy {
                gas_price: self.bump(gas_price).max(network.max_fee_per_gas()),
            },
        };
        let bumped = self.cap(bumped);
        (bumped.max_fee_per_gas() > previous.max_fee_per_gas()).then_some(bumped)
    }

    /// Returns true once a pending attempt waited long enough to be bumped.
    pub fn should_bump(&self, elapsed: Duration) -> bool {
        elapsed >= self.time_before_bumping
    }

    /// Returns true if another bump is allowed after `bumps` bumps.
    pub fn can_bump(&self, bumps: u32) -> bool {
        bumps < self.max_bumps
    }

    fn bump(&self, fee: u128) -> u128 {
        let increased = fee.saturating_mul(100 + self.bump_percent as u128) / 100;
        increased.max(fee.saturating_add(1))
    }

    fn cap(&self, fees: NetworkFees) -> NetworkFees {
        let Some(limit) = self.max_fee_per_gas else {
            return fees;
        };
        match fees {
            NetworkFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee_per_gas = max_fee_per_gas.min(limit);
                NetworkFees::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas: max_priority_fee_per_gas.min(max_fee_per_gas),
                }
            }
            NetworkFees::Legacy { gas_price } => NetworkFees::Legacy {
                gas_price: gas_price.min(limit),
            },
        }
    }
}
