use serde::{Deserialize, Serialize};

use crate::market::{AssetType, ExchangeId};
use crate::values::Quantity;

/// Balance of one currency in one sub-account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub total: Quantity,
    /// Amount locked in open orders
    pub hold: Quantity,
}

impl Balance {
    pub fn new(currency: impl Into<String>, total: Quantity, hold: Quantity) -> Self {
        Balance {
            currency: currency.into().to_uppercase(),
            total,
            hold,
        }
    }

    pub fn available(&self) -> Quantity {
        self.total - self.hold
    }
}

/// Wallet for one asset class on an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAccount {
    pub id: String,
    pub asset: AssetType,
    pub balances: Vec<Balance>,
}

/// Account holdings snapshot for one exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountHoldings {
    pub exchange: ExchangeId,
    pub accounts: Vec<SubAccount>,
}

impl AccountHoldings {
    pub fn new(exchange: impl Into<ExchangeId>) -> Self {
        AccountHoldings {
            exchange: exchange.into(),
            accounts: Vec::new(),
        }
    }

    pub fn with_account(mut self, account: SubAccount) -> Self {
        self.accounts.push(account);
        self
    }

    /// Total of a currency across every sub-account
    pub fn total(&self, currency: &str) -> Quantity {
        self.balances(currency).map(|b| b.total).sum()
    }

    /// Available (total minus hold) of a currency across every sub-account
    pub fn available(&self, currency: &str) -> Quantity {
        self.balances(currency).map(Balance::available).sum()
    }

    fn balances<'a>(&'a self, currency: &'a str) -> impl Iterator<Item = &'a Balance> + 'a {
        self.accounts
            .iter()
            .flat_map(|a| a.balances.iter())
            .filter(move |b| b.currency.eq_ignore_ascii_case(currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_holdings_aggregate_across_sub_accounts() {
        let holdings = AccountHoldings::new("coinbene")
            .with_account(SubAccount {
                id: "spot".into(),
                asset: AssetType::Spot,
                balances: vec![Balance::new("usdt", dec!(100), dec!(40))],
            })
            .with_account(SubAccount {
                id: "swap".into(),
                asset: AssetType::PerpetualSwap,
                balances: vec![Balance::new("USDT", dec!(50), dec!(0))],
            });

        assert_eq!(holdings.total("USDT"), dec!(150));
        assert_eq!(holdings.available("usdt"), dec!(110));
        assert_eq!(holdings.total("BTC"), dec!(0));
    }
}
