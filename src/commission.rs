use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use utoipa::ToSchema;

/// Platform commission rate: 5%.
pub const COMMISSION_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Gross amount split into the platform's commission and the provider's net.
///
/// Computed once when an order, lab booking or appointment is created and
/// stored alongside it; `total == net + commission` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CommissionSplit {
    pub total: Decimal,
    pub commission: Decimal,
    pub net: Decimal,
}

pub fn split(amount: Decimal) -> CommissionSplit {
    let total = round_money(amount);
    let commission = round_money(total * COMMISSION_RATE);
    CommissionSplit {
        total,
        commission,
        net: total - commission,
    }
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn rate_is_five_percent() {
        assert_eq!(COMMISSION_RATE, Decimal::new(5, 2));
    }

    #[test]
    fn splits_round_amounts() {
        let split = split(money(10_000));
        assert_eq!(split.commission, money(500));
        assert_eq!(split.net, money(9_500));
    }

    #[test]
    fn rounds_half_cent_away_from_zero() {
        // 0.05 * 0.30 = 0.015
        let split = split(money(30));
        assert_eq!(split.commission, money(2));
        assert_eq!(split.net, money(28));
    }

    #[test]
    fn total_is_always_net_plus_commission() {
        for cents in [0, 1, 7, 19, 99, 1_001, 12_345, 99_999, 1_000_003] {
            let split = split(money(cents));
            assert_eq!(split.total, split.net + split.commission, "amount {}", cents);
            assert_eq!(split.total, money(cents));
        }
    }

    #[test]
    fn zero_amount_has_zero_commission() {
        let split = split(Decimal::ZERO);
        assert_eq!(split.commission, Decimal::ZERO);
        assert_eq!(split.net, Decimal::ZERO);
    }
}
