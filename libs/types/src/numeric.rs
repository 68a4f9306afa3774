//! Decimal amounts
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Every ledger mutation goes through the checked helpers below.

use rust_decimal::Decimal;

/// Amount of a single asset.
pub type Amount = Decimal;

/// True when the amount can be deposited, configured or paid.
pub fn is_valid_amount(amount: Amount) -> bool {
    amount > Decimal::ZERO
}

/// Sum a sequence of amounts, returning None on overflow.
pub fn checked_sum<I>(amounts: I) -> Option<Amount>
where
    I: IntoIterator<Item = Amount>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, a| acc.checked_add(a))
}
