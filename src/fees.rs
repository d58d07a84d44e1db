//! Commission / GST / withholding-tax arithmetic.
//!
//! All amounts stay in fixed-point `Decimal`; floats never touch money.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DisburseError};
use crate::ledger::models::FinancialTerms;

/// Which quantity the caller fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    /// The recipient receives exactly the requested amount; the merchant is
    /// billed the requested amount plus deductions.
    FixedPayout,
    /// The merchant is debited exactly the requested amount; the recipient
    /// receives the requested amount minus deductions.
    FixedDebit,
}

impl Default for FeeMode {
    fn default() -> Self {
        FeeMode::FixedPayout
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub commission: Decimal,
    pub gst: Decimal,
    pub withholding_tax: Decimal,
    /// Net amount the merchant's balance is charged.
    pub merchant_amount: Decimal,
    /// Amount actually paid out to the recipient.
    pub payout_amount: Decimal,
}

impl FeeBreakdown {
    pub fn deductions(&self) -> Decimal {
        self.commission + self.gst + self.withholding_tax
    }
}

/// Compute deductions from the merchant's financial terms. Each rate is
/// applied to the requested amount, then the sum is added or subtracted
/// depending on which side the caller fixed.
pub fn compute(
    requested_amount: Decimal,
    terms: &FinancialTerms,
    mode: FeeMode,
) -> AppResult<FeeBreakdown> {
    if requested_amount <= Decimal::ZERO {
        return Err(DisburseError::Validation(format!(
            "Amount must be positive, got {}",
            requested_amount
        ))
        .into());
    }

    let commission = requested_amount * terms.commission_rate;
    let gst = requested_amount * terms.gst_rate;
    let withholding_tax = requested_amount * terms.wht_rate;
    let deductions = commission + gst + withholding_tax;

    let (merchant_amount, payout_amount) = match mode {
        FeeMode::FixedPayout => (requested_amount + deductions, requested_amount),
        FeeMode::FixedDebit => (requested_amount, requested_amount - deductions),
    };

    if payout_amount <= Decimal::ZERO {
        return Err(DisburseError::Validation(format!(
            "Deductions {} leave nothing to pay out of {}",
            deductions, requested_amount
        ))
        .into());
    }

    Ok(FeeBreakdown {
        commission,
        gst,
        withholding_tax,
        merchant_amount,
        payout_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn terms() -> FinancialTerms {
        FinancialTerms {
            merchant_id: 1,
            commission_rate: dec!(0.02),
            gst_rate: dec!(0.17),
            wht_rate: dec!(0.10),
            settlement_duration_days: 2,
        }
    }

    #[test]
    fn fixed_payout_bills_merchant_amount_plus_deductions() {
        let fees = compute(dec!(1000), &terms(), FeeMode::FixedPayout).unwrap();
        assert_eq!(fees.commission, dec!(20.00));
        assert_eq!(fees.gst, dec!(170.00));
        assert_eq!(fees.withholding_tax, dec!(100.00));
        assert_eq!(fees.deductions(), dec!(290.00));
        assert_eq!(fees.merchant_amount, dec!(1290.00));
        assert_eq!(fees.payout_amount, dec!(1000));
    }

    #[test]
    fn fixed_debit_pays_out_amount_minus_deductions() {
        let fees = compute(dec!(1000), &terms(), FeeMode::FixedDebit).unwrap();
        assert_eq!(fees.merchant_amount, dec!(1000));
        assert_eq!(fees.payout_amount, dec!(710.00));
    }

    #[test]
    fn zero_rates_pass_amount_through() {
        let mut t = terms();
        t.commission_rate = Decimal::ZERO;
        t.gst_rate = Decimal::ZERO;
        t.wht_rate = Decimal::ZERO;

        let fees = compute(dec!(250.50), &t, FeeMode::FixedPayout).unwrap();
        assert_eq!(fees.merchant_amount, dec!(250.50));
        assert_eq!(fees.payout_amount, dec!(250.50));
        assert_eq!(fees.deductions(), Decimal::ZERO);
    }

    #[test]
    fn rejects_non_positive_amount() {
        assert!(compute(dec!(0), &terms(), FeeMode::FixedPayout).is_err());
        assert!(compute(dec!(-5), &terms(), FeeMode::FixedDebit).is_err());
    }

    #[test]
    fn rejects_debit_eaten_entirely_by_deductions() {
        let mut t = terms();
        t.commission_rate = dec!(0.50);
        t.gst_rate = dec!(0.30);
        t.wht_rate = dec!(0.20);
        assert!(compute(dec!(100), &t, FeeMode::FixedDebit).is_err());
    }
}
