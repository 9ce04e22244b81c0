use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use serde::Serialize;

use crate::config::FeeConfig;
use crate::domain::money::minor_to_decimal;
use crate::error::AppError;

/// South African VAT, in basis points.
pub const VAT_RATE_BPS: i64 = 1_500;
const BPS: i64 = 10_000;

/// Decimal places kept on asset amounts.
pub const ASSET_SCALE: i64 = 6;

/// What the user is charged for a send, in minor units. Independent of the
/// exchange rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Charges {
    pub face_value: i64,
    pub fee_amount: i64,
    pub vat_portion: i64,
    pub fee_ex_vat: i64,
    pub net_to_exchange: i64,
    /// What leaves the user's wallet.
    pub total_charge: i64,
    pub vat_inclusive: bool,
}

impl Charges {
    /// Fee revenue recognized in the ledger: everything charged that is
    /// neither forwarded to the exchange nor owed as VAT.
    pub fn fee_revenue(&self) -> i64 {
        self.total_charge - self.net_to_exchange - self.vat_portion
    }
}

/// Charges plus what they buy at a given price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    #[serde(flatten)]
    pub charges: Charges,
    pub asset_amount: BigDecimal,
    /// Network withdrawal fee converted to minor units.
    pub network_fee_estimate: i64,
}

#[derive(Debug, Clone)]
pub struct FeeCalculator {
    config: FeeConfig,
}

impl FeeCalculator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    pub fn charges(&self, face_value: i64) -> Result<Charges, AppError> {
        if face_value <= 0 {
            return Err(AppError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        let vat_inclusive = self.config.vat_inclusive;
        let fee_amount = mul_div_round(face_value, self.config.fee_bps, BPS);
        let vat_portion = if vat_inclusive {
            mul_div_round(fee_amount, VAT_RATE_BPS, BPS + VAT_RATE_BPS)
        } else {
            mul_div_round(fee_amount, VAT_RATE_BPS, BPS)
        };

        Ok(Charges {
            face_value,
            fee_amount,
            vat_portion,
            fee_ex_vat: fee_amount - vat_portion,
            net_to_exchange: face_value - fee_amount,
            total_charge: if vat_inclusive {
                face_value
            } else {
                face_value + vat_portion
            },
            vat_inclusive,
        })
    }

    /// Prices a send of `face_value` minor units at `ask_price` (local
    /// currency per asset unit).
    pub fn calculate(
        &self,
        face_value: i64,
        ask_price: &BigDecimal,
    ) -> Result<FeeBreakdown, AppError> {
        if *ask_price <= BigDecimal::zero() {
            return Err(AppError::ExternalApi(format!(
                "exchange quoted a non-positive price: {}",
                ask_price
            )));
        }
        let charges = self.charges(face_value)?;

        let asset_amount =
            (minor_to_decimal(charges.net_to_exchange) / ask_price).round(ASSET_SCALE);
        let network_fee_estimate =
            (&self.config.network_fee_asset * ask_price * BigDecimal::from(100))
                .round(0)
                .to_i64()
                .ok_or_else(|| {
                    AppError::ExternalApi(format!(
                        "network fee estimate out of range at price {}",
                        ask_price
                    ))
                })?;

        Ok(FeeBreakdown {
            charges,
            asset_amount,
            network_fee_estimate,
        })
    }
}

/// `round(value * num / den)` with halves rounded up, for non-negative inputs.
fn mul_div_round(value: i64, num: i64, den: i64) -> i64 {
    let product = value as i128 * num as i128;
    ((product * 2 + den as i128) / (den as i128 * 2)) as i64
}
