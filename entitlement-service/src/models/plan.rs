//! Subscription plan model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Highest list price a plan may carry.
pub const MAX_PLAN_PRICE: i64 = 1_000_000_000_000;

/// Subscription plan offered on the storefront. Managed by admins; read-only
/// for the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub plan_id: String,
    pub name: String,
    /// List price in whole currency units.
    pub price: i64,
    /// Percentage off the list price, 0..=100.
    pub discount_percent: Option<i32>,
    pub duration_days: i32,
    pub is_active: bool,
    /// Display order, ascending.
    pub sequence: i32,
    pub features: Vec<String>,
}

impl SubscriptionPlan {
    /// Amount charged after discount, rounded half up to a whole unit.
    ///
    /// Integer arithmetic only: `price * (100 - discount) / 100`. `None`
    /// when the price is too large to discount without overflow.
    pub fn charge_amount(&self) -> Option<i64> {
        let discount = i64::from(self.discount_percent.unwrap_or(0).clamp(0, 100));
        let scaled = self.price.checked_mul(100 - discount)?.checked_add(50)?;
        Some(scaled.div_euclid(100))
    }

    /// Plan fields that must hold before a plan can be sold.
    pub fn validate(&self) -> Result<(), String> {
        if self.price < 0 {
            return Err(format!("plan {} has a negative price", self.plan_id));
        }
        if self.price > MAX_PLAN_PRICE {
            return Err(format!(
                "plan {} price {} exceeds {}",
                self.plan_id, self.price, MAX_PLAN_PRICE
            ));
        }
        if self.duration_days <= 0 {
            return Err(format!(
                "plan {} must last at least one day",
                self.plan_id
            ));
        }
        if let Some(discount) = self.discount_percent {
            if !(0..=100).contains(&discount) {
                return Err(format!(
                    "plan {} discount {} is outside 0..=100",
                    self.plan_id, discount
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(price: i64, discount: Option<i32>) -> SubscriptionPlan {
        SubscriptionPlan {
            plan_id: "monthly".to_string(),
            name: "Monthly".to_string(),
            price,
            discount_percent: discount,
            duration_days: 30,
            is_active: true,
            sequence: 1,
            features: vec![],
        }
    }

    #[test]
    fn discount_applies_to_price() {
        assert_eq!(plan(10_000, Some(20)).charge_amount(), Some(8_000));
    }

    #[test]
    fn missing_discount_charges_full_price() {
        assert_eq!(plan(9_900, None).charge_amount(), Some(9_900));
        assert_eq!(plan(9_900, Some(0)).charge_amount(), Some(9_900));
    }

    #[test]
    fn fractional_charge_rounds_half_up() {
        // 999 * 0.85 = 849.15
        assert_eq!(plan(999, Some(15)).charge_amount(), Some(849));
        // 1 * 0.5 = 0.5
        assert_eq!(plan(1, Some(50)).charge_amount(), Some(1));
        // 3 * 0.85 = 2.55
        assert_eq!(plan(3, Some(15)).charge_amount(), Some(3));
    }

    #[test]
    fn full_discount_is_free() {
        assert_eq!(plan(5_000, Some(100)).charge_amount(), Some(0));
    }

    #[test]
    fn validate_rejects_bad_plans() {
        assert!(plan(100, Some(101)).validate().is_err());
        assert!(plan(-1, None).validate().is_err());

        let mut zero_days = plan(100, None);
        zero_days.duration_days = 0;
        assert!(zero_days.validate().is_err());

        assert!(plan(100, Some(20)).validate().is_ok());
        assert!(plan(MAX_PLAN_PRICE, Some(20)).validate().is_ok());
        assert!(plan(MAX_PLAN_PRICE + 1, None).validate().is_err());
    }

    #[test]
    fn oversized_price_has_no_charge() {
        assert_eq!(plan(i64::MAX / 10, Some(20)).charge_amount(), None);
        assert_eq!(plan(i64::MAX, None).charge_amount(), None);
        assert_eq!(
            plan(MAX_PLAN_PRICE, Some(20)).charge_amount(),
            Some(800_000_000_000)
        );
    }
}
