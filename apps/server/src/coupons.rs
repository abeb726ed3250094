//! Coupon eligibility and discount selection. Pure functions over the
//! caller's coupons; claiming and releasing live in `booking`.

use crate::models::{CouponStatus, DiscountKind, OwnedCoupon, PaymentMethod};

/// What a coupon is being checked against.
#[derive(Debug, Clone, Copy)]
pub struct CouponContext {
    pub price: i64,
    pub field_id: i64,
    /// `None` skips the payment method rule (method not chosen yet).
    pub payment_method: Option<PaymentMethod>,
}

pub fn is_eligible(coupon: &OwnedCoupon, ctx: &CouponContext) -> bool {
    let campaign = &coupon.campaign;

    if coupon.coupon.status != CouponStatus::Active {
        return false;
    }
    if campaign.min_spend.is_some_and(|min| min > ctx.price) {
        return false;
    }
    let fields = campaign.eligible_field_ids();
    if !fields.is_empty() && !fields.contains(&ctx.field_id) {
        return false;
    }
    let methods = campaign.eligible_methods();
    if let Some(method) = ctx.payment_method {
        if !methods.is_empty() && !methods.contains(&method) {
            return false;
        }
    }
    true
}

pub fn discount_value(coupon: &OwnedCoupon, price: i64) -> i64 {
    let campaign = &coupon.campaign;
    match campaign.discount_kind {
        DiscountKind::Fixed => campaign.discount_value,
        DiscountKind::Percent => price * campaign.discount_value / 100,
    }
}

pub fn final_price(price: i64, discount: i64) -> i64 {
    (price - discount).max(0)
}

/// Eligible coupon with the largest discount. Ties keep the earliest one.
pub fn best_coupon<'a>(coupons: &'a [OwnedCoupon], ctx: &CouponContext) -> Option<&'a OwnedCoupon> {
    let mut best: Option<(&OwnedCoupon, i64)> = None;
    for coupon in coupons.iter().filter(|c| is_eligible(c, ctx)) {
        let value = discount_value(coupon, ctx.price);
        if best.map_or(true, |(_, top)| value > top) {
            best = Some((coupon, value));
        }
    }
    best.map(|(c, _)| c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedDiscount {
    pub coupon_id: Option<i64>,
    pub discount: i64,
    pub final_price: i64,
    /// The manual pick no longer qualified and was replaced by the automatic best.
    pub manual_cleared: bool,
}

/// The caller's coupon choice, kept across price and field changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CouponSelection {
    pub manual: Option<i64>,
}

impl CouponSelection {
    /// Re-validates the manual pick against `ctx`; falls back to the best
    /// eligible coupon when there is no valid manual pick.
    pub fn resolve(&mut self, coupons: &[OwnedCoupon], ctx: &CouponContext) -> AppliedDiscount {
        let mut manual_cleared = false;

        if let Some(id) = self.manual {
            match coupons.iter().find(|c| c.coupon.id == id) {
                Some(coupon) if is_eligible(coupon, ctx) => {
                    return applied(Some(coupon), ctx.price, false);
                }
                _ => {
                    self.manual = None;
                    manual_cleared = true;
                }
            }
        }

        applied(best_coupon(coupons, ctx), ctx.price, manual_cleared)
    }
}

fn applied(coupon: Option<&OwnedCoupon>, price: i64, manual_cleared: bool) -> AppliedDiscount {
    let discount = coupon.map_or(0, |c| discount_value(c, price));
    AppliedDiscount {
        coupon_id: coupon.map(|c| c.coupon.id),
        discount,
        final_price: final_price(price, discount),
        manual_cleared,
    }
}
