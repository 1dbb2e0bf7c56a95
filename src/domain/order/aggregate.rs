use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::value_objects::{Delivery, Item, Payment};

// ============================================================================
// Order Aggregate
// ============================================================================
//
// The order is written and read as one unit (order + delivery + payment +
// items) and is never partially updated. `order_uid` is the identity in both
// the cache and the durable store.
//
// `Clone` is a full structural copy: every nested record owns its strings and
// the item list is a fresh `Vec`, so a clone never aliases the original.
//
// ============================================================================

/// Maximum length of `order_uid`, counted in characters
pub const MAX_ORDER_UID_LEN: usize = 50;

/// Unix seconds of `0001-01-01T00:00:00Z`, the zero time of Go producers
const GO_ZERO_TIME_SECS: i64 = -62_135_596_800;

// Widths of the store's VARCHAR columns, in characters
const SHORT: usize = 10;
const ZIP_OR_SIZE: usize = 20;
const PHONE: usize = 30;
const IDENT: usize = 50;
const NAME: usize = 100;
const LONG: usize = 200;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

fn require(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required(field.to_string()));
    }
    Ok(())
}

fn max_len(value: &str, field: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            len,
            max,
        });
    }
    Ok(())
}

/// Unset timestamp: the serde default (Unix epoch) or the Go zero time
fn is_zero_time(t: &DateTime<Utc>) -> bool {
    *t == DateTime::<Utc>::default()
        || (t.timestamp() == GO_ZERO_TIME_SECS && t.timestamp_subsec_nanos() == 0)
}

fn require_positive(value: i64, field: String) -> Result<(), ValidationError> {
    if value <= 0 {
        return Err(ValidationError::NotPositive(field));
    }
    Ok(())
}

fn require_non_negative(value: i64, field: String) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::Negative(field));
    }
    Ok(())
}

impl Order {
    /// Check every structural invariant of the aggregate.
    ///
    /// Reports the first violation found. The check order is stable: order
    /// header, delivery, payment, then items in sequence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.order_uid, "order_uid")?;
        max_len(&self.order_uid, "order_uid", MAX_ORDER_UID_LEN)?;
        require(&self.track_number, "track_number")?;
        require(&self.entry, "entry")?;
        require(&self.customer_id, "customer_id")?;
        require(&self.delivery_service, "delivery_service")?;
        max_len(&self.track_number, "track_number", IDENT)?;
        max_len(&self.entry, "entry", SHORT)?;
        max_len(&self.locale, "locale", SHORT)?;
        max_len(&self.internal_signature, "internal_signature", NAME)?;
        max_len(&self.customer_id, "customer_id", IDENT)?;
        max_len(&self.delivery_service, "delivery_service", IDENT)?;
        max_len(&self.shardkey, "shardkey", SHORT)?;
        max_len(&self.oof_shard, "oof_shard", SHORT)?;
        if is_zero_time(&self.date_created) {
            return Err(ValidationError::MissingCreatedAt);
        }
        require_non_negative(self.sm_id.into(), "sm_id".to_string())?;

        self.validate_delivery()?;
        self.validate_payment()?;
        self.validate_items()
    }

    fn validate_delivery(&self) -> Result<(), ValidationError> {
        let d = &self.delivery;
        require(&d.name, "delivery.name")?;
        require(&d.phone, "delivery.phone")?;
        require(&d.zip, "delivery.zip")?;
        require(&d.city, "delivery.city")?;
        require(&d.address, "delivery.address")?;
        require(&d.region, "delivery.region")?;
        require(&d.email, "delivery.email")?;

        max_len(&d.name, "delivery.name", NAME)?;
        max_len(&d.phone, "delivery.phone", PHONE)?;
        max_len(&d.zip, "delivery.zip", ZIP_OR_SIZE)?;
        max_len(&d.city, "delivery.city", NAME)?;
        max_len(&d.address, "delivery.address", LONG)?;
        max_len(&d.region, "delivery.region", NAME)?;
        max_len(&d.email, "delivery.email", LONG)
    }

    fn validate_payment(&self) -> Result<(), ValidationError> {
        let p = &self.payment;
        require(&p.transaction, "payment.transaction")?;
        require(&p.currency, "payment.currency")?;
        require(&p.provider, "payment.provider")?;
        require(&p.bank, "payment.bank")?;
        max_len(&p.transaction, "payment.transaction", NAME)?;
        max_len(&p.request_id, "payment.request_id", NAME)?;
        max_len(&p.provider, "payment.provider", NAME)?;
        max_len(&p.bank, "payment.bank", NAME)?;

        if p.currency.len() != 3 || !p.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(p.currency.clone()));
        }

        require_non_negative(p.amount.into(), "payment.amount".to_string())?;
        require_non_negative(p.payment_dt, "payment.payment_dt".to_string())?;
        require_non_negative(p.delivery_cost.into(), "payment.delivery_cost".to_string())?;
        require_non_negative(p.goods_total.into(), "payment.goods_total".to_string())?;
        require_non_negative(p.custom_fee.into(), "payment.custom_fee".to_string())
    }

    fn validate_items(&self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::EmptyItems);
        }

        for (i, item) in self.items.iter().enumerate() {
            let path = |field: &str| format!("items[{}].{}", i, field);

            require(&item.track_number, &path("track_number"))?;
            require(&item.name, &path("name"))?;
            require(&item.brand, &path("brand"))?;
            require(&item.rid, &path("rid"))?;
            require(&item.size, &path("size"))?;
            max_len(&item.track_number, &path("track_number"), IDENT)?;
            max_len(&item.rid, &path("rid"), NAME)?;
            max_len(&item.size, &path("size"), ZIP_OR_SIZE)?;
            max_len(&item.brand, &path("brand"), LONG)?;
            require_positive(item.price.into(), path("price"))?;
            require_positive(item.total_price.into(), path("total_price"))?;
            require_positive(item.chrt_id, path("chrt_id"))?;
            require_positive(item.nm_id, path("nm_id"))?;
            require_non_negative(item.status.into(), path("status"))?;
            require_non_negative(item.sale.into(), path("sale"))?;
        }

        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
