use sqlx::PgPool;
use tracing::debug;

use super::StoreError;

// ============================================================================
// Schema
// ============================================================================
//
// One row per order in `orders`, exactly one `delivery` and one `payment` row
// per order, any number of `items`. Child rows are removed with the order.
//
// Uniqueness that the service relies on:
// - orders.order_uid     (primary key)
// - payment.transaction  (unique)
//
// ============================================================================

const TABLES: &[(&str, &str)] = &[
    (
        "orders",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_uid          VARCHAR(50) PRIMARY KEY,
            track_number       VARCHAR(50) NOT NULL,
            entry              VARCHAR(10) NOT NULL,
            locale             VARCHAR(10) NOT NULL,
            internal_signature VARCHAR(100),
            customer_id        VARCHAR(50) NOT NULL,
            delivery_service   VARCHAR(50) NOT NULL,
            shardkey           VARCHAR(10) NOT NULL,
            sm_id              INTEGER NOT NULL CHECK (sm_id >= 0),
            date_created       TIMESTAMPTZ NOT NULL,
            oof_shard          VARCHAR(10) NOT NULL
        )"#,
    ),
    (
        "delivery",
        r#"
        CREATE TABLE IF NOT EXISTS delivery (
            id        BIGSERIAL PRIMARY KEY,
            order_uid VARCHAR(50) NOT NULL UNIQUE REFERENCES orders(order_uid) ON DELETE CASCADE,
            name      VARCHAR(100) NOT NULL,
            phone     VARCHAR(30) NOT NULL,
            zip       VARCHAR(20) NOT NULL,
            city      VARCHAR(100) NOT NULL,
            address   VARCHAR(200) NOT NULL,
            region    VARCHAR(100) NOT NULL,
            email     VARCHAR(200) NOT NULL
        )"#,
    ),
    (
        "payment",
        r#"
        CREATE TABLE IF NOT EXISTS payment (
            id            BIGSERIAL PRIMARY KEY,
            order_uid     VARCHAR(50) NOT NULL UNIQUE REFERENCES orders(order_uid) ON DELETE CASCADE,
            transaction   VARCHAR(100) NOT NULL UNIQUE,
            request_id    VARCHAR(100),
            currency      VARCHAR(3) NOT NULL CHECK (char_length(currency) = 3),
            provider      VARCHAR(100) NOT NULL,
            amount        INTEGER NOT NULL,
            payment_dt    BIGINT NOT NULL,
            bank          VARCHAR(100) NOT NULL,
            delivery_cost INTEGER NOT NULL,
            goods_total   INTEGER NOT NULL,
            custom_fee    INTEGER NOT NULL
        )"#,
    ),
    (
        "items",
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id           BIGSERIAL PRIMARY KEY,
            order_uid    VARCHAR(50) NOT NULL REFERENCES orders(order_uid) ON DELETE CASCADE,
            chrt_id      BIGINT NOT NULL,
            track_number VARCHAR(50) NOT NULL,
            price        INTEGER NOT NULL,
            rid          VARCHAR(100) NOT NULL,
            name         TEXT NOT NULL,
            sale         INTEGER NOT NULL CHECK (sale >= 0),
            size         VARCHAR(20) NOT NULL,
            total_price  INTEGER NOT NULL,
            nm_id        BIGINT NOT NULL,
            brand        VARCHAR(200) NOT NULL,
            status       INTEGER NOT NULL
        )"#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_orders_track_number ON orders(track_number)",
    "CREATE INDEX IF NOT EXISTS idx_orders_customer_id ON orders(customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_date_created ON orders(date_created)",
    "CREATE INDEX IF NOT EXISTS idx_items_order_uid ON items(order_uid)",
];

/// Create tables and indexes if they do not exist yet.
///
/// Tables are created parent first so foreign keys resolve.
pub(super) async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for (table, ddl) in TABLES {
        sqlx::query(ddl).execute(pool).await?;
        debug!(table = %table, "Table ensured");
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
