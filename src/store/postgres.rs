use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use super::{schema, OrderRepository, StoreError};
use crate::domain::order::{Delivery, Item, Order, Payment};
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// PostgreSQL Order Repository
// ============================================================================
//
// Every operation runs under its own deadline. Writes insert the aggregate
// with plain INSERTs inside one transaction: a duplicate `order_uid` or a
// duplicate payment `transaction` raises a unique violation, the transaction
// is rolled back on drop and the caller sees `StoreError::Conflict`.
//
// ============================================================================

const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-operation deadlines
#[derive(Debug, Clone, Copy)]
pub struct QueryTimeouts {
    pub get: Duration,
    pub save: Duration,
    pub get_all: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            get: Duration::from_secs(5),
            save: Duration::from_secs(8),
            get_all: Duration::from_secs(15),
        }
    }
}

pub struct PostgresOrderRepository {
    pool: PgPool,
    timeouts: QueryTimeouts,
}

impl PostgresOrderRepository {
    /// Open a pool, wait for the server to answer and make sure the schema
    /// exists.
    ///
    /// Unreachable servers are probed again for a bounded time. Rejections
    /// (bad credentials, unknown database) fail immediately.
    pub async fn connect(
        options: PgConnectOptions,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .max_lifetime(Duration::from_secs(5 * 60))
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);

        let repo = Self {
            pool,
            timeouts: QueryTimeouts::default(),
        };

        let probe = RetryConfig::startup_probe();
        let repo_ref = &repo;
        retry_on_transient(&probe, "database_ping", move |attempt| async move {
            debug!(attempt = attempt, "Pinging PostgreSQL");
            repo_ref.ping().await
        })
        .await
        .map_err(|e| e.into_inner())?;

        schema::ensure_schema(&repo.pool).await?;

        info!(max_connections = max_connections, "Connected to PostgreSQL");

        Ok(repo)
    }

    async fn load_order(&self, order_uid: &str) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;

        let order_row = sqlx::query(SELECT_ORDER)
            .bind(order_uid)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(order_uid.to_string()))?;

        let delivery_row = sqlx::query(SELECT_DELIVERY)
            .bind(order_uid)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::Incomplete {
                order_uid: order_uid.to_string(),
                missing: "delivery",
            })?;

        let payment_row = sqlx::query(SELECT_PAYMENT)
            .bind(order_uid)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::Incomplete {
                order_uid: order_uid.to_string(),
                missing: "payment",
            })?;

        let item_rows = sqlx::query(SELECT_ITEMS)
            .bind(order_uid)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let items = item_rows
            .iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(order_from_rows(
            &order_row,
            delivery_from_row(&delivery_row)?,
            payment_from_row(&payment_row)?,
            items,
        )?)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature, \
             customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .execute(&mut *tx)
        .await?;

        let d = &order.delivery;
        sqlx::query(
            "INSERT INTO delivery (order_uid, name, phone, zip, city, address, region, email) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&order.order_uid)
        .bind(&d.name)
        .bind(&d.phone)
        .bind(&d.zip)
        .bind(&d.city)
        .bind(&d.address)
        .bind(&d.region)
        .bind(&d.email)
        .execute(&mut *tx)
        .await?;

        let p = &order.payment;
        sqlx::query(
            "INSERT INTO payment (order_uid, transaction, request_id, currency, provider, amount, \
             payment_dt, bank, delivery_cost, goods_total, custom_fee) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&order.order_uid)
        .bind(&p.transaction)
        .bind(&p.request_id)
        .bind(&p.currency)
        .bind(&p.provider)
        .bind(p.amount)
        .bind(p.payment_dt)
        .bind(&p.bank)
        .bind(p.delivery_cost)
        .bind(p.goods_total)
        .bind(p.custom_fee)
        .execute(&mut *tx)
        .await?;

        if !order.items.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO items (order_uid, chrt_id, track_number, price, rid, name, sale, \
                 size, total_price, nm_id, brand, status) ",
            );
            builder.push_values(&order.items, |mut row, item| {
                row.push_bind(order.order_uid.as_str())
                    .push_bind(item.chrt_id)
                    .push_bind(item.track_number.as_str())
                    .push_bind(item.price)
                    .push_bind(item.rid.as_str())
                    .push_bind(item.name.as_str())
                    .push_bind(item.sale)
                    .push_bind(item.size.as_str())
                    .push_bind(item.total_price)
                    .push_bind(item.nm_id)
                    .push_bind(item.brand.as_str())
                    .push_bind(item.status);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }

    async fn load_all(&self) -> Result<Vec<Order>, StoreError> {
        let documents: Vec<String> = sqlx::query_scalar(SELECT_ALL_AS_JSON)
            .fetch_all(&self.pool)
            .await?;

        documents
            .iter()
            .map(|doc| serde_json::from_str::<Order>(doc).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn get_order(&self, order_uid: &str) -> Result<Order, StoreError> {
        bounded("get_order", self.timeouts.get, self.load_order(order_uid)).await
    }

    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        bounded("save_order", self.timeouts.save, async {
            self.insert_order(order)
                .await
                .map_err(|e| classify_write_error(e, &order.order_uid))
        })
        .await?;

        debug!(
            order_uid = %order.order_uid,
            items = order.items.len(),
            "Order persisted"
        );
        Ok(())
    }

    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        bounded("get_all_orders", self.timeouts.get_all, self.load_all()).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        bounded("ping", PING_TIMEOUT, async {
            probe.await.map(|_| ()).map_err(StoreError::from)
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout {
            operation,
            timeout: limit,
        })?
}

fn classify_write_error(err: sqlx::Error, order_uid: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            order_uid: order_uid.to_string(),
        },
        _ => StoreError::Database(err),
    }
}

fn order_from_rows(
    row: &PgRow,
    delivery: Delivery,
    payment: Payment,
    items: Vec<Item>,
) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        delivery,
        payment,
        items,
        locale: row.try_get("locale")?,
        internal_signature: row
            .try_get::<Option<String>, _>("internal_signature")?
            .unwrap_or_default(),
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, sqlx::Error> {
    Ok(Delivery {
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        transaction: row.try_get("transaction")?,
        request_id: row
            .try_get::<Option<String>, _>("request_id")?
            .unwrap_or_default(),
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

// ============================================================================
// Queries
// ============================================================================

const SELECT_ORDER: &str = "SELECT order_uid, track_number, entry, locale, internal_signature, \
     customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard \
     FROM orders WHERE order_uid = $1";

const SELECT_DELIVERY: &str = "SELECT name, phone, zip, city, address, region, email \
     FROM delivery WHERE order_uid = $1";

const SELECT_PAYMENT: &str = "SELECT transaction, request_id, currency, provider, amount, \
     payment_dt, bank, delivery_cost, goods_total, custom_fee \
     FROM payment WHERE order_uid = $1";

const SELECT_ITEMS: &str = "SELECT chrt_id, track_number, price, rid, name, sale, size, \
     total_price, nm_id, brand, status \
     FROM items WHERE order_uid = $1 ORDER BY id";

/// Whole aggregates as JSON documents in wire format, newest first.
/// Orders missing their delivery or payment row are left out.
const SELECT_ALL_AS_JSON: &str = r#"
SELECT json_build_object(
    'order_uid', o.order_uid,
    'track_number', o.track_number,
    'entry', o.entry,
    'delivery', json_build_object(
        'name', d.name,
        'phone', d.phone,
        'zip', d.zip,
        'city', d.city,
        'address', d.address,
        'region', d.region,
        'email', d.email
    ),
    'payment', json_build_object(
        'transaction', p.transaction,
        'request_id', COALESCE(p.request_id, ''),
        'currency', p.currency,
        'provider', p.provider,
        'amount', p.amount,
        'payment_dt', p.payment_dt,
        'bank', p.bank,
        'delivery_cost', p.delivery_cost,
        'goods_total', p.goods_total,
        'custom_fee', p.custom_fee
    ),
    'items', COALESCE((
        SELECT json_agg(json_build_object(
            'chrt_id', i.chrt_id,
            'track_number', i.track_number,
            'price', i.price,
            'rid', i.rid,
            'name', i.name,
            'sale', i.sale,
            'size', i.size,
            'total_price', i.total_price,
            'nm_id', i.nm_id,
            'brand', i.brand,
            'status', i.status
        ) ORDER BY i.id)
        FROM items i
        WHERE i.order_uid = o.order_uid
    ), '[]'::json),
    'locale', o.locale,
    'internal_signature', COALESCE(o.internal_signature, ''),
    'customer_id', o.customer_id,
    'delivery_service', o.delivery_service,
    'shardkey', o.shardkey,
    'sm_id', o.sm_id,
    'date_created', o.date_created,
    'oof_shard', o.oof_shard
)::text
FROM orders o
JOIN delivery d ON d.order_uid = o.order_uid
JOIN payment p ON p.order_uid = o.order_uid
ORDER BY o.date_created DESC
"#;
