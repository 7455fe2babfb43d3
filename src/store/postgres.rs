use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::PgPool;

use super::{OrderStore, StoreError};
use crate::model::{Delivery, Item, Order, Payment};

// ============================================================================
// Postgres Order Store
// ============================================================================
//
// The aggregate spans four tables: `orders` owns the surrogate id assigned
// at insert time, and `order_delivery` / `order_payment` / `order_item` link
// back to it. The insert runs in one transaction so the aggregate is either
// fully persisted or not persisted at all. `date_created` arrives as RFC 3339
// text, is stored as a timestamptz, and is re-serialized on read.
//
// ============================================================================

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    name: String,
    phone: String,
    zip: String,
    city: String,
    address: String,
    region: String,
    email: String,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    transaction: String,
    request_id: String,
    currency: String,
    provider: String,
    amount: i32,
    payment_dt: i64,
    bank: String,
    delivery_cost: i32,
    goods_total: i32,
    custom_fee: i32,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    chrt_id: i64,
    track_number: String,
    price: i32,
    rid: String,
    name: String,
    sale: i32,
    size: String,
    total_price: i32,
    nm_id: i64,
    brand: String,
    status: i32,
}

fn parse_date_created(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::InvalidData(format!("date_created {raw:?}: {err}")))
}

/// Matches Go's `time.Format(time.RFC3339)` output for UTC values.
fn format_date_created(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn assemble_order(
    header: OrderRow,
    delivery: DeliveryRow,
    payment: PaymentRow,
    items: Vec<ItemRow>,
) -> Order {
    Order {
        order_uid: header.uid,
        track_number: header.track_number,
        entry: header.entry,
        delivery: Delivery {
            name: delivery.name,
            phone: delivery.phone,
            zip: delivery.zip,
            city: delivery.city,
            address: delivery.address,
            region: delivery.region,
            email: delivery.email,
        },
        payment: Payment {
            transaction: payment.transaction,
            request_id: payment.request_id,
            currency: payment.currency,
            provider: payment.provider,
            amount: payment.amount,
            payment_dt: payment.payment_dt,
            bank: payment.bank,
            delivery_cost: payment.delivery_cost,
            goods_total: payment.goods_total,
            custom_fee: payment.custom_fee,
        },
        items: items
            .into_iter()
            .map(|item| Item {
                chrt_id: item.chrt_id,
                track_number: item.track_number,
                price: item.price,
                rid: item.rid,
                name: item.name,
                sale: item.sale,
                size: item.size,
                total_price: item.total_price,
                nm_id: item.nm_id,
                brand: item.brand,
                status: item.status,
            })
            .collect(),
        locale: header.locale,
        internal_signature: header.internal_signature,
        customer_id: header.customer_id,
        delivery_service: header.delivery_service,
        shardkey: header.shardkey,
        sm_id: header.sm_id,
        date_created: format_date_created(header.date_created),
        oof_shard: header.oof_shard,
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let date_created = parse_date_created(&order.date_created)?;

        let mut tx = self.pool.begin().await?;

        let order_id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (
                uid, track_number, entry, locale, internal_signature,
                customer_id, delivery_service, shardkey, sm_id,
                date_created, oof_shard
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING id",
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
        .bind(date_created)
        .bind(&order.oof_shard)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::InvalidData(format!("duplicate order uid {}", order.order_uid))
            }
            _ => StoreError::Database(err),
        })?;

        sqlx::query(
            "INSERT INTO order_delivery (
                order_id, name, phone, zip, city, address, region, email
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(order_id)
        .bind(&order.delivery.name)
        .bind(&order.delivery.phone)
        .bind(&order.delivery.zip)
        .bind(&order.delivery.city)
        .bind(&order.delivery.address)
        .bind(&order.delivery.region)
        .bind(&order.delivery.email)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_payment (
                order_id, transaction, request_id, currency, provider,
                amount, payment_dt, bank, delivery_cost, goods_total, custom_fee
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(order_id)
        .bind(&order.payment.transaction)
        .bind(&order.payment.request_id)
        .bind(&order.payment.currency)
        .bind(&order.payment.provider)
        .bind(order.payment.amount)
        .bind(order.payment.payment_dt)
        .bind(&order.payment.bank)
        .bind(order.payment.delivery_cost)
        .bind(order.payment.goods_total)
        .bind(order.payment.custom_fee)
        .execute(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_item (
                    order_id, chrt_id, track_number, price, rid, name,
                    sale, size, total_price, nm_id, brand, status
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(order_id)
            .bind(item.chrt_id)
            .bind(&item.track_number)
            .bind(item.price)
            .bind(&item.rid)
            .bind(&item.name)
            .bind(item.sale)
            .bind(&item.size)
            .bind(item.total_price)
            .bind(item.nm_id)
            .bind(&item.brand)
            .bind(item.status)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(order_uid = %order.order_uid, "order aggregate persisted");
        Ok(())
    }

    async fn get_order_by_uid(&self, uid: &str) -> Result<Order, StoreError> {
        let header: OrderRow = sqlx::query_as(
            "SELECT id, uid, track_number, entry, locale, internal_signature,
                    customer_id, delivery_service, shardkey, sm_id,
                    date_created, oof_shard
             FROM orders WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;

        let delivery: DeliveryRow = sqlx::query_as(
            "SELECT name, phone, zip, city, address, region, email
             FROM order_delivery WHERE order_id = $1",
        )
        .bind(header.id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::Internal {
            uid: uid.to_string(),
            reason: format!("delivery: {err}"),
        })?;

        let payment: PaymentRow = sqlx::query_as(
            "SELECT transaction, request_id, currency, provider, amount,
                    payment_dt, bank, delivery_cost, goods_total, custom_fee
             FROM order_payment WHERE order_id = $1",
        )
        .bind(header.id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::Internal {
            uid: uid.to_string(),
            reason: format!("payment: {err}"),
        })?;

        let items: Vec<ItemRow> = sqlx::query_as(
            "SELECT chrt_id, track_number, price, rid, name, sale, size,
                    total_price, nm_id, brand, status
             FROM order_item WHERE order_id = $1 ORDER BY id",
        )
        .bind(header.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StoreError::Internal {
            uid: uid.to_string(),
            reason: format!("items: {err}"),
        })?;

        Ok(assemble_order(header, delivery, payment, items))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::sample_order;

    fn lazy_store() -> PostgresStore {
        // connect_lazy never dials, so classification that happens before any
        // query can be exercised without a database.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unreachable")
            .unwrap();
        PostgresStore::new(pool)
    }

    #[tokio::test]
    async fn malformed_date_created_is_a_permanent_error() {
        let store = lazy_store();
        let mut order = sample_order("bad-date");
        order.date_created = "day after tomorrow".to_string();

        let err = store.insert_order(&order).await.unwrap_err();
        assert!(err.is_permanent(), "got {err:?}");
    }

    #[test]
    fn date_created_parses_and_reserializes_to_the_same_instant() {
        let parsed = parse_date_created("2021-11-26T06:22:19Z").unwrap();
        assert_eq!(format_date_created(parsed), "2021-11-26T06:22:19Z");

        // Offset input normalizes to UTC without changing the instant.
        let offset = parse_date_created("2021-11-26T09:22:19+03:00").unwrap();
        assert_eq!(offset, parsed);
        assert_eq!(format_date_created(offset), "2021-11-26T06:22:19Z");
    }

    #[test]
    fn assemble_order_rebuilds_the_full_aggregate() {
        let expected = sample_order("assemble-test");
        let header = OrderRow {
            id: 42,
            uid: expected.order_uid.clone(),
            track_number: expected.track_number.clone(),
            entry: expected.entry.clone(),
            locale: expected.locale.clone(),
            internal_signature: expected.internal_signature.clone(),
            customer_id: expected.customer_id.clone(),
            delivery_service: expected.delivery_service.clone(),
            shardkey: expected.shardkey.clone(),
            sm_id: expected.sm_id,
            date_created: parse_date_created(&expected.date_created).unwrap(),
            oof_shard: expected.oof_shard.clone(),
        };
        let delivery = DeliveryRow {
            name: expected.delivery.name.clone(),
            phone: expected.delivery.phone.clone(),
            zip: expected.delivery.zip.clone(),
            city: expected.delivery.city.clone(),
            address: expected.delivery.address.clone(),
            region: expected.delivery.region.clone(),
            email: expected.delivery.email.clone(),
        };
        let payment = PaymentRow {
            transaction: expected.payment.transaction.clone(),
            request_id: expected.payment.request_id.clone(),
            currency: expected.payment.currency.clone(),
            provider: expected.payment.provider.clone(),
            amount: expected.payment.amount,
            payment_dt: expected.payment.payment_dt,
            bank: expected.payment.bank.clone(),
            delivery_cost: expected.payment.delivery_cost,
            goods_total: expected.payment.goods_total,
            custom_fee: expected.payment.custom_fee,
        };
        let items = expected
            .items
            .iter()
            .map(|item| ItemRow {
                chrt_id: item.chrt_id,
                track_number: item.track_number.clone(),
                price: item.price,
                rid: item.rid.clone(),
                name: item.name.clone(),
                sale: item.sale,
                size: item.size.clone(),
                total_price: item.total_price,
                nm_id: item.nm_id,
                brand: item.brand.clone(),
                status: item.status,
            })
            .collect();

        assert_eq!(assemble_order(header, delivery, payment, items), expected);
    }
}
