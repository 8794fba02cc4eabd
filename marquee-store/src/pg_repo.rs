use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use marquee_core::{
    InsertOutcome, RemoveOutcome, RoomLayout, ScreeningDirectory, SeatClaim, SeatClaimSource,
    SeatLock, SeatLockTable, SeatPos, StoreError,
};
use marquee_order::{Order, OrderStatus, OrderStore, TransitionError};

pub struct PgLockTable {
    pool: PgPool,
}

impl PgLockTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LockRow {
    screening_id: Uuid,
    row_index: i32,
    col_index: i32,
    holder_id: Uuid,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<LockRow> for SeatLock {
    fn from(row: LockRow) -> Self {
        SeatLock {
            screening_id: row.screening_id,
            seat: SeatPos::new(row.row_index, row.col_index),
            holder_id: row.holder_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl SeatLockTable for PgLockTable {
    async fn query(
        &self,
        screening_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, StoreError> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT screening_id, row_index, col_index, holder_id, expires_at, created_at \
             FROM seat_locks WHERE screening_id = $1 AND expires_at > $2",
        )
        .bind(screening_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SeatLock::from).collect())
    }

    async fn insert(
        &self,
        lock: SeatLock,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        // Single upsert so two concurrent takers of the same seat resolve
        // inside Postgres. The WHERE arm lets the write through only over
        // an expired row or the holder's own; `created_at` survives a
        // same-holder refresh but resets when an expired lock is replaced.
        // The comparison runs in SQL where both sides share timestamptz
        // precision.
        let row: Option<(bool,)> = sqlx::query_as(
            "INSERT INTO seat_locks \
                 (screening_id, row_index, col_index, holder_id, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (screening_id, row_index, col_index) DO UPDATE SET \
                 holder_id = EXCLUDED.holder_id, \
                 expires_at = EXCLUDED.expires_at, \
                 created_at = CASE \
                     WHEN seat_locks.holder_id = EXCLUDED.holder_id \
                          AND seat_locks.expires_at > $7 \
                     THEN seat_locks.created_at \
                     ELSE EXCLUDED.created_at \
                 END \
             WHERE seat_locks.expires_at <= $7 \
                OR seat_locks.holder_id = EXCLUDED.holder_id \
             RETURNING (created_at = $6) AS created",
        )
        .bind(lock.screening_id)
        .bind(lock.seat.row)
        .bind(lock.seat.col)
        .bind(lock.holder_id)
        .bind(lock.expires_at)
        .bind(lock.created_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => InsertOutcome::Conflict,
            Some((true,)) => InsertOutcome::Created,
            Some((false,)) => InsertOutcome::Refreshed,
        })
    }

    async fn remove(
        &self,
        screening_id: Uuid,
        seat: SeatPos,
        holder_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RemoveOutcome, StoreError> {
        let deleted = sqlx::query(
            "DELETE FROM seat_locks \
             WHERE screening_id = $1 AND row_index = $2 AND col_index = $3 \
               AND holder_id = $4 AND expires_at > $5",
        )
        .bind(screening_id)
        .bind(seat.row)
        .bind(seat.col)
        .bind(holder_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted > 0 {
            return Ok(RemoveOutcome::Removed);
        }

        let other: Option<(Uuid,)> = sqlx::query_as(
            "SELECT holder_id FROM seat_locks \
             WHERE screening_id = $1 AND row_index = $2 AND col_index = $3 \
               AND expires_at > $4",
        )
        .bind(screening_id)
        .bind(seat.row)
        .bind(seat.col)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match other {
            Some((found,)) if found != holder_id => Ok(RemoveOutcome::HeldByOther),
            _ => Ok(RemoveOutcome::NotHeld),
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>, StoreError> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "DELETE FROM seat_locks WHERE expires_at <= $1 \
             RETURNING screening_id, row_index, col_index, holder_id, expires_at, created_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SeatLock::from).collect())
    }
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, row: OrderRow) -> Result<Order, StoreError> {
        let seats: Vec<(i32, i32)> = sqlx::query_as(
            "SELECT row_index, col_index FROM order_seats \
             WHERE order_id = $1 ORDER BY row_index, col_index",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| format!("unknown order status in storage: {}", row.status))?;

        Ok(Order {
            id: row.id,
            order_no: row.order_no,
            user_id: row.user_id,
            screening_id: row.screening_id,
            seats: seats
                .into_iter()
                .map(|(r, c)| SeatPos::new(r, c))
                .collect(),
            status,
            create_time: row.create_time,
            deadline: row.deadline,
            payment_time: row.payment_time,
            cancel_time: row.cancel_time,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_no: String,
    user_id: Uuid,
    screening_id: Uuid,
    status: String,
    create_time: DateTime<Utc>,
    deadline: DateTime<Utc>,
    payment_time: Option<DateTime<Utc>>,
    cancel_time: Option<DateTime<Utc>>,
}

const ORDER_COLUMNS: &str = "id, order_no, user_id, screening_id, status, \
                             create_time, deadline, payment_time, cancel_time";

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders \
                 (id, order_no, user_id, screening_id, status, create_time, deadline) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(order.id)
        .bind(&order.order_no)
        .bind(order.user_id)
        .bind(order.screening_id)
        .bind(order.status.as_str())
        .bind(order.create_time)
        .bind(order.deadline)
        .execute(&mut *tx)
        .await?;

        for seat in &order.seats {
            sqlx::query(
                "INSERT INTO order_seats (order_id, row_index, col_index) VALUES ($1, $2, $3)",
            )
            .bind(order.id)
            .bind(seat.row)
            .bind(seat.col)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_by_order_no(&self, order_no: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1"
        ))
        .bind(order_no)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY create_time DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.load(row).await?);
        }
        Ok(orders)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, TransitionError> {
        // Guarded update: the status predicate makes this the same
        // compare-and-swap the in-memory store does under its mutex.
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "UPDATE orders SET status = $1, \
                 payment_time = CASE WHEN $1 = 'PAID' THEN $2 ELSE payment_time END, \
                 cancel_time = CASE WHEN $1 = 'CANCELLED' THEN $2 ELSE cancel_time END \
             WHERE id = $3 AND status = $4 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(to.as_str())
        .bind(at)
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TransitionError::Store(e.into()))?;

        if let Some(row) = row {
            return self.load(row).await.map_err(TransitionError::Store);
        }

        let actual: Option<(String,)> = sqlx::query_as("SELECT status FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TransitionError::Store(e.into()))?;

        match actual {
            None => Err(TransitionError::NotFound),
            Some((status,)) => {
                let actual = OrderStatus::parse(&status).ok_or_else(|| {
                    TransitionError::Store(
                        format!("unknown order status in storage: {status}").into(),
                    )
                })?;
                Err(TransitionError::StateMismatch { expected, actual })
            }
        }
    }

    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM orders WHERE status = 'PENDING_PAYMENT' AND deadline <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl SeatClaimSource for PgOrderStore {
    async fn claimed_seats(
        &self,
        screening_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatClaim>, StoreError> {
        let rows: Vec<(i32, i32, bool)> = sqlx::query_as(
            "SELECT s.row_index, s.col_index, o.status IN ('PAID', 'COMPLETED') AS sold \
             FROM orders o JOIN order_seats s ON s.order_id = o.id \
             WHERE o.screening_id = $1 \
               AND (o.status IN ('PAID', 'COMPLETED') \
                    OR (o.status = 'PENDING_PAYMENT' AND o.deadline > $2))",
        )
        .bind(screening_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(row, col, sold)| SeatClaim {
                seat: SeatPos::new(row, col),
                sold,
            })
            .collect())
    }
}

pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        screening_id: Uuid,
        layout: &RoomLayout,
    ) -> Result<(), StoreError> {
        let blocked = serde_json::to_string(&layout.blocked)?;
        sqlx::query(
            "INSERT INTO screenings (id, room_rows, room_cols, blocked_seats) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET \
                 room_rows = EXCLUDED.room_rows, \
                 room_cols = EXCLUDED.room_cols, \
                 blocked_seats = EXCLUDED.blocked_seats",
        )
        .bind(screening_id)
        .bind(layout.rows)
        .bind(layout.cols)
        .bind(blocked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ScreeningDirectory for PgDirectory {
    async fn room_layout(&self, screening_id: Uuid) -> Result<Option<RoomLayout>, StoreError> {
        let row: Option<(i32, i32, String)> = sqlx::query_as(
            "SELECT room_rows, room_cols, blocked_seats FROM screenings WHERE id = $1",
        )
        .bind(screening_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((rows, cols, blocked)) => {
                let blocked: Vec<SeatPos> = serde_json::from_str(&blocked)?;
                Ok(Some(RoomLayout::with_blocked(rows, cols, blocked)))
            }
            None => Ok(None),
        }
    }
}
