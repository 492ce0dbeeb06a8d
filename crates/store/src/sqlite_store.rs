use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docflow_types::{
    CancellationTrigger, GateViolationRecord, Order, OrderStatus, PhaseId, Tier, WorkflowState,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::store::{
    SettlementEvent, SettlementStatus, StatusTransition, StoreError, WorkflowStore,
};

const MIGRATIONS: [&str; 5] = [
    include_str!("../migrations/001_create_orders.sql"),
    include_str!("../migrations/002_create_workflows.sql"),
    include_str!("../migrations/003_create_order_transitions.sql"),
    include_str!("../migrations/004_create_gate_violations.sql"),
    include_str!("../migrations/005_create_settlement_events.sql"),
];

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite database at the given path
    pub async fn new<P: AsRef<Path>>(db_path: P, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Open a database from a `sqlite:` URL
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every pooled connection would otherwise get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for migration in MIGRATIONS {
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        }

        debug!(count = MIGRATIONS.len(), "Store migrations applied");
        Ok(())
    }

    fn row_to_order(row: &SqliteRow) -> Result<Order, StoreError> {
        let tier: String = row.get("tier");
        let status: String = row.get("status");
        let amount: String = row.get("amount_paid");

        Ok(Order {
            id: row.get("id"),
            tier: Tier::parse(&tier)
                .ok_or_else(|| StoreError::SerializationError(format!("unknown tier: {tier}")))?,
            status: parse_order_status(&status)?,
            amount_paid: Decimal::from_str(&amount)
                .map_err(|e| StoreError::SerializationError(e.to_string()))?,
            payment_ref: row.get("payment_ref"),
            refund_pending_manual: row.get::<i64, _>("refund_pending_manual") != 0,
            status_changed_at: from_millis(row.get("status_changed_at"))?,
            last_cascade_activity_at: row
                .get::<Option<i64>, _>("last_cascade_activity_at")
                .map(from_millis)
                .transpose()?,
            created_at: from_millis(row.get("created_at"))?,
            updated_at: from_millis(row.get("updated_at"))?,
        })
    }

    fn row_to_workflow(row: &SqliteRow) -> Result<WorkflowState, StoreError> {
        let json: String = row.get("state_json");
        serde_json::from_str(&json).map_err(|e| StoreError::SerializationError(e.to_string()))
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                id, tier, status, amount_paid, payment_ref, refund_pending_manual,
                status_changed_at, last_cascade_activity_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(order.tier.as_str())
        .bind(order.status.as_str())
        .bind(order.amount_paid.to_string())
        .bind(&order.payment_ref)
        .bind(order.refund_pending_manual as i64)
        .bind(to_millis(order.status_changed_at))
        .bind(order.last_cascade_activity_at.map(to_millis))
        .bind(to_millis(order.created_at))
        .bind(to_millis(order.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(order.id.clone()))
            }
            Err(e) => Err(StoreError::DatabaseError(e.to_string())),
        }
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_order(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET tier = ?, status = ?, amount_paid = ?, payment_ref = ?,
                refund_pending_manual = ?, status_changed_at = ?,
                last_cascade_activity_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(order.tier.as_str())
        .bind(order.status.as_str())
        .bind(order.amount_paid.to_string())
        .bind(&order.payment_ref)
        .bind(order.refund_pending_manual as i64)
        .bind(to_millis(order.status_changed_at))
        .bind(order.last_cascade_activity_at.map(to_millis))
        .bind(to_millis(order.updated_at))
        .bind(&order.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(order.id.clone()));
        }
        Ok(())
    }

    async fn transition_order(
        &self,
        id: &str,
        expected: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
        details: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        // 1. Conditional update; a concurrent writer makes this a no-op
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?, status_changed_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(new_status.as_str())
        .bind(to_millis(at))
        .bind(to_millis(at))
        .bind(id)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            // 2. Distinguish a lost race from a missing order
            let exists = sqlx::query("SELECT 1 FROM orders WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

            return match exists {
                Some(_) => Ok(false),
                None => Err(StoreError::NotFound(id.to_string())),
            };
        }

        // 3. Record the transition in the same transaction
        sqlx::query(
            r#"
            INSERT INTO order_transitions (order_id, from_status, to_status, timestamp, details)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new_status.as_str())
        .bind(to_millis(at))
        .bind(&details)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(true)
    }

    async fn touch_cascade_activity(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET last_cascade_activity_at = ? WHERE id = ?")
            .bind(to_millis(at))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_waiting(
        &self,
        status: OrderStatus,
        idle_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let cutoff = to_millis(idle_since);
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status = ?
              AND status_changed_at <= ?
              AND (last_cascade_activity_at IS NULL OR last_cascade_activity_at <= ?)
            ORDER BY status_changed_at ASC
            LIMIT ?
            "#,
        )
        .bind(status.as_str())
        .bind(cutoff)
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_order).collect()
    }

    async fn get_history(&self, order_id: &str) -> Result<Vec<StatusTransition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT from_status, to_status, timestamp, details
            FROM order_transitions
            WHERE order_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let from: String = row.get("from_status");
                let to: String = row.get("to_status");
                Ok(StatusTransition {
                    from_status: parse_order_status(&from)?,
                    to_status: parse_order_status(&to)?,
                    timestamp: from_millis(row.get("timestamp"))?,
                    details: row.get("details"),
                })
            })
            .collect()
    }

    async fn create_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO workflows (
                id, order_id, current_phase, phase_status, revision_loop_count, state_json, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&state.id)
        .bind(&state.order_id)
        .bind(state.current_phase.as_str())
        .bind(state.phase_status.as_str())
        .bind(state.revision_loop_count as i64)
        .bind(&json)
        .bind(to_millis(state.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(state.id.clone()))
            }
            Err(e) => Err(StoreError::DatabaseError(e.to_string())),
        }
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let row = sqlx::query("SELECT state_json FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_workflow).transpose()
    }

    async fn get_workflow_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<WorkflowState>, StoreError> {
        let row = sqlx::query("SELECT state_json FROM workflows WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_workflow).transpose()
    }

    async fn save_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET current_phase = ?, phase_status = ?, revision_loop_count = ?,
                state_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(state.current_phase.as_str())
        .bind(state.phase_status.as_str())
        .bind(state.revision_loop_count as i64)
        .bind(&json)
        .bind(to_millis(state.updated_at))
        .bind(&state.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(state.id.clone()));
        }
        Ok(())
    }

    async fn record_violation(&self, record: &GateViolationRecord) -> Result<(), StoreError> {
        let missing = serde_json::to_string(&record.missing_prereqs)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO gate_violations (
                workflow_id, order_id, current_phase, target_phase,
                missing_prereqs, severity, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.workflow_id)
        .bind(&record.order_id)
        .bind(record.current_phase.as_str())
        .bind(record.target_phase.as_str())
        .bind(&missing)
        .bind(&record.severity)
        .bind(to_millis(record.recorded_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn list_violations(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<GateViolationRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM gate_violations WHERE workflow_id = ? ORDER BY id ASC")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let current: String = row.get("current_phase");
                let target: String = row.get("target_phase");
                let missing: String = row.get("missing_prereqs");
                Ok(GateViolationRecord {
                    workflow_id: row.get("workflow_id"),
                    order_id: row.get("order_id"),
                    current_phase: parse_phase(&current)?,
                    target_phase: parse_phase(&target)?,
                    missing_prereqs: serde_json::from_str(&missing)
                        .map_err(|e| StoreError::SerializationError(e.to_string()))?,
                    severity: row.get("severity"),
                    recorded_at: from_millis(row.get("recorded_at"))?,
                })
            })
            .collect()
    }

    async fn record_settlement(&self, event: &SettlementEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO settlement_events (
                order_id, trigger, amount, settlement_id, status, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.order_id)
        .bind(event.trigger.as_str())
        .bind(event.amount.to_string())
        .bind(&event.settlement_id)
        .bind(event.status.as_str())
        .bind(to_millis(event.recorded_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(StoreError::DatabaseError(e.to_string())),
        }
    }

    async fn list_settlements(&self, order_id: &str) -> Result<Vec<SettlementEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM settlement_events WHERE order_id = ? ORDER BY recorded_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let trigger: String = row.get("trigger");
                let amount: String = row.get("amount");
                let status: String = row.get("status");
                Ok(SettlementEvent {
                    order_id: row.get("order_id"),
                    trigger: CancellationTrigger::parse(&trigger).ok_or_else(|| {
                        StoreError::SerializationError(format!("unknown trigger: {trigger}"))
                    })?,
                    amount: Decimal::from_str(&amount)
                        .map_err(|e| StoreError::SerializationError(e.to_string()))?,
                    settlement_id: row.get("settlement_id"),
                    status: SettlementStatus::parse(&status).ok_or_else(|| {
                        StoreError::SerializationError(format!("unknown settlement status: {status}"))
                    })?,
                    recorded_at: from_millis(row.get("recorded_at"))?,
                })
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::SerializationError(format!("timestamp out of range: {ms}")))
}

fn parse_order_status(s: &str) -> Result<OrderStatus, StoreError> {
    OrderStatus::parse(s)
        .ok_or_else(|| StoreError::SerializationError(format!("unknown order status: {s}")))
}

fn parse_phase(s: &str) -> Result<PhaseId, StoreError> {
    PhaseId::parse(s).ok_or_else(|| StoreError::SerializationError(format!("unknown phase: {s}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
