// In-memory gateway - stands in for the hosted backend in development and tests
// Injected through configuration instead of a process-wide mock store

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{
    increment_column, merge_update, public_url, row_id, stamp_insert, Blob, ChangeCallback, ChangeEvent, ChangeFeed,
    ChangeKind, FilterSpec, Gateway, GatewayError, GatewayResult, MutationOp, Row, Subscription,
    Table,
};

/// Failure to inject into subsequent gateway calls
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Fail every upload of a blob with this file name.
    Upload { file_name: String },
    /// Fail every insert into this table.
    Insert { table: Table },
    /// Fail every update, increment or delete on this table.
    Write { table: Table },
    /// Fail every query on this table.
    Query { table: Table },
}

pub struct InMemoryGateway {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
    objects: RwLock<HashMap<(String, String), Blob>>,
    public_base_url: String,
    latency: Option<Duration>,
    faults: Mutex<HashSet<Fault>>,
    changes: ChangeFeed,
}

impl std::fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGateway")
            .field("public_base_url", &self.public_base_url)
            .field("latency", &self.latency)
            .finish()
    }
}

impl InMemoryGateway {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            public_base_url: public_base_url.into(),
            latency: None,
            faults: Mutex::new(HashSet::new()),
            changes: ChangeFeed::default(),
        }
    }

    /// Simulated network delay applied before every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn inject_failure(&self, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(fault);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// Insert rows directly, bypassing faults and change notifications.
    pub async fn seed(&self, table: Table, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.write().await;
        let stored = tables.entry(table).or_default();
        stored.extend(rows.into_iter().map(stamp_insert));
    }

    /// Snapshot of a table in insertion order.
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn stored_object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    fn has_fault(&self, fault: &Fault) -> bool {
        self.faults
            .lock()
            .map(|faults| faults.contains(fault))
            .unwrap_or(false)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    #[instrument(skip(self, filter))]
    async fn query(&self, table: Table, filter: &FilterSpec) -> GatewayResult<Vec<Row>> {
        self.simulate_latency().await;
        if self.has_fault(&Fault::Query { table }) {
            return Err(GatewayError::Backend(format!("injected query failure on {}", table)));
        }

        let tables = self.tables.read().await;
        let rows = tables.get(&table).map(|rows| rows.iter().cloned());
        let selected = match rows {
            Some(rows) => filter.apply(rows),
            None => Vec::new(),
        };
        debug!("Queried {} rows from {}", selected.len(), table);
        Ok(selected)
    }

    #[instrument(skip(self, payload))]
    async fn mutate(&self, table: Table, op: MutationOp, payload: Row) -> GatewayResult<Row> {
        self.simulate_latency().await;

        let (kind, row) = match op {
            MutationOp::Insert => {
                if self.has_fault(&Fault::Insert { table }) {
                    return Err(GatewayError::Constraint(format!(
                        "injected insert failure on {}",
                        table
                    )));
                }
                let row = stamp_insert(payload);
                let mut tables = self.tables.write().await;
                let stored = tables.entry(table).or_default();
                if stored.iter().any(|existing| row_id(existing) == row_id(&row)) {
                    return Err(GatewayError::Constraint(format!(
                        "duplicate key {} in {}",
                        row_id(&row).unwrap_or_default(),
                        table
                    )));
                }
                stored.push(row.clone());
                (ChangeKind::Insert, row)
            }
            MutationOp::Update { id } => {
                if self.has_fault(&Fault::Write { table }) {
                    return Err(GatewayError::Backend(format!("injected update failure on {}", table)));
                }
                let mut tables = self.tables.write().await;
                let stored = tables.entry(table).or_default();
                let slot = stored
                    .iter_mut()
                    .find(|existing| row_id(existing) == Some(id.as_str()))
                    .ok_or_else(|| GatewayError::NotFound { table, id: id.clone() })?;
                let merged = merge_update(std::mem::take(slot), payload);
                *slot = merged.clone();
                (ChangeKind::Update, merged)
            }
            MutationOp::Increment { id, column, by } => {
                if self.has_fault(&Fault::Write { table }) {
                    return Err(GatewayError::Backend(format!("injected update failure on {}", table)));
                }
                let mut tables = self.tables.write().await;
                let stored = tables.entry(table).or_default();
                let slot = stored
                    .iter_mut()
                    .find(|existing| row_id(existing) == Some(id.as_str()))
                    .ok_or_else(|| GatewayError::NotFound { table, id: id.clone() })?;
                let bumped = increment_column(std::mem::take(slot), &column, by);
                *slot = bumped.clone();
                (ChangeKind::Update, bumped)
            }
            MutationOp::Delete { id } => {
                if self.has_fault(&Fault::Write { table }) {
                    return Err(GatewayError::Backend(format!("injected delete failure on {}", table)));
                }
                let mut tables = self.tables.write().await;
                let stored = tables.entry(table).or_default();
                let position = stored
                    .iter()
                    .position(|existing| row_id(existing) == Some(id.as_str()))
                    .ok_or_else(|| GatewayError::NotFound { table, id: id.clone() })?;
                (ChangeKind::Delete, stored.remove(position))
            }
        };

        self.changes.publish(ChangeEvent {
            table,
            kind,
            row: row.clone(),
        });
        Ok(row)
    }

    #[instrument(skip(self, blob), fields(file_name = %blob.file_name, size = blob.bytes.len()))]
    async fn upload_file(&self, bucket: &str, path: &str, blob: &Blob) -> GatewayResult<String> {
        self.simulate_latency().await;
        if self.has_fault(&Fault::Upload {
            file_name: blob.file_name.clone(),
        }) {
            return Err(GatewayError::Storage(format!(
                "injected upload failure for {}",
                blob.file_name
            )));
        }

        self.objects
            .write()
            .await
            .insert((bucket.to_string(), path.to_string()), blob.clone());
        Ok(public_url(&self.public_base_url, bucket, path))
    }

    fn subscribe(&self, table: Table, filter: FilterSpec, on_change: ChangeCallback) -> Subscription {
        self.changes.subscribe(table, filter, on_change)
    }
}
