//! WAL-backed in-memory store for one property.
//!
//! State is sharded by [`InventoryKey`]; each inventory sits behind its own
//! `RwLock`, and every mutation holds that write lock across the WAL append
//! and the in-memory apply. That lock is what makes the conditional commit
//! atomic: the availability re-check and the insert see the same state.

mod mutations;
mod queries;
mod state;

pub use state::InventoryState;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};

use crate::engine::Policy;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::repository::*;
use crate::wal::Wal;

pub type SharedInventory = Arc<RwLock<InventoryState>>;

type Ack = oneshot::Sender<io::Result<()>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Appends that arrive while a flush is pending are batched
/// into one fsync; any other command first flushes the batch in front of it.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_other(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_other(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal<Event>, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride along
    // with the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::error!(path = %wal.path().display(), error = %e, "WAL flush failed");
    }
    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_other(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

pub(super) fn wal_closed() -> RepositoryError {
    RepositoryError::Unavailable("WAL writer shut down".into())
}

pub struct Store {
    property_id: String,
    policy: Policy,
    pub(super) inventories: DashMap<InventoryKey, SharedInventory>,
    /// Shared by resource upserts, exclusive for compaction, so no inventory
    /// can appear between the compaction snapshot and the file swap.
    pub(super) catalog: RwLock<()>,
    pub(super) rules: RwLock<BTreeMap<RuleId, PricingRule>>,
    /// Reservation id → inventory it lives in.
    pub(super) reservation_index: DashMap<ReservationId, InventoryKey>,
    /// Maintenance window id → inventory it blocks.
    pub(super) window_index: DashMap<WindowId, InventoryKey>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Store {
    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn open(wal_path: PathBuf, property_id: impl Into<String>, policy: Policy) -> io::Result<Self> {
        let property_id = property_id.into();
        let replay = Wal::<Event>::replay(&wal_path)?;
        if replay.discarded_bytes > 0 {
            warn!(
                path = %wal_path.display(),
                bytes = replay.discarded_bytes,
                "discarded torn WAL tail"
            );
            Wal::<Event>::truncate_to(&wal_path, replay.valid_len)?;
        }

        // Rebuild without locks; nothing else can see this state yet.
        let mut inventories: HashMap<InventoryKey, InventoryState> = HashMap::new();
        let mut rules = BTreeMap::new();
        let reservation_index = DashMap::new();
        let window_index = DashMap::new();
        for event in &replay.records {
            match event {
                Event::RuleUpserted { rule } => {
                    rules.insert(rule.id, rule.clone());
                }
                Event::RuleRemoved { id } => {
                    rules.remove(id);
                }
                other => {
                    let Some(key) = other.inventory_key() else { continue };
                    index_event(&reservation_index, &window_index, other);
                    inventories
                        .entry(key.clone())
                        .or_insert_with(|| InventoryState::new(key))
                        .apply(other);
                }
            }
        }

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        info!(
            property = %property_id,
            events = replay.records.len(),
            inventories = inventories.len(),
            rules = rules.len(),
            "store opened"
        );

        Ok(Self {
            property_id,
            policy,
            inventories: inventories
                .into_iter()
                .map(|(k, v)| (k, Arc::new(RwLock::new(v))))
                .collect(),
            catalog: RwLock::new(()),
            rules: RwLock::new(rules),
            reservation_index,
            window_index,
            wal_tx,
        })
    }

    pub fn property_id(&self) -> &str {
        &self.property_id
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), RepositoryError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| wal_closed())?;
        rx.await
            .map_err(|_| RepositoryError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))
    }

    /// Durably log `event`, then apply it. The caller holds the inventory write lock.
    pub(super) async fn persist_and_apply(
        &self,
        inventory: &mut InventoryState,
        event: &Event,
    ) -> Result<(), RepositoryError> {
        self.wal_append(event).await?;
        index_event(&self.reservation_index, &self.window_index, event);
        inventory.apply(event);
        Ok(())
    }

    pub(super) fn inventory(&self, key: &InventoryKey) -> Option<SharedInventory> {
        self.inventories.get(key).map(|e| e.value().clone())
    }

    pub(super) fn inventory_or_create(&self, key: &InventoryKey) -> SharedInventory {
        self.inventories
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(InventoryState::new(key.clone()))))
            .value()
            .clone()
    }

    pub(super) fn check_property(&self, property_id: &str) -> Result<(), RepositoryError> {
        if property_id != self.property_id {
            return Err(RepositoryError::Invalid(crate::engine::invalid(format!(
                "property {property_id} is not served by store {}",
                self.property_id
            ))));
        }
        Ok(())
    }
}

fn index_event(
    reservations: &DashMap<ReservationId, InventoryKey>,
    windows: &DashMap<WindowId, InventoryKey>,
    event: &Event,
) {
    match event {
        Event::ReservationPlaced { reservation } => {
            reservations.insert(reservation.id, reservation.resource.inventory_key());
        }
        Event::MaintenanceAdded { window } => {
            windows.insert(window.id, window.resource.clone());
        }
        Event::MaintenanceRemoved { id, .. } => {
            windows.remove(id);
        }
        _ => {}
    }
}

// ── Repository implementations ───────────────────────────

#[async_trait]
impl ReservationRepository for Store {
    async fn reservations_on_dates(
        &self,
        inventory: &InventoryKey,
        period: &Period,
    ) -> Result<Vec<Reservation>, RepositoryError> {
        Ok(self.reservations_on(inventory, period).await)
    }

    async fn reservation(&self, id: ReservationId) -> Result<Reservation, RepositoryError> {
        self.get_reservation(id).await
    }

    async fn list_reservations(&self, inventory: &InventoryKey) -> Result<Vec<Reservation>, RepositoryError> {
        Ok(self.all_reservations(inventory).await)
    }

    async fn insert_if_available(&self, reservation: Reservation) -> Result<Reservation, RepositoryError> {
        self.place_reservation(reservation).await
    }

    async fn reschedule_if_available(
        &self,
        id: ReservationId,
        period: Period,
        guest_count: u32,
        rooms: u32,
    ) -> Result<Reservation, RepositoryError> {
        self.reschedule_reservation(id, period, guest_count, rooms).await
    }

    async fn set_status(&self, id: ReservationId, status: ReservationStatus) -> Result<Reservation, RepositoryError> {
        self.set_reservation_status(id, status).await
    }
}

#[async_trait]
impl RuleRepository for Store {
    async fn rules_for(&self, resource: &ResourceKey) -> Result<Vec<PricingRule>, RepositoryError> {
        Ok(self.matching_rules(resource).await)
    }

    async fn upsert_rule(&self, rule: PricingRule) -> Result<(), RepositoryError> {
        self.put_rule(rule).await
    }

    async fn remove_rule(&self, id: RuleId) -> Result<(), RepositoryError> {
        self.delete_rule(id).await
    }
}

#[async_trait]
impl ResourceRepository for Store {
    async fn resource(&self, key: &ResourceKey) -> Result<BookableResource, RepositoryError> {
        self.get_resource(key).await
    }

    async fn maintenance_windows(&self, inventory: &InventoryKey) -> Result<Vec<MaintenanceWindow>, RepositoryError> {
        Ok(self.windows(inventory).await)
    }

    async fn upsert_resource(&self, resource: BookableResource) -> Result<(), RepositoryError> {
        self.put_resource(resource).await
    }

    async fn add_maintenance(&self, window: MaintenanceWindow) -> Result<(), RepositoryError> {
        self.put_maintenance(window).await
    }

    async fn remove_maintenance(&self, id: WindowId) -> Result<(), RepositoryError> {
        self.delete_maintenance(id).await
    }
}
