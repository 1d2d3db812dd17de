mod admission;
mod availability;
mod error;
mod lifecycle;
mod mutations;
mod pricing;
mod queries;

pub use availability::{campsite_usage, equipment_usage};
pub use error::EngineError;
pub use lifecycle::{releases_capacity, requires_admission, transition_allowed};
pub use pricing::{attachment_price, booking_total};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCampsite = Arc<RwLock<CampsiteState>>;
pub type SharedEquipment = Arc<RwLock<EquipmentState>>;
pub type SharedBooking = Arc<RwLock<BookingState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The resource ledger. Campsites and equipment each sit behind their own
/// RwLock — the write lock on a definition row is the serialization point
/// for every admission decision against that resource.
pub struct Engine {
    pub campsites: DashMap<Ulid, SharedCampsite>,
    pub equipment: DashMap<Ulid, SharedEquipment>,
    pub bookings: DashMap<Ulid, SharedBooking>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            campsites: DashMap::new(),
            equipment: DashMap::new(),
            bookings: DashMap::new(),
            wal_tx,
            notify,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        for event in &events {
            engine.replay_apply(event);
        }

        Ok(engine)
    }

    /// Apply one replayed event. No locks contended, no notifications, no
    /// validation — the WAL only ever contains admitted events.
    fn replay_apply(&self, event: &Event) {
        match event {
            Event::CampsiteCreated { id, name, nightly_price, daily_capacity } => {
                let cs = CampsiteState::new(*id, name.clone(), *nightly_price, *daily_capacity);
                self.campsites.insert(*id, Arc::new(RwLock::new(cs)));
            }
            Event::CampsiteUpdated { id, name, nightly_price, daily_capacity } => {
                if let Some(entry) = self.campsites.get(id) {
                    let arc = entry.value().clone();
                    let mut cs = arc.try_write().expect("replay: uncontended write");
                    cs.name = name.clone();
                    cs.nightly_price = *nightly_price;
                    cs.daily_capacity = *daily_capacity;
                }
            }
            Event::CampsiteDeactivated { id } => {
                if let Some(entry) = self.campsites.get(id) {
                    let arc = entry.value().clone();
                    arc.try_write().expect("replay: uncontended write").is_active = false;
                }
            }
            Event::EquipmentCreated { id, name, price, stock } => {
                let eq = EquipmentState::new(*id, name.clone(), *price, *stock);
                self.equipment.insert(*id, Arc::new(RwLock::new(eq)));
            }
            Event::EquipmentUpdated { id, name, price, stock } => {
                if let Some(entry) = self.equipment.get(id) {
                    let arc = entry.value().clone();
                    let mut eq = arc.try_write().expect("replay: uncontended write");
                    eq.name = name.clone();
                    eq.price = *price;
                    eq.stock = *stock;
                }
            }
            Event::EquipmentDeactivated { id } => {
                if let Some(entry) = self.equipment.get(id) {
                    let arc = entry.value().clone();
                    arc.try_write().expect("replay: uncontended write").is_active = false;
                }
            }
            Event::BookingCreated {
                id,
                campsite_id,
                user,
                range,
                people,
                attachments,
                total_price,
                created_at,
            } => {
                let booking = BookingState {
                    id: *id,
                    user: user.clone(),
                    campsite_id: *campsite_id,
                    range: *range,
                    people: *people,
                    status: BookingStatus::Pending,
                    total_price: *total_price,
                    created_at: *created_at,
                    payment_proof: None,
                    attachments: attachments.clone(),
                    ever_paid: false,
                };
                if let Some(entry) = self.campsites.get(campsite_id) {
                    let arc = entry.value().clone();
                    arc.try_write()
                        .expect("replay: uncontended write")
                        .insert_stay(StayRecord {
                            booking_id: *id,
                            range: *range,
                            people: *people,
                            counted: false,
                        });
                }
                for attachment in attachments {
                    if let Some(entry) = self.equipment.get(&attachment.equipment_id) {
                        let arc = entry.value().clone();
                        arc.try_write()
                            .expect("replay: uncontended write")
                            .insert_rental(RentalRecord {
                                attachment_id: attachment.id,
                                booking_id: *id,
                                window: booking.attachment_window(attachment),
                                quantity: attachment.quantity,
                                counted: false,
                            });
                    }
                }
                self.bookings.insert(*id, Arc::new(RwLock::new(booking)));
            }
            Event::EquipmentReplaced { booking_id, attachments, total_price, .. } => {
                let Some(entry) = self.bookings.get(booking_id) else { return };
                let arc = entry.value().clone();
                let mut booking = arc.try_write().expect("replay: uncontended write");

                let mut old_equipment = booking.equipment_ids();
                old_equipment.sort();
                old_equipment.dedup();
                for eq_id in old_equipment {
                    if let Some(entry) = self.equipment.get(&eq_id) {
                        let eq_arc = entry.value().clone();
                        eq_arc
                            .try_write()
                            .expect("replay: uncontended write")
                            .remove_rentals_for(*booking_id);
                    }
                }

                booking.attachments = attachments.clone();
                booking.total_price = *total_price;
                let counted = booking.status.is_active();
                for attachment in attachments {
                    if let Some(entry) = self.equipment.get(&attachment.equipment_id) {
                        let eq_arc = entry.value().clone();
                        eq_arc
                            .try_write()
                            .expect("replay: uncontended write")
                            .insert_rental(RentalRecord {
                                attachment_id: attachment.id,
                                booking_id: *booking_id,
                                window: booking.attachment_window(attachment),
                                quantity: attachment.quantity,
                                counted,
                            });
                    }
                }
            }
            Event::StatusChanged { booking_id, campsite_id, status } => {
                let Some(entry) = self.bookings.get(booking_id) else { return };
                let arc = entry.value().clone();
                let mut booking = arc.try_write().expect("replay: uncontended write");
                booking.status = *status;
                if *status == BookingStatus::Paid {
                    booking.ever_paid = true;
                }
                let counted = status.is_active();
                if let Some(entry) = self.campsites.get(campsite_id) {
                    let cs_arc = entry.value().clone();
                    let mut cs = cs_arc.try_write().expect("replay: uncontended write");
                    if let Some(stay) = cs.stay_mut(*booking_id) {
                        stay.counted = counted;
                    }
                }
                let mut eq_ids = booking.equipment_ids();
                eq_ids.sort();
                eq_ids.dedup();
                for eq_id in eq_ids {
                    if let Some(entry) = self.equipment.get(&eq_id) {
                        let eq_arc = entry.value().clone();
                        eq_arc
                            .try_write()
                            .expect("replay: uncontended write")
                            .set_counted_for(*booking_id, counted);
                    }
                }
            }
            Event::PaymentProofAttached { booking_id, reference, .. } => {
                if let Some(entry) = self.bookings.get(booking_id) {
                    let arc = entry.value().clone();
                    arc.try_write().expect("replay: uncontended write").payment_proof =
                        Some(reference.clone());
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_campsite(&self, id: &Ulid) -> Option<SharedCampsite> {
        self.campsites.get(id).map(|e| e.value().clone())
    }

    pub fn get_equipment(&self, id: &Ulid) -> Option<SharedEquipment> {
        self.equipment.get(id).map(|e| e.value().clone())
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Acquire write locks on a campsite plus a set of equipment items in
    /// sorted-id order, so concurrent admissions over overlapping resource
    /// sets cannot deadlock. The guards pin every consuming record of those
    /// resources for the duration of a check-and-commit.
    pub(super) async fn lock_campsite_and_equipment(
        &self,
        campsite_id: Ulid,
        equipment_ids: &[Ulid],
    ) -> Result<
        (
            OwnedRwLockWriteGuard<CampsiteState>,
            HashMap<Ulid, OwnedRwLockWriteGuard<EquipmentState>>,
        ),
        EngineError,
    > {
        let mut ids: Vec<Ulid> = Vec::with_capacity(equipment_ids.len() + 1);
        ids.push(campsite_id);
        ids.extend_from_slice(equipment_ids);
        ids.sort();
        ids.dedup();

        let mut campsite = None;
        let mut equipment = HashMap::with_capacity(ids.len() - 1);
        for id in ids {
            if id == campsite_id {
                let arc = self.get_campsite(&id).ok_or(EngineError::NotFound(id))?;
                campsite = Some(arc.write_owned().await);
            } else {
                let arc = self.get_equipment(&id).ok_or(EngineError::NotFound(id))?;
                equipment.insert(id, arc.write_owned().await);
            }
        }
        let campsite = campsite.ok_or(EngineError::NotFound(campsite_id))?;
        Ok((campsite, equipment))
    }
}
