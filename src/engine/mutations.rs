use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::auth::Session;
use crate::limits::*;
use crate::model::*;
use crate::observability::ADMISSIONS_TOTAL;

use super::admission::{
    check_campsite_headroom, check_equipment_headroom, validate_equipment_requests,
    validate_range,
};
use super::{lifecycle, pricing, Engine, EngineError, WalCommand};

/// Rental windows a booking's attachment set would add, grouped per
/// equipment item so several attachments for the same item are checked
/// jointly.
fn group_additions(start: Day, attachments: &[Attachment]) -> HashMap<Ulid, Vec<(DateRange, u32)>> {
    let mut additions: HashMap<Ulid, Vec<(DateRange, u32)>> = HashMap::new();
    for attachment in attachments {
        additions.entry(attachment.equipment_id).or_default().push((
            DateRange::new(start, start + attachment.nights as Day),
            attachment.quantity,
        ));
    }
    additions
}

/// The admission check proper: campsite headroom over the stay, then each
/// equipment item's headroom for the attachment windows. First violating day
/// wins. `exclude_booking` removes a booking's own counted rentals from the
/// baseline (equipment replacement on an active booking).
fn check_booking_admission(
    campsite: &CampsiteState,
    equipment: &HashMap<Ulid, OwnedRwLockWriteGuard<EquipmentState>>,
    booking_range: DateRange,
    people: u32,
    attachments: &[Attachment],
    check_campsite: bool,
    exclude_booking: Option<Ulid>,
) -> Result<(), EngineError> {
    if check_campsite {
        check_campsite_headroom(campsite, &booking_range, people)?;
    }
    for (eq_id, additions) in group_additions(booking_range.start, attachments) {
        let guard = equipment
            .get(&eq_id)
            .expect("equipment locked for admission");
        check_equipment_headroom(guard, &additions, exclude_booking)?;
    }
    Ok(())
}

fn record_admission(result: &Result<(), EngineError>) {
    let outcome = if result.is_ok() { "admitted" } else { "rejected" };
    metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

impl Engine {
    // ── Campsite catalog ─────────────────────────────────────

    pub async fn create_campsite(
        &self,
        id: Ulid,
        name: String,
        nightly_price: Money,
        daily_capacity: u32,
    ) -> Result<(), EngineError> {
        if self.campsites.len() >= MAX_CAMPSITES {
            return Err(EngineError::LimitExceeded("too many campsites"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("campsite name too long"));
        }
        if nightly_price < 0 {
            return Err(EngineError::Invalid("nightly price must not be negative"));
        }
        if daily_capacity == 0 {
            return Err(EngineError::Invalid("daily capacity must be positive"));
        }
        if self.campsites.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CampsiteCreated {
            id,
            name: name.clone(),
            nightly_price,
            daily_capacity,
        };
        self.wal_append(&event).await?;
        let cs = CampsiteState::new(id, name, nightly_price, daily_capacity);
        self.campsites.insert(id, Arc::new(RwLock::new(cs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Partial update; omitted fields keep their current value. The WAL event
    /// carries the resulting full row so replay is a plain overwrite.
    pub async fn update_campsite(
        &self,
        id: Ulid,
        name: Option<String>,
        nightly_price: Option<Money>,
        daily_capacity: Option<u32>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("campsite name too long"));
            }
        if let Some(p) = nightly_price
            && p < 0 {
                return Err(EngineError::Invalid("nightly price must not be negative"));
            }
        if let Some(c) = daily_capacity
            && c == 0 {
                return Err(EngineError::Invalid("daily capacity must be positive"));
            }

        let arc = self.get_campsite(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = arc.write().await;

        let event = Event::CampsiteUpdated {
            id,
            name: name.unwrap_or_else(|| guard.name.clone()),
            nightly_price: nightly_price.unwrap_or(guard.nightly_price),
            daily_capacity: daily_capacity.unwrap_or(guard.daily_capacity),
        };
        self.wal_append(&event).await?;
        if let Event::CampsiteUpdated { name, nightly_price, daily_capacity, .. } = &event {
            guard.name = name.clone();
            guard.nightly_price = *nightly_price;
            guard.daily_capacity = *daily_capacity;
        }
        self.notify.send(id, &event);
        Ok(())
    }

    /// Soft-deactivation — campsites are never deleted.
    pub async fn deactivate_campsite(&self, id: Ulid) -> Result<(), EngineError> {
        let arc = self.get_campsite(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = arc.write().await;

        let event = Event::CampsiteDeactivated { id };
        self.wal_append(&event).await?;
        guard.is_active = false;
        self.notify.send(id, &event);
        Ok(())
    }

    // ── Equipment catalog ────────────────────────────────────

    pub async fn create_equipment(
        &self,
        id: Ulid,
        name: String,
        price: Money,
        stock: u32,
    ) -> Result<(), EngineError> {
        if self.equipment.len() >= MAX_EQUIPMENT_ITEMS {
            return Err(EngineError::LimitExceeded("too many equipment items"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("equipment name too long"));
        }
        if price < 0 {
            return Err(EngineError::Invalid("price must not be negative"));
        }
        if stock == 0 {
            return Err(EngineError::Invalid("stock must be positive"));
        }
        if self.equipment.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::EquipmentCreated { id, name: name.clone(), price, stock };
        self.wal_append(&event).await?;
        let eq = EquipmentState::new(id, name, price, stock);
        self.equipment.insert(id, Arc::new(RwLock::new(eq)));
        Ok(())
    }

    pub async fn update_equipment(
        &self,
        id: Ulid,
        name: Option<String>,
        price: Option<Money>,
        stock: Option<u32>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("equipment name too long"));
            }
        if let Some(p) = price
            && p < 0 {
                return Err(EngineError::Invalid("price must not be negative"));
            }
        if let Some(s) = stock
            && s == 0 {
                return Err(EngineError::Invalid("stock must be positive"));
            }

        let arc = self.get_equipment(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = arc.write().await;

        let event = Event::EquipmentUpdated {
            id,
            name: name.unwrap_or_else(|| guard.name.clone()),
            price: price.unwrap_or(guard.price),
            stock: stock.unwrap_or(guard.stock),
        };
        self.wal_append(&event).await?;
        if let Event::EquipmentUpdated { name, price, stock, .. } = &event {
            guard.name = name.clone();
            guard.price = *price;
            guard.stock = *stock;
        }
        Ok(())
    }

    /// Soft-deactivation, refused while any booking attachment references the
    /// item (referential integrity).
    pub async fn deactivate_equipment(&self, id: Ulid) -> Result<(), EngineError> {
        let arc = self.get_equipment(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = arc.write().await;
        if guard.references_any_booking() {
            return Err(EngineError::Conflict(id));
        }

        let event = Event::EquipmentDeactivated { id };
        self.wal_append(&event).await?;
        guard.is_active = false;
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Create a booking in PENDING with its attachment set, in one atomic
    /// event. PENDING reserves nothing, so no admission check runs here —
    /// only validation and pricing.
    pub async fn create_booking(
        &self,
        id: Ulid,
        user: &str,
        campsite_id: Ulid,
        range: DateRange,
        people: u32,
        requests: &[EquipmentRequest],
    ) -> Result<BookingState, EngineError> {
        validate_range(&range)?;
        if people == 0 {
            return Err(EngineError::Invalid("people count must be positive"));
        }
        if user.is_empty() || user.len() > MAX_USER_LEN {
            return Err(EngineError::Invalid("bad user name"));
        }
        validate_equipment_requests(requests, range.nights())?;
        if self.bookings.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // Fail fast on unresolvable ids before taking any lock; the
        // authoritative check re-runs under the guards.
        if !self.campsites.contains_key(&campsite_id) {
            return Err(EngineError::NotFound(campsite_id));
        }
        let mut equipment_ids: Vec<Ulid> = requests.iter().map(|r| r.equipment_id).collect();
        equipment_ids.sort();
        equipment_ids.dedup();
        for eq_id in &equipment_ids {
            if !self.equipment.contains_key(eq_id) {
                return Err(EngineError::NotFound(*eq_id));
            }
        }

        let (mut campsite, mut equipment) = self
            .lock_campsite_and_equipment(campsite_id, &equipment_ids)
            .await?;

        if !campsite.is_active {
            return Err(EngineError::NotFound(campsite_id));
        }
        if campsite.stays.len() >= MAX_RECORDS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many stays on campsite"));
        }
        for (eq_id, guard) in &equipment {
            if !guard.is_active {
                return Err(EngineError::NotFound(*eq_id));
            }
            if guard.rentals.len() >= MAX_RECORDS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many rentals on equipment"));
            }
        }

        // Price off the locked catalog rows.
        let attachments: Vec<Attachment> = requests
            .iter()
            .map(|request| {
                let unit_price = equipment
                    .get(&request.equipment_id)
                    .expect("equipment locked for pricing")
                    .price;
                Attachment {
                    id: Ulid::new(),
                    equipment_id: request.equipment_id,
                    quantity: request.quantity,
                    nights: request.nights,
                    price: pricing::attachment_price(unit_price, request.quantity, request.nights),
                }
            })
            .collect();
        let total_price =
            pricing::booking_total(campsite.nightly_price, range.nights(), people, &attachments);
        let created_at = now_ms();

        let event = Event::BookingCreated {
            id,
            campsite_id,
            user: user.to_string(),
            range,
            people,
            attachments: attachments.clone(),
            total_price,
            created_at,
        };
        self.wal_append(&event).await?;

        let booking = BookingState {
            id,
            user: user.to_string(),
            campsite_id,
            range,
            people,
            status: BookingStatus::Pending,
            total_price,
            created_at,
            payment_proof: None,
            attachments,
            ever_paid: false,
        };
        campsite.insert_stay(StayRecord {
            booking_id: id,
            range,
            people,
            counted: false,
        });
        for attachment in &booking.attachments {
            equipment
                .get_mut(&attachment.equipment_id)
                .expect("equipment locked for insert")
                .insert_rental(RentalRecord {
                    attachment_id: attachment.id,
                    booking_id: id,
                    window: booking.attachment_window(attachment),
                    quantity: attachment.quantity,
                    counted: false,
                });
        }
        self.bookings.insert(id, Arc::new(RwLock::new(booking.clone())));
        self.notify.send(campsite_id, &event);
        Ok(booking)
    }

    /// Replace a booking's whole attachment set (delete-all, re-insert).
    /// Owner or admin only. On an active booking the new set passes the
    /// admission check with the old set excluded from the baseline.
    pub async fn replace_equipment(
        &self,
        booking_id: Ulid,
        session: &Session,
        requests: &[EquipmentRequest],
    ) -> Result<BookingState, EngineError> {
        let booking_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut booking = booking_arc.write_owned().await;

        if !session.is_admin() && booking.user != session.user {
            return Err(EngineError::Forbidden);
        }
        if booking.status.is_terminal() {
            return Err(EngineError::Invalid("booking is closed"));
        }
        validate_equipment_requests(requests, booking.range.nights())?;

        // Lock the union of old and new equipment: old rentals are removed,
        // new ones inserted, all under the same guards.
        let mut equipment_ids: Vec<Ulid> = requests.iter().map(|r| r.equipment_id).collect();
        equipment_ids.extend(booking.equipment_ids());
        equipment_ids.sort();
        equipment_ids.dedup();

        let (campsite, mut equipment) = self
            .lock_campsite_and_equipment(booking.campsite_id, &equipment_ids)
            .await?;

        // Newly requested items must be live; items only being released may
        // have been deactivated since.
        for request in requests {
            let guard = equipment
                .get(&request.equipment_id)
                .expect("equipment locked for replace");
            if !guard.is_active {
                return Err(EngineError::NotFound(request.equipment_id));
            }
            if guard.rentals.len() >= MAX_RECORDS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many rentals on equipment"));
            }
        }

        let attachments: Vec<Attachment> = requests
            .iter()
            .map(|request| {
                let unit_price = equipment
                    .get(&request.equipment_id)
                    .expect("equipment locked for pricing")
                    .price;
                Attachment {
                    id: Ulid::new(),
                    equipment_id: request.equipment_id,
                    quantity: request.quantity,
                    nights: request.nights,
                    price: pricing::attachment_price(unit_price, request.quantity, request.nights),
                }
            })
            .collect();
        let total_price = pricing::booking_total(
            campsite.nightly_price,
            booking.range.nights(),
            booking.people,
            &attachments,
        );

        if booking.status.is_active() {
            let admitted = check_booking_admission(
                &campsite,
                &equipment,
                booking.range,
                booking.people,
                &attachments,
                false, // people count unchanged — campsite usage is unaffected
                Some(booking_id),
            );
            record_admission(&admitted);
            admitted?;
        }

        let event = Event::EquipmentReplaced {
            booking_id,
            campsite_id: booking.campsite_id,
            attachments: attachments.clone(),
            total_price,
        };
        self.wal_append(&event).await?;

        let mut old_equipment = booking.equipment_ids();
        old_equipment.sort();
        old_equipment.dedup();
        for eq_id in old_equipment {
            equipment
                .get_mut(&eq_id)
                .expect("equipment locked for removal")
                .remove_rentals_for(booking_id);
        }
        booking.attachments = attachments;
        booking.total_price = total_price;
        let counted = booking.status.is_active();
        for attachment in &booking.attachments {
            equipment
                .get_mut(&attachment.equipment_id)
                .expect("equipment locked for insert")
                .insert_rental(RentalRecord {
                    attachment_id: attachment.id,
                    booking_id,
                    window: booking.attachment_window(attachment),
                    quantity: attachment.quantity,
                    counted,
                });
        }
        self.notify.send(booking.campsite_id, &event);
        Ok(booking.clone())
    }

    /// Admin-driven status transition. Entering the active set passes the
    /// admission check and can fail with the exact violating day; leaving it
    /// always succeeds and frees capacity immediately.
    pub async fn set_booking_status(
        &self,
        booking_id: Ulid,
        new_status: BookingStatus,
    ) -> Result<BookingState, EngineError> {
        let booking_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut booking = booking_arc.write_owned().await;

        let from = booking.status;
        if !lifecycle::transition_allowed(from, new_status) {
            return Err(EngineError::Invalid("illegal status transition"));
        }

        let event = Event::StatusChanged {
            booking_id,
            campsite_id: booking.campsite_id,
            status: new_status,
        };

        if new_status.is_active() != from.is_active() {
            let mut equipment_ids = booking.equipment_ids();
            equipment_ids.sort();
            equipment_ids.dedup();
            let (mut campsite, mut equipment) = self
                .lock_campsite_and_equipment(booking.campsite_id, &equipment_ids)
                .await?;

            if lifecycle::requires_admission(from, new_status) {
                let admitted = check_booking_admission(
                    &campsite,
                    &equipment,
                    booking.range,
                    booking.people,
                    &booking.attachments,
                    true,
                    None,
                );
                record_admission(&admitted);
                admitted?;
            }

            self.wal_append(&event).await?;
            booking.status = new_status;
            let counted = new_status.is_active();
            if let Some(stay) = campsite.stay_mut(booking_id) {
                stay.counted = counted;
            }
            for eq_id in equipment_ids {
                equipment
                    .get_mut(&eq_id)
                    .expect("equipment locked for status flip")
                    .set_counted_for(booking_id, counted);
            }
        } else {
            // Movement within (or outside) the active set — no capacity
            // effect, the booking guard alone suffices.
            self.wal_append(&event).await?;
            booking.status = new_status;
        }

        if new_status == BookingStatus::Paid && !booking.ever_paid {
            booking.ever_paid = true;
            self.notify.notify_paid(booking_id);
        }
        self.notify.send(booking.campsite_id, &event);
        Ok(booking.clone())
    }

    /// Record a payment-proof reference (the upload itself lives elsewhere).
    /// User-driven and status-neutral — an admin still has to verify and move
    /// the booking to PAID.
    pub async fn attach_payment_proof(
        &self,
        booking_id: Ulid,
        session: &Session,
        reference: &str,
    ) -> Result<BookingState, EngineError> {
        if reference.is_empty() || reference.len() > MAX_PROOF_REF_LEN {
            return Err(EngineError::Invalid("bad payment proof reference"));
        }
        let booking_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut booking = booking_arc.write_owned().await;

        if !session.is_admin() && booking.user != session.user {
            return Err(EngineError::Forbidden);
        }
        if booking.status.is_terminal() {
            return Err(EngineError::Invalid("booking is closed"));
        }

        let event = Event::PaymentProofAttached {
            booking_id,
            campsite_id: booking.campsite_id,
            reference: reference.to_string(),
        };
        self.wal_append(&event).await?;
        booking.payment_proof = Some(reference.to_string());
        Ok(booking.clone())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let campsite_arcs: Vec<_> = self.campsites.iter().map(|e| e.value().clone()).collect();
        for arc in campsite_arcs {
            let cs = arc.read().await;
            events.push(Event::CampsiteCreated {
                id: cs.id,
                name: cs.name.clone(),
                nightly_price: cs.nightly_price,
                daily_capacity: cs.daily_capacity,
            });
            if !cs.is_active {
                events.push(Event::CampsiteDeactivated { id: cs.id });
            }
        }

        let equipment_arcs: Vec<_> = self.equipment.iter().map(|e| e.value().clone()).collect();
        for arc in equipment_arcs {
            let eq = arc.read().await;
            events.push(Event::EquipmentCreated {
                id: eq.id,
                name: eq.name.clone(),
                price: eq.price,
                stock: eq.stock,
            });
            if !eq.is_active {
                events.push(Event::EquipmentDeactivated { id: eq.id });
            }
        }

        let booking_arcs: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for arc in booking_arcs {
            let booking = arc.read().await;
            events.push(Event::BookingCreated {
                id: booking.id,
                campsite_id: booking.campsite_id,
                user: booking.user.clone(),
                range: booking.range,
                people: booking.people,
                attachments: booking.attachments.clone(),
                total_price: booking.total_price,
                created_at: booking.created_at,
            });
            if booking.status != BookingStatus::Pending {
                events.push(Event::StatusChanged {
                    booking_id: booking.id,
                    campsite_id: booking.campsite_id,
                    status: booking.status,
                });
            }
            if let Some(ref reference) = booking.payment_proof {
                events.push(Event::PaymentProofAttached {
                    booking_id: booking.id,
                    campsite_id: booking.campsite_id,
                    reference: reference.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
