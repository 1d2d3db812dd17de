use ulid::Ulid;

use crate::auth::Session;
use crate::limits::*;
use crate::model::*;

use super::availability::{campsite_usage, equipment_usage};
use super::{Engine, EngineError};

impl Engine {
    /// Per-day availability for one campsite. Read lock only — display reads
    /// are optimistic and may race a commit; admission re-checks under write
    /// locks.
    pub async fn campsite_availability(
        &self,
        campsite_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        validate_query_window(&range)?;
        let arc = self
            .get_campsite(&campsite_id)
            .ok_or(EngineError::NotFound(campsite_id))?;
        let guard = arc.read().await;
        if !guard.is_active {
            return Err(EngineError::NotFound(campsite_id));
        }
        Ok(campsite_usage(&guard, &range))
    }

    /// Per-day remaining stock for every active equipment item, ordered by
    /// equipment id then day.
    pub async fn equipment_availability(
        &self,
        range: DateRange,
    ) -> Result<Vec<EquipmentDayAvailability>, EngineError> {
        validate_query_window(&range)?;
        let arcs: Vec<_> = self.equipment.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            if !guard.is_active {
                continue;
            }
            for du in equipment_usage(&guard, &range, None) {
                rows.push(EquipmentDayAvailability {
                    equipment_id: guard.id,
                    day: du.day,
                    stock: guard.stock,
                    available: du.remaining,
                });
            }
        }
        rows.sort_by(|a, b| a.equipment_id.cmp(&b.equipment_id).then(a.day.cmp(&b.day)));
        Ok(rows)
    }

    /// One booking, visible to its owner and to admins.
    pub async fn booking_view(
        &self,
        booking_id: Ulid,
        session: &Session,
    ) -> Result<BookingState, EngineError> {
        let arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = arc.read().await;
        if !session.is_admin() && guard.user != session.user {
            return Err(EngineError::Forbidden);
        }
        Ok(guard.clone())
    }

    /// Bookings visible to the session: admins see everything, users their
    /// own. Ordered by creation time.
    pub async fn list_bookings(
        &self,
        session: &Session,
        campsite_id: Option<Ulid>,
    ) -> Vec<BookingState> {
        let arcs: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            if !session.is_admin() && guard.user != session.user {
                continue;
            }
            if let Some(cid) = campsite_id
                && guard.campsite_id != cid {
                    continue;
                }
            bookings.push(guard.clone());
        }
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        bookings
    }

    pub async fn list_campsites(&self) -> Vec<CampsiteInfo> {
        let arcs: Vec<_> = self.campsites.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let guard = arc.read().await;
            out.push(CampsiteInfo {
                id: guard.id,
                name: guard.name.clone(),
                nightly_price: guard.nightly_price,
                daily_capacity: guard.daily_capacity,
                is_active: guard.is_active,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn list_equipment(&self) -> Vec<EquipmentInfo> {
        let arcs: Vec<_> = self.equipment.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let guard = arc.read().await;
            out.push(EquipmentInfo {
                id: guard.id,
                name: guard.name.clone(),
                price: guard.price,
                stock: guard.stock,
                is_active: guard.is_active,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

fn validate_query_window(range: &DateRange) -> Result<(), EngineError> {
    if range.end <= range.start {
        return Err(EngineError::Invalid("end date must be after start date"));
    }
    if range.end - range.start > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}
