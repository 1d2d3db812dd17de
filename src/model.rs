use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps only.
pub type Ms = i64;

/// Calendar day as days since 1970-01-01 (UTC). All interval arithmetic in
/// the engine happens on this type; wall-clock dates exist only at the wire
/// boundary.
pub type Day = i32;

/// Integer minor currency units.
pub type Money = i64;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date")
}

pub fn day_from_date(date: NaiveDate) -> Day {
    (date - epoch()).num_days() as Day
}

pub fn date_from_day(day: Day) -> NaiveDate {
    epoch() + chrono::Duration::days(day as i64)
}

/// Parse a `YYYY-MM-DD` calendar date into a `Day`.
pub fn parse_day(s: &str) -> Option<Day> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(day_from_date)
}

pub fn format_day(day: Day) -> String {
    date_from_day(day).format("%Y-%m-%d").to_string()
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Half-open day range `[start, end)`. A stay over N nights covers exactly
/// N days. Validity (`start < end`) is enforced by the admission layer, not
/// by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Day,
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Self {
        Self { start, end }
    }

    pub fn nights(&self) -> u32 {
        (self.end - self.start).max(0) as u32
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, d: Day) -> bool {
        self.start <= d && d < self.end
    }

    pub fn days(&self) -> impl Iterator<Item = Day> {
        self.start..self.end
    }
}

// ── Booking lifecycle ────────────────────────────────────────────

/// Booking status. `Paid` and `CheckIn` count toward capacity; the rest
/// consume nothing. `CheckOut` is the single canonical spelling of the
/// terminal stay-concluded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Paid,
    CheckIn,
    CheckOut,
    Cancelled,
}

impl BookingStatus {
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Paid | BookingStatus::CheckIn)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::CheckOut | BookingStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Paid => "PAID",
            BookingStatus::CheckIn => "CHECK_IN",
            BookingStatus::CheckOut => "CHECK_OUT",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// Canonical literals only — the upstream `CHECKOUT` spelling is not
    /// accepted on input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BookingStatus::Pending),
            "PAID" => Some(BookingStatus::Paid),
            "CHECK_IN" => Some(BookingStatus::CheckIn),
            "CHECK_OUT" => Some(BookingStatus::CheckOut),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Consuming records ────────────────────────────────────────────

/// One booking's consumption of campsite capacity. `counted` mirrors whether
/// the owning booking is in an active status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StayRecord {
    pub booking_id: Ulid,
    pub range: DateRange,
    pub people: u32,
    pub counted: bool,
}

/// One attachment's consumption of equipment stock. The window is anchored
/// at the owning booking's start day and spans the attachment's nights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalRecord {
    pub attachment_id: Ulid,
    pub booking_id: Ulid,
    pub window: DateRange,
    pub quantity: u32,
    pub counted: bool,
}

#[derive(Debug, Clone)]
pub struct CampsiteState {
    pub id: Ulid,
    pub name: String,
    pub nightly_price: Money,
    pub daily_capacity: u32,
    pub is_active: bool,
    /// All stays, sorted by `range.start`.
    pub stays: Vec<StayRecord>,
}

impl CampsiteState {
    pub fn new(id: Ulid, name: String, nightly_price: Money, daily_capacity: u32) -> Self {
        Self {
            id,
            name,
            nightly_price,
            daily_capacity,
            is_active: true,
            stays: Vec::new(),
        }
    }

    /// Insert a stay maintaining sort order by range.start.
    pub fn insert_stay(&mut self, stay: StayRecord) {
        let pos = self
            .stays
            .binary_search_by_key(&stay.range.start, |s| s.range.start)
            .unwrap_or_else(|e| e);
        self.stays.insert(pos, stay);
    }

    pub fn stay_mut(&mut self, booking_id: Ulid) -> Option<&mut StayRecord> {
        self.stays.iter_mut().find(|s| s.booking_id == booking_id)
    }

    /// Stays whose range overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &StayRecord> {
        let right_bound = self.stays.partition_point(|s| s.range.start < query.end);
        self.stays[..right_bound]
            .iter()
            .filter(move |s| s.range.end > query.start)
    }
}

#[derive(Debug, Clone)]
pub struct EquipmentState {
    pub id: Ulid,
    pub name: String,
    /// Per unit per night.
    pub price: Money,
    /// Max concurrently rented units per day.
    pub stock: u32,
    pub is_active: bool,
    /// All rentals, sorted by `window.start`.
    pub rentals: Vec<RentalRecord>,
}

impl EquipmentState {
    pub fn new(id: Ulid, name: String, price: Money, stock: u32) -> Self {
        Self {
            id,
            name,
            price,
            stock,
            is_active: true,
            rentals: Vec::new(),
        }
    }

    pub fn insert_rental(&mut self, rental: RentalRecord) {
        let pos = self
            .rentals
            .binary_search_by_key(&rental.window.start, |r| r.window.start)
            .unwrap_or_else(|e| e);
        self.rentals.insert(pos, rental);
    }

    pub fn remove_rentals_for(&mut self, booking_id: Ulid) {
        self.rentals.retain(|r| r.booking_id != booking_id);
    }

    pub fn set_counted_for(&mut self, booking_id: Ulid, counted: bool) {
        for r in self.rentals.iter_mut().filter(|r| r.booking_id == booking_id) {
            r.counted = counted;
        }
    }

    pub fn references_any_booking(&self) -> bool {
        !self.rentals.is_empty()
    }

    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &RentalRecord> {
        let right_bound = self.rentals.partition_point(|r| r.window.start < query.end);
        self.rentals[..right_bound]
            .iter()
            .filter(move |r| r.window.end > query.start)
    }
}

// ── Bookings ─────────────────────────────────────────────────────

/// A client's request to rent equipment for part of a stay. `nights` must be
/// positive and no longer than the stay itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRequest {
    pub equipment_id: Ulid,
    pub quantity: u32,
    pub nights: u32,
}

/// A stored equipment attachment. `price` is derived
/// (unit price x quantity x nights) at the time the set was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Ulid,
    pub equipment_id: Ulid,
    pub quantity: u32,
    pub nights: u32,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingState {
    pub id: Ulid,
    pub user: String,
    pub campsite_id: Ulid,
    pub range: DateRange,
    pub people: u32,
    pub status: BookingStatus,
    pub total_price: Money,
    pub created_at: Ms,
    pub payment_proof: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Whether this booking has ever reached PAID (suppresses duplicate
    /// paid notifications).
    pub ever_paid: bool,
}

impl BookingState {
    /// Rental window for one attachment: anchored at the booking's start,
    /// spanning the attachment's nights.
    pub fn attachment_window(&self, attachment: &Attachment) -> DateRange {
        DateRange::new(self.range.start, self.range.start + attachment.nights as Day)
    }

    pub fn equipment_ids(&self) -> Vec<Ulid> {
        self.attachments.iter().map(|a| a.equipment_id).collect()
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CampsiteCreated {
        id: Ulid,
        name: String,
        nightly_price: Money,
        daily_capacity: u32,
    },
    CampsiteUpdated {
        id: Ulid,
        name: String,
        nightly_price: Money,
        daily_capacity: u32,
    },
    CampsiteDeactivated {
        id: Ulid,
    },
    EquipmentCreated {
        id: Ulid,
        name: String,
        price: Money,
        stock: u32,
    },
    EquipmentUpdated {
        id: Ulid,
        name: String,
        price: Money,
        stock: u32,
    },
    EquipmentDeactivated {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        campsite_id: Ulid,
        user: String,
        range: DateRange,
        people: u32,
        attachments: Vec<Attachment>,
        total_price: Money,
        created_at: Ms,
    },
    EquipmentReplaced {
        booking_id: Ulid,
        campsite_id: Ulid,
        attachments: Vec<Attachment>,
        total_price: Money,
    },
    StatusChanged {
        booking_id: Ulid,
        campsite_id: Ulid,
        status: BookingStatus,
    },
    PaymentProofAttached {
        booking_id: Ulid,
        campsite_id: Ulid,
        reference: String,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayAvailability {
    pub day: Day,
    pub used: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquipmentDayAvailability {
    pub equipment_id: Ulid,
    pub day: Day,
    pub stock: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampsiteInfo {
    pub id: Ulid,
    pub name: String,
    pub nightly_price: Money,
    pub daily_capacity: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentInfo {
    pub id: Ulid,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    pub is_active: bool,
}
