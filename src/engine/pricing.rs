use crate::model::{Attachment, Money};

/// Derived price of one attachment: unit price x quantity x rental nights.
pub fn attachment_price(unit_price: Money, quantity: u32, nights: u32) -> Money {
    unit_price * quantity as Money * nights as Money
}

/// Derived booking total: nightly rate x nights x people, plus all attachment
/// prices. Recomputed inside the same committed event that changes booking
/// composition — never client-supplied.
pub fn booking_total(
    nightly_price: Money,
    nights: u32,
    people: u32,
    attachments: &[Attachment],
) -> Money {
    let base = nightly_price * nights as Money * people as Money;
    base + attachments.iter().map(|a| a.price).sum::<Money>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn attachment_price_multiplies_out() {
        assert_eq!(attachment_price(50_000, 2, 1), 100_000);
        assert_eq!(attachment_price(50_000, 2, 3), 300_000);
        assert_eq!(attachment_price(50_000, 0, 3), 0);
    }

    #[test]
    fn booking_total_base_plus_attachments() {
        // nightly 10000, 2 nights, 4 people, one attachment 50000 x 2 x 1
        // = 80000 + 100000 = 180000
        let attachments = vec![Attachment {
            id: Ulid::new(),
            equipment_id: Ulid::new(),
            quantity: 2,
            nights: 1,
            price: attachment_price(50_000, 2, 1),
        }];
        assert_eq!(booking_total(10_000, 2, 4, &attachments), 180_000);
    }

    #[test]
    fn booking_total_without_equipment() {
        assert_eq!(booking_total(10_000, 2, 4, &[]), 80_000);
    }
}
