use crate::model::BookingStatus;

/// Legal status transitions. Terminal states have no exits; nothing ever
/// re-enters PENDING.
pub fn transition_allowed(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Paid)
            | (Pending, CheckIn)
            | (Pending, Cancelled)
            | (Paid, CheckIn)
            | (Paid, CheckOut)
            | (Paid, Cancelled)
            | (CheckIn, CheckOut)
            | (CheckIn, Cancelled)
    )
}

/// Entering the active (counted) set from outside it must pass the admission
/// check — a booking that sat in PENDING while the days filled up can
/// legitimately fail to become PAID.
pub fn requires_admission(from: BookingStatus, to: BookingStatus) -> bool {
    !from.is_active() && to.is_active()
}

/// Leaving the active set always succeeds and frees capacity immediately.
pub fn releases_capacity(from: BookingStatus, to: BookingStatus) -> bool {
    from.is_active() && !to.is_active()
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    #[test]
    fn pending_exits() {
        assert!(transition_allowed(Pending, Paid));
        assert!(transition_allowed(Pending, CheckIn));
        assert!(transition_allowed(Pending, Cancelled));
        assert!(!transition_allowed(Pending, CheckOut));
        assert!(!transition_allowed(Pending, Pending));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in [Pending, Paid, CheckIn, CheckOut, Cancelled] {
            assert!(!transition_allowed(CheckOut, to));
            assert!(!transition_allowed(Cancelled, to));
        }
    }

    #[test]
    fn nothing_reenters_pending() {
        for from in [Paid, CheckIn, CheckOut, Cancelled] {
            assert!(!transition_allowed(from, Pending));
        }
    }

    #[test]
    fn admission_only_when_entering_active_set() {
        assert!(requires_admission(Pending, Paid));
        assert!(requires_admission(Pending, CheckIn));
        // Already counted — moving within the active set re-checks nothing.
        assert!(!requires_admission(Paid, CheckIn));
        assert!(!requires_admission(Pending, Cancelled));
    }

    #[test]
    fn release_only_when_leaving_active_set() {
        assert!(releases_capacity(Paid, Cancelled));
        assert!(releases_capacity(CheckIn, CheckOut));
        assert!(!releases_capacity(Paid, CheckIn));
        assert!(!releases_capacity(Pending, Cancelled));
    }
}
