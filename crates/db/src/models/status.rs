//! Status enums backed by TEXT columns, with one central transition table
//! per entity.
//!
//! Every status column in the schema maps to a closed enum here. Legality of
//! a transition is decided in exactly one place, `can_transition_to`, never
//! re-derived ad hoc at call sites.

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq,
            serde::Serialize, serde::Deserialize, sqlx::Type,
        )]
        // The schema stores statuses as TEXT columns, not Postgres enums.
        #[sqlx(type_name = "text")]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[sqlx(rename = $val)]
                #[serde(rename = $val)]
                $variant,
            )+
        }

        impl $name {
            /// The TEXT value stored in the database.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $val ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Project lifecycle status.
    ProjectStatus {
        Draft = "draft",
        InProgress = "in_progress",
        Completed = "completed",
        Disputed = "disputed",
        Cancelled = "cancelled",
    }
}

impl ProjectStatus {
    pub fn can_transition_to(self, to: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, to),
            (Draft, InProgress)
                | (Draft, Cancelled)
                | (Draft, Disputed)
                | (InProgress, Completed)
                | (InProgress, Disputed)
                | (InProgress, Cancelled)
                | (Disputed, InProgress)
                | (Disputed, Completed)
                | (Disputed, Cancelled)
        )
    }
}

define_status_enum! {
    /// Milestone lifecycle status.
    ///
    /// Happy path: draft -> pending -> locked -> in_progress -> submitted
    /// -> approved -> paid, with submitted -> in_progress on a change
    /// request. Cancelled / rejected / disputed branch off every
    /// non-terminal state; disputed can recover to in_progress on a redo.
    MilestoneStatus {
        Draft = "draft",
        Pending = "pending",
        Locked = "locked",
        InProgress = "in_progress",
        Submitted = "submitted",
        Approved = "approved",
        Paid = "paid",
        Cancelled = "cancelled",
        Rejected = "rejected",
        Disputed = "disputed",
    }
}

impl MilestoneStatus {
    pub fn can_transition_to(self, to: MilestoneStatus) -> bool {
        use MilestoneStatus::*;
        match self {
            Draft => matches!(to, Pending | Locked | Cancelled | Rejected | Disputed),
            Pending => matches!(to, Locked | Cancelled | Rejected | Disputed),
            Locked => matches!(to, InProgress | Cancelled | Rejected | Disputed),
            InProgress => matches!(to, Submitted | Cancelled | Rejected | Disputed),
            Submitted => matches!(to, Approved | InProgress | Cancelled | Rejected | Disputed),
            Approved => matches!(to, Paid | Cancelled | Rejected | Disputed),
            // Redo recovers a disputed milestone; a lost chargeback cancels
            // it; a resolved dispute rejects it.
            Disputed => matches!(to, InProgress | Cancelled | Rejected),
            Paid | Cancelled | Rejected => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        use MilestoneStatus::*;
        matches!(self, Paid | Cancelled | Rejected)
    }
}

define_status_enum! {
    /// Payment settlement status.
    PaymentStatus {
        Pending = "pending",
        InProgress = "in_progress",
        Escrowed = "escrowed",
        Released = "released",
        Transferred = "transferred",
        Refunded = "refunded",
        Failed = "failed",
        Disputed = "disputed",
    }
}

impl PaymentStatus {
    pub fn can_transition_to(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match self {
            Pending => matches!(to, InProgress),
            InProgress => matches!(to, Escrowed | Failed),
            Escrowed => matches!(to, Released | Refunded | Disputed),
            Released => matches!(to, Transferred),
            // External chargeback verdict: provider wins -> back to escrow,
            // customer wins -> refunded.
            Disputed => matches!(to, Escrowed | Refunded),
            Transferred | Refunded | Failed => false,
        }
    }

    /// A payment that may be updated in place by a later `initiate` call.
    pub fn is_reusable(self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::InProgress)
    }

    /// A payment that has consumed the milestone's single funding slot.
    pub fn is_finalized(self) -> bool {
        !self.is_reusable()
    }
}

define_status_enum! {
    /// Bank-transfer settlement status for a released payment.
    BankTransferStatus {
        Pending = "pending",
        Completed = "completed",
    }
}

define_status_enum! {
    /// Dispute lifecycle status.
    DisputeStatus {
        Open = "open",
        UnderReview = "under_review",
        Resolved = "resolved",
        Closed = "closed",
        Rejected = "rejected",
    }
}

impl DisputeStatus {
    pub fn can_transition_to(self, to: DisputeStatus) -> bool {
        use DisputeStatus::*;
        match self {
            Open => matches!(to, UnderReview | Resolved | Closed | Rejected),
            UnderReview => matches!(to, Resolved | Closed | Rejected),
            Resolved | Closed | Rejected => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        use DisputeStatus::*;
        matches!(self, Resolved | Closed | Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_happy_path_is_legal() {
        use MilestoneStatus::*;
        let path = [Draft, Locked, InProgress, Submitted, Approved, Paid];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn milestone_change_request_loops_back() {
        assert!(MilestoneStatus::Submitted.can_transition_to(MilestoneStatus::InProgress));
    }

    #[test]
    fn milestone_terminal_states_have_no_exits() {
        use MilestoneStatus::*;
        let all = [
            Draft, Pending, Locked, InProgress, Submitted, Approved, Paid, Cancelled, Rejected,
            Disputed,
        ];
        for terminal in [Paid, Cancelled, Rejected] {
            for to in all {
                assert!(!terminal.can_transition_to(to), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn payment_happy_path_is_legal() {
        use PaymentStatus::*;
        let path = [Pending, InProgress, Escrowed, Released, Transferred];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
        }
    }

    #[test]
    fn escrowed_payment_cannot_skip_release() {
        assert!(!PaymentStatus::Escrowed.can_transition_to(PaymentStatus::Transferred));
    }

    #[test]
    fn only_pending_and_in_progress_payments_are_reusable() {
        use PaymentStatus::*;
        assert!(Pending.is_reusable());
        assert!(InProgress.is_reusable());
        for s in [Escrowed, Released, Transferred, Refunded, Failed, Disputed] {
            assert!(s.is_finalized(), "{s}");
        }
    }

    #[test]
    fn dispute_transitions() {
        use DisputeStatus::*;
        assert!(Open.can_transition_to(UnderReview));
        assert!(Open.can_transition_to(Rejected));
        assert!(UnderReview.can_transition_to(Resolved));
        assert!(!Resolved.can_transition_to(Closed));
    }

    #[test]
    fn status_strings_match_schema_check_lists() {
        assert_eq!(MilestoneStatus::InProgress.as_str(), "in_progress");
        assert_eq!(PaymentStatus::Escrowed.as_str(), "escrowed");
        assert_eq!(DisputeStatus::UnderReview.as_str(), "under_review");
        assert_eq!(BankTransferStatus::Pending.as_str(), "pending");
        assert_eq!(ProjectStatus::Disputed.as_str(), "disputed");
    }
}
