//! Validation of a replacement milestone plan.
//!
//! While a project is unlocked, the parties edit milestones wholesale: the
//! previous set is deleted and the new set inserted in one transaction. The
//! checks here gate that replacement.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::CoreError;

/// Maximum number of milestones a project may carry.
pub const MAX_MILESTONES: usize = 20;

/// One entry of a proposed milestone plan.
#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneDraft {
    pub title: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    /// Position within the plan; the full set must form the contiguous
    /// sequence 1..=N in some order.
    pub seq: i32,
}

/// Validate a proposed milestone plan against `today`.
///
/// Rules:
/// - 1 to [`MAX_MILESTONES`] entries
/// - every amount strictly positive
/// - every due date on or after `today`
/// - seq numbers form a contiguous permutation of 1..=N
pub fn validate_plan(drafts: &[MilestoneDraft], today: NaiveDate) -> Result<(), CoreError> {
    if drafts.is_empty() {
        return Err(CoreError::Validation(
            "A milestone plan must contain at least one milestone".to_string(),
        ));
    }
    if drafts.len() > MAX_MILESTONES {
        return Err(CoreError::Validation(format!(
            "A milestone plan may contain at most {MAX_MILESTONES} milestones, got {}",
            drafts.len()
        )));
    }

    for draft in drafts {
        if draft.title.trim().is_empty() {
            return Err(CoreError::Validation(
                "Milestone title must not be empty".to_string(),
            ));
        }
        if draft.amount <= Decimal::ZERO {
            return Err(CoreError::Validation(format!(
                "Milestone '{}' amount must be positive, got {}",
                draft.title, draft.amount
            )));
        }
        if draft.due_date < today {
            return Err(CoreError::Validation(format!(
                "Milestone '{}' due date {} is in the past",
                draft.title, draft.due_date
            )));
        }
    }

    let mut seqs: Vec<i32> = drafts.iter().map(|d| d.seq).collect();
    seqs.sort_unstable();
    let expected: Vec<i32> = (1..=drafts.len() as i32).collect();
    if seqs != expected {
        return Err(CoreError::Validation(format!(
            "Milestone sequence numbers must form a contiguous 1..{} permutation, got {seqs:?}",
            drafts.len()
        )));
    }

    Ok(())
}

/// Sum of all milestone amounts in a plan.
pub fn plan_total(drafts: &[MilestoneDraft]) -> Decimal {
    drafts.iter().map(|d| d.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft(title: &str, amount: Decimal, due: NaiveDate, seq: i32) -> MilestoneDraft {
        MilestoneDraft {
            title: title.to_string(),
            amount,
            due_date: due,
            seq,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn future() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    #[test]
    fn accepts_valid_plan_in_any_order() {
        let plan = vec![
            draft("b", dec!(200), future(), 2),
            draft("a", dec!(100), future(), 1),
            draft("c", dec!(300), future(), 3),
        ];
        assert!(validate_plan(&plan, today()).is_ok());
        assert_eq!(plan_total(&plan), dec!(600));
    }

    #[test]
    fn rejects_empty_plan() {
        assert!(validate_plan(&[], today()).is_err());
    }

    #[test]
    fn rejects_more_than_twenty_milestones() {
        let plan: Vec<_> = (1..=21)
            .map(|i| draft(&format!("m{i}"), dec!(10), future(), i))
            .collect();
        let err = validate_plan(&plan, today()).unwrap_err();
        assert!(err.to_string().contains("at most 20"));
    }

    #[test]
    fn rejects_gapped_sequence() {
        let plan = vec![
            draft("a", dec!(100), future(), 1),
            draft("b", dec!(100), future(), 2),
            draft("c", dec!(100), future(), 4),
        ];
        let err = validate_plan(&plan, today()).unwrap_err();
        assert!(err.to_string().contains("contiguous"));
    }

    #[test]
    fn rejects_duplicate_sequence() {
        let plan = vec![
            draft("a", dec!(100), future(), 1),
            draft("b", dec!(100), future(), 1),
        ];
        assert!(validate_plan(&plan, today()).is_err());
    }

    #[test]
    fn rejects_past_due_date() {
        let yesterday = NaiveDate::from_ymd_opt(2025, 5, 31).unwrap();
        let plan = vec![draft("a", dec!(100), yesterday, 1)];
        let err = validate_plan(&plan, today()).unwrap_err();
        assert!(err.to_string().contains("in the past"));
    }

    #[test]
    fn due_date_today_is_allowed() {
        let plan = vec![draft("a", dec!(100), today(), 1)];
        assert!(validate_plan(&plan, today()).is_ok());
    }

    #[test]
    fn rejects_nonpositive_amount() {
        let plan = vec![draft("a", dec!(0), future(), 1)];
        assert!(validate_plan(&plan, today()).is_err());
        let plan = vec![draft("a", dec!(-5), future(), 1)];
        assert!(validate_plan(&plan, today()).is_err());
    }
}
