//! Contribution calculator.
//!
//! Pure integer arithmetic over minor units (cents). The one invariant that
//! matters: the participant shares plus the owner's implicit share always
//! sum to exactly the total amount. No floats, no rounding drift.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::Contribution;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("total amount must be positive, got {0}")]
    NonPositiveTotal(i64),

    #[error("at least one participant term is required")]
    NoParticipants,

    #[error("contribution value must not be negative, got {0}")]
    NegativeValue(i64),

    #[error("fixed contributions sum to {sum} which exceeds the total {total}")]
    FixedExceedsTotal { sum: i64, total: i64 },

    #[error("percentage contributions sum to {0} which exceeds 100")]
    PercentageOverflow(i64),

    #[error("SPLIT_EVENLY terms cannot be mixed with percentage or fixed terms")]
    MixedEvenSplit,
}

/// One participant's terms for a single obligation.
#[derive(Debug, Clone)]
pub struct ContributionTerm {
    pub participant_id: Uuid,
    pub contribution: Contribution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub participant_id: Uuid,
    pub amount: i64,
}

/// The result of allocating one bill across an agreement's participants.
/// The owner's share is implicit: it is the exact remainder after the
/// participant shares, never independently rounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub shares: Vec<Share>,
    pub owner_share: i64,
}

impl Allocation {
    pub fn total(&self) -> i64 {
        self.shares.iter().map(|share| share.amount).sum::<i64>() + self.owner_share
    }
}

/// Convert a total amount plus contribution terms into per-participant owed
/// amounts with zero remainder loss.
pub fn allocate(
    total_amount: i64,
    terms: &[ContributionTerm],
) -> Result<Allocation, AllocationError> {
    if total_amount <= 0 {
        return Err(AllocationError::NonPositiveTotal(total_amount));
    }
    if terms.is_empty() {
        return Err(AllocationError::NoParticipants);
    }
    validate_terms(terms)?;

    let split_evenly = terms
        .iter()
        .any(|term| term.contribution == Contribution::SplitEvenly);

    if split_evenly {
        Ok(allocate_evenly(total_amount, terms))
    } else {
        allocate_explicit(total_amount, terms)
    }
}

/// Validate a term set without allocating. Used at agreement creation so
/// inconsistent terms are rejected before any transfer is ever attempted.
pub fn validate_terms(terms: &[ContributionTerm]) -> Result<(), AllocationError> {
    if terms.is_empty() {
        return Err(AllocationError::NoParticipants);
    }

    let mut even = 0usize;
    let mut percentage_sum = 0i64;
    for term in terms {
        match term.contribution {
            Contribution::SplitEvenly => even += 1,
            Contribution::Percentage(value) => {
                if value < 0 {
                    return Err(AllocationError::NegativeValue(value));
                }
                percentage_sum += value;
            }
            Contribution::Fixed(value) => {
                if value < 0 {
                    return Err(AllocationError::NegativeValue(value));
                }
            }
        }
    }

    if even > 0 && even != terms.len() {
        return Err(AllocationError::MixedEvenSplit);
    }
    if percentage_sum > 100 {
        return Err(AllocationError::PercentageOverflow(percentage_sum));
    }

    Ok(())
}

/// Divide by (participants + owner); hand the remainder out one minor unit
/// at a time to the first `remainder` participants in ascending-id order so
/// the result is deterministic across invocations.
fn allocate_evenly(total_amount: i64, terms: &[ContributionTerm]) -> Allocation {
    let divisor = terms.len() as i64 + 1;
    let base = total_amount / divisor;
    let remainder = total_amount % divisor;

    let mut ordered: Vec<Uuid> = terms.iter().map(|term| term.participant_id).collect();
    ordered.sort();

    let shares = ordered
        .into_iter()
        .enumerate()
        .map(|(index, participant_id)| Share {
            participant_id,
            amount: if (index as i64) < remainder {
                base + 1
            } else {
                base
            },
        })
        .collect();

    Allocation {
        shares,
        owner_share: base,
    }
}

fn allocate_explicit(
    total_amount: i64,
    terms: &[ContributionTerm],
) -> Result<Allocation, AllocationError> {
    let mut shares = Vec::with_capacity(terms.len());
    let mut allocated = 0i64;

    for term in terms {
        let amount = match term.contribution {
            Contribution::Percentage(value) => percentage_of(total_amount, value),
            Contribution::Fixed(value) => value,
            Contribution::SplitEvenly => unreachable!("validated above"),
        };
        allocated += amount;
        shares.push(Share {
            participant_id: term.participant_id,
            amount,
        });
    }

    if allocated > total_amount {
        return Err(AllocationError::FixedExceedsTotal {
            sum: allocated,
            total: total_amount,
        });
    }

    Ok(Allocation {
        shares,
        owner_share: total_amount - allocated,
    })
}

/// `value`% of `total`, rounded half-up to the nearest minor unit. The i128
/// intermediate keeps large bills from overflowing.
fn percentage_of(total: i64, value: i64) -> i64 {
    let scaled = i128::from(total) * i128::from(value);
    ((scaled + 50) / 100) as i64
}
