//! Agreement Store: creation, activation, deactivation, invite conversion.
//!
//! Contribution terms are validated at creation time so an agreement with
//! internally inconsistent terms never exists, let alone transfers.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::allocation::{self, ContributionTerm};
use crate::domain::{Agreement, Contribution, ParticipantAgreement, Recurrence};
use crate::error::AppError;
use crate::ports::AgreementRepository;
use crate::validation::{validate_email, validate_max_len, NICKNAME_MAX_LEN};

/// A participant at creation time: either an existing user or an email
/// invite that will be converted once the invitee registers.
#[derive(Debug, Clone)]
pub enum NewParticipant {
    User { user_id: Uuid, contribution: Contribution },
    Invite { email: String, contribution: Contribution },
}

impl NewParticipant {
    fn contribution(&self) -> Contribution {
        match self {
            NewParticipant::User { contribution, .. }
            | NewParticipant::Invite { contribution, .. } => *contribution,
        }
    }
}

pub struct AgreementStore {
    agreements: Arc<dyn AgreementRepository>,
}

impl AgreementStore {
    pub fn new(agreements: Arc<dyn AgreementRepository>) -> Self {
        Self { agreements }
    }

    pub async fn create_vendor_agreement(
        &self,
        owner_user_id: Uuid,
        owner_source_account_id: Uuid,
        owner_destination_account_id: Uuid,
        vendor_id: Uuid,
        nickname: &str,
        participants: Vec<NewParticipant>,
    ) -> Result<Agreement, AppError> {
        let agreement = Agreement::new_vendor_triggered(
            owner_user_id,
            owner_source_account_id,
            owner_destination_account_id,
            nickname,
            vendor_id,
        );
        self.create(agreement, participants).await
    }

    pub async fn create_recurring_agreement(
        &self,
        owner_user_id: Uuid,
        owner_source_account_id: Uuid,
        owner_destination_account_id: Uuid,
        recurrence: Recurrence,
        nickname: &str,
        participants: Vec<NewParticipant>,
    ) -> Result<Agreement, AppError> {
        // Recurring amounts are computed ahead of time from the terms, so
        // every participant needs a fixed contribution.
        if participants
            .iter()
            .any(|p| !matches!(p.contribution(), Contribution::Fixed(_)))
        {
            return Err(AppError::Validation(
                "recurring agreements require fixed contribution amounts".to_string(),
            ));
        }

        let agreement = Agreement::new_recurring(
            owner_user_id,
            owner_source_account_id,
            owner_destination_account_id,
            nickname,
            recurrence,
        );
        self.create(agreement, participants).await
    }

    async fn create(
        &self,
        agreement: Agreement,
        participants: Vec<NewParticipant>,
    ) -> Result<Agreement, AppError> {
        validate_max_len("nickname", &agreement.nickname, NICKNAME_MAX_LEN)?;
        agreement.validate()?;

        let terms: Vec<ContributionTerm> = participants
            .iter()
            .map(|participant| ContributionTerm {
                participant_id: Uuid::new_v4(),
                contribution: participant.contribution(),
            })
            .collect();
        // Fail closed: inconsistent terms reject the agreement outright.
        allocation::validate_terms(&terms)?;

        for participant in &participants {
            if let NewParticipant::Invite { email, .. } = participant {
                validate_email(email)?;
            }
        }

        let agreement = self.agreements.insert_agreement(&agreement).await?;

        for participant in participants {
            let record = match participant {
                NewParticipant::User {
                    user_id,
                    contribution,
                } => ParticipantAgreement::for_user(agreement.id, user_id, contribution),
                NewParticipant::Invite {
                    email,
                    contribution,
                } => ParticipantAgreement::for_invite(agreement.id, email, contribution),
            };
            self.agreements.insert_participant(&record).await?;
        }

        tracing::info!(agreement_id = %agreement.id, kind = %agreement.kind, "agreement created");
        Ok(agreement)
    }

    /// A participant accepted their terms and picked a payment account.
    pub async fn activate_participant(
        &self,
        participant_agreement_id: Uuid,
        payment_account_id: Uuid,
    ) -> Result<ParticipantAgreement, AppError> {
        let mut participant = self.agreements.get_participant(participant_agreement_id).await?;
        if participant.user_id.is_none() {
            return Err(AppError::BadRequest(
                "participant invite has not been converted to a user".to_string(),
            ));
        }

        participant.payment_account_id = Some(payment_account_id);
        participant.is_active = true;
        participant.is_pending = false;
        participant.activated_at = Some(Utc::now());
        self.agreements.update_participant(&participant).await?;

        self.try_activate_agreement(participant.agreement_id).await?;
        Ok(participant)
    }

    /// Activate an agreement once every participant agreement is active.
    async fn try_activate_agreement(&self, agreement_id: Uuid) -> Result<(), AppError> {
        let participants = self.agreements.list_participants(agreement_id).await?;
        if participants.is_empty() || !participants.iter().all(|p| p.is_active) {
            return Ok(());
        }

        let mut agreement = self.agreements.get_agreement(agreement_id).await?;
        if agreement.is_active {
            return Ok(());
        }
        agreement.is_active = true;
        agreement.is_pending = false;
        self.agreements.update_agreement(&agreement).await?;
        tracing::info!(%agreement_id, "agreement activated");
        Ok(())
    }

    /// Terminal for new transfers. Never touches Transfer or
    /// WithheldTransfer rows; they keep their own status.
    pub async fn deactivate(&self, agreement_id: Uuid) -> Result<Agreement, AppError> {
        let mut agreement = self.agreements.get_agreement(agreement_id).await?;
        agreement.is_active = false;
        agreement.deactivated_at = Some(Utc::now());
        self.agreements.update_agreement(&agreement).await?;
        tracing::info!(%agreement_id, "agreement deactivated");
        Ok(agreement)
    }

    pub async fn get(&self, agreement_id: Uuid) -> Result<Agreement, AppError> {
        Ok(self.agreements.get_agreement(agreement_id).await?)
    }

    /// Bind every unconverted invite for `email` to a freshly registered
    /// user. At most once per invite: a second call finds no unconverted
    /// rows and is a no-op, not an error.
    pub async fn convert_invite(
        &self,
        email: &str,
        user_id: Uuid,
    ) -> Result<Vec<ParticipantAgreement>, AppError> {
        let invites = self.agreements.find_unconverted_invites(email).await?;
        let mut converted = Vec::with_capacity(invites.len());

        for mut invite in invites {
            invite.user_id = Some(user_id);
            invite.is_converted = true;
            self.agreements.update_participant(&invite).await?;
            converted.push(invite);
        }

        if !converted.is_empty() {
            tracing::info!(email, %user_id, count = converted.len(), "invites converted");
        }
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IntervalUnit;
    use crate::testing::InMemoryAgreementRepository;
    use chrono::NaiveDate;

    fn store() -> AgreementStore {
        AgreementStore::new(Arc::new(InMemoryAgreementRepository::default()))
    }

    fn even_user() -> NewParticipant {
        NewParticipant::User {
            user_id: Uuid::new_v4(),
            contribution: Contribution::SplitEvenly,
        }
    }

    #[tokio::test]
    async fn creates_a_pending_vendor_agreement() {
        let store = store();
        let agreement = store
            .create_vendor_agreement(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Internet bill",
                vec![even_user(), even_user()],
            )
            .await
            .unwrap();

        assert!(agreement.is_pending);
        assert!(!agreement.is_active);
    }

    #[tokio::test]
    async fn rejects_inconsistent_terms_at_creation() {
        let store = store();
        let result = store
            .create_vendor_agreement(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Broken",
                vec![
                    NewParticipant::User {
                        user_id: Uuid::new_v4(),
                        contribution: Contribution::Percentage(60),
                    },
                    NewParticipant::User {
                        user_id: Uuid::new_v4(),
                        contribution: Contribution::Percentage(50),
                    },
                ],
            )
            .await;

        assert!(matches!(result, Err(AppError::Allocation(_))));
    }

    #[tokio::test]
    async fn recurring_agreements_require_fixed_terms() {
        let store = store();
        let recurrence = Recurrence {
            interval: IntervalUnit::Months,
            frequency: 1,
            next_scheduled_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            end_date: None,
        };
        let result = store
            .create_recurring_agreement(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                recurrence,
                "Rent",
                vec![even_user()],
            )
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn agreement_activates_once_all_participants_accept() {
        let store = store();
        let agreement = store
            .create_vendor_agreement(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Internet bill",
                vec![even_user(), even_user()],
            )
            .await
            .unwrap();

        let participants = store
            .agreements
            .list_participants(agreement.id)
            .await
            .unwrap();

        store
            .activate_participant(participants[0].id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(!store.get(agreement.id).await.unwrap().is_active);

        store
            .activate_participant(participants[1].id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(store.get(agreement.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn deactivation_is_stamped_and_idempotent_for_history() {
        let store = store();
        let agreement = store
            .create_vendor_agreement(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Internet bill",
                vec![even_user()],
            )
            .await
            .unwrap();

        let deactivated = store.deactivate(agreement.id).await.unwrap();
        assert!(!deactivated.is_active);
        assert!(deactivated.deactivated_at.is_some());
    }

    #[tokio::test]
    async fn convert_invite_is_a_noop_the_second_time() {
        let store = store();
        store
            .create_vendor_agreement(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Internet bill",
                vec![NewParticipant::Invite {
                    email: "roommate@example.com".to_string(),
                    contribution: Contribution::SplitEvenly,
                }],
            )
            .await
            .unwrap();

        let user_id = Uuid::new_v4();
        let first = store
            .convert_invite("roommate@example.com", user_id)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].user_id, Some(user_id));
        assert!(first[0].is_converted);

        let second = store
            .convert_invite("roommate@example.com", Uuid::new_v4())
            .await
            .unwrap();
        assert!(second.is_empty(), "second conversion must be a no-op");

        // The original binding is untouched.
        let participant = store
            .agreements
            .get_participant(first[0].id)
            .await
            .unwrap();
        assert_eq!(participant.user_id, Some(user_id));
    }

    #[tokio::test]
    async fn unconverted_invite_cannot_activate() {
        let store = store();
        store
            .create_vendor_agreement(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Internet bill",
                vec![NewParticipant::Invite {
                    email: "roommate@example.com".to_string(),
                    contribution: Contribution::SplitEvenly,
                }],
            )
            .await
            .unwrap();

        let invites = store
            .agreements
            .find_unconverted_invites("roommate@example.com")
            .await
            .unwrap();
        let result = store
            .activate_participant(invites[0].id, Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
