//! In-memory port implementations and fixtures. Everything here backs the
//! unit and integration tests; nothing touches a real database or network.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Agreement, AgreementKind, Contribution, LedgerEvent, ParticipantAgreement, Transfer, Vendor,
    VendorAlias, VendorAssociation, WithheldTransfer,
};
use crate::ports::{
    AgreementRepository, LedgerRepository, RepositoryError, RepositoryResult, TransferRepository,
    VendorRepository,
};
use crate::processor::{
    ProcessorAck, ProcessorError, ProcessorTransferStatus, TransferProcessor, TransferRequest,
};

#[derive(Default)]
pub struct InMemoryVendorRepository {
    vendors: Mutex<HashMap<Uuid, Vendor>>,
    aliases: Mutex<HashMap<String, VendorAlias>>,
    associations: Mutex<Vec<VendorAssociation>>,
}

#[async_trait]
impl VendorRepository for InMemoryVendorRepository {
    async fn insert_vendor(&self, vendor: &Vendor) -> RepositoryResult<Vendor> {
        self.vendors
            .lock()
            .unwrap()
            .insert(vendor.id, vendor.clone());
        Ok(vendor.clone())
    }

    async fn update_vendor(&self, vendor: &Vendor) -> RepositoryResult<()> {
        let mut vendors = self.vendors.lock().unwrap();
        if !vendors.contains_key(&vendor.id) {
            return Err(RepositoryError::NotFound(format!("vendor {}", vendor.id)));
        }
        vendors.insert(vendor.id, vendor.clone());
        Ok(())
    }

    async fn get_vendor(&self, id: Uuid) -> RepositoryResult<Vendor> {
        self.vendors
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("vendor {}", id)))
    }

    async fn find_by_ppd_id(&self, ppd_id: &str) -> RepositoryResult<Option<Vendor>> {
        Ok(self
            .vendors
            .lock()
            .unwrap()
            .values()
            .find(|vendor| vendor.ppd_id.as_deref() == Some(ppd_id))
            .cloned())
    }

    async fn find_sentinel(&self) -> RepositoryResult<Option<Vendor>> {
        Ok(self
            .vendors
            .lock()
            .unwrap()
            .values()
            .find(|vendor| vendor.identity_cannot_be_determined)
            .cloned())
    }

    async fn find_alias(&self, raw_name: &str) -> RepositoryResult<Option<VendorAlias>> {
        Ok(self.aliases.lock().unwrap().get(raw_name).cloned())
    }

    async fn insert_alias(&self, alias: &VendorAlias) -> RepositoryResult<VendorAlias> {
        let mut aliases = self.aliases.lock().unwrap();
        if aliases.contains_key(&alias.raw_name) {
            return Err(RepositoryError::Conflict(format!(
                "alias already bound: {}",
                alias.raw_name
            )));
        }
        aliases.insert(alias.raw_name.clone(), alias.clone());
        Ok(alias.clone())
    }

    async fn insert_association(
        &self,
        association: &VendorAssociation,
    ) -> RepositoryResult<VendorAssociation> {
        self.associations.lock().unwrap().push(association.clone());
        Ok(association.clone())
    }
}

#[derive(Default)]
pub struct InMemoryAgreementRepository {
    agreements: Mutex<HashMap<Uuid, Agreement>>,
    participants: Mutex<HashMap<Uuid, ParticipantAgreement>>,
}

#[async_trait]
impl AgreementRepository for InMemoryAgreementRepository {
    async fn insert_agreement(&self, agreement: &Agreement) -> RepositoryResult<Agreement> {
        self.agreements
            .lock()
            .unwrap()
            .insert(agreement.id, agreement.clone());
        Ok(agreement.clone())
    }

    async fn update_agreement(&self, agreement: &Agreement) -> RepositoryResult<()> {
        let mut agreements = self.agreements.lock().unwrap();
        if !agreements.contains_key(&agreement.id) {
            return Err(RepositoryError::NotFound(format!(
                "agreement {}",
                agreement.id
            )));
        }
        agreements.insert(agreement.id, agreement.clone());
        Ok(())
    }

    async fn get_agreement(&self, id: Uuid) -> RepositoryResult<Agreement> {
        self.agreements
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("agreement {}", id)))
    }

    async fn find_active_vendor_agreement(
        &self,
        vendor_id: Uuid,
        source_account_id: Uuid,
    ) -> RepositoryResult<Option<Agreement>> {
        Ok(self
            .agreements
            .lock()
            .unwrap()
            .values()
            .find(|agreement| {
                agreement.is_active
                    && agreement.kind == AgreementKind::VendorTriggered
                    && agreement.vendor_id == Some(vendor_id)
                    && agreement.owner_source_account_id == source_account_id
            })
            .cloned())
    }

    async fn list_due_recurring(&self, today: NaiveDate) -> RepositoryResult<Vec<Agreement>> {
        let mut due: Vec<Agreement> = self
            .agreements
            .lock()
            .unwrap()
            .values()
            .filter(|agreement| {
                agreement.is_active
                    && agreement.kind == AgreementKind::RecurringDate
                    && agreement
                        .recurrence
                        .as_ref()
                        .map(|r| r.next_scheduled_date <= today)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|agreement| agreement.id);
        Ok(due)
    }

    async fn insert_participant(
        &self,
        participant: &ParticipantAgreement,
    ) -> RepositoryResult<ParticipantAgreement> {
        self.participants
            .lock()
            .unwrap()
            .insert(participant.id, participant.clone());
        Ok(participant.clone())
    }

    async fn update_participant(
        &self,
        participant: &ParticipantAgreement,
    ) -> RepositoryResult<()> {
        let mut participants = self.participants.lock().unwrap();
        if !participants.contains_key(&participant.id) {
            return Err(RepositoryError::NotFound(format!(
                "participant agreement {}",
                participant.id
            )));
        }
        participants.insert(participant.id, participant.clone());
        Ok(())
    }

    async fn get_participant(&self, id: Uuid) -> RepositoryResult<ParticipantAgreement> {
        self.participants
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("participant agreement {}", id)))
    }

    async fn list_participants(
        &self,
        agreement_id: Uuid,
    ) -> RepositoryResult<Vec<ParticipantAgreement>> {
        let mut matching: Vec<ParticipantAgreement> = self
            .participants
            .lock()
            .unwrap()
            .values()
            .filter(|participant| participant.agreement_id == agreement_id)
            .cloned()
            .collect();
        matching.sort_by_key(|participant| participant.id);
        Ok(matching)
    }

    async fn find_unconverted_invites(
        &self,
        email: &str,
    ) -> RepositoryResult<Vec<ParticipantAgreement>> {
        let mut invites: Vec<ParticipantAgreement> = self
            .participants
            .lock()
            .unwrap()
            .values()
            .filter(|participant| {
                !participant.is_converted && participant.invite_email.as_deref() == Some(email)
            })
            .cloned()
            .collect();
        invites.sort_by_key(|participant| participant.id);
        Ok(invites)
    }
}

#[derive(Default)]
pub struct InMemoryTransferRepository {
    transfers: Mutex<HashMap<Uuid, Transfer>>,
    withheld: Mutex<HashMap<Uuid, WithheldTransfer>>,
}

impl InMemoryTransferRepository {
    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    pub fn withheld_count(&self) -> usize {
        self.withheld.lock().unwrap().len()
    }
}

#[async_trait]
impl TransferRepository for InMemoryTransferRepository {
    async fn get_transfer(&self, id: Uuid) -> RepositoryResult<Transfer> {
        self.transfers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("transfer {}", id)))
    }

    async fn find_by_token(&self, token: Uuid) -> RepositoryResult<Option<Transfer>> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .values()
            .find(|transfer| transfer.idempotency_token == token)
            .cloned())
    }

    async fn find_or_create(&self, transfer: &Transfer) -> RepositoryResult<(Transfer, bool)> {
        let mut transfers = self.transfers.lock().unwrap();
        if let Some(existing) = transfers
            .values()
            .find(|existing| existing.idempotency_token == transfer.idempotency_token)
        {
            return Ok((existing.clone(), false));
        }
        transfers.insert(transfer.id, transfer.clone());
        Ok((transfer.clone(), true))
    }

    async fn update_transfer(&self, transfer: &Transfer) -> RepositoryResult<()> {
        let mut transfers = self.transfers.lock().unwrap();
        if !transfers.contains_key(&transfer.id) {
            return Err(RepositoryError::NotFound(format!(
                "transfer {}",
                transfer.id
            )));
        }
        transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn list_resumable(&self) -> RepositoryResult<Vec<Transfer>> {
        let mut resumable: Vec<Transfer> = self
            .transfers
            .lock()
            .unwrap()
            .values()
            .filter(|transfer| !transfer.status.is_terminal())
            .cloned()
            .collect();
        resumable.sort_by_key(|transfer| transfer.created_at);
        Ok(resumable)
    }

    async fn insert_withheld(
        &self,
        withheld: &WithheldTransfer,
    ) -> RepositoryResult<WithheldTransfer> {
        self.withheld
            .lock()
            .unwrap()
            .insert(withheld.id, withheld.clone());
        Ok(withheld.clone())
    }

    async fn update_withheld(&self, withheld: &WithheldTransfer) -> RepositoryResult<()> {
        let mut rows = self.withheld.lock().unwrap();
        if !rows.contains_key(&withheld.id) {
            return Err(RepositoryError::NotFound(format!(
                "withheld transfer {}",
                withheld.id
            )));
        }
        rows.insert(withheld.id, withheld.clone());
        Ok(())
    }

    async fn list_unreconciled(&self) -> RepositoryResult<Vec<WithheldTransfer>> {
        let mut unreconciled: Vec<WithheldTransfer> = self
            .withheld
            .lock()
            .unwrap()
            .values()
            .filter(|withheld| !withheld.has_been_reconciled)
            .cloned()
            .collect();
        unreconciled.sort_by_key(|withheld| withheld.attempted_at);
        Ok(unreconciled)
    }
}

#[derive(Default)]
pub struct InMemoryLedgerRepository {
    events: Mutex<Vec<LedgerEvent>>,
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn append(&self, event: &LedgerEvent) -> RepositoryResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn events_for_transfer(&self, transfer_id: Uuid) -> RepositoryResult<Vec<LedgerEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.transfer_id == transfer_id)
            .cloned()
            .collect())
    }
}

/// What the stub processor should do on the next `create_transfer` call.
#[derive(Debug, Clone)]
pub enum ScriptedCall {
    Ack(ProcessorTransferStatus),
    Timeout,
    Transient,
    Terminal,
    CircuitOpen,
}

/// Scriptable [`TransferProcessor`]. With an empty script every submission
/// is acknowledged PROCESSED; every account has ample funds unless a
/// balance was set explicitly.
#[derive(Default)]
pub struct StubProcessor {
    script: Mutex<VecDeque<ScriptedCall>>,
    balances: Mutex<HashMap<Uuid, i64>>,
    statuses: Mutex<HashMap<String, ProcessorTransferStatus>>,
    requests: Mutex<Vec<TransferRequest>>,
    balance_unavailable: Mutex<bool>,
    counter: AtomicU64,
}

impl StubProcessor {
    pub fn enqueue(&self, call: ScriptedCall) {
        self.script.lock().unwrap().push_back(call);
    }

    pub fn set_balance(&self, account_id: Uuid, amount: i64) {
        self.balances.lock().unwrap().insert(account_id, amount);
    }

    pub fn set_balance_unavailable(&self, unavailable: bool) {
        *self.balance_unavailable.lock().unwrap() = unavailable;
    }

    pub fn set_status(&self, reference: &str, status: ProcessorTransferStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(reference.to_string(), status);
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reference(&self) -> String {
        format!("ptx-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl TransferProcessor for StubProcessor {
    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ProcessorAck, ProcessorError> {
        self.requests.lock().unwrap().push(request.clone());

        let call = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedCall::Ack(ProcessorTransferStatus::Processed));
        match call {
            ScriptedCall::Ack(status) => {
                let reference = self.next_reference();
                self.statuses
                    .lock()
                    .unwrap()
                    .insert(reference.clone(), status);
                Ok(ProcessorAck {
                    processor_transfer_id: reference,
                    status,
                })
            }
            ScriptedCall::Timeout => Err(ProcessorError::Timeout),
            ScriptedCall::Transient => {
                Err(ProcessorError::Transient("scripted failure".to_string()))
            }
            ScriptedCall::Terminal => {
                Err(ProcessorError::Terminal("scripted rejection".to_string()))
            }
            ScriptedCall::CircuitOpen => Err(ProcessorError::CircuitOpen),
        }
    }

    async fn get_transfer_status(
        &self,
        processor_transfer_id: &str,
    ) -> Result<ProcessorTransferStatus, ProcessorError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(processor_transfer_id)
            .copied()
            .unwrap_or(ProcessorTransferStatus::Processed))
    }

    async fn cancel_transfer(&self, processor_transfer_id: &str) -> Result<(), ProcessorError> {
        self.statuses.lock().unwrap().insert(
            processor_transfer_id.to_string(),
            ProcessorTransferStatus::Cancelled,
        );
        Ok(())
    }

    async fn get_available_balance(&self, account_id: Uuid) -> Result<i64, ProcessorError> {
        if *self.balance_unavailable.lock().unwrap() {
            return Err(ProcessorError::Transient(
                "balance lookup unavailable".to_string(),
            ));
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&account_id)
            .copied()
            .unwrap_or(i64::MAX))
    }
}

/// An already-activated vendor-triggered agreement.
pub fn active_vendor_agreement(vendor_id: Uuid, source_account_id: Uuid) -> Agreement {
    let mut agreement = Agreement::new_vendor_triggered(
        Uuid::new_v4(),
        source_account_id,
        Uuid::new_v4(),
        "Shared bill",
        vendor_id,
    );
    agreement.is_active = true;
    agreement.is_pending = false;
    agreement
}

/// An already-activated participant with a payment account on file.
pub fn active_participant(agreement_id: Uuid, contribution: Contribution) -> ParticipantAgreement {
    let mut participant =
        ParticipantAgreement::for_user(agreement_id, Uuid::new_v4(), contribution);
    participant.payment_account_id = Some(Uuid::new_v4());
    participant.is_active = true;
    participant.is_pending = false;
    participant.activated_at = Some(Utc::now());
    participant
}
