use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use flowops_core::domain::action::ActionTag;
use flowops_core::domain::artifact::{AiArtifact, ArtifactType};
use flowops_core::domain::customer::{Customer, CustomerId};
use flowops_core::domain::handoff::{Handoff, HandoffId, HandoffPriority, HandoffStatus};
use flowops_core::domain::interaction::Interaction;
use flowops_core::domain::outbox::{
    IdempotencyKey, NewOutboxEvent, OutboxEvent, OutboxEventId, OutboxEventType, OutboxStatus,
};
use flowops_core::domain::prefixed_id;
use flowops_core::domain::ticket::{Ticket, TicketId, TicketStatus};

use super::{
    ArtifactRepository, ClaimOutcome, CustomerRepository, EnqueueOutcome, HandoffRepository,
    InsertOutcome, InteractionRepository, OutboxRepository, RepositoryError, TicketRepository,
};

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: RwLock<HashMap<String, Customer>>,
}

#[async_trait::async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let customers = self.customers.read().await;
        Ok(customers.get(&id.0).cloned())
    }

    async fn upsert(&self, customer: Customer) -> Result<(), RepositoryError> {
        let mut customers = self.customers.write().await;
        customers.insert(customer.id.0.clone(), customer);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTicketRepository {
    tickets: RwLock<HashMap<String, Ticket>>,
}

#[async_trait::async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let tickets = self.tickets.read().await;
        Ok(tickets.get(&id.0).cloned())
    }

    async fn save(&self, ticket: Ticket) -> Result<(), RepositoryError> {
        let mut tickets = self.tickets.write().await;
        tickets.insert(ticket.id.0.clone(), ticket);
        Ok(())
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Ticket>, RepositoryError> {
        let tickets = self.tickets.read().await;
        let mut matched: Vec<Ticket> = tickets
            .values()
            .filter(|ticket| ticket.customer_id == *customer_id)
            .filter(|ticket| ticket_id.map_or(true, |id| ticket.id == *id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn mark_resolved(
        &self,
        id: &TicketId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tickets = self.tickets.write().await;
        match tickets.get_mut(&id.0) {
            Some(ticket) if !ticket.status.is_terminal() => {
                ticket.status = TicketStatus::Resolved;
                ticket.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryInteractionRepository {
    interactions: RwLock<Vec<Interaction>>,
}

#[async_trait::async_trait]
impl InteractionRepository for InMemoryInteractionRepository {
    async fn insert(&self, interaction: Interaction) -> Result<InsertOutcome, RepositoryError> {
        let mut interactions = self.interactions.write().await;
        let duplicate = interactions.iter().any(|existing| {
            existing.customer_id == interaction.customer_id
                && existing.request_id == interaction.request_id
        });
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }
        interactions.push(interaction);
        Ok(InsertOutcome::Inserted)
    }

    async fn find_by_request(
        &self,
        customer_id: &CustomerId,
        request_id: &str,
    ) -> Result<Option<Interaction>, RepositoryError> {
        let interactions = self.interactions.read().await;
        Ok(interactions
            .iter()
            .find(|interaction| {
                interaction.customer_id == *customer_id && interaction.request_id == request_id
            })
            .cloned())
    }

    async fn list_recent(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let interactions = self.interactions.read().await;
        let mut matched: Vec<Interaction> = interactions
            .iter()
            .filter(|interaction| interaction.customer_id == *customer_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn list_for_audit(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let interactions = self.interactions.read().await;
        let mut matched: Vec<Interaction> = interactions
            .iter()
            .filter(|interaction| interaction.customer_id == *customer_id)
            .filter(|interaction| {
                ticket_id.map_or(true, |id| interaction.ticket_id.as_ref() == Some(id))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn count_all(&self) -> Result<i64, RepositoryError> {
        let interactions = self.interactions.read().await;
        Ok(interactions.len() as i64)
    }

    async fn count_replayed(&self) -> Result<i64, RepositoryError> {
        let interactions = self.interactions.read().await;
        Ok(interactions
            .iter()
            .filter(|interaction| interaction.actions.contains(&ActionTag::Replay))
            .count() as i64)
    }

    async fn recent_confidences(&self, limit: u32) -> Result<Vec<f64>, RepositoryError> {
        let interactions = self.interactions.read().await;
        let mut sorted: Vec<&Interaction> = interactions.iter().collect();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sorted
            .into_iter()
            .take(limit as usize)
            .map(|interaction| interaction.confidence)
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryHandoffRepository {
    handoffs: RwLock<HashMap<String, Handoff>>,
}

#[async_trait::async_trait]
impl HandoffRepository for InMemoryHandoffRepository {
    async fn create(&self, handoff: Handoff) -> Result<(), RepositoryError> {
        let mut handoffs = self.handoffs.write().await;
        handoffs.insert(handoff.id.0.clone(), handoff);
        Ok(())
    }

    async fn find_by_id(&self, id: &HandoffId) -> Result<Option<Handoff>, RepositoryError> {
        let handoffs = self.handoffs.read().await;
        Ok(handoffs.get(&id.0).cloned())
    }

    async fn list(
        &self,
        status: Option<HandoffStatus>,
        limit: u32,
    ) -> Result<Vec<Handoff>, RepositoryError> {
        let handoffs = self.handoffs.read().await;
        let mut matched: Vec<Handoff> = handoffs
            .values()
            .filter(|handoff| status.map_or(true, |wanted| handoff.status == wanted))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn list_for_audit(
        &self,
        customer_id: &CustomerId,
        ticket_id: Option<&TicketId>,
    ) -> Result<Vec<Handoff>, RepositoryError> {
        let handoffs = self.handoffs.read().await;
        let mut matched: Vec<Handoff> = handoffs
            .values()
            .filter(|handoff| handoff.customer_id == *customer_id)
            .filter(|handoff| ticket_id.map_or(true, |id| handoff.ticket_id.as_ref() == Some(id)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn claim(
        &self,
        id: &HandoffId,
        operator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let mut handoffs = self.handoffs.write().await;
        match handoffs.get_mut(&id.0) {
            Some(handoff)
                if handoff.status == HandoffStatus::Pending && handoff.claimed_by.is_none() =>
            {
                handoff.status = HandoffStatus::Claimed;
                handoff.claimed_by = Some(operator_id.to_string());
                handoff.claimed_at = Some(now);
                handoff.updated_at = now;
                Ok(ClaimOutcome::Claimed(handoff.clone()))
            }
            _ => Ok(ClaimOutcome::Conflict),
        }
    }

    async fn resolve(
        &self,
        id: &HandoffId,
        operator_id: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut handoffs = self.handoffs.write().await;
        match handoffs.get_mut(&id.0) {
            Some(handoff) if handoff.status == HandoffStatus::Claimed => {
                handoff.status = HandoffStatus::Resolved;
                handoff.resolved_by = Some(operator_id.to_string());
                handoff.resolved_at = Some(now);
                handoff.resolution_notes = notes.map(str::to_string);
                handoff.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_sla_due(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<Handoff>, RepositoryError> {
        let handoffs = self.handoffs.read().await;
        let mut due: Vec<Handoff> = handoffs
            .values()
            .filter(|handoff| {
                handoff.status == HandoffStatus::Pending
                    && handoff.sla_breached_at.is_none()
                    && handoff.sla_due_at <= now
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.sla_due_at.cmp(&b.sla_due_at));
        due.truncate(batch as usize);
        Ok(due)
    }

    async fn mark_sla_breached(
        &self,
        id: &HandoffId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut handoffs = self.handoffs.write().await;
        match handoffs.get_mut(&id.0) {
            Some(handoff)
                if handoff.status == HandoffStatus::Pending
                    && handoff.sla_breached_at.is_none() =>
            {
                handoff.sla_breached_at = Some(now);
                handoff.priority = HandoffPriority::High;
                handoff.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_by_status(&self, status: HandoffStatus) -> Result<i64, RepositoryError> {
        let handoffs = self.handoffs.read().await;
        Ok(handoffs.values().filter(|handoff| handoff.status == status).count() as i64)
    }

    async fn recent_resolutions(
        &self,
        limit: u32,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, RepositoryError> {
        let handoffs = self.handoffs.read().await;
        let mut pairs: Vec<(DateTime<Utc>, DateTime<Utc>)> = handoffs
            .values()
            .filter(|handoff| handoff.status == HandoffStatus::Resolved)
            .filter_map(|handoff| handoff.resolved_at.map(|at| (handoff.created_at, at)))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        pairs.truncate(limit as usize);
        Ok(pairs)
    }
}

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    events: RwLock<Vec<OutboxEvent>>,
}

#[async_trait::async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn enqueue(
        &self,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, RepositoryError> {
        let mut events = self.events.write().await;
        if let Some(existing) = events
            .iter()
            .find(|candidate| candidate.idempotency_key == event.idempotency_key)
        {
            return Ok(EnqueueOutcome::AlreadyQueued(existing.clone()));
        }

        let created = OutboxEvent {
            id: OutboxEventId(prefixed_id("evt_")),
            event_type: event.event_type,
            payload_json: event.payload_json,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            idempotency_key: event.idempotency_key,
            created_at: now,
            updated_at: now,
        };
        events.push(created.clone());
        Ok(EnqueueOutcome::Created(created))
    }

    async fn find_by_id(
        &self,
        id: &OutboxEventId,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().find(|event| event.id == *id).cloned())
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().find(|event| event.idempotency_key == *key).cloned())
    }

    async fn next_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut eligible: Vec<&OutboxEvent> = events
            .iter()
            .filter(|event| {
                matches!(event.status, OutboxStatus::Pending | OutboxStatus::Failed)
                    && event.next_attempt_at <= now
            })
            .collect();
        eligible.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(eligible.first().map(|event| (*event).clone()))
    }

    async fn mark_processing(
        &self,
        id: &OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events.iter_mut().find(|event| event.id == *id) {
            Some(event)
                if matches!(event.status, OutboxStatus::Pending | OutboxStatus::Failed) =>
            {
                event.status = OutboxStatus::Processing;
                event.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_sent(
        &self,
        id: &OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events.iter_mut().find(|event| event.id == *id) {
            Some(event) if event.status == OutboxStatus::Processing => {
                event.status = OutboxStatus::Sent;
                event.last_error = None;
                event.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        id: &OutboxEventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events.iter_mut().find(|event| event.id == *id) {
            Some(event) if event.status == OutboxStatus::Processing => {
                event.status = OutboxStatus::Failed;
                event.attempts = attempts;
                event.next_attempt_at = next_attempt_at;
                event.last_error = Some(error.to_string());
                event.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_dead(
        &self,
        id: &OutboxEventId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events.iter_mut().find(|event| event.id == *id) {
            Some(event) if event.status == OutboxStatus::Processing => {
                event.status = OutboxStatus::Dead;
                event.attempts = attempts;
                event.last_error = Some(error.to_string());
                event.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut events = self.events.write().await;
        let mut released = 0;
        for event in events.iter_mut() {
            if event.status == OutboxStatus::Processing && event.updated_at < cutoff {
                event.status = OutboxStatus::Failed;
                event.last_error = Some("released after stale processing claim".to_string());
                event.next_attempt_at = now;
                event.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut matched: Vec<OutboxEvent> = events
            .iter()
            .filter(|event| status.map_or(true, |wanted| event.status == wanted))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn list_customer_emails(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let events = self.events.read().await;
        let prefix = format!("email:{}:", customer_id.0);
        let mut matched: Vec<OutboxEvent> = events
            .iter()
            .filter(|event| event.event_type == OutboxEventType::EmailSend)
            .filter(|event| event.idempotency_key.0.starts_with(&prefix))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }
}

#[derive(Default)]
pub struct InMemoryArtifactRepository {
    artifacts: RwLock<HashMap<(String, ArtifactType), AiArtifact>>,
}

#[async_trait::async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn upsert(&self, artifact: AiArtifact) -> Result<(), RepositoryError> {
        let mut artifacts = self.artifacts.write().await;
        let key = (artifact.handoff_id.0.clone(), artifact.artifact_type);
        match artifacts.get_mut(&key) {
            Some(existing) => {
                existing.status = artifact.status;
                existing.input_json = artifact.input_json;
                existing.output_json = artifact.output_json;
                existing.updated_at = artifact.updated_at;
            }
            None => {
                artifacts.insert(key, artifact);
            }
        }
        Ok(())
    }

    async fn find(
        &self,
        handoff_id: &HandoffId,
        artifact_type: ArtifactType,
    ) -> Result<Option<AiArtifact>, RepositoryError> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts.get(&(handoff_id.0.clone(), artifact_type)).cloned())
    }

    async fn list_for_handoff(
        &self,
        handoff_id: &HandoffId,
    ) -> Result<Vec<AiArtifact>, RepositoryError> {
        let artifacts = self.artifacts.read().await;
        let mut matched: Vec<AiArtifact> = artifacts
            .values()
            .filter(|artifact| artifact.handoff_id == *handoff_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use flowops_core::domain::customer::CustomerId;
    use flowops_core::domain::handoff::{
        Handoff, HandoffId, HandoffPriority, HandoffReason, HandoffStatus,
    };
    use flowops_core::domain::interaction::Mode;
    use flowops_core::domain::outbox::{IdempotencyKey, NewOutboxEvent, OutboxEventType};

    use crate::repositories::{
        ClaimOutcome, EnqueueOutcome, HandoffRepository, InMemoryHandoffRepository,
        InMemoryOutboxRepository, OutboxRepository,
    };

    fn pending_handoff(id: &str) -> Handoff {
        let now = Utc::now();
        Handoff {
            id: HandoffId(id.to_string()),
            customer_id: CustomerId("cus_1".to_string()),
            ticket_id: None,
            reason: HandoffReason::LowConfidence,
            priority: HandoffPriority::Medium,
            mode: Mode::Live,
            confidence: Some(0.6),
            status: HandoffStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            issues: Vec::new(),
            actions: Vec::new(),
            sla_due_at: now + Duration::minutes(60),
            sla_breached_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn in_memory_claim_matches_sql_semantics() {
        let repo = InMemoryHandoffRepository::default();
        repo.create(pending_handoff("hf_1")).await.expect("create");

        let id = HandoffId("hf_1".to_string());
        let now = Utc::now();

        assert!(matches!(
            repo.claim(&id, "op_ana", now).await.expect("first"),
            ClaimOutcome::Claimed(_)
        ));
        assert!(matches!(
            repo.claim(&id, "op_sam", now).await.expect("second"),
            ClaimOutcome::Conflict
        ));
        assert!(repo.resolve(&id, "op_ana", None, now).await.expect("resolve"));
        assert!(!repo.resolve(&id, "op_ana", None, now).await.expect("resolve twice"));
    }

    #[tokio::test]
    async fn in_memory_enqueue_matches_sql_semantics() {
        let repo = InMemoryOutboxRepository::default();
        let now = Utc::now();
        let event = NewOutboxEvent {
            event_type: OutboxEventType::EmailSend,
            payload_json: "{}".to_string(),
            idempotency_key: IdempotencyKey::email(&CustomerId("cus_1".to_string()), "req-1"),
        };

        let first = repo.enqueue(event.clone(), now).await.expect("first");
        assert!(matches!(first, EnqueueOutcome::Created(_)));

        let second = repo.enqueue(event, now).await.expect("second");
        match second {
            EnqueueOutcome::AlreadyQueued(existing) => {
                assert_eq!(existing.id, first.event().id);
            }
            EnqueueOutcome::Created(_) => panic!("duplicate key should collapse"),
        }
    }
}
