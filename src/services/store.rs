use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::models::{EventSeatDocument, Seat, SeatStatus};
use crate::storage::{StorageBackend, StorageError};

/// What happened to an incoming record during an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Incoming `updatedAt` was older than the stored one; dropped silently.
    StaleDiscarded,
    /// A non-Vendido record tried to overwrite a Vendido one; dropped.
    VendidoProtected,
}

impl UpsertOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Updated)
    }
}

/// Durable per-event seat document store.
///
/// All mutation is a read-modify-write of the whole [`EventSeatDocument`]
/// through this one typed boundary. Concurrent writers to different seats of
/// the same event can therefore lose a sibling seat's update (last
/// whole-document write wins); per-seat updates themselves converge via the
/// timestamp merge below.
#[derive(Clone)]
pub struct SeatStateStore {
    backend: Arc<dyn StorageBackend>,
    lock_ttl: Duration,
}

fn document_key(evento_id: &str) -> String {
    format!("evento_{evento_id}")
}

impl SeatStateStore {
    pub fn new(backend: Arc<dyn StorageBackend>, lock_ttl: std::time::Duration) -> Self {
        Self {
            backend,
            lock_ttl: Duration::from_std(lock_ttl).expect("lock TTL out of range"),
        }
    }

    /// Load the document for an event, empty if none was stored yet.
    pub async fn get_document(&self, evento_id: &str) -> Result<EventSeatDocument, StorageError> {
        match self.backend.get(&document_key(evento_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(EventSeatDocument::empty(evento_id)),
        }
    }

    async fn put_document(&self, doc: &EventSeatDocument) -> Result<(), StorageError> {
        let raw = serde_json::to_string(doc)?;
        self.backend.set(&document_key(&doc.evento_id), &raw).await
    }

    /// Materialized seat list with seat ids and coordinates back-filled from
    /// each other where derivable.
    pub async fn get_seats(&self, evento_id: &str) -> Result<Vec<Seat>, StorageError> {
        let doc = self.get_document(evento_id).await?;
        let mut seats = doc.asientos;
        for seat in &mut seats {
            seat.normalize();
        }
        Ok(seats)
    }

    /// Single seat record, if present.
    pub async fn get_seat(
        &self,
        evento_id: &str,
        seat_id: &str,
    ) -> Result<Option<Seat>, StorageError> {
        let doc = self.get_document(evento_id).await?;
        Ok(doc.seat(seat_id).cloned().map(|mut seat| {
            seat.normalize();
            seat
        }))
    }

    /// Idempotent, out-of-order-safe upsert of one seat record.
    ///
    /// The incoming record is accepted only if its `updatedAt` is not older
    /// than the stored one; a Vendido record is never overwritten by a
    /// lower-priority status through this path. Fields the incoming record
    /// does not carry (notably `comprador`) are preserved.
    pub async fn upsert_with_timestamp(
        &self,
        evento_id: &str,
        mut incoming: Seat,
    ) -> Result<UpsertOutcome, StorageError> {
        if incoming.updated_at.is_none() {
            incoming.updated_at = Some(Utc::now());
        }

        let mut doc = self.get_document(evento_id).await?;
        let outcome = merge_incoming(&mut doc, incoming, self.lock_ttl);
        match outcome {
            UpsertOutcome::Inserted | UpsertOutcome::Updated => {
                self.put_document(&doc).await?;
            }
            UpsertOutcome::StaleDiscarded => {
                debug!(evento_id, "Discarded stale seat update");
            }
            UpsertOutcome::VendidoProtected => {
                debug!(evento_id, "Ignored status downgrade for sold seat");
            }
        }
        Ok(outcome)
    }
}

/// Merge one incoming record into the document. Pure so the merge rules can
/// be tested without a backend.
fn merge_incoming(
    doc: &mut EventSeatDocument,
    mut incoming: Seat,
    lock_ttl: Duration,
) -> UpsertOutcome {
    incoming.normalize();
    // a Bloqueado write carries its expiry, derived from the accepted
    // timestamp
    if incoming.estado == SeatStatus::Bloqueado {
        incoming.expira = incoming.updated_at.map(|ts| ts + lock_ttl);
    }

    let Some(pos) = doc.position(&incoming.seat_id) else {
        doc.asientos.push(incoming);
        return UpsertOutcome::Inserted;
    };
    let existing = &mut doc.asientos[pos];

    if existing.estado == SeatStatus::Vendido && incoming.estado != SeatStatus::Vendido {
        return UpsertOutcome::VendidoProtected;
    }
    if let (Some(incoming_ts), Some(existing_ts)) = (incoming.updated_at, existing.updated_at) {
        if incoming_ts < existing_ts {
            return UpsertOutcome::StaleDiscarded;
        }
    }

    existing.seat_id = incoming.seat_id;
    existing.fila = incoming.fila.or(existing.fila);
    existing.columna = incoming.columna.or(existing.columna);
    existing.estado = incoming.estado;
    existing.updated_at = incoming.updated_at;
    // holder/expira exist only while Bloqueado
    match incoming.estado {
        SeatStatus::Bloqueado => {
            existing.holder = incoming.holder;
            existing.expira = incoming.expira;
        }
        SeatStatus::Libre | SeatStatus::Vendido => {
            existing.holder = None;
            existing.expira = None;
        }
    }
    if incoming.comprador.is_some() {
        existing.comprador = incoming.comprador;
    }
    UpsertOutcome::Updated
}
