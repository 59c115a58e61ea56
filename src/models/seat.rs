use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coords::SeatCoord;

/// Seat lifecycle state. `Vendido` is terminal: no accepted update may move a
/// seat out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatStatus {
    Libre,
    Bloqueado,
    Vendido,
}

impl Default for SeatStatus {
    fn default() -> Self {
        SeatStatus::Libre
    }
}

/// Buyer details recorded when a seat is sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub persona: String,
    #[serde(rename = "fechaVenta")]
    pub fecha_venta: DateTime<Utc>,
}

/// One row/column cell of a venue for one event.
///
/// `holder` and `expira` are set only while `Bloqueado`; `comprador` only once
/// `Vendido`. `updated_at` is the timestamp of the last accepted mutation and
/// is monotonically non-decreasing per seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    #[serde(rename = "seatId", default, skip_serializing_if = "String::is_empty")]
    pub seat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fila: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columna: Option<u32>,
    pub estado: SeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expira: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comprador: Option<Buyer>,
}

impl Seat {
    /// Fresh seat in the `Libre` state.
    pub fn libre(seat_id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Seat {
            seat_id: seat_id.into(),
            fila: None,
            columna: None,
            estado: SeatStatus::Libre,
            holder: None,
            expira: None,
            updated_at: Some(updated_at),
            comprador: None,
        }
    }

    /// Seat held by `session_id`. `expira` is filled in by the store when the
    /// record is persisted.
    pub fn bloqueado(
        seat_id: impl Into<String>,
        session_id: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Seat {
            holder: Some(session_id.into()),
            estado: SeatStatus::Bloqueado,
            ..Seat::libre(seat_id, updated_at)
        }
    }

    /// Sold seat with buyer details; lock fields cleared.
    pub fn vendido(
        seat_id: impl Into<String>,
        comprador: Buyer,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Seat {
            estado: SeatStatus::Vendido,
            comprador: Some(comprador),
            ..Seat::libre(seat_id, updated_at)
        }
    }

    /// Fill in whichever of seat id / coordinates is missing and derivable
    /// from the other. A seat id that cannot be decoded is left as-is with
    /// coordinates absent.
    pub fn normalize(&mut self) {
        if self.seat_id.is_empty() {
            if let (Some(fila), Some(columna)) = (self.fila, self.columna) {
                self.seat_id = SeatCoord::new(fila, columna).seat_id();
            }
        } else if self.fila.is_none() || self.columna.is_none() {
            if let Ok(coord) = self.seat_id.parse::<SeatCoord>() {
                self.fila = Some(coord.fila);
                self.columna = Some(coord.columna);
            }
        }
    }

    /// Whether the seat carries a lock that has not yet expired at `now`.
    pub fn lock_active(&self, now: DateTime<Utc>) -> bool {
        self.estado == SeatStatus::Bloqueado
            && self.holder.is_some()
            && self.expira.map_or(false, |expira| expira > now)
    }
}

/// Durable per-event document holding every seat record. This is the unit of
/// read-modify-write in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSeatDocument {
    #[serde(rename = "eventId")]
    pub evento_id: String,
    #[serde(default)]
    pub asientos: Vec<Seat>,
}

impl EventSeatDocument {
    pub fn empty(evento_id: impl Into<String>) -> Self {
        EventSeatDocument {
            evento_id: evento_id.into(),
            asientos: Vec::new(),
        }
    }

    /// Index of the record matching `seat_id`, falling back to coordinates
    /// for legacy entries that never carried an explicit id.
    pub fn position(&self, seat_id: &str) -> Option<usize> {
        self.asientos.iter().position(|s| {
            if !s.seat_id.is_empty() {
                s.seat_id == seat_id
            } else {
                match (s.fila, s.columna) {
                    (Some(f), Some(c)) => SeatCoord::new(f, c).seat_id() == seat_id,
                    _ => false,
                }
            }
        })
    }

    pub fn seat(&self, seat_id: &str) -> Option<&Seat> {
        self.position(seat_id).map(|i| &self.asientos[i])
    }
}
