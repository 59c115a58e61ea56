use std::fmt;
use std::str::FromStr;

/// Grid position of a seat inside a venue.
///
/// The canonical string form is `r{fila}c{columna}`, e.g. `r2c5`. Every
/// conversion between a seat id and its coordinates goes through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeatCoord {
    pub fila: u32,
    pub columna: u32,
}

impl SeatCoord {
    pub fn new(fila: u32, columna: u32) -> Self {
        Self { fila, columna }
    }

    /// Canonical seat id for this position.
    pub fn seat_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SeatCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}c{}", self.fila, self.columna)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed seat id: {0:?}")]
pub struct ParseSeatIdError(pub String);

impl FromStr for SeatCoord {
    type Err = ParseSeatIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('r')
            .ok_or_else(|| ParseSeatIdError(s.to_string()))?;
        let (fila, columna) = rest
            .split_once('c')
            .ok_or_else(|| ParseSeatIdError(s.to_string()))?;
        let fila = fila
            .parse::<u32>()
            .map_err(|_| ParseSeatIdError(s.to_string()))?;
        let columna = columna
            .parse::<u32>()
            .map_err(|_| ParseSeatIdError(s.to_string()))?;
        Ok(SeatCoord { fila, columna })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_canonical_id() {
        assert_eq!(SeatCoord::new(2, 5).seat_id(), "r2c5");
        assert_eq!(SeatCoord::new(10, 120).seat_id(), "r10c120");
    }

    #[test]
    fn parses_canonical_id() {
        assert_eq!("r2c5".parse(), Ok(SeatCoord::new(2, 5)));
        assert_eq!("r10c120".parse(), Ok(SeatCoord::new(10, 120)));
    }

    #[test]
    fn roundtrips() {
        let coord = SeatCoord::new(7, 33);
        assert_eq!(coord.seat_id().parse::<SeatCoord>().unwrap(), coord);
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "r", "r2", "2c5", "rXc5", "r2cY", "r2c", "rc", "seat-1"] {
            assert!(bad.parse::<SeatCoord>().is_err(), "accepted {bad:?}");
        }
    }
}
