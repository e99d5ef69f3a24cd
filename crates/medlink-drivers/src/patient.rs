//! Patient fields shared by the send-only drivers.

use medlink_core::{ProtocolError, ValueVector};

/// Birth date taken from a `YYYYMMDD` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirthDate {
    year: String,
    month: String,
    day: String,
}

impl BirthDate {
    /// Parse parameter `slot`; fewer than eight characters is refused.
    pub fn from_param(params: &ValueVector, slot: usize) -> Result<Self, ProtocolError> {
        let raw: Vec<char> = params.get(slot).trim().chars().collect();
        if raw.len() < 8 {
            return Err(ProtocolError::InvalidParameter {
                slot,
                reason: format!("birth date {:?} is not YYYYMMDD", params.get(slot)),
            });
        }
        Ok(Self {
            year: raw[..4].iter().collect(),
            month: raw[4..6].iter().collect(),
            day: raw[6..8].iter().collect(),
        })
    }

    /// `YYYYMMDD`.
    pub fn compact(&self) -> String {
        format!("{}{}{}", self.year, self.month, self.day)
    }

    /// `YYYY/MM/DD`.
    pub fn slashed(&self) -> String {
        format!("{}/{}/{}", self.year, self.month, self.day)
    }

    /// `YYYY.MM.DD`.
    pub fn dotted(&self) -> String {
        format!("{}.{}.{}", self.year, self.month, self.day)
    }
}

/// `M` for sex code `1`, `F` otherwise.
pub fn sex_letter(code: &str) -> &'static str {
    if code.trim() == "1" {
        "M"
    } else {
        "F"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birth_date_renderings() {
        let params = ValueVector::from_slice(&["", "19800131"]);
        let birth = BirthDate::from_param(&params, 1).unwrap();
        assert_eq!(birth.compact(), "19800131");
        assert_eq!(birth.dotted(), "1980.01.31");
        assert_eq!(birth.slashed(), "1980/01/31");
    }

    #[test]
    fn short_birth_date_is_refused() {
        let params = ValueVector::from_slice(&["", "1980"]);
        let err = BirthDate::from_param(&params, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameter { slot: 1, .. }));
    }

    #[test]
    fn sex_codes() {
        assert_eq!(sex_letter("1"), "M");
        assert_eq!(sex_letter("2"), "F");
        assert_eq!(sex_letter(""), "F");
    }
}
