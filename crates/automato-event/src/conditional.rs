use std::str::FromStr;

use serde::Serialize;

use crate::error::EventError;

/// Comparison operator of Main and If events (3 bits on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u8)]
pub enum Conditional {
    #[serde(rename = "<")]
    Lt = 0,
    #[serde(rename = ">")]
    Gt = 1,
    #[serde(rename = "==")]
    Eq = 2,
    #[serde(rename = "!=")]
    Ne = 3,
    #[serde(rename = "<=")]
    Le = 4,
    #[serde(rename = ">=")]
    Ge = 5,
    #[default]
    #[serde(rename = "not_set")]
    NotSet = 6,
}

impl Conditional {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => Self::Lt,
            1 => Self::Gt,
            2 => Self::Eq,
            3 => Self::Ne,
            4 => Self::Le,
            5 => Self::Ge,
            _ => Self::NotSet,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::NotSet => "?",
        }
    }

    /// Apply the operator. `NotSet` never matches.
    pub fn evaluate<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Gt => lhs > rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Le => lhs <= rhs,
            Self::Ge => lhs >= rhs,
            Self::NotSet => false,
        }
    }
}

impl FromStr for Conditional {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" => Ok(Self::Lt),
            ">" => Ok(Self::Gt),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            "<=" => Ok(Self::Le),
            ">=" => Ok(Self::Ge),
            other => Err(EventError::InvalidConditional(other.to_string())),
        }
    }
}

impl std::fmt::Display for Conditional {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}
