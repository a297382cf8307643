//! Fixed-layout codec for small named control values ("tuners"), tuned from
//! a remote UI while a processing module runs.
//!
//! Three variants: bounded integer, bounded real, boolean. Each serializes to
//! a fixed-size little-endian byte sequence — `[name bytes][current][min]
//! [max]` for the numeric variants, `[name bytes][flag]` for booleans — and
//! `byte_size()` equals the serialized length exactly, which is what sizes
//! the control channel's mailbox at creation. The layout is shared by
//! processes compiled and started at different times, so it never depends on
//! platform padding.
//!
//! Deserialization is deliberately forgiving: a buffer of the wrong length,
//! a mismatched name, or an out-of-range value is rejected and the prior
//! state kept, because a late-joining or garbled writer must not be able to
//! wedge a running module.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunerError {
    #[error("invalid tuner name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("tuner '{name}': min {min} exceeds max {max}")]
    InvalidBounds { name: String, min: f64, max: f64 },

    #[error("tuner '{name}': default {value} outside [{min}, {max}]")]
    DefaultOutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Tuner names become path-like channel components, so the characters that
/// would break that are rejected up front.
fn validate_name(name: &str) -> Result<(), TunerError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.contains(' ') {
        Some("must not contain spaces")
    } else if name.contains('/') {
        Some("must not contain '/'")
    } else if name.contains('%') {
        Some("must not contain '%'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(TunerError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// A current value, typed by variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TunerValue {
    Int(i32),
    Real(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntTuner {
    name: String,
    current: i32,
    min: i32,
    max: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealTuner {
    name: String,
    current: f64,
    min: f64,
    max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoolTuner {
    name: String,
    current: bool,
}

impl IntTuner {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn current(&self) -> i32 {
        self.current
    }
    pub fn min(&self) -> i32 {
        self.min
    }
    pub fn max(&self) -> i32 {
        self.max
    }
}

impl RealTuner {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn current(&self) -> f64 {
        self.current
    }
    pub fn min(&self) -> f64 {
        self.min
    }
    pub fn max(&self) -> f64 {
        self.max
    }
}

impl BoolTuner {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn current(&self) -> bool {
        self.current
    }
}

/// One control value. The sum type carries the shared
/// `byte_size`/`serialize`/`deserialize` contract for all three variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Tuner {
    Int(IntTuner),
    Real(RealTuner),
    Bool(BoolTuner),
}

const INT_FIELDS: usize = 3 * 4;
const REAL_FIELDS: usize = 3 * 8;
const BOOL_FIELDS: usize = 1;

fn le_i32(bytes: &[u8]) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    i32::from_le_bytes(word)
}

fn le_f64(bytes: &[u8]) -> f64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(word)
}

impl Tuner {
    pub fn int(name: &str, default: i32, min: i32, max: i32) -> Result<Self, TunerError> {
        validate_name(name)?;
        if min > max {
            return Err(TunerError::InvalidBounds {
                name: name.to_string(),
                min: min as f64,
                max: max as f64,
            });
        }
        if default < min || default > max {
            return Err(TunerError::DefaultOutOfRange {
                name: name.to_string(),
                value: default as f64,
                min: min as f64,
                max: max as f64,
            });
        }
        Ok(Self::Int(IntTuner {
            name: name.to_string(),
            current: default,
            min,
            max,
        }))
    }

    pub fn real(name: &str, default: f64, min: f64, max: f64) -> Result<Self, TunerError> {
        validate_name(name)?;
        if min > max {
            return Err(TunerError::InvalidBounds {
                name: name.to_string(),
                min,
                max,
            });
        }
        if default < min || default > max {
            return Err(TunerError::DefaultOutOfRange {
                name: name.to_string(),
                value: default,
                min,
                max,
            });
        }
        Ok(Self::Real(RealTuner {
            name: name.to_string(),
            current: default,
            min,
            max,
        }))
    }

    pub fn bool(name: &str, default: bool) -> Result<Self, TunerError> {
        validate_name(name)?;
        Ok(Self::Bool(BoolTuner {
            name: name.to_string(),
            current: default,
        }))
    }

    pub fn name(&self) -> &str {
        match self {
            Tuner::Int(t) => &t.name,
            Tuner::Real(t) => &t.name,
            Tuner::Bool(t) => &t.name,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Tuner::Int(_) => "int",
            Tuner::Real(_) => "real",
            Tuner::Bool(_) => "bool",
        }
    }

    /// The `<tag>_<name>` label embedded in the control channel's name.
    pub fn channel_label(&self) -> String {
        format!("{}_{}", self.type_tag(), self.name())
    }

    /// Reconstruct a placeholder from a channel label, for discovery-side
    /// parsing. The placeholder's state is overwritten by the first
    /// successful deserialization.
    pub fn from_label(label: &str) -> Option<Self> {
        let (tag, name) = label.split_once('_')?;
        match tag {
            "int" => Tuner::int(name, 0, 0, 0).ok(),
            "real" => Tuner::real(name, 0.0, 0.0, 0.0).ok(),
            "bool" => Tuner::bool(name, false).ok(),
            _ => None,
        }
    }

    /// Exact length of [`Tuner::serialize`]'s output. Sizes the control
    /// channel's mailbox.
    pub fn byte_size(&self) -> usize {
        let fields = match self {
            Tuner::Int(_) => INT_FIELDS,
            Tuner::Real(_) => REAL_FIELDS,
            Tuner::Bool(_) => BOOL_FIELDS,
        };
        self.name().len() + fields
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size());
        out.extend_from_slice(self.name().as_bytes());
        match self {
            Tuner::Int(t) => {
                out.extend_from_slice(&t.current.to_le_bytes());
                out.extend_from_slice(&t.min.to_le_bytes());
                out.extend_from_slice(&t.max.to_le_bytes());
            }
            Tuner::Real(t) => {
                out.extend_from_slice(&t.current.to_le_bytes());
                out.extend_from_slice(&t.min.to_le_bytes());
                out.extend_from_slice(&t.max.to_le_bytes());
            }
            Tuner::Bool(t) => out.push(t.current as u8),
        }
        out
    }

    /// Parse and re-validate a serialized value. Returns whether the update
    /// was accepted; on rejection the prior state is fully retained.
    pub fn deserialize(&mut self, buf: &[u8]) -> bool {
        if buf.len() != self.byte_size() {
            return false;
        }
        let name_len = self.name().len();
        if &buf[..name_len] != self.name().as_bytes() {
            return false;
        }
        let fields = &buf[name_len..];

        match self {
            Tuner::Int(t) => {
                let current = le_i32(&fields[0..4]);
                let min = le_i32(&fields[4..8]);
                let max = le_i32(&fields[8..12]);
                if min > max || current < min || current > max {
                    return false;
                }
                t.current = current;
                t.min = min;
                t.max = max;
            }
            Tuner::Real(t) => {
                let current = le_f64(&fields[0..8]);
                let min = le_f64(&fields[8..16]);
                let max = le_f64(&fields[16..24]);
                if !current.is_finite() || min > max || current < min || current > max {
                    return false;
                }
                t.current = current;
                t.min = min;
                t.max = max;
            }
            Tuner::Bool(t) => match fields[0] {
                0 => t.current = false,
                1 => t.current = true,
                _ => return false,
            },
        }
        true
    }

    pub fn value(&self) -> TunerValue {
        match self {
            Tuner::Int(t) => TunerValue::Int(t.current),
            Tuner::Real(t) => TunerValue::Real(t.current),
            Tuner::Bool(t) => TunerValue::Bool(t.current),
        }
    }

    /// Set the current value from a typed update, keeping the variant's
    /// bounds. Returns whether the update was accepted.
    pub fn set_value(&mut self, value: TunerValue) -> bool {
        match (self, value) {
            (Tuner::Int(t), TunerValue::Int(v)) => {
                if v < t.min || v > t.max {
                    return false;
                }
                t.current = v;
                true
            }
            (Tuner::Real(t), TunerValue::Real(v)) => {
                if !v.is_finite() || v < t.min || v > t.max {
                    return false;
                }
                t.current = v;
                true
            }
            (Tuner::Bool(t), TunerValue::Bool(v)) => {
                t.current = v;
                true
            }
            _ => false,
        }
    }
}
