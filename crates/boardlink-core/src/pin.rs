use serde::{Deserialize, Serialize};
use std::fmt;

/// A board pin, identified by kind and number.
///
/// Pins are used as map keys wherever pin state or pin listeners are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pin {
    Analog(u8),
    Digital(u8),
}

impl Pin {
    #[must_use]
    pub fn analog(number: u8) -> Self {
        Self::Analog(number)
    }

    #[must_use]
    pub fn digital(number: u8) -> Self {
        Self::Digital(number)
    }

    /// Pin number without its kind.
    #[must_use]
    pub fn number(&self) -> u8 {
        match self {
            Self::Analog(n) | Self::Digital(n) => *n,
        }
    }

    #[must_use]
    pub fn is_analog(&self) -> bool {
        matches!(self, Self::Analog(_))
    }

    #[must_use]
    pub fn is_digital(&self) -> bool {
        matches!(self, Self::Digital(_))
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Analog(n) => write!(f, "A{n}"),
            Self::Digital(n) => write!(f, "D{n}"),
        }
    }
}

/// The state of one pin: the pin kind decides the value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinState {
    Analog { pin: u8, value: u16 },
    Digital { pin: u8, value: bool },
}

impl PinState {
    #[must_use]
    pub fn analog(pin: u8, value: u16) -> Self {
        Self::Analog { pin, value }
    }

    #[must_use]
    pub fn digital(pin: u8, value: bool) -> Self {
        Self::Digital { pin, value }
    }

    #[must_use]
    pub fn pin(&self) -> Pin {
        match self {
            Self::Analog { pin, .. } => Pin::Analog(*pin),
            Self::Digital { pin, .. } => Pin::Digital(*pin),
        }
    }

    /// The value as an integer; digital pins report 0 or 1.
    #[must_use]
    pub fn raw_value(&self) -> u16 {
        match self {
            Self::Analog { value, .. } => *value,
            Self::Digital { value, .. } => u16::from(*value),
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.pin(), self.raw_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[rstest]
    #[case(Pin::analog(3), "A3")]
    #[case(Pin::digital(13), "D13")]
    fn test_pin_display(#[case] pin: Pin, #[case] expected: &str) {
        assert_eq!(pin.to_string(), expected);
    }

    #[test]
    fn test_pin_equality_uses_kind_and_number() {
        assert_eq!(Pin::digital(5), Pin::Digital(5));
        assert_ne!(Pin::digital(5), Pin::analog(5));
        assert_eq!(Pin::analog(5).number(), Pin::digital(5).number());
    }

    #[test]
    fn test_pin_as_map_key() {
        let mut counts = HashMap::new();
        *counts.entry(Pin::digital(2)).or_insert(0) += 1;
        *counts.entry(Pin::digital(2)).or_insert(0) += 1;
        *counts.entry(Pin::analog(2)).or_insert(0) += 1;

        assert_eq!(counts[&Pin::digital(2)], 2);
        assert_eq!(counts[&Pin::analog(2)], 1);
    }

    #[test]
    fn test_pin_state_pin_and_value() {
        let analog = PinState::analog(1, 512);
        assert_eq!(analog.pin(), Pin::analog(1));
        assert_eq!(analog.raw_value(), 512);

        let digital = PinState::digital(13, true);
        assert_eq!(digital.pin(), Pin::digital(13));
        assert_eq!(digital.raw_value(), 1);
        assert_eq!(digital.to_string(), "D13=1");
    }

    #[test]
    fn test_pin_serde() {
        let json = serde_json::to_string(&Pin::digital(7)).unwrap();
        let pin: Pin = serde_json::from_str(&json).unwrap();
        assert_eq!(pin, Pin::digital(7));
    }
}
