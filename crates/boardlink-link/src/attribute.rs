//! Declarative configuration attributes.
//!
//! Every link configuration type publishes an [`AttributeTable`]: one
//! [`AttributeDescriptor`] per attribute with its name, kind, description and
//! plain function pointers reading and writing the field. Tables are built
//! once when a factory is registered and drive URI binding, validation and
//! introspection without knowing the concrete configuration type.
//!
//! # Example
//!
//! ```
//! use boardlink_link::{AttributeDescriptor, AttributeTable, AttributeValue};
//!
//! #[derive(Default)]
//! struct Config {
//!     speed: u32,
//! }
//!
//! let table = AttributeTable::new().with(AttributeDescriptor::int(
//!     "speed",
//!     |c: &Config| Some(AttributeValue::Int(i64::from(c.speed))),
//!     |c: &mut Config, v| {
//!         c.speed = v.to_int("speed")?;
//!         Ok(())
//!     },
//! ));
//!
//! let mut config = Config::default();
//! table.set_from_str(&mut config, "test", "speed", "9600").unwrap();
//! assert_eq!(config.speed, 9600);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use boardlink_core::{Error, Result};

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    String,
    Int,
    Bool,
    /// One of a set of names; the set may be computed on demand.
    Enum,
}

impl AttributeKind {
    fn expected(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "integer",
            Self::Bool => "true or false",
            Self::Enum => "one of the declared choices",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
    Enum(String),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::String(_) => AttributeKind::String,
            Self::Int(_) => AttributeKind::Int,
            Self::Bool(_) => AttributeKind::Bool,
            Self::Enum(_) => AttributeKind::Enum,
        }
    }

    /// The textual content of a string or enum value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert an integer value into a narrower type, naming `attribute` on failure.
    pub fn to_int<T: TryFrom<i64>>(&self, attribute: &str) -> Result<T> {
        let n = self
            .as_int()
            .ok_or_else(|| Error::invalid_value(attribute, self.to_string(), "integer"))?;
        T::try_from(n).map_err(|_| {
            Error::invalid_value(attribute, n.to_string(), "integer in range")
        })
    }

    pub fn into_string(self) -> String {
        match self {
            Self::String(s) | Self::Enum(s) => s,
            other => other.to_string(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::String(s) | Self::Enum(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Reads the attribute; `None` when it has no value yet.
pub type Getter<C> = fn(&C) -> Option<AttributeValue>;

/// Writes an already typed value.
pub type Setter<C> = fn(&mut C, AttributeValue) -> Result<()>;

/// Computes the currently valid choices.
pub type ChoiceProvider<C> = fn(&C) -> Vec<String>;

/// Description of one attribute of configuration type `C`.
pub struct AttributeDescriptor<C> {
    name: &'static str,
    kind: AttributeKind,
    description: &'static str,
    required: bool,
    get: Getter<C>,
    set: Setter<C>,
    choices: Option<ChoiceProvider<C>>,
}

impl<C> AttributeDescriptor<C> {
    pub fn new(name: &'static str, kind: AttributeKind, get: Getter<C>, set: Setter<C>) -> Self {
        Self {
            name,
            kind,
            description: "",
            required: false,
            get,
            set,
            choices: None,
        }
    }

    pub fn string(name: &'static str, get: Getter<C>, set: Setter<C>) -> Self {
        Self::new(name, AttributeKind::String, get, set)
    }

    pub fn int(name: &'static str, get: Getter<C>, set: Setter<C>) -> Self {
        Self::new(name, AttributeKind::Int, get, set)
    }

    pub fn bool(name: &'static str, get: Getter<C>, set: Setter<C>) -> Self {
        Self::new(name, AttributeKind::Bool, get, set)
    }

    pub fn enumeration(
        name: &'static str,
        get: Getter<C>,
        set: Setter<C>,
        choices: ChoiceProvider<C>,
    ) -> Self {
        Self::new(name, AttributeKind::Enum, get, set).with_choices(choices)
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach suggested values. Only enum attributes reject values outside them.
    pub fn with_choices(mut self, choices: ChoiceProvider<C>) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn value(&self, config: &C) -> Option<AttributeValue> {
        (self.get)(config)
    }

    pub fn choices(&self, config: &C) -> Option<Vec<String>> {
        self.choices.map(|provider| provider(config))
    }

    /// Convert the textual form of a value to this attribute's kind.
    pub fn parse(&self, config: &C, raw: &str) -> Result<AttributeValue> {
        let invalid = || Error::invalid_value(self.name, raw, self.kind.expected());
        let value = match self.kind {
            AttributeKind::String => AttributeValue::String(raw.to_string()),
            AttributeKind::Int => {
                AttributeValue::Int(raw.trim().parse().map_err(|_| invalid())?)
            }
            AttributeKind::Bool => {
                let raw = raw.trim();
                if raw.eq_ignore_ascii_case("true") {
                    AttributeValue::Bool(true)
                } else if raw.eq_ignore_ascii_case("false") {
                    AttributeValue::Bool(false)
                } else {
                    return Err(invalid());
                }
            }
            AttributeKind::Enum => AttributeValue::Enum(raw.to_string()),
        };
        self.check(config, &value)?;
        Ok(value)
    }

    /// Validate a typed value against the kind and the current choices.
    fn check(&self, config: &C, value: &AttributeValue) -> Result<()> {
        if value.kind() != self.kind {
            return Err(Error::invalid_value(
                self.name,
                value.to_string(),
                self.kind.expected(),
            ));
        }

        if self.kind == AttributeKind::Enum
            && let Some(choices) = self.choices(config)
        {
            let text = value.as_str().unwrap_or_default();
            if !choices.iter().any(|choice| choice == text) {
                return Err(Error::invalid_value(
                    self.name,
                    text,
                    format!("one of [{}]", choices.join(", ")),
                ));
            }
        }
        Ok(())
    }

    fn info(&self, config: &C) -> AttributeInfo {
        AttributeInfo {
            name: self.name.to_string(),
            kind: self.kind,
            value: self.value(config),
            description: self.description.to_string(),
            required: self.required,
            choices: self.choices(config),
        }
    }
}

impl<C> fmt::Debug for AttributeDescriptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Snapshot of one attribute of a bound configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    pub kind: AttributeKind,
    pub value: Option<AttributeValue>,
    pub description: String,
    pub required: bool,
    /// Valid values computed at the time of the call.
    pub choices: Option<Vec<String>>,
}

/// Ordered attribute descriptors of configuration type `C`.
#[derive(Debug)]
pub struct AttributeTable<C> {
    descriptors: Vec<AttributeDescriptor<C>>,
}

impl<C> AttributeTable<C> {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn with(mut self, descriptor: AttributeDescriptor<C>) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDescriptor<C>> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.descriptors.iter().map(|d| d.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDescriptor<C>> {
        self.descriptors.iter()
    }

    fn lookup(&self, factory: &str, name: &str) -> Result<&AttributeDescriptor<C>> {
        self.get(name).ok_or_else(|| Error::UnknownAttribute {
            factory: factory.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse `raw` for attribute `name` and store it in `config`.
    pub fn set_from_str(&self, config: &mut C, factory: &str, name: &str, raw: &str) -> Result<()> {
        let descriptor = self.lookup(factory, name)?;
        let value = descriptor.parse(config, raw)?;
        (descriptor.set)(config, value)
    }

    /// Store a typed value after checking its kind and choices.
    pub fn set_value(
        &self,
        config: &mut C,
        factory: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<()> {
        let descriptor = self.lookup(factory, name)?;
        descriptor.check(config, &value)?;
        (descriptor.set)(config, value)
    }

    pub fn info(&self, config: &C, factory: &str, name: &str) -> Result<AttributeInfo> {
        Ok(self.lookup(factory, name)?.info(config))
    }

    /// Fail with the first required attribute that has no value.
    pub fn check_required(&self, config: &C, factory: &str) -> Result<()> {
        match self
            .descriptors
            .iter()
            .find(|d| d.required && d.value(config).is_none())
        {
            Some(missing) => Err(Error::MissingAttribute {
                factory: factory.to_string(),
                name: missing.name.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl<C> Default for AttributeTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
