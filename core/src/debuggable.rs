use std::borrow::Cow;

use crate::types::{Byte, Word};

#[macro_export]
macro_rules! dbgprop_header {
    ($name:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Header)
    };
}

#[macro_export]
macro_rules! dbgprop_bool {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Boolean($val))
    };
}

#[macro_export]
macro_rules! dbgprop_byte {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Byte($val))
    };
}

#[macro_export]
macro_rules! dbgprop_byte_bin {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::ByteBinary($val))
    };
}

#[macro_export]
macro_rules! dbgprop_word {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Word($val))
    };
}

#[macro_export]
macro_rules! dbgprop_udec {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new(
            $name,
            DebuggablePropertyValue::UnsignedDecimal(u64::try_from($val).unwrap_or(u64::MAX)),
        )
    };
}

#[macro_export]
macro_rules! dbgprop_enum {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new(
            $name,
            DebuggablePropertyValue::StaticStr($val.clone().into()),
        )
    };
}

#[macro_export]
macro_rules! dbgprop_string {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::String($val))
    };
}

#[macro_export]
macro_rules! dbgprop_nest {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new(
            $name,
            DebuggablePropertyValue::Nested($val.get_debug_properties()),
        )
    };
}

#[macro_export]
macro_rules! dbgprop_group {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Nested($val))
    };
}

pub type DebuggableProperties = Vec<DebuggableProperty>;

pub struct DebuggableProperty {
    name: Cow<'static, str>,
    value: DebuggablePropertyValue,
}

impl DebuggableProperty {
    pub fn new(name: impl Into<Cow<'static, str>>, value: DebuggablePropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &DebuggablePropertyValue {
        &self.value
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DebuggablePropertyValue {
    Header,
    Nested(DebuggableProperties),
    Boolean(bool),
    Byte(Byte),
    ByteBinary(Byte),
    Word(Word),
    UnsignedDecimal(u64),
    StaticStr(&'static str),
    String(String),
}

impl std::fmt::Debug for DebuggableProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {:?}", self.name, self.value)
    }
}

impl PartialEq for DebuggableProperty {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}

impl Eq for DebuggableProperty {}

/// Looks up a property by path of names, descending into nested groups
pub fn find_property<'a>(
    props: &'a [DebuggableProperty],
    path: &[&str],
) -> Option<&'a DebuggablePropertyValue> {
    let (first, rest) = path.split_first()?;
    let prop = props.iter().find(|p| p.name() == *first)?;
    if rest.is_empty() {
        return Some(prop.value());
    }
    match prop.value() {
        DebuggablePropertyValue::Nested(inner) => find_property(inner, rest),
        _ => None,
    }
}

pub trait Debuggable {
    fn get_debug_properties(&self) -> DebuggableProperties;
}
