use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value that starts scalar and becomes a list on its second occurrence.
///
/// Serializes as the bare value, as an array once promoted, and should be
/// skipped entirely while empty (`skip_serializing_if = "Field::is_empty"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field<T> {
    Empty,
    One(T),
    Many(Vec<T>),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T> Field<T> {
    pub fn push(&mut self, value: T) {
        *self = match std::mem::take(self) {
            Self::Empty => Self::One(value),
            Self::One(first) => Self::Many(vec![first, value]),
            Self::Many(mut values) => {
                values.push(value);
                Self::Many(values)
            }
        };
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::One(_) => false,
            Self::Many(values) => values.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::One(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::Empty => <&[T]>::default().iter(),
            Self::One(value) => std::slice::from_ref(value).iter(),
            Self::Many(values) => values.iter(),
        }
    }
}

/// Pushes `value` into the field stored under `key`, promoting as needed.
pub fn promote<T>(map: &mut BTreeMap<String, Field<T>>, key: &str, value: T) {
    map.entry(key.to_string()).or_default().push(value);
}
