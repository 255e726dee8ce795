// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Tri-state boolean used by mergeable configuration blocks
//!
//! A plain `bool` cannot tell "explicitly false" apart from "not given", so
//! any boolean that a service may override is a [`ConfigFlag`] instead. In
//! the configuration file the states are written as `0` (unset), `1`
//! (false) and `2` (true); JSON booleans and `null` are accepted as well.

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFlag {
    #[default]
    Unset,
    False,
    True,
}

impl ConfigFlag {
    /// True only when the flag was explicitly set to true
    pub fn is_true(self) -> bool {
        self == ConfigFlag::True
    }

    pub fn is_unset(self) -> bool {
        self == ConfigFlag::Unset
    }

    fn as_u8(self) -> u8 {
        match self {
            ConfigFlag::Unset => 0,
            ConfigFlag::False => 1,
            ConfigFlag::True => 2,
        }
    }
}

impl From<bool> for ConfigFlag {
    fn from(value: bool) -> Self {
        if value {
            ConfigFlag::True
        } else {
            ConfigFlag::False
        }
    }
}

impl TryFrom<u64> for ConfigFlag {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConfigFlag::Unset),
            1 => Ok(ConfigFlag::False),
            2 => Ok(ConfigFlag::True),
            other => Err(format!("invalid config flag value {other}")),
        }
    }
}

impl fmt::Display for ConfigFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFlag::Unset => write!(f, "unset"),
            ConfigFlag::False => write!(f, "false"),
            ConfigFlag::True => write!(f, "true"),
        }
    }
}

impl Serialize for ConfigFlag {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

struct ConfigFlagVisitor;

impl<'de> Visitor<'de> for ConfigFlagVisitor {
    type Value = ConfigFlag;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("0 (unset), 1 (false), 2 (true) or a boolean")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<ConfigFlag, E> {
        Ok(ConfigFlag::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ConfigFlag, E> {
        ConfigFlag::try_from(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ConfigFlag, E> {
        let v = u64::try_from(v).map_err(|_| {
            E::custom(format!("invalid config flag value {v}"))
        })?;
        self.visit_u64(v)
    }

    fn visit_unit<E: de::Error>(self) -> Result<ConfigFlag, E> {
        Ok(ConfigFlag::Unset)
    }
}

impl<'de> Deserialize<'de> for ConfigFlag {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ConfigFlagVisitor)
    }
}
