//! Decimal-string serde boundary for chain-scale integers.
//!
//! Every `U256`, `I256`, and `u128` that leaves the process (report,
//! NDJSON rows) goes through this module so large values never become
//! JSON number literals.
//!
//! ```ignore
//! #[derive(Serialize)]
//! struct Row {
//!     #[serde(with = "tally_core::decimal")]
//!     balance: U256,
//! }
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use std::fmt::Display;
use std::str::FromStr;

pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    serializer.collect_str(value)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr,
    T::Err: Display,
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<T>().map_err(D::Error::custom)
}

/// Same convention for optional values (`None` stays `null`).
pub mod option {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| s.parse::<T>().map_err(D::Error::custom))
            .transpose()
    }
}

/// Maps whose values are chain-scale integers (e.g. an expected-state
/// snapshot). Keys serialize as themselves.
pub mod map {
    use super::*;
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(value: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: serde::Serialize,
        V: Display,
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(value.len()))?;
        for (k, v) in value {
            map.serialize_entry(k, &v.to_string())?;
        }
        map.end()
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: FromStr,
        V::Err: Display,
        D: Deserializer<'de>,
    {
        BTreeMap::<K, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(k, v)| v.parse::<V>().map(|v| (k, v)).map_err(D::Error::custom))
            .collect()
    }
}
