use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend-assigned primary key. Serial tables send numbers, uuid-keyed tables send strings;
/// either is kept as received so it round-trips into filters and inserts unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowKey::Int(n) => Some(*n),
            RowKey::Text(_) => None,
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(n) => write!(f, "{n}"),
            RowKey::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub RowKey);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(RowKey::Int(value))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(RowKey::Text(value.to_string()))
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(MessageId);
id_newtype!(ImageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOrder {
    OldestFirst,
    NewestFirst,
}

impl FeedOrder {
    pub fn ascending(self) -> bool {
        matches!(self, FeedOrder::OldestFirst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numeric_and_uuid_keys() {
        let serial: UserId = serde_json::from_value(serde_json::json!(7)).expect("number");
        assert_eq!(serial, UserId::from(7));
        assert_eq!(serial.to_string(), "7");

        let uuid = "6f1c2a9e-1b7a-4a51-9d3e-3f3c2b1a0e11";
        let keyed: MessageId = serde_json::from_value(serde_json::json!(uuid)).expect("string");
        assert_eq!(keyed, MessageId::from(uuid));
        assert_eq!(keyed.to_string(), uuid);
        assert_eq!(serde_json::to_value(&keyed).expect("json"), serde_json::json!(uuid));
        assert_eq!(serde_json::to_value(UserId::from(3)).expect("json"), serde_json::json!(3));
    }
}
