pub mod account;
pub mod challenge;
pub mod daily_stat;
pub mod import;
pub mod trade;

pub use account::*;
pub use challenge::*;
pub use daily_stat::*;
pub use import::*;
pub use trade::*;

/// `Option<Option<T>>` for partial updates: a missing field is `None`,
/// an explicit `null` is `Some(None)`.
pub(crate) mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(
        value: &Option<Option<T>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<T>>, D::Error> {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
