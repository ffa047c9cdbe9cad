use serde::{Deserialize, Serialize};

/// The marketplace an order originates from.
///
/// Native orders settle directly at the exchange. Seaport orders settle at
/// the respective Seaport deployment and reach the exchange through the
/// broker path, which fulfills them with an external call inside the same
/// transaction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum OrderSource {
    #[serde(rename = "native")]
    #[strum(serialize = "native")]
    Native,
    #[serde(rename = "seaport-v1.0")]
    #[strum(serialize = "seaport-v1.0")]
    SeaportV1_0,
    #[serde(rename = "seaport-v1.4")]
    #[strum(serialize = "seaport-v1.4")]
    SeaportV1_4,
    #[serde(rename = "seaport-v1.5")]
    #[strum(serialize = "seaport-v1.5")]
    SeaportV1_5,
}

impl OrderSource {
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for (source, name) in [
            (OrderSource::Native, "\"native\""),
            (OrderSource::SeaportV1_0, "\"seaport-v1.0\""),
            (OrderSource::SeaportV1_4, "\"seaport-v1.4\""),
            (OrderSource::SeaportV1_5, "\"seaport-v1.5\""),
        ] {
            assert_eq!(serde_json::to_string(&source).unwrap(), name);
            assert_eq!(
                serde_json::from_str::<OrderSource>(name).unwrap(),
                source
            );
        }
    }
}
