//! Metadata persisted next to the record data

use serde::{Deserialize, Serialize};

use crate::record::{Field, RecordKind};

/// Written once per digitizer, when its first unit is stored
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DigitizerAttributes {
    /// `RecordKind::code` of every unit below this digitizer
    pub data_type: u16,
    pub kind: RecordKind,
    pub element_size: usize,
    pub layout: Vec<Field>,
}

impl DigitizerAttributes {
    pub fn new(kind: RecordKind, element_size: usize) -> Self {
        DigitizerAttributes {
            data_type: kind.code(),
            kind,
            element_size,
            layout: kind.layout(kind.samples(element_size)),
        }
    }
}

/// Written with every unit of records
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitAttributes {
    pub global_timestamp: u64,
    pub elements: usize,
    pub element_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_names() {
        let u = UnitAttributes { global_timestamp: 42, elements: 3, element_size: 8 };
        let s = serde_json::to_string(&u).unwrap();
        assert_eq!(r#"{"globalTimestamp":42,"elements":3,"elementSize":8}"#, s);

        let d = DigitizerAttributes::new(RecordKind::Waveform, 30 + 2 * 16);
        assert_eq!(3, d.data_type);
        assert_eq!(Some(16), d.layout.last().map(|f| f.count));
        let v: serde_json::Value = serde_json::to_value(&d).unwrap();
        assert_eq!(Some("u64"), v["layout"][0]["type"].as_str());
        assert_eq!(Some("Waveform"), v["kind"].as_str());
    }
}
