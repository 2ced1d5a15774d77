//! # race-types
//!
//! Shared UWB range-packet structures for the race control suite.
//!
//! These types are used by:
//! - `backend`: decoding datagrams from tags on the ingress port
//! - `tag-simulator`: producing the same datagrams for development without
//!   hardware
//!
//! ## Wire format
//!
//! One JSON object per UDP datagram:
//!
//! ```json
//! { "id": 0, "range": [120, 310, 0, 415], "rssi": [-62, -71, 0, -80] }
//! ```
//!
//! - `range[i]` is the measured distance to anchor `i` in centimetres; a
//!   value ≤ 0 means "no reading this frame".
//! - `rssi[i]` is the received signal strength in dBm; 0 (or a missing
//!   entry) means the radio did not report one.
//! - Unknown fields are tolerated and ignored by the decoder.

use serde::{Deserialize, Serialize};

/// One frame of per-anchor range measurements from a tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangePacket {
    /// Tag id, 0-based.
    pub id: i64,
    /// Distances to each anchor, cm. Non-positive = no reading.
    pub range: Vec<f64>,
    /// Signal strength per anchor, dBm. Missing entries default to 0.
    #[serde(default)]
    pub rssi: Vec<f64>,
    /// Optional fix-quality hint from the tag firmware; the solver computes
    /// its own and this value is informational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Optional anchor-count hint from the tag firmware.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchors: Option<i64>,
}

impl RangePacket {
    pub fn new(id: i64, range: Vec<f64>, rssi: Vec<f64>) -> Self {
        Self {
            id,
            range,
            rssi,
            quality: None,
            anchors: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_packet() {
        let pkt: RangePacket =
            serde_json::from_str(r#"{"id":2,"range":[120,310,0,415]}"#).unwrap();
        assert_eq!(pkt.id, 2);
        assert_eq!(pkt.range, vec![120.0, 310.0, 0.0, 415.0]);
        assert!(pkt.rssi.is_empty());
    }

    #[test]
    fn tolerates_unknown_fields_and_integer_rssi() {
        let pkt: RangePacket = serde_json::from_str(
            r#"{"id":0,"range":[100,100,100,100],"rssi":[-62,-71,0,-80],"fw":"1.4.2","seq":991}"#,
        )
        .unwrap();
        assert_eq!(pkt.rssi, vec![-62.0, -71.0, 0.0, -80.0]);
    }

    #[test]
    fn rejects_missing_required_fields() {
        assert!(serde_json::from_str::<RangePacket>(r#"{"id":1}"#).is_err());
        assert!(serde_json::from_str::<RangePacket>(r#"{"range":[1,2,3,4]}"#).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let pkt = RangePacket::new(3, vec![50.0, 60.0, 70.0, 80.0], vec![-65.0; 4]);
        let text = serde_json::to_string(&pkt).unwrap();
        let back: RangePacket = serde_json::from_str(&text).unwrap();
        assert_eq!(back.id, 3);
        assert_eq!(back.range, pkt.range);
    }
}
