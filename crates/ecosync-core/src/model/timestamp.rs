// ── Lenient timestamp (de)serialization ──
//
// Document stores hand timestamps back in several shapes depending on
// who wrote them: RFC 3339 strings, epoch milliseconds, or
// `{seconds, nanoseconds}` objects. All of them decode to
// `Option<DateTime<Utc>>`; unparseable values decode to `None` rather
// than failing the whole document. Serialization is always RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
    Float(f64),
    Parts {
        #[serde(alias = "_seconds")]
        seconds: i64,
        #[serde(default, alias = "_nanoseconds", alias = "nanos")]
        nanoseconds: u32,
    },
}

impl RawTimestamp {
    fn into_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(s) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Millis(ms) => DateTime::from_timestamp_millis(ms),
            #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
            Self::Float(ms) => DateTime::from_timestamp_millis(ms as i64),
            Self::Parts {
                seconds,
                nanoseconds,
            } => DateTime::from_timestamp(seconds, nanoseconds),
        }
    }
}

pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, ser: S) -> Result<S::Ok, S::Error> {
    value.map(|dt| dt.to_rfc3339()).serialize(ser)
}

pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(de)?;
    Ok(raw
        .and_then(|v| serde_json::from_value::<RawTimestamp>(v).ok())
        .and_then(RawTimestamp::into_datetime))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Doc {
        #[serde(default, with = "super")]
        at: Option<chrono::DateTime<chrono::Utc>>,
    }

    fn decode(raw: serde_json::Value) -> Option<chrono::DateTime<chrono::Utc>> {
        serde_json::from_value::<Doc>(raw).unwrap().at
    }

    #[test]
    fn accepts_every_known_shape() {
        let expected = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(decode(serde_json::json!({ "at": "2024-03-01T12:00:00Z" })), Some(expected));
        assert_eq!(decode(serde_json::json!({ "at": 1_709_294_400_000_i64 })), Some(expected));
        assert_eq!(
            decode(serde_json::json!({ "at": { "seconds": 1_709_294_400, "nanoseconds": 0 } })),
            Some(expected)
        );
        assert_eq!(
            decode(serde_json::json!({ "at": { "_seconds": 1_709_294_400, "_nanoseconds": 0 } })),
            Some(expected)
        );
    }

    #[test]
    fn garbage_and_missing_decode_to_none() {
        assert_eq!(decode(serde_json::json!({ "at": "yesterday-ish" })), None);
        assert_eq!(decode(serde_json::json!({ "at": null })), None);
        assert_eq!(decode(serde_json::json!({})), None);
    }
}
