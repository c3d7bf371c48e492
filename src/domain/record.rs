use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// One yearly observation for a category, e.g. `{ "year": 2020, "male": 120, "female": 100 }`.
///
/// Serialized flat. `year` may be absent on input; such records are dropped when a
/// dataset is prepared. Field values that are missing, non-finite or non-numeric are
/// read as `0`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "RawRecord")]
pub struct TimeSeriesRecord {
    pub year: Option<i32>,
    pub values: BTreeMap<String, f64>,
}

impl TimeSeriesRecord {
    pub fn new<K, I>(year: i32, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, f64)>,
    {
        Self {
            year: Some(year),
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Value of `field`, coerced to a finite number (0 when missing or invalid)
    pub fn value(&self, field: &str) -> f64 {
        self.values
            .get(field)
            .copied()
            .map(clamp_number)
            .unwrap_or(0.0)
    }
}

impl Serialize for TimeSeriesRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.values.len() + usize::from(self.year.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(year) = self.year {
            map.serialize_entry("year", &year)?;
        }
        for (field, value) in &self.values {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    year: Option<Value>,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl From<RawRecord> for TimeSeriesRecord {
    fn from(raw: RawRecord) -> Self {
        Self {
            year: raw.year.as_ref().and_then(coerce_year),
            values: raw
                .fields
                .iter()
                .filter(|(key, _)| key.as_str() != "id")
                .map(|(key, value)| (key.clone(), coerce_number(value)))
                .collect(),
        }
    }
}

/// Replace NaN and infinities with 0
pub fn clamp_number(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Read a JSON value as a count. Numeric strings are parsed, everything else is 0.
pub fn coerce_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().map(clamp_number).unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().map(clamp_number).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Read a JSON value as a calendar year
pub fn coerce_year(value: &Value) -> Option<i32> {
    let year = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !year.is_finite() || year.fract() != 0.0 {
        return None;
    }
    i32::try_from(year as i64).ok()
}

/// One denormalized future prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub year: i32,
    pub values: BTreeMap<String, f64>,
}

/// Actual vs. predicted values for one in-sample year, in natural units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub year: i32,
    pub actual: BTreeMap<String, f64>,
    pub predicted: BTreeMap<String, f64>,
}
