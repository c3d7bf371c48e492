//! Raw document aggregation
//!
//! Database collections hold one document per upload row, so a year can appear many
//! times. These helpers fold them into one [`TimeSeriesRecord`] per year.

use serde_json::Value;
use std::collections::BTreeMap;

use super::record::{coerce_number, coerce_year};
use super::{Category, TimeSeriesRecord};

/// Sum raw documents into one record per year, ascending.
///
/// Documents without a usable year are skipped. For [`Category::Sex`] a document may
/// carry either `male`/`female` counts or a `{ "sex": "Male", "count": 12 }` pair.
pub fn aggregate_documents(category: Category, documents: &[Value]) -> Vec<TimeSeriesRecord> {
    let fields = category.field_keys();
    let mut grouped: BTreeMap<i32, BTreeMap<String, f64>> = BTreeMap::new();

    for doc in documents {
        let Some(year) = doc.get("year").and_then(coerce_year) else {
            continue;
        };
        let totals = grouped
            .entry(year)
            .or_insert_with(|| fields.iter().map(|f| (f.clone(), 0.0)).collect());

        match category {
            Category::Sex => add_sex_document(doc, totals),
            Category::CivilStatus => {
                for field in &fields {
                    if let Some(value) = doc.get(field) {
                        *totals.entry(field.clone()).or_default() += coerce_number(value);
                    }
                }
            }
        }
    }

    grouped
        .into_iter()
        .map(|(year, values)| TimeSeriesRecord {
            year: Some(year),
            values,
        })
        .collect()
}

fn add_sex_document(doc: &Value, totals: &mut BTreeMap<String, f64>) {
    let male = doc.get("male");
    let female = doc.get("female");
    if male.map_or(false, Value::is_number) || female.map_or(false, Value::is_number) {
        *totals.entry("male".to_string()).or_default() += male.map_or(0.0, coerce_number);
        *totals.entry("female".to_string()).or_default() += female.map_or(0.0, coerce_number);
        return;
    }

    let Some(sex) = doc.get("sex").and_then(Value::as_str) else {
        return;
    };
    let count = doc.get("count").map_or(0.0, coerce_number);
    match sex.to_lowercase().as_str() {
        "male" => *totals.entry("male".to_string()).or_default() += count,
        "female" => *totals.entry("female".to_string()).or_default() += count,
        _ => {}
    }
}
