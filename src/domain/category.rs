//! Forecast categories
//!
//! Each category maps to a fixed list of count fields, their display labels, the
//! source collection in the database and a sample series used when no records have
//! been loaded yet. Lookups go through [`Category::spec`] instead of string matching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator};

use super::TimeSeriesRecord;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, EnumString, AsRefStr,
)]
pub enum Category {
    #[serde(rename = "sex")]
    #[strum(serialize = "sex")]
    Sex,
    #[serde(rename = "civilStatus")]
    #[strum(serialize = "civilStatus")]
    CivilStatus,
}

impl Default for Category {
    fn default() -> Self {
        Self::Sex
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.spec().label)
    }
}

/// A count field of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct CategorySpec {
    pub label: &'static str,
    pub collection: &'static str,
    pub fields: &'static [FieldSpec],
}

const SEX_FIELDS: &[FieldSpec] = &[
    FieldSpec { key: "male", label: "Male" },
    FieldSpec { key: "female", label: "Female" },
];

const CIVIL_STATUS_FIELDS: &[FieldSpec] = &[
    FieldSpec { key: "single", label: "Single" },
    FieldSpec { key: "married", label: "Married" },
    FieldSpec { key: "widower", label: "Widower" },
    FieldSpec { key: "separated", label: "Separated" },
    FieldSpec { key: "divorced", label: "Divorced" },
    FieldSpec { key: "notReported", label: "Not Reported" },
];

const SEX: CategorySpec = CategorySpec {
    label: "Sex",
    collection: "sex",
    fields: SEX_FIELDS,
};

const CIVIL_STATUS: CategorySpec = CategorySpec {
    label: "Civil Status",
    collection: "civilStatus",
    fields: CIVIL_STATUS_FIELDS,
};

// Sample yearly totals shown before any records are loaded.
const SEX_SAMPLE: &[(i32, [f64; 2])] = &[
    (2014, [84_512.0, 92_731.0]),
    (2015, [86_940.0, 95_102.0]),
    (2016, [88_205.0, 97_866.0]),
    (2017, [90_311.0, 99_430.0]),
    (2018, [91_874.0, 101_257.0]),
    (2019, [93_602.0, 103_980.0]),
    (2020, [61_208.0, 70_114.0]),
    (2021, [72_445.0, 80_309.0]),
    (2022, [88_917.0, 96_543.0]),
];

const CIVIL_STATUS_SAMPLE: &[(i32, [f64; 6])] = &[
    (2014, [95_210.0, 73_402.0, 2_310.0, 1_877.0, 641.0, 3_803.0]),
    (2015, [97_884.0, 75_016.0, 2_352.0, 1_902.0, 672.0, 4_216.0]),
    (2016, [100_137.0, 76_893.0, 2_401.0, 1_955.0, 703.0, 3_982.0]),
    (2017, [102_560.0, 78_245.0, 2_436.0, 1_988.0, 731.0, 3_781.0]),
    (2018, [104_322.0, 79_870.0, 2_478.0, 2_031.0, 764.0, 3_666.0]),
    (2019, [106_955.0, 81_302.0, 2_512.0, 2_074.0, 790.0, 3_949.0]),
    (2020, [70_118.0, 54_877.0, 1_703.0, 1_390.0, 512.0, 2_722.0]),
    (2021, [81_540.0, 63_211.0, 1_966.0, 1_604.0, 597.0, 2_836.0]),
    (2022, [97_306.0, 78_120.0, 2_288.0, 1_912.0, 701.0, 2_133.0]),
];

impl Category {
    pub fn spec(&self) -> &'static CategorySpec {
        match self {
            Self::Sex => &SEX,
            Self::CivilStatus => &CIVIL_STATUS,
        }
    }

    /// Wire key (`"sex"`, `"civilStatus"`)
    pub fn key(&self) -> &'static str {
        match self {
            Self::Sex => "sex",
            Self::CivilStatus => "civilStatus",
        }
    }

    pub fn label(&self) -> &'static str {
        self.spec().label
    }

    pub fn field_keys(&self) -> Vec<String> {
        self.spec().fields.iter().map(|f| f.key.to_string()).collect()
    }

    pub fn field_labels(&self) -> BTreeMap<String, String> {
        self.spec()
            .fields
            .iter()
            .map(|f| (f.key.to_string(), f.label.to_string()))
            .collect()
    }

    pub fn fallback_series(&self) -> Vec<TimeSeriesRecord> {
        match self {
            Self::Sex => sample_series(SEX_FIELDS, SEX_SAMPLE),
            Self::CivilStatus => sample_series(CIVIL_STATUS_FIELDS, CIVIL_STATUS_SAMPLE),
        }
    }

    pub fn all() -> Vec<Category> {
        Self::iter().collect()
    }
}

fn sample_series<const N: usize>(
    fields: &[FieldSpec],
    rows: &[(i32, [f64; N])],
) -> Vec<TimeSeriesRecord> {
    rows.iter()
        .map(|(year, values)| {
            TimeSeriesRecord::new(*year, fields.iter().map(|f| f.key).zip(values.iter().copied()))
        })
        .collect()
}
