pub mod aggregate;
pub mod category;
pub mod record;

pub use aggregate::aggregate_documents;
pub use category::{Category, CategorySpec, FieldSpec};
pub use record::{ChartPoint, ForecastPoint, TimeSeriesRecord};
