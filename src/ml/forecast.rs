//! Iterative multi-step forecasting
//!
//! The forecaster seeds a window with the last `lookback` normalized records, then at
//! every step predicts one year ahead, denormalizes it for output and slides the
//! re-normalized prediction back into the window. Predictions are fed back, so errors
//! compound over the horizon.

use ndarray::{s, Array1, Array2, ArrayView2};
use std::collections::BTreeMap;

use crate::dataset::{Dataset, FieldStats};
use crate::domain::ForecastPoint;
use crate::error::{ForecastError, Result};

/// Anything that maps one normalized `lookback × fields` window to the next step
pub trait SequencePredictor {
    fn lookback(&self) -> usize;

    fn num_outputs(&self) -> usize;

    fn predict(&self, window: ArrayView2<'_, f64>) -> Result<Array1<f64>>;
}

impl<T: SequencePredictor + ?Sized> SequencePredictor for std::sync::Arc<T> {
    fn lookback(&self) -> usize {
        (**self).lookback()
    }

    fn num_outputs(&self) -> usize {
        (**self).num_outputs()
    }

    fn predict(&self, window: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        (**self).predict(window)
    }
}

/// Forecast progress
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastState {
    /// Window holds the last observed records, nothing emitted yet
    Seeded {
        window: Array2<f64>,
        last_year: i32,
        remaining: usize,
    },
    /// At least one prediction has been slid into the window
    Stepping {
        window: Array2<f64>,
        last_year: i32,
        remaining: usize,
    },
    Done,
}

impl ForecastState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

pub struct Forecaster<'a, P: SequencePredictor + ?Sized> {
    predictor: &'a P,
    fields: &'a [String],
    stats: Vec<FieldStats>,
}

impl<'a, P: SequencePredictor + ?Sized> Forecaster<'a, P> {
    pub fn new(predictor: &'a P, dataset: &'a Dataset) -> Self {
        Self {
            predictor,
            fields: &dataset.fields,
            stats: dataset.ordered_stats(),
        }
    }

    /// Seed a forecast of `periods` steps from the tail of `dataset`
    pub fn seed(&self, dataset: &Dataset, periods: usize) -> Result<ForecastState> {
        let lookback = self.predictor.lookback();
        if lookback != dataset.lookback {
            return Err(ForecastError::shape(format!(
                "model expects lookback {lookback}, dataset was prepared with {}",
                dataset.lookback
            )));
        }
        if self.predictor.num_outputs() != self.fields.len() {
            return Err(ForecastError::shape(format!(
                "model predicts {} fields, dataset has {}",
                self.predictor.num_outputs(),
                self.fields.len()
            )));
        }

        let rows = dataset.normalized.nrows();
        let last_year = match dataset.last_year() {
            Some(year) if rows >= lookback && lookback > 0 => year,
            _ => {
                return Err(ForecastError::insufficient(format!(
                    "Not enough data to forecast: need {lookback} records, have {rows}"
                )))
            }
        };

        if periods == 0 {
            return Ok(ForecastState::Done);
        }

        Ok(ForecastState::Seeded {
            window: dataset.normalized.slice(s![rows - lookback.., ..]).to_owned(),
            last_year,
            remaining: periods,
        })
    }

    /// Advance one step. Returns the emitted point, if any, and the next state.
    pub fn step(&self, state: ForecastState) -> Result<(Option<ForecastPoint>, ForecastState)> {
        let (window, last_year, remaining) = match state {
            ForecastState::Done => return Ok((None, ForecastState::Done)),
            ForecastState::Seeded {
                window,
                last_year,
                remaining,
            }
            | ForecastState::Stepping {
                window,
                last_year,
                remaining,
            } => (window, last_year, remaining),
        };
        if remaining == 0 {
            return Ok((None, ForecastState::Done));
        }

        let prediction = self.predictor.predict(window.view())?;
        if prediction.len() != self.fields.len() {
            return Err(ForecastError::shape(format!(
                "model returned {} values for {} fields",
                prediction.len(),
                self.fields.len()
            )));
        }

        let denormalized: Vec<f64> = prediction
            .iter()
            .zip(&self.stats)
            .map(|(value, stats)| stats.denormalize(*value))
            .collect();
        let year = last_year
            .checked_add(1)
            .ok_or_else(|| ForecastError::insufficient(format!("Cannot forecast past year {last_year}")))?;
        let point = ForecastPoint {
            year,
            values: self
                .fields
                .iter()
                .cloned()
                .zip(denormalized.iter().copied())
                .collect::<BTreeMap<_, _>>(),
        };

        if remaining == 1 {
            return Ok((Some(point), ForecastState::Done));
        }

        let renormalized: Array1<f64> = denormalized
            .iter()
            .zip(&self.stats)
            .map(|(value, stats)| stats.normalize(*value))
            .collect();
        let lookback = window.nrows();
        let mut next = Array2::zeros(window.raw_dim());
        next.slice_mut(s![..lookback - 1, ..])
            .assign(&window.slice(s![1.., ..]));
        next.row_mut(lookback - 1).assign(&renormalized);

        Ok((
            Some(point),
            ForecastState::Stepping {
                window: next,
                last_year: year,
                remaining: remaining - 1,
            },
        ))
    }
}

/// Forecast `periods` years past the last record of `dataset`
pub fn forecast<P: SequencePredictor + ?Sized>(
    predictor: &P,
    dataset: &Dataset,
    periods: usize,
) -> Result<Vec<ForecastPoint>> {
    let forecaster = Forecaster::new(predictor, dataset);
    let mut state = forecaster.seed(dataset, periods)?;
    let mut points = Vec::with_capacity(periods);
    while !state.is_done() {
        let (point, next) = forecaster.step(state)?;
        points.extend(point);
        state = next;
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::prepare;
    use crate::domain::TimeSeriesRecord;
    use crate::ml::lstm::{LstmNetwork, NetworkTopology};

    /// Repeats the last row plus a fixed drift
    struct Drift {
        lookback: usize,
        outputs: usize,
        delta: f64,
    }

    impl SequencePredictor for Drift {
        fn lookback(&self) -> usize {
            self.lookback
        }

        fn num_outputs(&self) -> usize {
            self.outputs
        }

        fn predict(&self, window: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
            Ok(window.row(window.nrows() - 1).mapv(|v| v + self.delta))
        }
    }

    fn fields() -> Vec<String> {
        vec!["male".to_string(), "female".to_string()]
    }

    fn dataset(lookback: usize) -> Dataset {
        let series: Vec<TimeSeriesRecord> = (0..6)
            .map(|i| TimeSeriesRecord::new(2015 + i, [("male", 2.0 * i as f64), ("female", 10.0 + i as f64)]))
            .collect();
        prepare(&series, &fields(), lookback, None)
    }

    #[test]
    fn test_predictions_are_fed_back() {
        let dataset = dataset(3);
        let drift = Drift {
            lookback: 3,
            outputs: 2,
            delta: 0.1,
        };
        let points = forecast(&drift, &dataset, 3).unwrap();

        assert_eq!(points.iter().map(|p| p.year).collect::<Vec<_>>(), vec![2021, 2022, 2023]);
        // male: min 0, range 10, last value 10; each step adds 1
        for (step, point) in points.iter().enumerate() {
            let expected = 10.0 + (step + 1) as f64;
            assert!((point.values["male"] - expected).abs() < 1e-9);
        }
        // female: min 10, range 5, last value 15; each step adds 0.5
        assert!((points[2].values["female"] - 16.5).abs() < 1e-9);
    }

    #[test]
    fn test_state_machine_transitions() {
        let dataset = dataset(2);
        let drift = Drift {
            lookback: 2,
            outputs: 2,
            delta: 0.0,
        };
        let forecaster = Forecaster::new(&drift, &dataset);

        let state = forecaster.seed(&dataset, 2).unwrap();
        assert!(matches!(state, ForecastState::Seeded { remaining: 2, last_year: 2020, .. }));

        let (point, state) = forecaster.step(state).unwrap();
        assert_eq!(point.map(|p| p.year), Some(2021));
        assert!(matches!(state, ForecastState::Stepping { remaining: 1, .. }));

        let (point, state) = forecaster.step(state).unwrap();
        assert_eq!(point.map(|p| p.year), Some(2022));
        assert!(state.is_done());

        let (point, state) = forecaster.step(state).unwrap();
        assert!(point.is_none());
        assert!(state.is_done());
    }

    #[test]
    fn test_last_representable_year_stops_the_rollout() {
        let series: Vec<TimeSeriesRecord> = (0..4)
            .map(|i| TimeSeriesRecord::new(i32::MAX - 3 + i, [("male", i as f64), ("female", 1.0 + i as f64)]))
            .collect();
        let dataset = prepare(&series, &fields(), 2, None);
        let drift = Drift {
            lookback: 2,
            outputs: 2,
            delta: 0.0,
        };

        assert!(forecast(&drift, &dataset, 0).unwrap().is_empty());
        assert!(matches!(
            forecast(&drift, &dataset, 1),
            Err(ForecastError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_zero_periods_is_empty() {
        let dataset = dataset(3);
        let drift = Drift {
            lookback: 3,
            outputs: 2,
            delta: 0.1,
        };
        assert!(forecast(&drift, &dataset, 0).unwrap().is_empty());
    }

    #[test]
    fn test_insufficient_records() {
        let series = vec![
            TimeSeriesRecord::new(2020, [("male", 1.0), ("female", 1.0)]),
            TimeSeriesRecord::new(2021, [("male", 2.0), ("female", 2.0)]),
        ];
        let dataset = prepare(&series, &fields(), 3, None);
        let drift = Drift {
            lookback: 3,
            outputs: 2,
            delta: 0.0,
        };
        let err = forecast(&drift, &dataset, 2).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData(_)));
    }

    #[test]
    fn test_lookback_mismatch_is_rejected() {
        let dataset = dataset(3);
        let drift = Drift {
            lookback: 4,
            outputs: 2,
            delta: 0.0,
        };
        assert!(matches!(forecast(&drift, &dataset, 1), Err(ForecastError::Shape(_))));
    }

    #[test]
    fn test_one_step_matches_direct_prediction() {
        let dataset = dataset(3);
        let network = LstmNetwork::new(NetworkTopology::new(2, 3, vec![4, 3], vec![0.2, 0.2]), 17).unwrap();

        let points = forecast(&network, &dataset, 1).unwrap();
        let tail = dataset.normalized.slice(s![3.., ..]);
        let direct = network.predict(tail).unwrap();
        let stats = dataset.ordered_stats();

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].year, 2021);
        assert_eq!(points[0].values["male"], stats[0].denormalize(direct[0]));
        assert_eq!(points[0].values["female"], stats[1].denormalize(direct[1]));
    }

    #[test]
    fn test_longer_horizon_extends_shorter_one() {
        let dataset = dataset(3);
        let network = LstmNetwork::new(NetworkTopology::new(2, 3, vec![5], vec![0.1]), 23).unwrap();

        let short = forecast(&network, &dataset, 2).unwrap();
        let long = forecast(&network, &dataset, 5).unwrap();
        assert_eq!(long.len(), 5);
        assert_eq!(&long[..2], &short[..]);
    }
}
