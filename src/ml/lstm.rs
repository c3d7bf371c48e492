//! Stacked LSTM regression network
//!
//! `input -> LSTM(units[0]) -> Dropout -> ... -> LSTM(units[n-1]) -> Dropout -> Dense(outputs)`.
//! Every LSTM layer but the last feeds its full output sequence to the next one; the
//! last layer hands its final hidden state to the dense head. Gate order is
//! input, forget, cell, output.
//!
//! Training uses backpropagation through time over the whole window, MSE loss and
//! [`Adam`]. Dropout is inverted and only sampled while training, so inference is
//! deterministic for a given set of weights.

use byteorder::{ByteOrder, LittleEndian};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMutD, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::forecast::SequencePredictor;
use super::optimizer::Adam;
use crate::error::{ForecastError, Result};

/// Upper bound for a layer's dropout rate
pub const MAX_DROPOUT: f64 = 0.8;

/// Size limits for a topology, checked before any weights are allocated
pub const MAX_UNITS: usize = 1024;
pub const MAX_LAYERS: usize = 8;
pub const MAX_LOOKBACK: usize = 512;
pub const MAX_FIELDS: usize = 256;

pub const WEIGHT_DTYPE: &str = "float64";

/// Shape of a network, enough to rebuild it before loading weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTopology {
    /// Fields per timestep
    pub input_size: usize,
    pub lookback: usize,
    pub units: Vec<usize>,
    pub dropout: Vec<f64>,
    pub outputs: usize,
}

impl NetworkTopology {
    /// Topology predicting every input field from `lookback` steps
    pub fn new(num_fields: usize, lookback: usize, units: Vec<usize>, dropout: Vec<f64>) -> Self {
        Self {
            input_size: num_fields,
            lookback,
            units,
            dropout,
            outputs: num_fields,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.outputs == 0 {
            return Err(ForecastError::InvalidConfig(
                "network needs at least one input and one output field".into(),
            ));
        }
        if self.input_size > MAX_FIELDS || self.outputs > MAX_FIELDS {
            return Err(ForecastError::InvalidConfig(format!(
                "at most {MAX_FIELDS} input and output fields are supported"
            )));
        }
        if self.lookback == 0 || self.lookback > MAX_LOOKBACK {
            return Err(ForecastError::InvalidConfig(format!(
                "lookback {} outside [1, {MAX_LOOKBACK}]",
                self.lookback
            )));
        }
        if self.units.is_empty()
            || self.units.len() > MAX_LAYERS
            || self.units.iter().any(|&u| u == 0 || u > MAX_UNITS)
        {
            return Err(ForecastError::InvalidConfig(format!(
                "invalid layer units {:?}, expected 1 to {MAX_LAYERS} layers of 1 to {MAX_UNITS} units",
                self.units
            )));
        }
        if self.dropout.len() != self.units.len() {
            return Err(ForecastError::InvalidConfig(format!(
                "{} dropout rates for {} layers",
                self.dropout.len(),
                self.units.len()
            )));
        }
        if let Some(rate) = self
            .dropout
            .iter()
            .find(|r| !r.is_finite() || **r < 0.0 || **r > MAX_DROPOUT)
        {
            return Err(ForecastError::InvalidConfig(format!(
                "dropout {rate} outside [0, {MAX_DROPOUT}]"
            )));
        }
        Ok(())
    }

    /// Number of weights a network with this topology holds
    pub fn parameter_count(&self) -> Result<usize> {
        self.validate()?;
        let overflow = || ForecastError::InvalidConfig("topology is too large".into());
        let mut total: usize = 0;
        let mut input_size = self.input_size;
        for &units in &self.units {
            let gates = units.checked_mul(4).ok_or_else(overflow)?;
            let per_gate = input_size
                .checked_add(units)
                .and_then(|n| n.checked_add(1))
                .ok_or_else(overflow)?;
            total = gates
                .checked_mul(per_gate)
                .and_then(|n| total.checked_add(n))
                .ok_or_else(overflow)?;
            input_size = units;
        }
        input_size
            .checked_add(1)
            .and_then(|n| n.checked_mul(self.outputs))
            .and_then(|n| total.checked_add(n))
            .ok_or_else(overflow)
    }
}

/// Name and shape of one weight tensor inside `weight_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

/// Serialized network: topology, weight manifest and the weights as little-endian bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifacts {
    pub topology: NetworkTopology,
    pub weight_specs: Vec<WeightSpec>,
    pub weight_data: Vec<u8>,
}

/// Loss and MAE of one batch or evaluation pass, in normalized units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub loss: f64,
    pub mae: f64,
}

#[derive(Debug, Clone)]
struct LstmLayer {
    /// `4H × input`
    w_ih: Array2<f64>,
    /// `4H × H`
    w_hh: Array2<f64>,
    bias: Array1<f64>,
    dropout: f64,
}

struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    c: Array1<f64>,
    h: Array1<f64>,
}

struct LayerTrace {
    steps: Vec<StepCache>,
    /// One mask per emitted output: every timestep, or only the last for the top layer
    masks: Vec<Array1<f64>>,
}

struct Trace {
    layers: Vec<LayerTrace>,
    head_input: Array1<f64>,
}

struct LayerGrads {
    w_ih: Array2<f64>,
    w_hh: Array2<f64>,
    bias: Array1<f64>,
}

struct Gradients {
    layers: Vec<LayerGrads>,
    head_w: Array2<f64>,
    head_b: Array1<f64>,
}

impl Gradients {
    fn zeros_for(network: &LstmNetwork) -> Self {
        Self {
            layers: network
                .layers
                .iter()
                .map(|layer| LayerGrads {
                    w_ih: Array2::zeros(layer.w_ih.raw_dim()),
                    w_hh: Array2::zeros(layer.w_hh.raw_dim()),
                    bias: Array1::zeros(layer.bias.raw_dim()),
                })
                .collect(),
            head_w: Array2::zeros(network.head_w.raw_dim()),
            head_b: Array1::zeros(network.head_b.raw_dim()),
        }
    }

    fn views(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut views = Vec::with_capacity(self.layers.len() * 3 + 2);
        for layer in &self.layers {
            views.push(layer.w_ih.view().into_dyn());
            views.push(layer.w_hh.view().into_dyn());
            views.push(layer.bias.view().into_dyn());
        }
        views.push(self.head_w.view().into_dyn());
        views.push(self.head_b.view().into_dyn());
        views
    }

    fn global_norm(&self) -> f64 {
        self.views()
            .iter()
            .map(|g| g.iter().map(|v| v * v).sum::<f64>())
            .sum::<f64>()
            .sqrt()
    }

    fn scale(&mut self, factor: f64) {
        for layer in &mut self.layers {
            layer.w_ih *= factor;
            layer.w_hh *= factor;
            layer.bias *= factor;
        }
        self.head_w *= factor;
        self.head_b *= factor;
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn glorot(rows: usize, cols: usize, fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

fn dropout_mask(len: usize, rate: f64, rng: &mut StdRng) -> Array1<f64> {
    if rate <= 0.0 {
        return Array1::ones(len);
    }
    let keep = 1.0 - rate;
    Array1::from_shape_fn(len, |_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
}

/// `target += a ⊗ b`
fn add_outer(target: &mut Array2<f64>, a: &Array1<f64>, b: &Array1<f64>) {
    Zip::from(target.rows_mut())
        .and(a)
        .for_each(|mut row, &scale| row.scaled_add(scale, b));
}

impl LstmLayer {
    fn init(input_size: usize, units: usize, dropout: f64, rng: &mut StdRng) -> Self {
        let mut bias = Array1::zeros(4 * units);
        bias.slice_mut(s![units..2 * units]).fill(1.0);
        Self {
            w_ih: glorot(4 * units, input_size, input_size, 4 * units, rng),
            w_hh: glorot(4 * units, units, units, 4 * units, rng),
            bias,
            dropout,
        }
    }

    fn zeroed(input_size: usize, units: usize, dropout: f64) -> Self {
        Self {
            w_ih: Array2::zeros((4 * units, input_size)),
            w_hh: Array2::zeros((4 * units, units)),
            bias: Array1::zeros(4 * units),
            dropout,
        }
    }

    fn units(&self) -> usize {
        self.w_hh.ncols()
    }

    fn step(&self, x: ArrayView1<'_, f64>, h_prev: &Array1<f64>, c_prev: &Array1<f64>) -> StepCache {
        let n = self.units();
        let z = self.w_ih.dot(&x) + self.w_hh.dot(h_prev) + &self.bias;
        let i = z.slice(s![0..n]).mapv(sigmoid);
        let f = z.slice(s![n..2 * n]).mapv(sigmoid);
        let g = z.slice(s![2 * n..3 * n]).mapv(f64::tanh);
        let o = z.slice(s![3 * n..]).mapv(sigmoid);
        let c = &f * c_prev + &i * &g;
        let h = &o * &c.mapv(f64::tanh);
        StepCache {
            x: x.to_owned(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            c,
            h,
        }
    }

    /// Run over `inputs` (`T × input`), returning the hidden state at each step
    fn run(&self, inputs: ArrayView2<'_, f64>) -> Array2<f64> {
        let n = self.units();
        let mut outputs = Array2::zeros((inputs.nrows(), n));
        let mut h = Array1::zeros(n);
        let mut c = Array1::zeros(n);
        for (t, x) in inputs.rows().into_iter().enumerate() {
            let step = self.step(x, &h, &c);
            outputs.row_mut(t).assign(&step.h);
            h = step.h;
            c = step.c;
        }
        outputs
    }

    fn run_cached(&self, inputs: &[Array1<f64>]) -> Vec<StepCache> {
        let n = self.units();
        let mut h = Array1::zeros(n);
        let mut c = Array1::zeros(n);
        let mut steps = Vec::with_capacity(inputs.len());
        for x in inputs {
            let step = self.step(x.view(), &h, &c);
            h = step.h.clone();
            c = step.c.clone();
            steps.push(step);
        }
        steps
    }

    /// Backpropagate `d_out` (gradient w.r.t. each emitted hidden state) through time.
    /// Returns the gradient w.r.t. each input step.
    fn backward(&self, steps: &[StepCache], d_out: &[Array1<f64>], grads: &mut LayerGrads) -> Vec<Array1<f64>> {
        let n = self.units();
        let mut dh_next: Array1<f64> = Array1::zeros(n);
        let mut dc_next: Array1<f64> = Array1::zeros(n);
        let mut dxs = vec![Array1::zeros(0); steps.len()];

        for t in (0..steps.len()).rev() {
            let st = &steps[t];
            let dh = &d_out[t] + &dh_next;
            let mut dz = Array1::zeros(4 * n);

            for k in 0..n {
                let tanh_c = st.c[k].tanh();
                let d_o = dh[k] * tanh_c * st.o[k] * (1.0 - st.o[k]);
                let dc = dh[k] * st.o[k] * (1.0 - tanh_c * tanh_c) + dc_next[k];
                dz[k] = dc * st.g[k] * st.i[k] * (1.0 - st.i[k]);
                dz[n + k] = dc * st.c_prev[k] * st.f[k] * (1.0 - st.f[k]);
                dz[2 * n + k] = dc * st.i[k] * (1.0 - st.g[k] * st.g[k]);
                dz[3 * n + k] = d_o;
                dc_next[k] = dc * st.f[k];
            }

            add_outer(&mut grads.w_ih, &dz, &st.x);
            add_outer(&mut grads.w_hh, &dz, &st.h_prev);
            grads.bias += &dz;
            dxs[t] = self.w_ih.t().dot(&dz);
            dh_next = self.w_hh.t().dot(&dz);
        }

        dxs
    }
}

/// Stacked LSTM with a linear dense head
#[derive(Debug, Clone)]
pub struct LstmNetwork {
    topology: NetworkTopology,
    layers: Vec<LstmLayer>,
    /// `outputs × H`
    head_w: Array2<f64>,
    head_b: Array1<f64>,
}

impl LstmNetwork {
    /// Build a freshly initialized network. Same topology and seed give the same weights.
    pub fn new(topology: NetworkTopology, seed: u64) -> Result<Self> {
        topology.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut input_size = topology.input_size;
        let mut layers = Vec::with_capacity(topology.units.len());
        for (&units, &dropout) in topology.units.iter().zip(&topology.dropout) {
            layers.push(LstmLayer::init(input_size, units, dropout, &mut rng));
            input_size = units;
        }
        let head_w = glorot(topology.outputs, input_size, input_size, topology.outputs, &mut rng);
        let head_b = Array1::zeros(topology.outputs);

        Ok(Self {
            topology,
            layers,
            head_w,
            head_b,
        })
    }

    fn zeroed(topology: NetworkTopology) -> Result<Self> {
        topology.validate()?;
        let mut input_size = topology.input_size;
        let mut layers = Vec::with_capacity(topology.units.len());
        for (&units, &dropout) in topology.units.iter().zip(&topology.dropout) {
            layers.push(LstmLayer::zeroed(input_size, units, dropout));
            input_size = units;
        }
        Ok(Self {
            head_w: Array2::zeros((topology.outputs, input_size)),
            head_b: Array1::zeros(topology.outputs),
            topology,
            layers,
        })
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn lookback(&self) -> usize {
        self.topology.lookback
    }

    pub fn input_size(&self) -> usize {
        self.topology.input_size
    }

    pub fn outputs(&self) -> usize {
        self.topology.outputs
    }

    pub fn parameter_count(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }

    fn check_window(&self, window: ArrayView2<'_, f64>) -> Result<()> {
        if window.dim() != (self.topology.lookback, self.topology.input_size) {
            return Err(ForecastError::shape(format!(
                "expected window {}x{}, got {}x{}",
                self.topology.lookback,
                self.topology.input_size,
                window.nrows(),
                window.ncols()
            )));
        }
        Ok(())
    }

    /// Predict the next step for one `lookback × fields` window. Never applies dropout.
    pub fn predict(&self, window: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        self.check_window(window)?;
        let mut sequence = window.to_owned();
        for layer in &self.layers {
            sequence = layer.run(sequence.view());
        }
        let last = sequence.row(sequence.nrows() - 1);
        Ok(self.head_w.dot(&last) + &self.head_b)
    }

    pub fn predict_batch(&self, windows: &[Array2<f64>]) -> Result<Vec<Array1<f64>>> {
        windows.iter().map(|w| self.predict(w.view())).collect()
    }

    /// Mean loss and MAE over `indices` without dropout
    pub fn evaluate(&self, xs: &[Array2<f64>], ys: &[Array1<f64>], indices: &[usize]) -> Result<BatchStats> {
        if indices.is_empty() {
            return Ok(BatchStats { loss: 0.0, mae: 0.0 });
        }
        let mut loss = 0.0;
        let mut mae = 0.0;
        for &index in indices {
            let (x, y) = xs
                .get(index)
                .zip(ys.get(index))
                .ok_or_else(|| ForecastError::shape(format!("window {index} out of range")))?;
            let prediction = self.predict(x.view())?;
            let error = &prediction - y;
            loss += error.mapv(|e| e * e).mean().unwrap_or(0.0);
            mae += error.mapv(f64::abs).mean().unwrap_or(0.0);
        }
        let n = indices.len() as f64;
        Ok(BatchStats {
            loss: loss / n,
            mae: mae / n,
        })
    }

    fn forward_train(&self, window: ArrayView2<'_, f64>, rng: &mut StdRng) -> (Array1<f64>, Trace) {
        let mut inputs: Vec<Array1<f64>> = window.rows().into_iter().map(|r| r.to_owned()).collect();
        let mut layers = Vec::with_capacity(self.layers.len());
        let mut head_input = Array1::zeros(0);
        let top = self.layers.len() - 1;

        for (index, layer) in self.layers.iter().enumerate() {
            let steps = layer.run_cached(&inputs);
            if index < top {
                let masks: Vec<Array1<f64>> = steps
                    .iter()
                    .map(|_| dropout_mask(layer.units(), layer.dropout, rng))
                    .collect();
                inputs = steps.iter().zip(&masks).map(|(st, m)| &st.h * m).collect();
                layers.push(LayerTrace { steps, masks });
            } else {
                let mask = dropout_mask(layer.units(), layer.dropout, rng);
                if let Some(last) = steps.last() {
                    head_input = &last.h * &mask;
                }
                layers.push(LayerTrace {
                    steps,
                    masks: vec![mask],
                });
            }
        }

        let output = self.head_w.dot(&head_input) + &self.head_b;
        (output, Trace { layers, head_input })
    }

    fn backward(&self, trace: &Trace, d_output: &Array1<f64>, grads: &mut Gradients) {
        add_outer(&mut grads.head_w, d_output, &trace.head_input);
        grads.head_b += d_output;

        let top = self.layers.len() - 1;
        let top_trace = &trace.layers[top];
        let steps = top_trace.steps.len();
        let mut d_out: Vec<Array1<f64>> = vec![Array1::zeros(self.layers[top].units()); steps];
        if let Some(last) = d_out.last_mut() {
            *last = self.head_w.t().dot(d_output) * &top_trace.masks[0];
        }

        for index in (0..self.layers.len()).rev() {
            let dxs = self.layers[index].backward(&trace.layers[index].steps, &d_out, &mut grads.layers[index]);
            if index > 0 {
                d_out = dxs
                    .iter()
                    .zip(&trace.layers[index - 1].masks)
                    .map(|(dx, mask)| dx * mask)
                    .collect();
            }
        }
    }

    /// One optimizer step over a mini-batch. Returns the batch loss and MAE before the update.
    pub fn train_batch(
        &mut self,
        xs: &[&Array2<f64>],
        ys: &[&Array1<f64>],
        optimizer: &mut Adam,
        clip_norm: Option<f64>,
        rng: &mut StdRng,
    ) -> Result<BatchStats> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(ForecastError::shape(format!(
                "batch has {} windows and {} targets",
                xs.len(),
                ys.len()
            )));
        }

        let scale = 2.0 / (self.topology.outputs * xs.len()) as f64;
        let mut grads = Gradients::zeros_for(self);
        let mut loss = 0.0;
        let mut mae = 0.0;

        for (x, y) in xs.iter().zip(ys) {
            self.check_window(x.view())?;
            if y.len() != self.topology.outputs {
                return Err(ForecastError::shape(format!(
                    "expected {} targets, got {}",
                    self.topology.outputs,
                    y.len()
                )));
            }
            let (output, trace) = self.forward_train(x.view(), rng);
            let error = &output - *y;
            loss += error.mapv(|e| e * e).mean().unwrap_or(0.0);
            mae += error.mapv(f64::abs).mean().unwrap_or(0.0);
            self.backward(&trace, &(&error * scale), &mut grads);
        }

        if let Some(max_norm) = clip_norm.filter(|n| *n > 0.0) {
            let norm = grads.global_norm();
            if norm > max_norm {
                grads.scale(max_norm / norm);
            }
        }

        optimizer.update(self.params_mut(), grads.views())?;

        let n = xs.len() as f64;
        Ok(BatchStats {
            loss: loss / n,
            mae: mae / n,
        })
    }

    fn params(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut params = Vec::with_capacity(self.layers.len() * 3 + 2);
        for layer in &self.layers {
            params.push(layer.w_ih.view().into_dyn());
            params.push(layer.w_hh.view().into_dyn());
            params.push(layer.bias.view().into_dyn());
        }
        params.push(self.head_w.view().into_dyn());
        params.push(self.head_b.view().into_dyn());
        params
    }

    fn params_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut params = Vec::with_capacity(self.layers.len() * 3 + 2);
        for layer in &mut self.layers {
            params.push(layer.w_ih.view_mut().into_dyn());
            params.push(layer.w_hh.view_mut().into_dyn());
            params.push(layer.bias.view_mut().into_dyn());
        }
        params.push(self.head_w.view_mut().into_dyn());
        params.push(self.head_b.view_mut().into_dyn());
        params
    }

    /// Weight manifest for `topology`, in serialization order
    pub fn weight_specs(topology: &NetworkTopology) -> Vec<WeightSpec> {
        let spec = |name: String, shape: Vec<usize>| WeightSpec {
            name,
            shape,
            dtype: WEIGHT_DTYPE.to_string(),
        };
        let mut specs = Vec::with_capacity(topology.units.len() * 3 + 2);
        let mut input_size = topology.input_size;
        for (index, &units) in topology.units.iter().enumerate() {
            specs.push(spec(format!("lstm_{index}/kernel"), vec![4 * units, input_size]));
            specs.push(spec(format!("lstm_{index}/recurrent_kernel"), vec![4 * units, units]));
            specs.push(spec(format!("lstm_{index}/bias"), vec![4 * units]));
            input_size = units;
        }
        specs.push(spec("dense/kernel".to_string(), vec![topology.outputs, input_size]));
        specs.push(spec("dense/bias".to_string(), vec![topology.outputs]));
        specs
    }

    pub fn to_artifacts(&self) -> ModelArtifacts {
        let values: Vec<f64> = self.params().iter().flat_map(|p| p.iter().copied()).collect();
        let mut weight_data = vec![0u8; values.len() * 8];
        LittleEndian::write_f64_into(&values, &mut weight_data);

        ModelArtifacts {
            topology: self.topology.clone(),
            weight_specs: Self::weight_specs(&self.topology),
            weight_data,
        }
    }

    /// Rebuild a network from artifacts, rejecting any manifest or size mismatch.
    ///
    /// The topology and byte count are checked before anything is allocated.
    pub fn from_artifacts(artifacts: &ModelArtifacts) -> Result<Self> {
        let total = artifacts
            .topology
            .parameter_count()
            .map_err(|e| ForecastError::shape(e.to_string()))?;
        if artifacts.weight_data.len() % 8 != 0 || artifacts.weight_data.len() / 8 != total {
            return Err(ForecastError::shape(format!(
                "weight data holds {} bytes, expected {}",
                artifacts.weight_data.len(),
                total.saturating_mul(8)
            )));
        }

        let expected = Self::weight_specs(&artifacts.topology);
        if artifacts.weight_specs.len() != expected.len() {
            return Err(ForecastError::shape(format!(
                "expected {} weight tensors, found {}",
                expected.len(),
                artifacts.weight_specs.len()
            )));
        }
        for (found, wanted) in artifacts.weight_specs.iter().zip(&expected) {
            if found.shape != wanted.shape || found.dtype != wanted.dtype {
                return Err(ForecastError::shape(format!(
                    "weight {} is {:?} {}, expected {:?} {}",
                    found.name, found.shape, found.dtype, wanted.shape, wanted.dtype
                )));
            }
        }

        let mut network = Self::zeroed(artifacts.topology.clone())?;
        let mut values = vec![0.0; total];
        LittleEndian::read_f64_into(&artifacts.weight_data, &mut values);
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::shape("weight data contains non-finite values"));
        }

        let mut offset = 0;
        for mut param in network.params_mut() {
            let len = param.len();
            let source = ArrayViewD::from_shape(param.raw_dim(), &values[offset..offset + len])
                .map_err(|e| ForecastError::shape(e.to_string()))?;
            param.assign(&source);
            offset += len;
        }

        Ok(network)
    }
}

impl SequencePredictor for LstmNetwork {
    fn lookback(&self) -> usize {
        self.topology.lookback
    }

    fn num_outputs(&self) -> usize {
        self.topology.outputs
    }

    fn predict(&self, window: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        LstmNetwork::predict(self, window)
    }
}
