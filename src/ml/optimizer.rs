//! Adam optimizer
//!
//! Keeps first and second moment estimates per parameter tensor. Parameters and
//! gradients are passed as flat lists of dynamic-dimension views in a stable order.

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};

use crate::error::{ForecastError, Result};

#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    step: i32,
    moments: Vec<(ArrayD<f64>, ArrayD<f64>)>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments: Vec::new(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.step
    }

    /// Apply one update. Moment buffers are allocated on the first call.
    pub fn update(&mut self, params: Vec<ArrayViewMutD<'_, f64>>, grads: Vec<ArrayViewD<'_, f64>>) -> Result<()> {
        if params.len() != grads.len() {
            return Err(ForecastError::shape(format!(
                "optimizer got {} parameter tensors and {} gradients",
                params.len(),
                grads.len()
            )));
        }

        if self.moments.is_empty() {
            self.moments = params
                .iter()
                .map(|p| (ArrayD::zeros(p.raw_dim()), ArrayD::zeros(p.raw_dim())))
                .collect();
        }

        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step);
        let bias2 = 1.0 - self.beta2.powi(self.step);
        let lr_t = self.learning_rate * bias2.sqrt() / bias1;
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);

        for ((mut param, grad), (m, v)) in params.into_iter().zip(grads).zip(self.moments.iter_mut()) {
            if param.shape() != grad.shape() || param.shape() != m.shape() {
                return Err(ForecastError::shape(format!(
                    "parameter {:?} does not match gradient {:?}",
                    param.shape(),
                    grad.shape()
                )));
            }
            Zip::from(&mut param)
                .and(&grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + eps);
                });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_minimizes_quadratic() {
        // f(x) = (x - 3)^2
        let mut x: Array1<f64> = array![0.0];
        let mut adam = Adam::new(0.1);
        for _ in 0..500 {
            let grad = x.mapv(|v| 2.0 * (v - 3.0));
            adam.update(vec![x.view_mut().into_dyn()], vec![grad.view().into_dyn()])
                .unwrap();
        }
        assert!((x[0] - 3.0).abs() < 0.05, "x = {}", x[0]);
        assert_eq!(adam.steps(), 500);
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut x: Array1<f64> = array![1.0, -1.0];
        let grad = array![10.0, -0.5];
        let mut adam = Adam::new(0.01);
        adam.update(vec![x.view_mut().into_dyn()], vec![grad.view().into_dyn()])
            .unwrap();
        // bias-corrected first step is lr * sign(g)
        assert!((x[0] - 0.99).abs() < 1e-6);
        assert!((x[1] + 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let mut x: Array1<f64> = array![1.0, 2.0];
        let grad = array![1.0];
        let mut adam = Adam::new(0.01);
        let err = adam
            .update(vec![x.view_mut().into_dyn()], vec![grad.view().into_dyn()])
            .unwrap_err();
        assert!(matches!(err, ForecastError::Shape(_)));
    }
}
