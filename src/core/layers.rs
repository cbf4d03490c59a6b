//! Inference-only building blocks of the separation network.

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};

use crate::error::Result;
use crate::model::weights::ParamLoader;

const BATCH_NORM_EPS: f32 = 1e-5;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Linear layer: `y = x * W^T (+ b)`.
///
/// `W` is stored as `[out_dim, in_dim]` in the parameter set and kept
/// transposed here so a whole sequence is one matrix product.
pub struct Linear {
    weight_t: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn load(
        p: &mut ParamLoader<'_>,
        name: &str,
        in_dim: usize,
        out_dim: usize,
        bias: bool,
    ) -> Result<Self> {
        let weight = p.matrix(&format!("{name}.weight"), out_dim, in_dim)?;
        let bias = if bias {
            Some(p.vector(&format!("{name}.bias"), out_dim)?)
        } else {
            None
        };
        Ok(Self {
            weight_t: weight.t().as_standard_layout().into_owned(),
            bias,
        })
    }

    /// `[rows, in_dim]` to `[rows, out_dim]`.
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight_t);
        if let Some(b) = &self.bias {
            y += b;
        }
        y
    }
}

/// Per-unit affine map `y = x * scale + shift`.
pub struct Affine {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl Affine {
    /// Batch norm in inference mode, folded into one affine map.
    pub fn batch_norm(p: &mut ParamLoader<'_>, name: &str, dim: usize) -> Result<Self> {
        let weight = p.vector(&format!("{name}.weight"), dim)?;
        let bias = p.vector(&format!("{name}.bias"), dim)?;
        let mean = p.vector(&format!("{name}.running_mean"), dim)?;
        let var = p.vector(&format!("{name}.running_var"), dim)?;

        let scale = &weight / &var.mapv(|v| (v + BATCH_NORM_EPS).sqrt());
        let shift = &bias - &(&mean * &scale);
        Ok(Self { scale, shift })
    }

    /// Applied row-wise to `[rows, dim]`.
    pub fn apply(&self, x: &mut Array2<f32>) {
        *x *= &self.scale;
        *x += &self.shift;
    }
}

/// One direction of one LSTM layer (PyTorch gate order: i, f, g, o).
struct LstmDirection {
    w_ih_t: Array2<f32>,
    w_hh_t: Array2<f32>,
    bias: Array1<f32>,
    hidden: usize,
}

impl LstmDirection {
    fn load(
        p: &mut ParamLoader<'_>,
        prefix: &str,
        suffix: &str,
        input: usize,
        hidden: usize,
    ) -> Result<Self> {
        let w_ih = p.matrix(&format!("{prefix}.weight_ih{suffix}"), 4 * hidden, input)?;
        let w_hh = p.matrix(&format!("{prefix}.weight_hh{suffix}"), 4 * hidden, hidden)?;
        let b_ih = p.vector(&format!("{prefix}.bias_ih{suffix}"), 4 * hidden)?;
        let b_hh = p.vector(&format!("{prefix}.bias_hh{suffix}"), 4 * hidden)?;
        Ok(Self {
            w_ih_t: w_ih.t().as_standard_layout().into_owned(),
            w_hh_t: w_hh.t().as_standard_layout().into_owned(),
            bias: b_ih + b_hh,
            hidden,
        })
    }

    /// Runs the sequence `[steps, input]` from zero state; output `[steps, hidden]`
    /// is indexed by input step in both directions.
    fn run(&self, x: ArrayView2<f32>, reverse: bool) -> Array2<f32> {
        let steps = x.nrows();
        let hd = self.hidden;

        let mut gates_in = x.dot(&self.w_ih_t);
        gates_in += &self.bias;

        let mut h = Array1::<f32>::zeros(hd);
        let mut c = Array1::<f32>::zeros(hd);
        let mut out = Array2::<f32>::zeros((steps, hd));

        for step in 0..steps {
            let t = if reverse { steps - 1 - step } else { step };
            let gates = &gates_in.row(t) + &h.dot(&self.w_hh_t);

            for j in 0..hd {
                let i = sigmoid(gates[j]);
                let f = sigmoid(gates[hd + j]);
                let g = gates[2 * hd + j].tanh();
                let o = sigmoid(gates[3 * hd + j]);
                c[j] = f * c[j] + i * g;
                h[j] = o * c[j].tanh();
            }
            out.row_mut(t).assign(&h);
        }
        out
    }
}

/// Stacked bidirectional LSTM; each layer's two directions are concatenated
/// (`[forward, backward]`) before feeding the next layer.
pub struct BiLstm {
    layers: Vec<(LstmDirection, LstmDirection)>,
}

impl BiLstm {
    pub fn load(
        p: &mut ParamLoader<'_>,
        prefix: &str,
        input: usize,
        hidden: usize,
        nb_layers: usize,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(nb_layers);
        for layer in 0..nb_layers {
            let in_size = if layer == 0 { input } else { 2 * hidden };
            let fwd = LstmDirection::load(p, prefix, &format!("_l{layer}"), in_size, hidden)?;
            let bwd =
                LstmDirection::load(p, prefix, &format!("_l{layer}_reverse"), in_size, hidden)?;
            layers.push((fwd, bwd));
        }
        Ok(Self { layers })
    }

    /// `[steps, input]` to `[steps, 2 * hidden]`.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut input = x.to_owned();
        for (fwd, bwd) in &self.layers {
            let (f, b) = rayon::join(|| fwd.run(input.view(), false), || bwd.run(input.view(), true));
            input = concatenate(Axis(1), &[f.view(), b.view()])?;
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::{Affine, BiLstm, Linear};
    use crate::model::weights::{ParamLoader, ParamSet};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn linear_matches_manual_product() {
        let mut p = ParamSet::new();
        p.insert("fc.weight", vec![2, 3], vec![1.0, 0.0, -1.0, 2.0, 1.0, 0.5])
            .unwrap();
        p.insert("fc.bias", vec![2], vec![0.5, -1.0]).unwrap();
        let mut loader = ParamLoader::new(&p);
        let fc = Linear::load(&mut loader, "fc", 3, 2, true).unwrap();
        loader.finish().unwrap();

        let y = fc.forward(array![[1.0f32, 2.0, 3.0]].view());
        assert_abs_diff_eq!(y[[0, 0]], 1.0 - 3.0 + 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(y[[0, 1]], 2.0 + 2.0 + 1.5 - 1.0, epsilon = 1e-6);
    }

    #[test]
    fn batch_norm_folds_running_stats() {
        let mut p = ParamSet::new();
        p.insert("bn.weight", vec![2], vec![2.0, 1.0]).unwrap();
        p.insert("bn.bias", vec![2], vec![0.0, 1.0]).unwrap();
        p.insert("bn.running_mean", vec![2], vec![1.0, 0.0]).unwrap();
        p.insert("bn.running_var", vec![2], vec![4.0 - 1e-5, 1.0 - 1e-5])
            .unwrap();
        let mut loader = ParamLoader::new(&p);
        let bn = Affine::batch_norm(&mut loader, "bn", 2).unwrap();

        let mut x = array![[3.0f32, 2.0], [1.0, -1.0]];
        bn.apply(&mut x);
        // (3 - 1) / 2 * 2 = 2; (2 - 0) / 1 * 1 + 1 = 3
        assert_abs_diff_eq!(x[[0, 0]], 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(x[[0, 1]], 3.0, epsilon = 1e-4);
        assert_abs_diff_eq!(x[[1, 0]], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(x[[1, 1]], 0.0, epsilon = 1e-4);
    }

    fn single_unit_lstm(w_ih: f32, bias_i: f32) -> ParamSet {
        // hidden = 1, input = 1, one layer; gates: i, f, g, o
        let mut p = ParamSet::new();
        for suffix in ["_l0", "_l0_reverse"] {
            p.insert(format!("lstm.weight_ih{suffix}"), vec![4, 1], vec![w_ih, 0.0, 1.0, 0.0])
                .unwrap();
            p.insert(format!("lstm.weight_hh{suffix}"), vec![4, 1], vec![0.0; 4])
                .unwrap();
            p.insert(format!("lstm.bias_ih{suffix}"), vec![4], vec![bias_i, 0.0, 0.0, 0.0])
                .unwrap();
            p.insert(format!("lstm.bias_hh{suffix}"), vec![4], vec![0.0; 4])
                .unwrap();
        }
        p
    }

    #[test]
    fn bilstm_directions_accumulate_from_opposite_ends() {
        let p = single_unit_lstm(0.0, 100.0);
        let mut loader = ParamLoader::new(&p);
        let lstm = BiLstm::load(&mut loader, "lstm", 1, 1, 1).unwrap();
        loader.finish().unwrap();

        // i ~= 1, f = o = 0.5, g = tanh(x): the cell leaks by half each step.
        let x = array![[1.0f32], [0.0], [0.0]];
        let y = lstm.forward(x.view()).unwrap();
        assert_eq!(y.dim(), (3, 2));

        let g = 1.0f32.tanh();
        // forward: impulse at t=0 decays over later steps
        assert_abs_diff_eq!(y[[0, 0]], 0.5 * g.tanh(), epsilon = 1e-5);
        assert_abs_diff_eq!(y[[1, 0]], 0.5 * (0.5 * g).tanh(), epsilon = 1e-5);
        // backward: reaches t=0 last, nothing before it
        assert_abs_diff_eq!(y[[2, 1]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y[[0, 1]], 0.5 * g.tanh(), epsilon = 1e-5);
    }
}
