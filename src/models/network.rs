//! Dense-network checkpoint family.
//!
//! Feed-forward networks stored as layer checkpoints in two container
//! flavors: the current binary format (`.netbin`) and the legacy JSON
//! format (`.netjson`). Checkpoints load onto CPU only; deserializing an
//! untrusted checkpoint is an accepted trust boundary.

use crate::error::EvalError;
use serde::{Deserialize, Serialize};

/// Magic bytes opening a binary network checkpoint.
const BINARY_MAGIC: &[u8; 4] = b"MEVN";
const BINARY_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Identity,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    fn from_code(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(Activation::Identity),
            1 => Ok(Activation::Relu),
            2 => Ok(Activation::Sigmoid),
            3 => Ok(Activation::Tanh),
            4 => Ok(Activation::Softmax),
            other => Err(format!("unknown activation code {other}")),
        }
    }

    fn code(self) -> u8 {
        match self {
            Activation::Identity => 0,
            Activation::Relu => 1,
            Activation::Sigmoid => 2,
            Activation::Tanh => 3,
            Activation::Softmax => 4,
        }
    }
}

/// One dense layer: `out_dim x in_dim` row-major weights plus bias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub in_dim: usize,
    pub out_dim: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub activation: Activation,
    /// Training-time dropout rate. Inert at inference.
    #[serde(default)]
    pub dropout: Option<f32>,
}

/// A dense feed-forward network restored from a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseNetwork {
    pub layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|l| l.in_dim).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.out_dim).unwrap_or(0)
    }

    fn validate(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("network has no layers".to_string());
        }
        let mut prev_out = None;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != layer.in_dim * layer.out_dim {
                return Err(format!(
                    "layer {i}: expected {} weights, found {}",
                    layer.in_dim * layer.out_dim,
                    layer.weights.len()
                ));
            }
            if layer.bias.len() != layer.out_dim {
                return Err(format!(
                    "layer {i}: expected {} bias terms, found {}",
                    layer.out_dim,
                    layer.bias.len()
                ));
            }
            if let Some(out) = prev_out {
                if layer.in_dim != out {
                    return Err(format!(
                        "layer {i}: input width {} does not match previous output {}",
                        layer.in_dim, out
                    ));
                }
            }
            prev_out = Some(layer.out_dim);
        }
        Ok(())
    }

    /// Run the network in inference mode. Dropout layers are skipped; no
    /// gradient state exists in this runtime.
    pub fn infer(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, EvalError> {
        let input_dim = self.input_dim();
        let mut outputs = Vec::with_capacity(x.len());
        for row in x {
            if row.len() != input_dim {
                return Err(EvalError::Inference(format!(
                    "network expects {} inputs, got {}",
                    input_dim,
                    row.len()
                )));
            }
            let mut activations = row.clone();
            for layer in &self.layers {
                activations = forward_layer(layer, &activations);
            }
            outputs.push(activations);
        }
        Ok(outputs)
    }

    /// Decode the binary checkpoint container.
    pub fn from_binary(bytes: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor { bytes, pos: 0 };

        let magic = cursor.take(4)?;
        if magic != BINARY_MAGIC {
            return Err("bad magic: not a network checkpoint".to_string());
        }
        let version = cursor.read_u16()?;
        if version != BINARY_VERSION {
            return Err(format!("unsupported checkpoint version {version}"));
        }

        let layer_count = cursor.read_u16()? as usize;
        let mut layers = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            let in_dim = cursor.read_u32()? as usize;
            let out_dim = cursor.read_u32()? as usize;
            let activation = Activation::from_code(cursor.read_u8()?)?;
            let has_dropout = cursor.read_u8()? != 0;
            let dropout_rate = cursor.read_f32()?;
            let dropout = has_dropout.then_some(dropout_rate);

            let mut weights = Vec::with_capacity(in_dim * out_dim);
            for _ in 0..in_dim * out_dim {
                weights.push(cursor.read_f32()?);
            }
            let mut bias = Vec::with_capacity(out_dim);
            for _ in 0..out_dim {
                bias.push(cursor.read_f32()?);
            }

            layers.push(DenseLayer {
                in_dim,
                out_dim,
                weights,
                bias,
                activation,
                dropout,
            });
        }

        let network = Self { layers };
        network.validate()?;
        Ok(network)
    }

    /// Encode into the binary checkpoint container.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BINARY_MAGIC);
        out.extend_from_slice(&BINARY_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.layers.len() as u16).to_le_bytes());
        for layer in &self.layers {
            out.extend_from_slice(&(layer.in_dim as u32).to_le_bytes());
            out.extend_from_slice(&(layer.out_dim as u32).to_le_bytes());
            out.push(layer.activation.code());
            out.push(u8::from(layer.dropout.is_some()));
            out.extend_from_slice(&layer.dropout.unwrap_or(0.0).to_le_bytes());
            for w in &layer.weights {
                out.extend_from_slice(&w.to_le_bytes());
            }
            for b in &layer.bias {
                out.extend_from_slice(&b.to_le_bytes());
            }
        }
        out
    }

    /// Decode the legacy JSON checkpoint flavor.
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let network: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        network.validate()?;
        Ok(network)
    }
}

fn forward_layer(layer: &DenseLayer, input: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(layer.out_dim);
    for o in 0..layer.out_dim {
        let row = &layer.weights[o * layer.in_dim..(o + 1) * layer.in_dim];
        let z: f64 = row
            .iter()
            .zip(input)
            .map(|(w, v)| f64::from(*w) * v)
            .sum::<f64>()
            + f64::from(layer.bias[o]);
        out.push(z);
    }
    apply_activation(layer.activation, &mut out);
    out
}

fn apply_activation(activation: Activation, values: &mut [f64]) {
    match activation {
        Activation::Identity => {}
        Activation::Relu => {
            for v in values.iter_mut() {
                *v = v.max(0.0);
            }
        }
        Activation::Sigmoid => {
            for v in values.iter_mut() {
                *v = 1.0 / (1.0 + (-*v).exp());
            }
        }
        Activation::Tanh => {
            for v in values.iter_mut() {
                *v = v.tanh();
            }
        }
        Activation::Softmax => {
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for v in values.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            if sum > 0.0 {
                for v in values.iter_mut() {
                    *v /= sum;
                }
            }
        }
    }
}

/// Minimal byte cursor for the binary container.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.bytes.len() {
            return Err("checkpoint truncated".to_string());
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, String> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_class_net() -> DenseNetwork {
        // Identity layer followed by softmax: output favors the larger input.
        DenseNetwork {
            layers: vec![DenseLayer {
                in_dim: 2,
                out_dim: 2,
                weights: vec![1.0, 0.0, 0.0, 1.0],
                bias: vec![0.0, 0.0],
                activation: Activation::Softmax,
                dropout: Some(0.2),
            }],
        }
    }

    #[test]
    fn test_forward_known_weights() {
        let net = DenseNetwork {
            layers: vec![DenseLayer {
                in_dim: 2,
                out_dim: 1,
                weights: vec![2.0, 3.0],
                bias: vec![1.0],
                activation: Activation::Identity,
                dropout: None,
            }],
        };
        let out = net.infer(&[vec![1.0, 1.0]]).unwrap();
        assert_eq!(out, vec![vec![6.0]]);
    }

    #[test]
    fn test_softmax_outputs_sum_to_one() {
        let net = two_class_net();
        let out = net.infer(&[vec![2.0, 1.0]]).unwrap();
        let sum: f64 = out[0].iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(out[0][0] > out[0][1]);
    }

    #[test]
    fn test_binary_round_trip() {
        let net = two_class_net();
        let bytes = net.to_binary();
        let restored = DenseNetwork::from_binary(&bytes).unwrap();
        assert_eq!(restored.layers.len(), 1);
        assert_eq!(restored.layers[0].weights, net.layers[0].weights);
        assert_eq!(restored.layers[0].dropout, Some(0.2));

        let original = net.infer(&[vec![0.3, -0.7]]).unwrap();
        let roundtrip = restored.infer(&[vec![0.3, -0.7]]).unwrap();
        assert_eq!(original, roundtrip);
    }

    #[test]
    fn test_binary_rejects_bad_magic() {
        let err = DenseNetwork::from_binary(b"NOPE....").unwrap_err();
        assert!(err.contains("magic"));
    }

    #[test]
    fn test_json_flavor_validates_shapes() {
        let json = serde_json::json!({
            "layers": [{
                "in_dim": 2,
                "out_dim": 1,
                "weights": [1.0],
                "bias": [0.0],
                "activation": "identity"
            }]
        });
        let err = DenseNetwork::from_json(json.to_string().as_bytes()).unwrap_err();
        assert!(err.contains("expected 2 weights"));
    }

    #[test]
    fn test_input_width_mismatch_is_inference_error() {
        let net = two_class_net();
        let err = net.infer(&[vec![1.0]]).unwrap_err();
        assert!(matches!(err, EvalError::Inference(_)));
    }
}
