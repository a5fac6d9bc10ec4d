//! SafeTensors checkpoint loading helpers.
//!
//! Checkpoints store named tensors in f32, f16 or bf16; these helpers decode
//! payloads into f32 host buffers and build burn tensors from them.

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Raw tensor payload extracted from a SafeTensors file.
#[derive(Debug, Clone)]
pub struct TensorPayload {
    /// Scalar dtype in the file.
    pub dtype: Dtype,
    /// Shape as a list of dimensions.
    pub shape: Vec<usize>,
    /// Raw byte buffer in row-major order.
    pub data: Vec<u8>,
}

impl TensorPayload {
    /// Decode the payload into f32 values.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        match self.dtype {
            Dtype::F32 => Ok(self
                .data
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
                .collect()),
            Dtype::BF16 => Ok(self
                .data
                .chunks_exact(2)
                .map(|chunk| {
                    let bits = u16::from_le_bytes(chunk.try_into().expect("2-byte chunk")) as u32;
                    f32::from_bits(bits << 16)
                })
                .collect()),
            Dtype::F16 => Ok(self
                .data
                .chunks_exact(2)
                .map(|chunk| {
                    let bits = u16::from_le_bytes(chunk.try_into().expect("2-byte chunk"));
                    f16_to_f32(bits)
                })
                .collect()),
            other => anyhow::bail!("unsupported checkpoint dtype {other:?}"),
        }
    }
}

/// Load every tensor from a SafeTensors file, keyed by name.
pub fn load_state_dict(path: impl AsRef<Path>) -> Result<HashMap<String, TensorPayload>> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
    let tensors = SafeTensors::deserialize(&bytes)
        .with_context(|| format!("invalid safetensors file {}", path.display()))?;

    let mut state = HashMap::new();
    for name in tensors.names() {
        let view = tensors.tensor(name)?;
        state.insert(
            name.to_string(),
            TensorPayload {
                dtype: view.dtype(),
                shape: view.shape().to_vec(),
                data: view.data().to_vec(),
            },
        );
    }
    Ok(state)
}

/// Fetch a named tensor from a loaded state dict.
pub fn require_tensor<'a>(
    state: &'a HashMap<String, TensorPayload>,
    name: &str,
) -> Result<&'a TensorPayload> {
    state
        .get(name)
        .with_context(|| format!("checkpoint is missing tensor {name:?}"))
}

/// Build a 1D burn tensor from a payload.
pub fn tensor1_from_payload<B: Backend>(
    payload: &TensorPayload,
    device: &B::Device,
) -> Result<Tensor<B, 1>> {
    let shape: [usize; 1] = payload
        .shape
        .clone()
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 1D tensor, got shape {:?}", payload.shape))?;
    let values = payload.to_f32()?;
    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}

/// Build a 2D burn tensor from a payload.
pub fn tensor2_from_payload<B: Backend>(
    payload: &TensorPayload,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    let shape: [usize; 2] = payload
        .shape
        .clone()
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 2D tensor, got shape {:?}", payload.shape))?;
    let values = payload.to_f32()?;
    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}

/// IEEE 754 half-precision to single-precision conversion.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) as u32;
    let exponent = ((bits >> 10) & 0x1f) as u32;
    let mantissa = (bits & 0x3ff) as u32;

    let value = match (exponent, mantissa) {
        (0, 0) => sign << 31,
        (0, m) => {
            // Subnormal: normalize into the f32 exponent range.
            let mut exp = 127 - 15 + 1;
            let mut m = m;
            while m & 0x400 == 0 {
                m <<= 1;
                exp -= 1;
            }
            (sign << 31) | ((exp as u32) << 23) | ((m & 0x3ff) << 13)
        }
        (0x1f, 0) => (sign << 31) | 0x7f80_0000,
        (0x1f, m) => (sign << 31) | 0x7f80_0000 | (m << 13),
        (e, m) => (sign << 31) | ((e + 127 - 15) << 23) | (m << 13),
    };
    f32::from_bits(value)
}

#[cfg(test)]
mod tests {
    use super::{load_state_dict, require_tensor, tensor2_from_payload, TensorPayload};
    use burn_ndarray::{NdArray, NdArrayDevice};
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;
    use std::collections::HashMap;

    #[test]
    fn roundtrips_f32_tensors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.safetensors");

        let data: Vec<u8> = [1.0_f32, -2.0, 3.5, 0.25]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let view = TensorView::new(Dtype::F32, vec![2, 2], &data).expect("view");
        let tensors: HashMap<String, TensorView<'_>> =
            [("weight".to_string(), view)].into_iter().collect();
        let bytes = safetensors::serialize(&tensors, &None).expect("serialize");
        std::fs::write(&path, bytes).expect("write");

        let state = load_state_dict(&path).expect("load");
        let payload = require_tensor(&state, "weight").expect("weight");
        let device = NdArrayDevice::default();
        let tensor = tensor2_from_payload::<NdArray<f32>>(payload, &device).expect("tensor");
        assert_eq!(tensor.dims(), [2, 2]);
        let data = tensor.to_data();
        assert_eq!(
            data.as_slice::<f32>().expect("slice"),
            &[1.0, -2.0, 3.5, 0.25]
        );
    }

    #[test]
    fn decodes_bf16_payloads() {
        let values = [1.0_f32, -0.5, 2.25];
        let mut data = Vec::new();
        let mut expected = Vec::new();
        for value in values {
            let bf16 = (value.to_bits() >> 16) as u16;
            data.extend_from_slice(&bf16.to_le_bytes());
            expected.push(f32::from_bits((bf16 as u32) << 16));
        }
        let payload = TensorPayload {
            dtype: Dtype::BF16,
            shape: vec![3],
            data,
        };
        assert_eq!(payload.to_f32().expect("decode"), expected);
    }

    #[test]
    fn decodes_f16_payloads() {
        // 1.0 = 0x3c00, -2.0 = 0xc000, 0.5 = 0x3800 in f16.
        let payload = TensorPayload {
            dtype: Dtype::F16,
            shape: vec![3],
            data: vec![0x00, 0x3c, 0x00, 0xc0, 0x00, 0x38],
        };
        assert_eq!(payload.to_f32().expect("decode"), vec![1.0, -2.0, 0.5]);
    }

    #[test]
    fn missing_tensor_is_an_error() {
        let state = HashMap::new();
        let err = require_tensor(&state, "absent").unwrap_err();
        assert!(format!("{err:#}").contains("absent"));
    }
}
