//! Safetensors-backed parameter sets.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use memmap2::MmapOptions;
use ndarray::{Array1, Array2};
use safetensors::tensor::{Dtype, View};
use safetensors::SafeTensors;

use crate::error::{Result, UnmixError};

/// Buffers a PyTorch state dict carries that the network does not consume.
const IGNORED_SUFFIXES: &[&str] = &[".num_batches_tracked"];
const IGNORED_NAMES: &[&str] = &["stft.window", "transform.0.window"];

#[derive(Debug, Clone, PartialEq)]
pub struct TensorF32 {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Immutable named tensors, as read from a parameter blob.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    tensors: BTreeMap<String, TensorF32>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<()> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(UnmixError::Weights(format!(
                "tensor `{name}` has {} values for shape {shape:?}",
                data.len()
            )));
        }
        self.tensors.insert(name, TensorF32 { shape, data });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TensorF32> {
        self.tensors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        // SAFETY: read-only file mapping for immutable tensor access.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_safetensors(&mmap)
    }

    /// Parse a safetensors blob. F32 and BF16 tensors are widened to f32;
    /// integer bookkeeping buffers (`num_batches_tracked`) are dropped.
    pub fn from_safetensors(bytes: &[u8]) -> Result<Self> {
        let st = SafeTensors::deserialize(bytes)?;
        let mut set = Self::new();

        for (name, view) in st.tensors() {
            let shape = view.shape().to_vec();
            let raw = view.data();
            let data = match view.dtype() {
                Dtype::F32 => {
                    if raw.len() % 4 != 0 {
                        return Err(UnmixError::Weights(format!(
                            "invalid byte length {} for f32 tensor `{name}`",
                            raw.len()
                        )));
                    }
                    raw.chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect()
                }
                Dtype::BF16 => {
                    if raw.len() % 2 != 0 {
                        return Err(UnmixError::Weights(format!(
                            "invalid byte length {} for bf16 tensor `{name}`",
                            raw.len()
                        )));
                    }
                    raw.chunks_exact(2)
                        .map(|c| f32::from_bits((u16::from_le_bytes([c[0], c[1]]) as u32) << 16))
                        .collect()
                }
                _ if is_ignored(&name) => continue,
                other => {
                    return Err(UnmixError::Weights(format!(
                        "unsupported dtype {other:?} for tensor `{name}`"
                    )))
                }
            };
            set.insert(name, shape, data)?;
        }

        Ok(set)
    }

    /// Serialize as little-endian f32 safetensors.
    pub fn to_safetensors(&self) -> Result<Vec<u8>> {
        let views = self.tensors.iter().map(|(name, t)| (name.as_str(), t));
        Ok(safetensors::serialize(views, &None)?)
    }
}

impl View for &TensorF32 {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.data.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn data_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

fn is_ignored(name: &str) -> bool {
    IGNORED_NAMES.contains(&name) || IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Strict, shape-checked reader used while building a network.
///
/// Every requested tensor must exist with exactly the requested shape, and
/// [`ParamLoader::finish`] rejects anything left unread.
pub struct ParamLoader<'a> {
    params: &'a ParamSet,
    used: BTreeSet<&'a str>,
}

impl<'a> ParamLoader<'a> {
    pub fn new(params: &'a ParamSet) -> Self {
        Self {
            params,
            used: BTreeSet::new(),
        }
    }

    fn take(&mut self, name: &str, expected: &[usize]) -> Result<&'a [f32]> {
        let (key, tensor) = self
            .params
            .tensors
            .get_key_value(name)
            .ok_or_else(|| UnmixError::MissingParameter(name.to_string()))?;
        if tensor.shape != expected {
            return Err(UnmixError::ShapeMismatch {
                name: name.to_string(),
                got: tensor.shape.clone(),
                expected: expected.to_vec(),
            });
        }
        self.used.insert(key.as_str());
        Ok(&tensor.data)
    }

    pub fn vector(&mut self, name: &str, len: usize) -> Result<Array1<f32>> {
        Ok(Array1::from(self.take(name, &[len])?.to_vec()))
    }

    /// `[rows, cols]` tensor in row-major order.
    pub fn matrix(&mut self, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>> {
        let data = self.take(name, &[rows, cols])?;
        Ok(Array2::from_shape_vec((rows, cols), data.to_vec())?)
    }

    pub fn finish(self) -> Result<()> {
        match self
            .params
            .names()
            .find(|n| !self.used.contains(n) && !is_ignored(n))
        {
            Some(extra) => Err(UnmixError::UnexpectedParameter(extra.to_string())),
            None => Ok(()),
        }
    }
}
