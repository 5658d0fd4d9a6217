//! Runtime values handed to a fusion.

use kfuse_device::Buffer;
use kfuse_dtype::IndexType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Double(f64),
}

impl ScalarValue {
    /// Integer view used to bind the value into extent expressions.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(value) => Some(*value as i64),
            Self::Int(value) => Some(*value),
            Self::Double(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(value) => *value as i64 as f64,
            Self::Int(value) => *value as f64,
            Self::Double(value) => *value,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ArgValue {
    Tensor(Buffer),
    Scalar(ScalarValue),
}

impl ArgValue {
    pub fn as_tensor(&self) -> Option<&Buffer> {
        match self {
            Self::Tensor(buffer) => Some(buffer),
            Self::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<ScalarValue> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Tensor(_) => None,
        }
    }
}

impl From<Buffer> for ArgValue {
    fn from(buffer: Buffer) -> Self {
        Self::Tensor(buffer)
    }
}

impl From<&Buffer> for ArgValue {
    fn from(buffer: &Buffer) -> Self {
        Self::Tensor(buffer.clone())
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Scalar(ScalarValue::Int(value))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        Self::Scalar(ScalarValue::Double(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Scalar(ScalarValue::Bool(value))
    }
}

/// Ordered fusion arguments plus the metadata that selects a cached launch.
///
/// `cache_id` is the caller's signature of the argument shapes. Calls sharing a cache id
/// reuse launch parameters, buffer shapes and the argument layout computed by the first one.
#[derive(Debug, Clone, Default)]
pub struct KernelArgumentHolder {
    values: Vec<ArgValue>,
    device_index: usize,
    cache_id: Option<u64>,
}

impl KernelArgumentHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values<V: Into<ArgValue>>(values: impl IntoIterator<Item = V>) -> Self {
        Self { values: values.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn push(&mut self, value: impl Into<ArgValue>) {
        self.values.push(value.into());
    }

    pub fn with_cache_id(mut self, cache_id: u64) -> Self {
        self.cache_id = Some(cache_id);
        self
    }

    pub fn set_cache_id(&mut self, cache_id: Option<u64>) {
        self.cache_id = cache_id;
    }

    pub fn cache_id(&self) -> Option<u64> {
        self.cache_id
    }

    pub fn with_device_index(mut self, device_index: usize) -> Self {
        self.device_index = device_index;
        self
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.values.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArgValue> {
        self.values.iter()
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Buffer> {
        self.values.iter().filter_map(ArgValue::as_tensor)
    }

    /// Narrowest index width able to address every tensor argument.
    pub fn smallest_index_type(&self) -> IndexType {
        let widest = self.tensors().map(|buffer| buffer.layout().max_offset().max(buffer.numel())).max();
        widest.map_or(IndexType::Int32, IndexType::smallest_for)
    }
}

impl<'a> IntoIterator for &'a KernelArgumentHolder {
    type Item = &'a ArgValue;
    type IntoIter = std::slice::Iter<'a, ArgValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
