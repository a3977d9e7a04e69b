//! Materialized tensor values, used by constants and constant folding.

use std::iter::repeat;

use rewire_shape_inference::{ConstValue, ElementType, TensorInfo};
use smallvec::SmallVec;

/// Errors when constructing or transforming a [`Tensor`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TensorError {
    #[error("data length {len} does not match shape {shape:?}")]
    ShapeMismatch { len: usize, shape: Vec<usize> },

    #[error("data does not match element type {0}")]
    TypeMismatch(ElementType),

    #[error("cannot convert {from} tensor to {to}")]
    UnsupportedConversion { from: ElementType, to: ElementType },
}

/// Element storage of a tensor.
///
/// Real types are stored as `f32`, integer types as `i64`.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Float(Vec<f32>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float(v) => v.len(),
            TensorData::Int(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches_type(&self, element_type: ElementType) -> bool {
        match self {
            TensorData::Float(_) => element_type.is_real(),
            TensorData::Int(_) => element_type.is_integral(),
            TensorData::Bool(_) => element_type == ElementType::Boolean,
        }
    }
}

/// A tensor with a static shape and materialized, row-major elements.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    element_type: ElementType,
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    pub fn new(
        element_type: ElementType,
        shape: Vec<usize>,
        data: TensorData,
    ) -> Result<Tensor, TensorError> {
        if !data.matches_type(element_type) {
            return Err(TensorError::TypeMismatch(element_type));
        }
        if shape.iter().product::<usize>() != data.len() {
            return Err(TensorError::ShapeMismatch {
                len: data.len(),
                shape,
            });
        }
        Ok(Tensor {
            element_type,
            shape,
            data,
        })
    }

    pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Tensor, TensorError> {
        Tensor::new(ElementType::F32, shape.to_vec(), TensorData::Float(data))
    }

    pub fn from_i64(shape: &[usize], data: Vec<i64>) -> Result<Tensor, TensorError> {
        Tensor::new(ElementType::I64, shape.to_vec(), TensorData::Int(data))
    }

    pub fn scalar_f32(value: f32) -> Tensor {
        Tensor {
            element_type: ElementType::F32,
            shape: Vec::new(),
            data: TensorData::Float(vec![value]),
        }
    }

    pub fn scalar_i64(value: i64) -> Tensor {
        Tensor {
            element_type: ElementType::I64,
            shape: Vec::new(),
            data: TensorData::Int(vec![value]),
        }
    }

    /// Create a 1D `i64` tensor.
    pub fn vector_i64(values: Vec<i64>) -> Tensor {
        Tensor {
            element_type: ElementType::I64,
            shape: vec![values.len()],
            data: TensorData::Int(values),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn info(&self) -> TensorInfo {
        TensorInfo::from_static(self.element_type, &self.shape)
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match &self.data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Return the value of a single-element float tensor.
    pub fn item_f32(&self) -> Option<f32> {
        match self.as_f32()? {
            [x] => Some(*x),
            _ => None,
        }
    }

    /// Return the value of a single-element integer tensor.
    pub fn item_i64(&self) -> Option<i64> {
        match self.as_i64()? {
            [x] => Some(*x),
            _ => None,
        }
    }

    /// Return the elements in the form used by shape inference.
    pub fn to_const_value(&self) -> ConstValue {
        match &self.data {
            TensorData::Float(v) => ConstValue::Float(v.iter().map(|&x| x as f64).collect()),
            TensorData::Int(v) => ConstValue::Int(v.clone()),
            TensorData::Bool(v) => ConstValue::Bool(v.clone()),
        }
    }

    /// Change the shape without changing the elements.
    pub fn reshape(mut self, shape: Vec<usize>) -> Result<Tensor, TensorError> {
        if shape.iter().product::<usize>() != self.len() {
            return Err(TensorError::ShapeMismatch {
                len: self.len(),
                shape,
            });
        }
        self.shape = shape;
        Ok(self)
    }

    /// Convert elements to another type.
    pub fn convert(&self, to: ElementType) -> Result<Tensor, TensorError> {
        let unsupported = || TensorError::UnsupportedConversion {
            from: self.element_type,
            to,
        };
        let data = match (&self.data, to) {
            (_, ElementType::Dynamic) => return Err(unsupported()),
            (TensorData::Float(v), t) if t.is_real() => TensorData::Float(v.clone()),
            (TensorData::Float(v), t) if t.is_integral() => {
                TensorData::Int(v.iter().map(|&x| x as i64).collect())
            }
            (TensorData::Float(v), _) => TensorData::Bool(v.iter().map(|&x| x != 0.).collect()),
            (TensorData::Int(v), t) if t.is_real() => {
                TensorData::Float(v.iter().map(|&x| x as f32).collect())
            }
            (TensorData::Int(v), t) if t.is_integral() => {
                TensorData::Int(v.iter().map(|&x| wrap_int(x, t)).collect())
            }
            (TensorData::Int(v), _) => TensorData::Bool(v.iter().map(|&x| x != 0).collect()),
            (TensorData::Bool(v), t) if t.is_real() => {
                TensorData::Float(v.iter().map(|&x| x as i32 as f32).collect())
            }
            (TensorData::Bool(v), t) if t.is_integral() => {
                TensorData::Int(v.iter().map(|&x| x as i64).collect())
            }
            (TensorData::Bool(v), _) => TensorData::Bool(v.clone()),
        };
        Tensor::new(to, self.shape.clone(), data)
    }
}

/// Truncate an integer to the range of a narrower integer type.
fn wrap_int(x: i64, to: ElementType) -> i64 {
    match to {
        ElementType::I8 => x as i8 as i64,
        ElementType::I32 => x as i32 as i64,
        ElementType::U8 => x as u8 as i64,
        _ => x,
    }
}

/// Given the shapes of two inputs to a binary operation, return the shape
/// that will result from broadcasting them following NumPy rules or `None`
/// if the shapes are not compatible.
///
/// Broadcasting works by left-padding the input shapes with 1s so they are
/// the same length, then matching dimensions starting from the right. For
/// each dimension, the values are compatible if they are the same or one of
/// them is 1.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<SmallVec<[usize; 4]>> {
    let a_pad = b.len().saturating_sub(a.len());
    let b_pad = a.len().saturating_sub(b.len());

    let a_iter = a.iter().copied().rev().chain(repeat(1).take(a_pad));
    let b_iter = b.iter().copied().rev().chain(repeat(1).take(b_pad));

    let mut result = SmallVec::with_capacity(a.len().max(b.len()));
    for (a, b) in a_iter.zip(b_iter) {
        if a == b {
            result.push(a);
        } else if a == 1 {
            result.push(b);
        } else if b == 1 {
            result.push(a);
        } else {
            return None;
        }
    }
    result.reverse();

    Some(result)
}

/// Return strides for indexing a tensor of `shape` as if it had been
/// broadcast to `out_shape`. Broadcast dimensions have a stride of zero.
fn broadcast_strides(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let pad = out_shape.len() - shape.len();
    let mut strides = vec![0; out_shape.len()];
    let mut stride = 1;
    for i in (0..shape.len()).rev() {
        if shape[i] != 1 {
            strides[pad + i] = stride;
        }
        stride *= shape[i];
    }
    strides
}

/// Apply a binary function to two buffers with NumPy broadcasting.
///
/// Returns the output shape and elements, or `None` if the shapes can't be
/// broadcast.
pub fn broadcast_map<T: Copy, U>(
    a: (&[usize], &[T]),
    b: (&[usize], &[T]),
    mut f: impl FnMut(T, T) -> U,
) -> Option<(Vec<usize>, Vec<U>)> {
    let (a_shape, a_data) = a;
    let (b_shape, b_data) = b;
    let out_shape = broadcast_shapes(a_shape, b_shape)?.to_vec();
    let a_strides = broadcast_strides(a_shape, &out_shape);
    let b_strides = broadcast_strides(b_shape, &out_shape);

    let len: usize = out_shape.iter().product();
    let mut index = vec![0; out_shape.len()];
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let a_offset: usize = index.iter().zip(&a_strides).map(|(i, s)| i * s).sum();
        let b_offset: usize = index.iter().zip(&b_strides).map(|(i, s)| i * s).sum();
        out.push(f(a_data[a_offset], b_data[b_offset]));

        // Advance the output index, last dimension fastest.
        for dim in (0..out_shape.len()).rev() {
            index[dim] += 1;
            if index[dim] < out_shape[dim] {
                break;
            }
            index[dim] = 0;
        }
    }
    Some((out_shape, out))
}
