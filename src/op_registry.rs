//! Registry of operator kinds, keyed by `(name, version)`.
//!
//! The registry is the dispatch table used to create operators from
//! attribute sets and to determine which kinds belong to an opset. It is
//! owned by a [`CompileSession`](crate::CompileSession) and passed to the
//! passes that need it.

use std::collections::BTreeMap;
use std::sync::Arc;

use rewire_shape_inference::{AutoBroadcast, ElementType, PartialShape};

use crate::operator::{AttrValue, Attributes, OpType, Operator};
use crate::ops;
use crate::tensor::{Tensor, TensorData};

/// Errors when creating an operator from attributes.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ReadOpError {
    /// A required attribute is not set.
    #[error("required attribute \"{0}\" is missing")]
    MissingAttribute(String),

    /// An attribute has the wrong type or an unsupported value.
    #[error("attribute \"{name}\" is invalid: {error}")]
    InvalidAttribute { name: String, error: String },

    /// The operator kind is not registered.
    #[error("operator {0} is not registered")]
    UnknownOperator(String),

    /// The operator kind is registered but needs more than attributes to be
    /// created, such as a body graph.
    #[error("operator {0} cannot be created from attributes")]
    NotConstructible(String),
}

impl ReadOpError {
    fn invalid(name: &str, error: impl Into<String>) -> ReadOpError {
        ReadOpError::InvalidAttribute {
            name: name.to_string(),
            error: error.into(),
        }
    }
}

type ReadOpResult = Result<Arc<dyn Operator>, ReadOpError>;

type ReadOpFunction = dyn Fn(&Attributes) -> ReadOpResult + Send + Sync;

/// Operators which can be created from an attribute set.
pub trait ReadOp: Operator + Sized {
    /// Return the identity of this operator kind.
    fn op_type() -> OpType;

    /// Create the operator from its attributes.
    fn read(attrs: &Attributes) -> Result<Self, ReadOpError>;

    /// Create the operator as a `dyn Operator`.
    fn read_arc(attrs: &Attributes) -> ReadOpResult {
        let op = Self::read(attrs)?;
        Ok(Arc::new(op))
    }
}

/// Registry of operator kinds.
///
/// New registries are empty. Use [`OpRegistry::with_all_ops`] to create a
/// registry with all built-in operators.
#[derive(Default)]
pub struct OpRegistry {
    /// Factory for each kind. Kinds which can't be created from attributes
    /// have no factory.
    ops: BTreeMap<OpType, Option<Box<ReadOpFunction>>>,
}

impl std::fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ops.keys()).finish()
    }
}

impl OpRegistry {
    pub fn new() -> OpRegistry {
        OpRegistry::default()
    }

    /// Register an operator kind which can be created from attributes.
    pub fn register_op<Op: ReadOp + 'static>(&mut self) {
        self.ops.insert(<Op as ReadOp>::op_type(), Some(Box::new(Op::read_arc)));
    }

    /// Register an operator kind which can't be created from attributes
    /// alone, so that it counts as part of its opsets.
    pub fn register_kind(&mut self, op_type: OpType) {
        self.ops.insert(op_type, None);
    }

    pub fn contains(&self, op_type: OpType) -> bool {
        self.ops.contains_key(&op_type)
    }

    /// Create an operator of kind `op_type`.
    pub fn create(&self, op_type: OpType, attrs: &Attributes) -> ReadOpResult {
        match self.ops.get(&op_type) {
            Some(Some(read)) => read(attrs),
            Some(None) => Err(ReadOpError::NotConstructible(op_type.to_string())),
            None => Err(ReadOpError::UnknownOperator(op_type.to_string())),
        }
    }

    /// Create an operator by name, using the latest version which is not
    /// newer than `max_version`.
    pub fn create_latest(&self, name: &str, max_version: u32, attrs: &Attributes) -> ReadOpResult {
        let op_type = self
            .latest(name, max_version)
            .ok_or_else(|| ReadOpError::UnknownOperator(name.to_string()))?;
        self.create(op_type, attrs)
    }

    /// Return the registered versions of operator `name` in ascending order.
    pub fn versions(&self, name: &str) -> Vec<u32> {
        self.ops
            .keys()
            .filter(|op_type| op_type.name == name)
            .map(|op_type| op_type.version)
            .collect()
    }

    /// Return the latest version of operator `name` which is not newer than
    /// `max_version`.
    pub fn latest(&self, name: &str, max_version: u32) -> Option<OpType> {
        self.ops
            .keys()
            .filter(|op_type| op_type.name == name && op_type.version <= max_version)
            .next_back()
            .copied()
    }

    /// Return the kinds that make up opset `version`.
    ///
    /// For each operator name, the opset contains the latest variant
    /// introduced in or before that opset.
    pub fn opset(&self, version: u32) -> Vec<OpType> {
        let mut latest: BTreeMap<&'static str, OpType> = BTreeMap::new();
        for op_type in self.ops.keys() {
            if op_type.version > 0 && op_type.version <= version {
                latest.insert(op_type.name, *op_type);
            }
        }
        latest.into_values().collect()
    }

    /// Return true if `op_type` is the variant of its operator used by
    /// opset `version`.
    pub fn is_in_opset(&self, op_type: OpType, version: u32) -> bool {
        op_type.version > 0 && self.latest(op_type.name, version) == Some(op_type)
    }

    /// Create a registry with all built-in operators registered.
    pub fn with_all_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();

        macro_rules! register_op {
            ($op:ident) => {
                reg.register_op::<ops::$op>()
            };
        }

        register_op!(Abs);
        register_op!(Add);
        register_op!(Clamp);
        register_op!(Concat);
        register_op!(Constant);
        register_op!(Convert);
        register_op!(Dft);
        register_op!(Divide);
        register_op!(Equal);
        register_op!(Erf);
        register_op!(Exp);
        register_op!(FakeQuantize);
        register_op!(Gather);
        register_op!(Gather7);
        register_op!(Gather8);
        register_op!(Gelu);
        register_op!(HSigmoid);
        register_op!(Maximum);
        register_op!(Minimum);
        register_op!(Multiply);
        register_op!(Negative);
        register_op!(Parameter);
        register_op!(Power);
        register_op!(ReduceLogicalAnd);
        register_op!(ReduceLogicalOr);
        register_op!(ReduceMax);
        register_op!(ReduceMean);
        register_op!(ReduceMin);
        register_op!(ReduceSum);
        register_op!(Relu);
        register_op!(Reshape);
        register_op!(ResultOp);
        register_op!(ShapeOf);
        register_op!(ShapeOf3);
        register_op!(Sigmoid);
        register_op!(Sign);
        register_op!(Softmax);
        register_op!(Softmax8);
        register_op!(SoftSign);
        register_op!(Sqrt);
        register_op!(Squeeze);
        register_op!(Subtract);
        register_op!(Tanh);
        register_op!(Transpose);
        register_op!(Unsqueeze);

        reg.register_kind(OpType::new("Loop", 5));

        reg
    }
}

/// Get a required attribute using one of the typed getters of [`Attributes`].
fn require<'a, T>(
    attrs: &'a Attributes,
    name: &str,
    get: impl Fn(&'a Attributes, &str) -> Option<T>,
) -> Result<T, ReadOpError> {
    match get(attrs, name) {
        Some(value) => Ok(value),
        None if attrs.get(name).is_none() => Err(ReadOpError::MissingAttribute(name.to_string())),
        None => Err(ReadOpError::invalid(name, "unexpected type")),
    }
}

/// Get an optional attribute, falling back to `default` if it is not set.
fn optional<'a, T>(
    attrs: &'a Attributes,
    name: &str,
    get: impl Fn(&'a Attributes, &str) -> Option<T>,
    default: T,
) -> Result<T, ReadOpError> {
    if attrs.get(name).is_none() {
        return Ok(default);
    }
    require(attrs, name, get)
}

fn read_auto_broadcast(attrs: &Attributes) -> Result<AutoBroadcast, ReadOpError> {
    match optional(attrs, "auto_broadcast", Attributes::get_string, "numpy")? {
        "numpy" => Ok(AutoBroadcast::Numpy),
        "none" => Ok(AutoBroadcast::None),
        other => Err(ReadOpError::invalid(
            "auto_broadcast",
            format!("unsupported mode \"{}\"", other),
        )),
    }
}

fn read_constant(attrs: &Attributes) -> Result<Tensor, ReadOpError> {
    let element_type = require(attrs, "element_type", Attributes::get_element_type)?;
    let shape = require(attrs, "shape", Attributes::get_shape)?
        .to_shape()
        .ok_or_else(|| ReadOpError::invalid("shape", "constant shape must be static"))?;
    let data = match attrs.get("value") {
        Some(AttrValue::Ints(values)) if element_type.is_integral() => {
            TensorData::Int(values.clone())
        }
        Some(AttrValue::Ints(values)) if element_type == ElementType::Boolean => {
            TensorData::Bool(values.iter().map(|&v| v != 0).collect())
        }
        Some(AttrValue::Floats(values)) if element_type.is_real() => {
            TensorData::Float(values.iter().map(|&v| v as f32).collect())
        }
        Some(_) => return Err(ReadOpError::invalid("value", "does not match element type")),
        None => return Err(ReadOpError::MissingAttribute("value".to_string())),
    };
    Tensor::new(element_type, shape, data).map_err(|err| ReadOpError::invalid("value", err.to_string()))
}

macro_rules! impl_read_op {
    ($op:ident, $name:expr, $version:literal) => {
        impl ReadOp for ops::$op {
            fn op_type() -> OpType {
                OpType::new($name, $version)
            }

            fn read(_attrs: &Attributes) -> Result<Self, ReadOpError> {
                Ok(ops::$op)
            }
        }
    };

    ($op:ident, $name:expr, $version:literal, |$attrs:ident| $read:expr) => {
        impl ReadOp for ops::$op {
            fn op_type() -> OpType {
                OpType::new($name, $version)
            }

            fn read($attrs: &Attributes) -> Result<Self, ReadOpError> {
                $read
            }
        }
    };
}

macro_rules! impl_read_binary_op {
    ($($op:ident),* $(,)?) => {
        $(
            impl_read_op!($op, stringify!($op), 1, |attrs| Ok(ops::$op {
                auto_broadcast: read_auto_broadcast(attrs)?,
            }));
        )*
    };
}

macro_rules! impl_read_reduction_op {
    ($($op:ident),* $(,)?) => {
        $(
            impl_read_op!($op, stringify!($op), 1, |attrs| Ok(ops::$op {
                keep_dims: optional(attrs, "keep_dims", Attributes::get_bool, false)?,
            }));
        )*
    };
}

impl_read_op!(Abs, "Abs", 1);
impl_read_op!(Erf, "Erf", 1);
impl_read_op!(Exp, "Exp", 1);
impl_read_op!(HSigmoid, "HSigmoid", 5);
impl_read_op!(Negative, "Negative", 1);
impl_read_op!(Relu, "Relu", 1);
impl_read_op!(ResultOp, "Result", 1);
impl_read_op!(Sigmoid, "Sigmoid", 1);
impl_read_op!(Sign, "Sign", 1);
impl_read_op!(SoftSign, "SoftSign", 9);
impl_read_op!(Sqrt, "Sqrt", 1);
impl_read_op!(Squeeze, "Squeeze", 1);
impl_read_op!(Tanh, "Tanh", 1);
impl_read_op!(Transpose, "Transpose", 1);
impl_read_op!(Unsqueeze, "Unsqueeze", 1);
impl_read_op!(Dft, "DFT", 7);
impl_read_op!(ShapeOf, "ShapeOf", 1);
impl_read_op!(Gather, "Gather", 1);

impl_read_binary_op!(Add, Divide, Equal, Maximum, Minimum, Multiply, Power, Subtract);
impl_read_reduction_op!(
    ReduceLogicalAnd,
    ReduceLogicalOr,
    ReduceMax,
    ReduceMean,
    ReduceMin,
    ReduceSum,
);

impl_read_op!(Clamp, "Clamp", 1, |attrs| Ok(ops::Clamp {
    min: require(attrs, "min", Attributes::get_float)?,
    max: require(attrs, "max", Attributes::get_float)?,
}));

impl_read_op!(Concat, "Concat", 1, |attrs| Ok(ops::Concat {
    axis: require(attrs, "axis", Attributes::get_int)?,
}));

impl_read_op!(Constant, "Constant", 1, |attrs| Ok(ops::Constant {
    value: read_constant(attrs)?,
}));

impl_read_op!(Convert, "Convert", 1, |attrs| Ok(ops::Convert {
    to: require(attrs, "destination_type", Attributes::get_element_type)?,
}));

impl_read_op!(FakeQuantize, "FakeQuantize", 1, |attrs| {
    let levels = require(attrs, "levels", Attributes::get_int)?;
    Ok(ops::FakeQuantize {
        levels: u64::try_from(levels)
            .map_err(|_| ReadOpError::invalid("levels", "must be non-negative"))?,
        auto_broadcast: read_auto_broadcast(attrs)?,
    })
});

impl_read_op!(Gather7, "Gather", 7, |attrs| Ok(ops::Gather7 {
    batch_dims: optional(attrs, "batch_dims", Attributes::get_int, 0)?,
}));

impl_read_op!(Gather8, "Gather", 8, |attrs| Ok(ops::Gather8 {
    batch_dims: optional(attrs, "batch_dims", Attributes::get_int, 0)?,
}));

impl_read_op!(Gelu, "Gelu", 7, |attrs| {
    let approximation = match optional(attrs, "approximation_mode", Attributes::get_string, "erf")? {
        "erf" => ops::GeluApproximation::Erf,
        "tanh" => ops::GeluApproximation::Tanh,
        other => {
            return Err(ReadOpError::invalid(
                "approximation_mode",
                format!("unsupported mode \"{}\"", other),
            ))
        }
    };
    Ok(ops::Gelu { approximation })
});

impl_read_op!(Parameter, "Parameter", 1, |attrs| Ok(ops::Parameter {
    element_type: require(attrs, "element_type", Attributes::get_element_type)?,
    shape: optional(
        attrs,
        "shape",
        |attrs, name| attrs.get_shape(name).cloned(),
        PartialShape::dynamic(),
    )?,
}));

impl_read_op!(Reshape, "Reshape", 1, |attrs| Ok(ops::Reshape {
    special_zero: require(attrs, "special_zero", Attributes::get_bool)?,
}));

impl_read_op!(ShapeOf3, "ShapeOf", 3, |attrs| Ok(ops::ShapeOf3 {
    output_type: optional(attrs, "output_type", Attributes::get_element_type, ElementType::I64)?,
}));

impl_read_op!(Softmax, "Softmax", 1, |attrs| {
    let axis = optional(attrs, "axis", Attributes::get_int, 1)?;
    Ok(ops::Softmax {
        axis: usize::try_from(axis)
            .map_err(|_| ReadOpError::invalid("axis", "must be non-negative"))?,
    })
});

impl_read_op!(Softmax8, "Softmax", 8, |attrs| Ok(ops::Softmax8 {
    axis: optional(attrs, "axis", Attributes::get_int, 1)?,
}));

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rewire_shape_inference::{pshape, AutoBroadcast, ElementType};

    use super::{OpRegistry, ReadOpError};
    use crate::operator::{Attributes, OpType, Operator};
    use crate::ops;
    use crate::tensor::Tensor;

    #[test]
    fn test_attribute_round_trip() {
        let reg = OpRegistry::with_all_ops();
        let ops: Vec<Arc<dyn Operator>> = vec![
            Arc::new(ops::Add {
                auto_broadcast: AutoBroadcast::None,
            }),
            Arc::new(ops::Clamp { min: -1., max: 6. }),
            Arc::new(ops::Concat { axis: -2 }),
            Arc::new(ops::Constant {
                value: Tensor::from_i64(&[2], vec![3, 4]).unwrap(),
            }),
            Arc::new(ops::Convert {
                to: ElementType::U8,
            }),
            Arc::new(ops::FakeQuantize {
                levels: 256,
                auto_broadcast: AutoBroadcast::Numpy,
            }),
            Arc::new(ops::Gather8 { batch_dims: -1 }),
            Arc::new(ops::Gelu {
                approximation: ops::GeluApproximation::Tanh,
            }),
            Arc::new(ops::Parameter {
                element_type: ElementType::F16,
                shape: pshape![?, 3],
            }),
            Arc::new(ops::ReduceMean { keep_dims: true }),
            Arc::new(ops::Reshape { special_zero: true }),
            Arc::new(ops::ShapeOf3 {
                output_type: ElementType::I32,
            }),
            Arc::new(ops::Softmax { axis: 2 }),
            Arc::new(ops::Softmax8 { axis: -1 }),
            Arc::new(ops::Unsqueeze),
        ];

        for op in ops {
            let mut attrs = Attributes::from_op(op.as_ref());
            if let Some(constant) = op.downcast_ref::<ops::Constant>() {
                let values = constant.value.as_i64().unwrap().to_vec();
                attrs = attrs.with("value", values);
            }
            let created = reg.create(op.op_type(), &attrs).unwrap();
            assert_eq!(created.op_type(), op.op_type());
            assert_eq!(
                Attributes::from_op(created.as_ref()),
                Attributes::from_op(op.as_ref()),
                "attributes of {} differ",
                op.op_type()
            );
        }
    }

    #[test]
    fn test_register_op() {
        let mut reg = OpRegistry::new();
        reg.register_op::<ops::Relu>();

        let relu = OpType::new("Relu", 1);
        let op = reg.create(relu, &Attributes::new()).unwrap();
        assert_eq!(op.op_type(), relu);
        assert_eq!(reg.versions("Relu"), [1]);

        let err = reg.create(OpType::new("Erf", 1), &Attributes::new()).err();
        assert!(matches!(err, Some(ReadOpError::UnknownOperator(_))));
    }

    #[test]
    fn test_missing_and_invalid_attributes() {
        let reg = OpRegistry::with_all_ops();
        let concat = OpType::new("Concat", 1);

        let err = reg.create(concat, &Attributes::new()).err();
        assert_eq!(err, Some(ReadOpError::MissingAttribute("axis".into())));

        let attrs = Attributes::new().with("axis", "zero");
        let err = reg.create(concat, &attrs).err();
        assert!(matches!(err, Some(ReadOpError::InvalidAttribute { .. })));

        let err = reg.create(OpType::new("Loop", 5), &Attributes::new()).err();
        assert!(matches!(err, Some(ReadOpError::NotConstructible(_))));

        let err = reg.create(OpType::new("Einsum", 7), &Attributes::new()).err();
        assert!(matches!(err, Some(ReadOpError::UnknownOperator(_))));
    }

    #[test]
    fn test_opsets() {
        let reg = OpRegistry::with_all_ops();
        assert_eq!(reg.versions("Gather"), [1, 7, 8]);
        assert_eq!(reg.latest("Gather", 7), Some(OpType::new("Gather", 7)));
        assert_eq!(reg.latest("Gelu", 6), None);

        let opset7 = reg.opset(7);
        assert!(opset7.contains(&OpType::new("Gather", 7)));
        assert!(!opset7.contains(&OpType::new("Gather", 8)));
        assert!(opset7.contains(&OpType::new("ShapeOf", 3)));

        assert!(reg.is_in_opset(OpType::new("Softmax", 1), 7));
        assert!(!reg.is_in_opset(OpType::new("Softmax", 8), 7));
        assert!(!reg.is_in_opset(OpType::new("Softmax", 1), 8));
        assert!(!reg.is_in_opset(OpType::new("FrameworkNode", 0), 8));
    }

    #[test]
    fn test_create_latest() {
        let reg = OpRegistry::with_all_ops();
        let op = reg
            .create_latest("Softmax", 7, &Attributes::new().with("axis", 1i64))
            .unwrap();
        assert_eq!(op.op_type(), OpType::new("Softmax", 1));
    }
}
