//! Shape and type inference for rewire graphs.
//!
//! # About shape inference
//!
//! Graph rewrites frequently depend on knowledge of the shapes and element
//! types of values in the graph. These shapes are often only partially
//! known. In a typical vision model for example, the input has a dynamic
//! batch size, while the channel count is fixed.
//!
//! Shapes are represented by [`PartialShape`], which either has an unknown
//! rank or a list of [`Dimension`]s. A dimension is an interval of possible
//! sizes, so a static size of 3 is `[3, 3]` and a fully unknown size is
//! `[0, ∞)`.
//!
//! # Labels
//!
//! Two unknown dimensions can be known to be equal without knowing their
//! size. This is expressed by attaching the same [`Label`] to both. Labels
//! also propagate through the _values_ of shape vectors. As an example:
//!
//! ```text
//! S = ShapeOf(Image)            // value labels [A, -, B, C]
//! H = Gather(S, indices=[2])    // value labels [B]
//! W = Gather(S, indices=[3])    // value labels [C]
//! HW = Concat<axis=0>(H, W)     // value labels [B, C]
//! Out = Reshape(Other, HW)      // shape [?<B>, ?<C>]
//! ```
//!
//! Here the shape of `Out` is unknown, but its dimensions are known to equal
//! the height and width of `Image`.
//!
//! # Crate overview
//!
//! The main export of this crate is the [`InferShapes`] trait, plus types
//! which implement it in [`ops`] and [`infer_shapes`]. Operators with the
//! same inference rules share an implementation, so there is an M:1 mapping
//! between operators and implementations. A subset of operators also
//! implement [`EvaluateLabels`] to propagate value labels.

mod dimension;
mod element_type;
pub mod infer_shapes;
mod label_gen;
mod labels;
pub mod ops;
mod partial_shape;
mod value;

pub use dimension::{Dimension, Label};
pub use element_type::{ElementType, ParseElementTypeError};
pub use infer_shapes::{
    normalize_axes, normalize_axis, AutoBroadcast, BinaryOp, ComparisonOp, Convert, InferShapes,
    InferShapesError, ReductionOp, UnaryOp,
};
pub use label_gen::LabelGen;
pub use labels::EvaluateLabels;
pub use partial_shape::PartialShape;
pub use value::{ConstValue, InputValues, TensorInfo, TensorLabels};
