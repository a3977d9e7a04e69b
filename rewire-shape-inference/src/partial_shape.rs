use std::fmt;

use smallvec::SmallVec;

use crate::dimension::{Dimension, Label};

/// Shape of a tensor where the rank, and any of the dimensions, may be
/// unknown.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct PartialShape {
    /// Dimensions of the shape, or `None` if the rank is unknown.
    dims: Option<SmallVec<[Dimension; 4]>>,
}

impl PartialShape {
    /// Create a shape with unknown rank.
    pub fn dynamic() -> PartialShape {
        PartialShape { dims: None }
    }

    /// Create a shape with known rank but unknown dimensions.
    pub fn dynamic_of_rank(rank: usize) -> PartialShape {
        PartialShape::from_dims(std::iter::repeat_n(Dimension::dynamic(), rank))
    }

    /// Create a fully static shape.
    pub fn from_static(shape: &[usize]) -> PartialShape {
        PartialShape::from_dims(shape.iter().copied().map(Dimension::fixed))
    }

    pub fn from_dims<I: IntoIterator<Item = Dimension>>(dims: I) -> PartialShape {
        PartialShape {
            dims: Some(dims.into_iter().collect()),
        }
    }

    /// Return the rank, if known.
    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|d| d.len())
    }

    pub fn is_rank_static(&self) -> bool {
        self.dims.is_some()
    }

    /// Return true if the rank and all dimensions are known.
    pub fn is_static(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(|d| d.is_static()))
    }

    pub fn is_dynamic(&self) -> bool {
        !self.is_static()
    }

    /// Return the dimensions, or `None` if the rank is unknown.
    pub fn dims(&self) -> Option<&[Dimension]> {
        self.dims.as_deref()
    }

    pub fn dims_mut(&mut self) -> Option<&mut [Dimension]> {
        self.dims.as_deref_mut()
    }

    /// Return the dimension at `index`, if the rank is known and `index` is
    /// in bounds.
    pub fn dim(&self, index: usize) -> Option<&Dimension> {
        self.dims().and_then(|d| d.get(index))
    }

    /// Convert to a concrete shape, if this shape is static.
    pub fn to_shape(&self) -> Option<Vec<usize>> {
        self.dims()?.iter().map(|d| d.get_length()).collect()
    }

    /// Return the smallest shape this shape can have, if the rank is known.
    pub fn min_shape(&self) -> Option<Vec<usize>> {
        Some(self.dims()?.iter().map(|d| d.min_length()).collect())
    }

    /// Return the labels of each dimension, if the rank is known.
    pub fn labels(&self) -> Option<Vec<Option<Label>>> {
        Some(self.dims()?.iter().map(|d| d.label()).collect())
    }

    /// Return true if any dimension carries a label.
    pub fn has_labels(&self) -> bool {
        self.dims()
            .is_some_and(|dims| dims.iter().any(|d| d.label().is_some()))
    }

    /// Insert a dimension at `index`.
    ///
    /// Does nothing if the rank is unknown.
    pub fn insert(&mut self, index: usize, dim: Dimension) {
        if let Some(dims) = self.dims.as_mut() {
            dims.insert(index, dim);
        }
    }

    /// Append a dimension.
    ///
    /// Does nothing if the rank is unknown.
    pub fn push(&mut self, dim: Dimension) {
        if let Some(dims) = self.dims.as_mut() {
            dims.push(dim);
        }
    }

    /// Return true if there is a concrete shape that both shapes could have.
    pub fn compatible(&self, other: &PartialShape) -> bool {
        self.merge(other).is_some()
    }

    /// Merge two shapes which are required to be equal.
    ///
    /// A shape of unknown rank merges with anything. Otherwise ranks must
    /// match and dimensions are merged pairwise.
    pub fn merge(&self, other: &PartialShape) -> Option<PartialShape> {
        let (a, b) = match (self.dims(), other.dims()) {
            (None, _) => return Some(other.clone()),
            (_, None) => return Some(self.clone()),
            (Some(a), Some(b)) => (a, b),
        };
        if a.len() != b.len() {
            return None;
        }
        let dims = a
            .iter()
            .zip(b)
            .map(|(a, b)| a.merge(b))
            .collect::<Option<SmallVec<_>>>()?;
        Some(PartialShape { dims: Some(dims) })
    }

    /// Broadcast two shapes together following numpy rules.
    ///
    /// If either rank is unknown, the result has unknown rank. Returns `None`
    /// if the shapes cannot be broadcast.
    pub fn broadcast(&self, other: &PartialShape) -> Option<PartialShape> {
        let (Some(a), Some(b)) = (self.dims(), other.dims()) else {
            return Some(PartialShape::dynamic());
        };

        let rank = a.len().max(b.len());
        let a_pad = rank - a.len();
        let b_pad = rank - b.len();
        let one = Dimension::fixed(1);

        let mut dims = SmallVec::with_capacity(rank);
        for i in 0..rank {
            let a_dim = if i < a_pad { one } else { a[i - a_pad] };
            let b_dim = if i < b_pad { one } else { b[i - b_pad] };
            dims.push(a_dim.broadcast_merge(&b_dim)?);
        }
        Some(PartialShape { dims: Some(dims) })
    }
}

impl From<&[usize]> for PartialShape {
    fn from(shape: &[usize]) -> PartialShape {
        PartialShape::from_static(shape)
    }
}

impl From<Vec<Dimension>> for PartialShape {
    fn from(dims: Vec<Dimension>) -> PartialShape {
        PartialShape::from_dims(dims)
    }
}

impl FromIterator<Dimension> for PartialShape {
    fn from_iter<I: IntoIterator<Item = Dimension>>(iter: I) -> PartialShape {
        PartialShape::from_dims(iter)
    }
}

impl PartialShape {
    fn write_dims(&self, f: &mut fmt::Formatter<'_>, debug: bool) -> fmt::Result {
        let Some(dims) = self.dims() else {
            return write!(f, "[...]");
        };
        write!(f, "[")?;
        for (i, dim) in dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if debug {
                write!(f, "{:?}", dim)?;
            } else {
                write!(f, "{}", dim)?;
            }
        }
        write!(f, "]")
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_dims(f, false)
    }
}

impl fmt::Debug for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_dims(f, true)
    }
}

/// Create a [`PartialShape`] from a list of sizes, where `?` denotes a
/// dynamic dimension.
///
/// ```
/// use rewire_shape_inference::{pshape, Dimension, PartialShape};
///
/// let shape = pshape![2, ?, 4];
/// assert_eq!(shape.dim(1), Some(&Dimension::dynamic()));
/// ```
#[macro_export]
macro_rules! pshape {
    (@dim ?) => {
        $crate::Dimension::dynamic()
    };
    (@dim $size:expr) => {
        $crate::Dimension::fixed($size)
    };
    ($($dim:tt),* $(,)?) => {
        $crate::PartialShape::from_dims([$($crate::pshape!(@dim $dim)),*])
    };
}

#[cfg(test)]
mod tests {
    use rewire_testing::TestCases;

    use super::PartialShape;
    use crate::{Dimension, Label};

    #[test]
    fn test_broadcast() {
        #[derive(Debug)]
        struct Case {
            lhs: PartialShape,
            rhs: PartialShape,
            expected: Option<PartialShape>,
        }

        let cases = [
            Case {
                lhs: pshape![2, 3],
                rhs: pshape![2, 3],
                expected: Some(pshape![2, 3]),
            },
            Case {
                lhs: pshape![1, 5],
                rhs: pshape![4, 1],
                expected: Some(pshape![4, 5]),
            },
            Case {
                lhs: pshape![8, 1, 6],
                rhs: pshape![7, 1],
                expected: Some(pshape![8, 7, 6]),
            },
            Case {
                lhs: pshape![?, 3],
                rhs: pshape![3],
                expected: Some(pshape![?, 3]),
            },
            Case {
                lhs: pshape![5],
                rhs: pshape![3],
                expected: None,
            },
            Case {
                lhs: PartialShape::dynamic(),
                rhs: pshape![3],
                expected: Some(PartialShape::dynamic()),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.lhs.broadcast(&case.rhs), case.expected);
        });
    }

    #[test]
    fn test_merge() {
        let a = pshape![2, ?, 4];
        let b = pshape![?, 3, 4];
        assert_eq!(a.merge(&b), Some(pshape![2, 3, 4]));
        assert_eq!(a.merge(&pshape![2, 3]), None);
        assert_eq!(a.merge(&PartialShape::dynamic()), Some(a.clone()));
        assert!(!pshape![2, 3].compatible(&pshape![2, 4]));
    }

    #[test]
    fn test_static_queries() {
        let shape = pshape![2, 3];
        assert!(shape.is_static());
        assert_eq!(shape.to_shape(), Some(vec![2, 3]));

        let shape = pshape![2, ?];
        assert!(shape.is_dynamic());
        assert_eq!(shape.to_shape(), None);
        assert_eq!(shape.rank(), Some(2));
        assert_eq!(shape.min_shape(), Some(vec![2, 0]));

        assert_eq!(PartialShape::dynamic().rank(), None);
        assert_eq!(pshape![].rank(), Some(0));
    }

    #[test]
    fn test_labels() {
        let shape = PartialShape::from_dims([
            Dimension::dynamic().with_label(Label::new(1)),
            Dimension::fixed(3),
        ]);
        assert!(shape.has_labels());
        assert_eq!(shape.labels(), Some(vec![Label::new(1), None]));

        // Labels don't affect equality.
        assert_eq!(shape, pshape![?, 3]);
    }

    #[test]
    fn test_display() {
        assert_eq!(pshape![2, ?, 4].to_string(), "[2,?,4]");
        assert_eq!(PartialShape::dynamic().to_string(), "[...]");
    }
}
