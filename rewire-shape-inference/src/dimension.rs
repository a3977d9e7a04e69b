use std::fmt;
use std::num::NonZero;
use std::ops::Add;

/// Opaque tag attached to a dimension or a value element.
///
/// Two dimensions with the same label are known to have the same size, even
/// if that size is not known. Labels are generated by a [`LabelGen`](crate::LabelGen).
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Label(NonZero<u64>);

impl Label {
    /// Create a label from its numeric ID. Returns `None` for zero, which is
    /// reserved to mean "no label" in flat label buffers.
    pub fn new(id: u64) -> Option<Label> {
        NonZero::new(id).map(Label)
    }

    pub fn id(self) -> u64 {
        self.0.get()
    }
}

impl From<NonZero<u64>> for Label {
    fn from(id: NonZero<u64>) -> Label {
        Label(id)
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.id())
    }
}

/// Size of a tensor dimension.
///
/// A dimension is an interval `[min, max]` of possible sizes, where `max` may
/// be unbounded. A static dimension has `min == max`. A dimension may also
/// carry a [`Label`].
///
/// Equality and hashing consider only the interval. Labels are compared
/// separately using [`label`](Dimension::label).
#[derive(Copy, Clone)]
pub struct Dimension {
    min: usize,
    max: Option<usize>,
    label: Option<Label>,
}

impl Dimension {
    /// Create a dimension with a known size.
    pub const fn fixed(size: usize) -> Dimension {
        Dimension {
            min: size,
            max: Some(size),
            label: None,
        }
    }

    /// Create a dimension whose size is entirely unknown.
    pub const fn dynamic() -> Dimension {
        Dimension {
            min: 0,
            max: None,
            label: None,
        }
    }

    /// Create a dimension whose size is in `[min, max]`.
    ///
    /// Returns a dynamic dimension if `max < min`.
    pub fn bounded(min: usize, max: Option<usize>) -> Dimension {
        match max {
            Some(max) if max < min => Dimension::dynamic(),
            _ => Dimension {
                min,
                max,
                label: None,
            },
        }
    }

    pub fn with_label(mut self, label: Option<Label>) -> Dimension {
        self.label = label;
        self
    }

    pub fn label(&self) -> Option<Label> {
        self.label
    }

    pub fn set_label(&mut self, label: Option<Label>) {
        self.label = label;
    }

    pub fn is_static(&self) -> bool {
        self.max == Some(self.min)
    }

    pub fn is_dynamic(&self) -> bool {
        !self.is_static()
    }

    /// Return the size if this dimension is static.
    pub fn get_length(&self) -> Option<usize> {
        if self.is_static() {
            Some(self.min)
        } else {
            None
        }
    }

    pub fn min_length(&self) -> usize {
        self.min
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max
    }

    /// Return true if `size` is a possible size for this dimension.
    pub fn contains(&self, size: usize) -> bool {
        size >= self.min && self.max.is_none_or(|max| size <= max)
    }

    /// Return true if there is a size that both dimensions could have.
    pub fn compatible(&self, other: &Dimension) -> bool {
        self.intersect(other).is_some()
    }

    fn intersect(&self, other: &Dimension) -> Option<(usize, Option<usize>)> {
        let min = self.min.max(other.min);
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match max {
            Some(max) if max < min => None,
            _ => Some((min, max)),
        }
    }

    /// Merge two dimensions which are required to be equal.
    ///
    /// The result is the intersection of the intervals, or `None` if they
    /// do not intersect. The label of `self` takes priority over that of
    /// `other`.
    pub fn merge(&self, other: &Dimension) -> Option<Dimension> {
        let (min, max) = self.intersect(other)?;
        Some(Dimension {
            min,
            max,
            label: self.label.or(other.label),
        })
    }

    /// Combine two dimensions following numpy broadcasting rules.
    ///
    /// Returns `None` if the dimensions cannot be broadcast together.
    pub fn broadcast_merge(&self, other: &Dimension) -> Option<Dimension> {
        if self.get_length() == Some(1) {
            return Some(*other);
        }
        if other.get_length() == Some(1) {
            return Some(*self);
        }

        match (self.get_length(), other.get_length()) {
            (Some(a), Some(b)) => (a == b).then(|| self.merge(other)).flatten(),

            // A fixed size other than 1 can only be broadcast with a
            // dynamic dimension whose actual size is 1 or equal.
            (Some(size), None) => {
                (other.contains(size) || other.contains(1)).then_some(*self)
            }
            (None, Some(size)) => {
                (self.contains(size) || self.contains(1)).then_some(*other)
            }

            (None, None) => {
                if self.label.is_some() && self.label == other.label {
                    return self.merge(other);
                }
                if !self.contains(1) && !other.contains(1) {
                    // Neither side can be broadcast, so both must be equal.
                    return self.merge(other);
                }
                Some(Dimension::dynamic())
            }
        }
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Dimension::dynamic()
    }
}

impl PartialEq for Dimension {
    fn eq(&self, other: &Dimension) -> bool {
        self.min == other.min && self.max == other.max
    }
}

impl Eq for Dimension {}

impl std::hash::Hash for Dimension {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.min.hash(state);
        self.max.hash(state);
    }
}

impl From<usize> for Dimension {
    fn from(size: usize) -> Dimension {
        Dimension::fixed(size)
    }
}

impl Add for Dimension {
    type Output = Dimension;

    /// Add the intervals of two dimensions. The result has no label.
    fn add(self, rhs: Dimension) -> Dimension {
        Dimension {
            min: self.min.saturating_add(rhs.min),
            max: self.max.zip(rhs.max).map(|(a, b)| a.saturating_add(b)),
            label: None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (min, Some(max)) if min == max => write!(f, "{}", min),
            (0, None) => write!(f, "?"),
            (min, None) => write!(f, "{}..?", min),
            (min, Some(max)) => write!(f, "{}..{}", min, max),
        }
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)?;
        if let Some(label) = self.label {
            write!(f, "<{:?}>", label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rewire_testing::TestCases;

    use super::{Dimension, Label};

    #[test]
    fn test_merge() {
        let a = Dimension::bounded(2, Some(8));
        let b = Dimension::bounded(4, None);
        assert_eq!(a.merge(&b), Some(Dimension::bounded(4, Some(8))));
        assert_eq!(Dimension::fixed(3).merge(&Dimension::fixed(4)), None);

        let labeled = Dimension::dynamic().with_label(Label::new(7));
        let merged = Dimension::fixed(5).merge(&labeled).unwrap();
        assert_eq!(merged, Dimension::fixed(5));
        assert_eq!(merged.label(), Label::new(7));
    }

    #[test]
    fn test_broadcast_merge() {
        #[derive(Debug)]
        struct Case {
            a: Dimension,
            b: Dimension,
            expected: Option<Dimension>,
        }

        let cases = [
            Case {
                a: Dimension::fixed(1),
                b: Dimension::fixed(5),
                expected: Some(Dimension::fixed(5)),
            },
            Case {
                a: Dimension::fixed(4),
                b: Dimension::fixed(1),
                expected: Some(Dimension::fixed(4)),
            },
            Case {
                a: Dimension::fixed(4),
                b: Dimension::fixed(5),
                expected: None,
            },
            Case {
                a: Dimension::fixed(4),
                b: Dimension::dynamic(),
                expected: Some(Dimension::fixed(4)),
            },
            Case {
                a: Dimension::fixed(4),
                b: Dimension::bounded(5, Some(9)),
                expected: None,
            },
            Case {
                a: Dimension::dynamic(),
                b: Dimension::dynamic(),
                expected: Some(Dimension::dynamic()),
            },
            Case {
                a: Dimension::bounded(2, Some(6)),
                b: Dimension::bounded(4, Some(10)),
                expected: Some(Dimension::bounded(4, Some(6))),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.a.broadcast_merge(&case.b), case.expected);
        });
    }

    #[test]
    fn test_add() {
        assert_eq!(
            Dimension::fixed(2) + Dimension::fixed(4),
            Dimension::fixed(6)
        );
        assert_eq!(
            Dimension::fixed(2) + Dimension::bounded(1, None),
            Dimension::bounded(3, None)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Dimension::fixed(3).to_string(), "3");
        assert_eq!(Dimension::dynamic().to_string(), "?");
        assert_eq!(Dimension::bounded(1, Some(4)).to_string(), "1..4");
        assert_eq!(
            format!("{:?}", Dimension::dynamic().with_label(Label::new(2))),
            "?<L2>"
        );
    }
}
