//! Internal testing utilities for the rewire crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Run table-driven tests.
///
/// A table-driven test declares a `Case` struct holding the inputs and
/// expected outputs of one test, builds a collection of cases and then calls
/// one of the `test_each*` methods with a closure that checks a single case.
///
/// Every case is run even if an earlier one fails. Failures are collected and
/// reported together at the end, with the `Debug` representation of each
/// failing case, so one run shows everything that is broken.
///
/// ```
/// use rewire_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     axis: i64,
///     rank: usize,
///     expected: usize,
/// }
///
/// let cases = [
///     Case { axis: -1, rank: 3, expected: 2 },
///     Case { axis: 0, rank: 3, expected: 0 },
/// ];
///
/// cases.test_each(|case| {
///     let axis = if case.axis < 0 { case.axis + case.rank as i64 } else { case.axis };
///     assert_eq!(axis as usize, case.expected);
/// });
/// ```
///
/// Cases and closure captures must be unwind safe, since each case runs
/// inside [`catch_unwind`](std::panic::catch_unwind). Graphs and other values
/// holding trait objects are not, so tests should describe how to build such
/// values in the case and build them inside the closure.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Run `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Run `test` with a clone of each case.
    ///
    /// The original is kept to report the case if the test fails.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Run `test` with each case passed by value.
    ///
    /// The case is formatted before the test runs, so that it can still be
    /// reported after being moved into the test.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Panic with a summary of failed cases, if there are any.
fn report_failures(failures: &[String]) {
    if failures.is_empty() {
        return;
    }
    panic!(
        "{} test cases failed:\n{}",
        failures.len(),
        failures.join("\n")
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let mut failures = Vec::new();
        for case in self {
            let passed = std::panic::catch_unwind(|| test(&case)).is_ok();
            if !passed {
                failures.push(format!("{:?}", case));
            }
        }
        report_failures(&failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe,
    {
        let mut failures = Vec::new();
        for case in self {
            let owned = case.clone();
            let test = &test;
            let passed = std::panic::catch_unwind(move || test(owned)).is_ok();
            if !passed {
                failures.push(format!("{:?}", case));
            }
        }
        report_failures(&failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let mut failures = Vec::new();
        for case in self {
            let description = format!("{:?}", case);
            let test = &test;
            let passed = std::panic::catch_unwind(move || test(case)).is_ok();
            if !passed {
                failures.push(description);
            }
        }
        report_failures(&failures);
    }
}
