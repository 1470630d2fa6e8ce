//! Set differencing for declaratively managed attachments.

use std::collections::BTreeSet;

/// Direction of a convergence operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    /// The identifier is desired but not yet present.
    Add,
    /// The identifier is present but no longer desired.
    Remove,
}

/// Single add or remove step produced by [`diff`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConvergenceOperation {
    /// Identifier to add or remove.
    pub id: String,
    /// Direction of the change.
    pub kind: OperationKind,
}

impl ConvergenceOperation {
    /// Builds an [`OperationKind::Add`] operation.
    #[must_use]
    pub fn add(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: OperationKind::Add,
        }
    }

    /// Builds an [`OperationKind::Remove`] operation.
    #[must_use]
    pub fn remove(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: OperationKind::Remove,
        }
    }

    /// Returns `true` for additions.
    #[must_use]
    pub const fn is_add(&self) -> bool {
        matches!(self.kind, OperationKind::Add)
    }
}

/// Computes the operations that turn `observed` into `desired`.
///
/// Additions come first, then removals, each in ascending identifier order.
/// Empty identifiers are ignored on both sides.
#[must_use]
pub fn diff(desired: &BTreeSet<String>, observed: &BTreeSet<String>) -> Vec<ConvergenceOperation> {
    let adds = desired
        .difference(observed)
        .filter(|id| !id.is_empty())
        .map(ConvergenceOperation::add);
    let removes = observed
        .difference(desired)
        .filter(|id| !id.is_empty())
        .map(ConvergenceOperation::remove);
    adds.chain(removes).collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_owned()).collect()
    }

    #[rstest]
    fn adds_precede_removes() {
        let ops = diff(&set(&["b", "c"]), &set(&["a", "b"]));
        assert_eq!(
            ops,
            vec![ConvergenceOperation::add("c"), ConvergenceOperation::remove("a")]
        );
    }

    #[rstest]
    fn each_kind_is_sorted() {
        let ops = diff(&set(&["z", "m", "a"]), &set(&["y", "b"]));
        let ids: Vec<_> = ops.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, ["a", "m", "z", "b", "y"]);
    }

    #[rstest]
    #[case(&[], &[])]
    #[case(&["a", "b"], &["a", "b"])]
    fn identical_sets_produce_nothing(#[case] desired: &[&str], #[case] observed: &[&str]) {
        assert!(diff(&set(desired), &set(observed)).is_empty());
    }

    #[rstest]
    fn empty_identifiers_are_ignored() {
        let ops = diff(&set(&["", "a"]), &set(&[""]));
        assert_eq!(ops, vec![ConvergenceOperation::add("a")]);
        assert!(diff(&set(&[]), &set(&[""])).is_empty());
    }

    #[rstest]
    fn applying_operations_reaches_desired() {
        let desired = set(&["sg-1", "sg-3"]);
        let mut observed = set(&["sg-1", "sg-2"]);
        for op in diff(&desired, &observed) {
            if op.is_add() {
                observed.insert(op.id);
            } else {
                observed.remove(&op.id);
            }
        }
        assert_eq!(observed, desired);
    }
}
