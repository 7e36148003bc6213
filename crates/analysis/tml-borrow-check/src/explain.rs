//! Long-form explanations for borrow error codes.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

static EXPLANATIONS: OnceLock<FxHashMap<&'static str, &'static str>> = OnceLock::new();

fn table() -> &'static FxHashMap<&'static str, &'static str> {
    EXPLANATIONS.get_or_init(|| {
        FxHashMap::from_iter([
            (
                "B001",
                "A value was used after ownership of it moved elsewhere, or before it was \
                 ever initialised.\n\nNon-Copy values are moved by assignment, by passing \
                 them to a function and by returning them. After the move the old binding \
                 holds nothing. Call `.duplicate()` before the move to keep a copy, borrow \
                 with `ref` instead, or assign a new value before using the binding again.",
            ),
            (
                "B002",
                "A value was moved while a borrow of it was still in use.\n\nMoving would \
                 leave the reference pointing at storage that no longer owns a value. End \
                 the borrow before the move, or move a duplicate.",
            ),
            (
                "B003",
                "An immutable binding was assigned a second time.\n\nBindings declared \
                 without `mut` can be initialised once, either at the `let` or by one later \
                 assignment. Declare the binding `mut` to allow reassignment.",
            ),
            (
                "B004",
                "A place was assigned while a borrow of it was still in use.\n\nThe borrow \
                 would observe the new value, or a destroyed old one. Finish using the \
                 reference before assigning.",
            ),
            (
                "B006",
                "`mut ref` was taken of a place that cannot be mutated.\n\nThe place is \
                 either rooted in a binding declared without `mut`, or reached through a \
                 shared `ref`. Declare the binding `mut` or borrow through a `mut ref`.",
            ),
            (
                "B007",
                "A place was read or shared while a mutable borrow of it was in use, or \
                 borrowed mutably while shared borrows of it were in use.\n\nAny number of \
                 `ref` borrows may coexist, but a `mut ref` borrow must be the only access \
                 path for as long as it is used.",
            ),
            (
                "B008",
                "A place was borrowed mutably twice at the same time.\n\nOnly one `mut ref` \
                 borrow of a place may be in use at once. Borrows of distinct fields do \
                 not conflict.",
            ),
            (
                "B010",
                "A reference outlives the value it points to.\n\nThe borrowed value goes \
                 out of scope, or is owned by the returning function, while the reference \
                 is still reachable. Return or store the value itself instead.",
            ),
            (
                "B011",
                "A value with a destructor went out of scope after some of its fields were \
                 moved out.\n\nThe destructor expects every field to be present. Move the \
                 remaining fields out too, or duplicate the field instead of moving it.",
            ),
            (
                "B014",
                "A closure captures a binding that was already moved.\n\nThe closure \
                 would refer to a value that no longer exists. Create the closure before \
                 the move, or capture a `.duplicate()` of the value.",
            ),
            (
                "B015",
                "A closure captures a binding in a way that conflicts with a borrow still \
                 in use.\n\nCapturing by `mut ref` or by move needs the binding to be \
                 free of other borrows, and capturing by `ref` needs it to be free of \
                 `mut ref` borrows, for as long as the closure is used.",
            ),
            (
                "B016",
                "A value was used as a whole after some of its fields were moved out.\n\n\
                 The fields that were not moved remain usable on their own.",
            ),
            (
                "B099",
                "The borrow checker reached an inconsistent internal state. This is a \
                 compiler bug; please report it with the program that triggered it.",
            ),
        ])
    })
}

/// Long-form explanation of an error code such as `"B001"`.
#[must_use]
pub fn explain(code: &str) -> Option<&'static str> {
    table().get(code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_every_kind_is_explained() {
        let kinds = [
            ErrorKind::UseAfterMove,
            ErrorKind::MoveWhileBorrowed,
            ErrorKind::AssignToImmutable,
            ErrorKind::AssignWhileBorrowed,
            ErrorKind::MutBorrowOfImmutable,
            ErrorKind::ConflictingSharedMutableBorrow,
            ErrorKind::ConflictingMutableBorrow,
            ErrorKind::BorrowOutlivesOwner,
            ErrorKind::InvalidPartialDrop,
            ErrorKind::ClosureCapturesMoved,
            ErrorKind::ClosureCaptureConflict,
            ErrorKind::UseOfPartiallyMoved,
            ErrorKind::InternalInconsistency,
        ];
        for kind in kinds {
            assert!(explain(kind.code()).is_some(), "{}", kind.code());
        }
        assert_eq!(explain("B999"), None);
    }
}
