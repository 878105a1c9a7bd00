//! Operational transformation of text operations.
//!
//! An incoming operation was computed by a client against some earlier state of
//! a page. Before it is applied it is shifted past every operation that was
//! serialized on the same page after that state. Positions only ever move; the
//! content, length and attributes of the incoming operation are left alone,
//! apart from the final clamp into the page bounds.

use crate::document::{Action, Operation};

/// Shift `incoming` past the `concurrent` operations, in log order
///
/// Only entries on the same page as `incoming` are considered. Two inserts at
/// the same position resolve in serialization order: the entry already in the
/// log wins and pushes `incoming` to the right.
pub fn transform<'a, I>(incoming: &Operation, concurrent: I) -> Operation
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut adjusted = incoming.clone();

    for prior in concurrent {
        if prior.page_number != adjusted.page_number {
            continue;
        }

        match prior.action {
            Action::Insert => {
                if prior.position <= adjusted.position {
                    adjusted.position = adjusted.position.saturating_add(prior.inserted_len());
                }
            }
            Action::Delete => {
                if prior.position < adjusted.position {
                    let overlap = adjusted.position - prior.position;
                    adjusted.position = adjusted.position.saturating_sub(prior.length.min(overlap));
                }
            }
        }
    }

    adjusted
}

/// Clamp an operation into a page of `page_len` characters
///
/// The position ends up in `[0, page_len]` and a delete never reaches past the
/// end of the page.
pub fn clamp(mut op: Operation, page_len: usize) -> Operation {
    op.position = op.position.min(page_len);
    if op.action == Action::Delete {
        op.length = op.length.min(page_len - op.position);
    }
    op
}

/// Transform `incoming` against `concurrent`, then clamp it to the page
pub fn adjust<'a, I>(incoming: &Operation, concurrent: I, page_len: usize) -> Operation
where
    I: IntoIterator<Item = &'a Operation>,
{
    clamp(transform(incoming, concurrent), page_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ins(position: usize, content: &str) -> Operation {
        Operation::insert(0, position, content)
    }

    fn del(position: usize, length: usize) -> Operation {
        Operation::delete(0, position, length)
    }

    #[rstest]
    // insert after insert
    #[case::ins_before_ins(ins(2, "abc"), ins(5, "x"), 8)]
    #[case::ins_same_pos_ins(ins(5, "abc"), ins(5, "x"), 8)]
    #[case::ins_after_ins(ins(7, "abc"), ins(5, "x"), 5)]
    // insert after delete
    #[case::del_before_ins(del(1, 2), ins(5, "x"), 3)]
    #[case::del_spanning_ins(del(3, 10), ins(5, "x"), 3)]
    #[case::del_same_pos_ins(del(5, 2), ins(5, "x"), 5)]
    #[case::del_after_ins(del(6, 2), ins(5, "x"), 5)]
    // delete after insert
    #[case::ins_before_del(ins(0, "ab"), del(4, 1), 6)]
    #[case::ins_same_pos_del(ins(4, "ab"), del(4, 1), 6)]
    #[case::ins_after_del(ins(9, "ab"), del(4, 1), 4)]
    // delete after delete
    #[case::del_before_del(del(0, 2), del(4, 1), 2)]
    #[case::del_spanning_del(del(2, 8), del(4, 1), 2)]
    #[case::del_after_del(del(6, 2), del(4, 1), 4)]
    // positions saturate instead of overflowing
    #[case::ins_before_max(ins(0, "abc"), ins(usize::MAX, "x"), usize::MAX)]
    #[case::ins_before_max_del(ins(0, "abc"), del(usize::MAX, 1), usize::MAX)]
    fn test_single_rule(#[case] prior: Operation, #[case] incoming: Operation, #[case] want: usize) {
        let adjusted = transform(&incoming, [&prior]);
        assert_eq!(adjusted.position, want);
    }

    #[test]
    fn test_rules_apply_in_log_order() {
        // The second entry sees the position produced by the first.
        let log = vec![ins(0, "aaaa"), del(2, 3)];
        let adjusted = transform(&ins(3, "x"), &log);
        // 3 -> 7 after the insert, then 7 - min(3, 5) = 4 after the delete
        assert_eq!(adjusted.position, 4);
    }

    #[test]
    fn test_other_pages_are_ignored() {
        let log = vec![Operation::insert(1, 0, "elsewhere"), Operation::delete(2, 0, 9)];
        let adjusted = transform(&ins(3, "x"), &log);
        assert_eq!(adjusted.position, 3);
    }

    #[test]
    fn test_transform_keeps_payload() {
        let mut attributes = crate::document::Attributes::new();
        attributes.insert("bold".to_string(), serde_json::json!(true));
        let incoming = ins(4, "hi").with_attributes(attributes.clone());

        let adjusted = transform(&incoming, [&ins(0, "--")]);
        assert_eq!(adjusted.content, "hi");
        assert_eq!(adjusted.attributes, attributes);
        assert_eq!(adjusted.position, 6);
    }

    #[test]
    fn test_tie_break_follows_serialization_order() {
        let first = ins(3, "A");
        let second = ins(3, "B");
        assert_eq!(transform(&second, [&first]).position, 4);
        assert_eq!(transform(&first, [&second]).position, 4);
    }

    #[test]
    fn test_clamp_insert_past_end() {
        let op = clamp(ins(40, "x"), 5);
        assert_eq!(op.position, 5);
    }

    #[test]
    fn test_clamp_delete_range() {
        let op = clamp(del(3, 10), 5);
        assert_eq!((op.position, op.length), (3, 2));

        let op = clamp(del(9, 10), 5);
        assert_eq!((op.position, op.length), (5, 0));
    }

    #[test]
    fn test_adjust_scenario_insert_after_insert() {
        // B typed " World" at 5 against an empty page; A's "Hello" got in first.
        let log = vec![ins(0, "Hello")];
        assert_eq!(transform(&ins(5, " World"), &log).position, 10);
        // the page only holds "Hello", so the insert lands at its end
        assert_eq!(adjust(&ins(5, " World"), &log, 5).position, 5);
    }

    #[test]
    fn test_adjust_scenario_insert_after_delete() {
        // B appended "!" to "Hello World"; A removed " World" first.
        let log = vec![del(5, 6)];
        let adjusted = adjust(&ins(11, "!"), &log, 5);
        assert_eq!(adjusted.position, 5);
    }
}
