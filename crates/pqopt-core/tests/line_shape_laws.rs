//! Algebraic laws of lines, shapes, and their orderings.

use pqopt_core::{Line, Options, Shape, Vertex};
use proptest::prelude::*;

fn opts() -> Options {
    Options::default()
}

fn line(label: &str) -> Line {
    Line::new(label, None, &opts()).unwrap()
}

fn label_pool() -> Vec<&'static str> {
    vec!["i", "j", "k", "l", "a", "b", "c", "d", "L", "R", "Q", "z"]
}

#[test]
fn shape_of_concatenation_is_sum() {
    let left = [line("i"), line("a"), line("L")];
    let right = [line("j"), line("Q")];
    let combined: Vec<Line> = left.iter().chain(right.iter()).copied().collect();
    assert_eq!(
        Shape::of_lines(&combined),
        Shape::of_lines(&left) + Shape::of_lines(&right)
    );
}

#[test]
fn equivalence_is_reflexive_symmetric_transitive() {
    let pool: Vec<Line> = label_pool().iter().map(|l| line(l)).collect();
    for a in &pool {
        assert!(a.equivalent(a));
        for b in &pool {
            assert_eq!(a.equivalent(b), b.equivalent(a));
            for c in &pool {
                if a.equivalent(b) && b.equivalent(c) {
                    assert!(a.equivalent(c));
                }
            }
        }
    }
}

#[test]
fn sort_orders_upper_half_by_kind_then_label() {
    let mut v = Vertex::new(
        "g",
        vec![line("j"), line("b"), line("a"), line("i")],
    );
    v.sort();
    // upper half: virtuals before occupieds, labels ascending
    let upper: Vec<&str> = v.lines()[..2].iter().map(|l| l.label.as_str()).collect();
    assert_eq!(upper, ["b", "j"]);
    // lower half untouched
    let lower: Vec<&str> = v.lines()[2..].iter().map(|l| l.label.as_str()).collect();
    assert_eq!(lower, ["a", "i"]);
}

proptest! {
    #[test]
    fn shape_addition_commutes(
        xs in prop::collection::vec(prop::sample::select(label_pool()), 0..6),
        ys in prop::collection::vec(prop::sample::select(label_pool()), 0..6),
    ) {
        let a = Shape::of_lines(&xs.iter().map(|l| line(l)).collect::<Vec<_>>());
        let b = Shape::of_lines(&ys.iter().map(|l| line(l)).collect::<Vec<_>>());
        prop_assert_eq!(a + b, b + a);
    }

    #[test]
    fn shape_order_is_total_and_consistent(
        xs in prop::collection::vec(prop::sample::select(label_pool()), 0..5),
        ys in prop::collection::vec(prop::sample::select(label_pool()), 0..5),
    ) {
        let a = Shape::of_lines(&xs.iter().map(|l| line(l)).collect::<Vec<_>>());
        let b = Shape::of_lines(&ys.iter().map(|l| line(l)).collect::<Vec<_>>());
        // antisymmetry of the total order
        match a.cmp(&b) {
            std::cmp::Ordering::Less => prop_assert_eq!(b.cmp(&a), std::cmp::Ordering::Greater),
            std::cmp::Ordering::Greater => prop_assert_eq!(b.cmp(&a), std::cmp::Ordering::Less),
            std::cmp::Ordering::Equal => prop_assert_eq!(b.cmp(&a), std::cmp::Ordering::Equal),
        }
        // adding the same shape to both sides preserves the order
        let c = Shape::of_line(&line("a"));
        prop_assert_eq!((a + c).cmp(&(b + c)), a.cmp(&b));
    }

    #[test]
    fn line_order_puts_kinds_before_labels(
        x in prop::sample::select(label_pool()),
        y in prop::sample::select(label_pool()),
    ) {
        let a = line(x);
        let b = line(y);
        if a.equivalent(&b) {
            // same kind: ordered by label
            prop_assert_eq!(a.cmp(&b), a.label.cmp(&b.label));
        } else {
            // different kinds never compare equal
            prop_assert_ne!(a.cmp(&b), std::cmp::Ordering::Equal);
        }
    }
}
