// ShapeTracker properties: symbolic evaluation agrees with layer-by-layer
// evaluation, and simplification never changes an address or a mask.

use proptest::prelude::*;
use std::collections::HashMap;
use tensorkern::compiler::Linearizer;
use tensorkern::core::KernelError;
use tensorkern::ir::{ConstValue, GraphBuilder, Interpreter, NodeId, ScalarType};
use tensorkern::shape::{ShapeTracker, View};

/// Apply one movement op chosen by `kind`, parameterised by `seed`
fn movement(st: &ShapeTracker, kind: u8, seed: u32) -> ShapeTracker {
    let shape = st.shape().to_vec();
    let n = shape.len();
    let next = match kind {
        0 => {
            let r = seed as usize % n;
            let axis: Vec<usize> = (0..n).map(|i| (i + r) % n).collect();
            st.permute(&axis)
        }
        1 => {
            let arg: Vec<(i64, i64)> = (0..n)
                .map(|d| (((seed >> (2 * d)) & 1) as i64, ((seed >> (2 * d + 1)) & 1) as i64))
                .collect();
            st.pad(&arg)
        }
        2 => {
            let arg: Vec<(i64, i64)> = shape
                .iter()
                .enumerate()
                .map(|(d, &s)| ((seed as i64 + d as i64) % s, s))
                .collect();
            st.shrink(&arg)
        }
        3 => {
            let size = st.size();
            if seed % 2 == 0 || size % 2 != 0 || size <= 2 {
                st.reshape(&[size])
            } else {
                st.reshape(&[2, size / 2])
            }
        }
        4 => {
            let new_shape: Vec<i64> = shape.iter().map(|&s| if s == 1 { 3 } else { s }).collect();
            st.expand(&new_shape)
        }
        _ => {
            let mul: Vec<i64> = (0..n)
                .map(|d| match (seed >> d) % 3 {
                    0 => 1,
                    1 => -1,
                    _ => 2,
                })
                .collect();
            st.stride(&mul)
        }
    };
    next.unwrap_or_else(|_| st.clone())
}

/// A base shape together with a tracker derived from it by movement ops
fn based_tracker_strategy() -> impl Strategy<Value = (Vec<i64>, ShapeTracker)> {
    (
        prop::collection::vec(1i64..5, 1..4),
        prop::collection::vec((0u8..6, 0u32..1024), 0..5),
    )
        .prop_map(|(shape, ops)| {
            let st = ops
                .into_iter()
                .fold(ShapeTracker::from_shape(&shape), |st, (kind, seed)| {
                    movement(&st, kind, seed)
                });
            (shape, st)
        })
}

fn tracker_strategy() -> impl Strategy<Value = ShapeTracker> {
    based_tracker_strategy().prop_map(|(_, st)| st)
}

/// Bind `idx{d}` to the row-major coordinates of flat index `i`
fn index_env(mut i: i64, shape: &[i64]) -> HashMap<String, i64> {
    let mut env = HashMap::new();
    for (d, &s) in shape.iter().enumerate().rev() {
        env.insert(format!("idx{}", d), i % s);
        i /= s;
    }
    env
}

/// One global SPECIAL per axis plus the flat row-major index they form
fn lanes(b: &mut GraphBuilder, shape: &[i64]) -> (Vec<NodeId>, NodeId) {
    let idxs: Vec<NodeId> = shape
        .iter()
        .enumerate()
        .map(|(d, &s)| b.special(format!("gidx{}", d), s).unwrap())
        .collect();
    let mut flat = b.int(0).unwrap();
    for (&lane, &s) in idxs.iter().zip(shape) {
        let width = b.int(s).unwrap();
        let scaled = b.mul(flat, width).unwrap();
        flat = b.add(scaled, lane).unwrap();
    }
    (idxs, flat)
}

fn run(b: GraphBuilder, root: NodeId, bufs: &mut [Vec<ConstValue>]) {
    let target = b.target().clone();
    let mut g = b.build();
    let p = Linearizer::new(target).linearize(&mut g, &[root]).unwrap();
    Interpreter::new(&p).execute(bufs).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_getitem_matches_reference(st in tracker_strategy()) {
        for i in 0..st.size() {
            prop_assert_eq!(st.getitem(i).unwrap(), st.reference_getitem(i).unwrap());
        }
    }

    #[test]
    fn prop_simplify_preserves_addresses(st in tracker_strategy()) {
        let simple = st.simplify();
        prop_assert_eq!(simple.shape(), st.shape());
        prop_assert!(simple.views().len() <= st.views().len());
        for i in 0..st.size() {
            prop_assert_eq!(simple.reference_getitem(i).unwrap(), st.reference_getitem(i).unwrap());
            prop_assert_eq!(simple.getitem(i).unwrap(), st.getitem(i).unwrap());
        }
    }

    #[test]
    fn prop_simplify_is_idempotent(st in tracker_strategy()) {
        let once = st.simplify();
        prop_assert_eq!(once.simplify(), once);
    }

    #[test]
    fn prop_expr_idxs_matches_reference(st in tracker_strategy()) {
        let (idx, valid) = st.expr_idxs(None);
        for i in 0..st.size() {
            let env = index_env(i, st.shape());
            let got = if valid.eval(&env).unwrap() == 0 {
                None
            } else {
                Some(idx.eval(&env).unwrap())
            };
            prop_assert_eq!(got, st.reference_getitem(i).unwrap(), "flat index {}", i);
        }
    }

    #[test]
    fn prop_view_load_matches_reference((base, st) in based_tracker_strategy()) {
        let storage: i64 = base.iter().product();
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Int32).unwrap();
        let inp = b.define_global(1, ScalarType::Int32).unwrap();
        let (idxs, flat) = lanes(&mut b, st.shape());
        let v = b.load_view(inp, &st, &idxs).unwrap();
        let root = b.store(out, flat, v).unwrap();

        let mut bufs = vec![
            vec![ConstValue::Int(-1); st.size() as usize],
            (1..=storage).map(ConstValue::from).collect(),
        ];
        run(b, root, &mut bufs);
        for i in 0..st.size() {
            let expected = st.reference_getitem(i).unwrap().map_or(0, |a| a + 1);
            prop_assert_eq!(bufs[0][i as usize].as_i128(), expected as i128, "flat index {}", i);
        }
    }

    #[test]
    fn prop_view_store_matches_reference((base, st) in based_tracker_strategy()) {
        let storage: i64 = base.iter().product();
        let mut b = GraphBuilder::new();
        let out = b.define_global(0, ScalarType::Int32).unwrap();
        let (idxs, flat) = lanes(&mut b, st.shape());
        let one = b.int(1).unwrap();
        let v = b.add(flat, one).unwrap();
        let mut expected = vec![-1i64; storage as usize];
        for i in 0..st.size() {
            if let Some(a) = st.reference_getitem(i).unwrap() {
                expected[a as usize] = i + 1;
            }
        }
        // nothing is emitted for a view that masks every position
        let Some(root) = b.store_view(out, &st, &idxs, v).unwrap() else {
            prop_assert!(expected.iter().all(|&e| e == -1));
            return Ok(());
        };

        let mut bufs = vec![vec![ConstValue::Int(-1); storage as usize]];
        run(b, root, &mut bufs);
        let got: Vec<i64> = bufs[0].iter().map(|v| v.as_i128() as i64).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_simplify_merges_stacks((base, st) in based_tracker_strategy()) {
        prop_assume!(st.views().len() == 1);
        let v = st.views()[0].clone();
        prop_assume!(!v.is_fully_masked());

        let under = ShapeTracker::new(vec![View::contiguous_of(&base), v.clone()]).unwrap();
        let over = ShapeTracker::new(vec![v.clone(), View::contiguous_of(v.shape())]).unwrap();
        for stack in [under, over] {
            let simple = stack.simplify();
            prop_assert_eq!(simple.views().len(), 1);
            for i in 0..stack.size() {
                prop_assert_eq!(simple.getitem(i).unwrap(), stack.reference_getitem(i).unwrap());
            }
        }
    }
}

#[test]
fn test_permute_then_reshape_needs_two_views() {
    let st = ShapeTracker::from_shape(&[2, 3])
        .permute(&[1, 0])
        .unwrap()
        .reshape(&[6])
        .unwrap();
    assert_eq!(st.views().len(), 2);
    let offsets: Vec<Option<i64>> = (0..6).map(|i| st.getitem(i).unwrap()).collect();
    assert_eq!(offsets, vec![Some(0), Some(3), Some(1), Some(4), Some(2), Some(5)]);
    // the transposed order cannot be written as one strided view
    assert_eq!(st.simplify().views().len(), 2);
}

#[test]
fn test_broadcast_survives_simplify() {
    let st = ShapeTracker::from_shape(&[1, 4])
        .expand(&[3, 4])
        .unwrap()
        .reshape(&[12])
        .unwrap();
    let simple = st.simplify();
    for i in 0..12 {
        assert_eq!(simple.getitem(i).unwrap(), Some(i % 4));
    }
}

#[test]
fn test_padding_reports_invalid() {
    let st = ShapeTracker::from_shape(&[2, 2])
        .pad(&[(1, 0), (0, 1)])
        .unwrap();
    assert_eq!(st.shape(), &[3, 3]);
    assert_eq!(st.getitem(0).unwrap(), None);
    assert_eq!(st.getitem(3).unwrap(), Some(0));
    assert_eq!(st.getitem(5).unwrap(), None);
    assert!(st.getitem(9).is_err());
}

#[test]
fn test_semantic_equality_ignores_view_count() {
    let two = ShapeTracker::new(vec![
        View::contiguous_of(&[4, 4]),
        View::new(&[2, 8], &[1, 2], 0, None).unwrap(),
    ])
    .unwrap();
    let one = ShapeTracker::new(vec![View::new(&[2, 8], &[1, 2], 0, None).unwrap()]).unwrap();
    assert_ne!(two, one);
    assert!(two.semantically_eq(&one).unwrap());
    assert_eq!(two.simplify(), one);
}

#[test]
fn test_composition_validated() {
    let err = ShapeTracker::new(vec![
        View::contiguous_of(&[4, 4]),
        View::new(&[2, 8], &[1, 3], 0, None).unwrap(),
    ])
    .unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch { .. }));
}

const FIXTURE: &str = r#"[
    {"shape": [4, 4], "strides": [4, 1], "offset": 0, "mask": null, "contiguous": true},
    {"shape": [2, 8], "strides": [1, 2], "offset": 0, "mask": null, "contiguous": false}
]"#;

#[test]
fn test_json_fixture() {
    let st: ShapeTracker = serde_json::from_str(FIXTURE).unwrap();
    assert_eq!(st.views().len(), 2);
    for i in 0..16 {
        assert_eq!(st.getitem(i).unwrap(), Some(i / 8 + 2 * (i % 8)));
    }
    assert_eq!(st.simplify().views().len(), 1);

    let padded = r#"[
        {"shape": [4], "strides": [1], "offset": 0, "mask": null},
        {"shape": [6], "strides": [1], "offset": -1, "mask": [[1, 5]]}
    ]"#;
    let st: ShapeTracker = serde_json::from_str(padded).unwrap();
    assert_eq!(st.getitem(0).unwrap(), None);
    assert_eq!(st.getitem(1).unwrap(), Some(0));
    assert_eq!(st.simplify().views().len(), 1);

    let bad = FIXTURE.replace("[1, 2]", "[1, 3]");
    assert!(serde_json::from_str::<ShapeTracker>(&bad).is_err());
}
