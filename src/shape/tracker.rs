// ShapeTracker
//
// An ordered, non-empty stack of views. The last view is the logical shape
// seen by the consumer; each view's addresses are flat indices into the view
// before it, and the first view addresses storage.

use crate::core::error::{KernelError, Result};
use crate::shape::symbolic::Node;
use crate::shape::view::View;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;

/// Composition of views describing a tensor's addressing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<View>", into = "Vec<View>")]
pub struct ShapeTracker {
    views: Vec<View>,
}

impl TryFrom<Vec<View>> for ShapeTracker {
    type Error = KernelError;

    fn try_from(views: Vec<View>) -> Result<Self> {
        ShapeTracker::new(views)
    }
}

impl From<ShapeTracker> for Vec<View> {
    fn from(st: ShapeTracker) -> Self {
        st.views
    }
}

/// Row-major digits of an in-range flat index
fn unravel_index(mut flat: i64, shape: &[i64]) -> Vec<i64> {
    let mut out = vec![0; shape.len()];
    for d in (0..shape.len()).rev() {
        if shape[d] > 0 {
            out[d] = flat % shape[d];
            flat /= shape[d];
        }
    }
    out
}

impl ShapeTracker {
    /// Contiguous tracker for `shape`
    pub fn from_shape(shape: &[i64]) -> Self {
        ShapeTracker {
            views: vec![View::contiguous_of(shape)],
        }
    }

    /// Build from a view stack, validating that every view addresses only
    /// inside the view it is applied to
    pub fn new(views: Vec<View>) -> Result<Self> {
        if views.is_empty() {
            return Err(KernelError::InvalidView(
                "a shape tracker needs at least one view".into(),
            ));
        }
        for pair in views.windows(2) {
            let (prior, outer) = (&pair[0], &pair[1]);
            if let Some((lo, hi)) = outer.valid_range() {
                if lo < 0 || hi >= prior.size() {
                    return Err(KernelError::ShapeMismatch {
                        expected: prior.shape().to_vec(),
                        got: outer.shape().to_vec(),
                    });
                }
            }
        }
        Ok(ShapeTracker { views })
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    fn last(&self) -> &View {
        // non-empty by construction
        &self.views[self.views.len() - 1]
    }

    fn with_last(&self, view: View) -> Self {
        let mut views = self.views.clone();
        let n = views.len();
        views[n - 1] = view;
        ShapeTracker { views }
    }

    pub fn shape(&self) -> &[i64] {
        self.last().shape()
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn size(&self) -> i64 {
        self.last().size()
    }

    /// A single dense row-major view
    pub fn contiguous(&self) -> bool {
        self.views.len() == 1 && self.views[0].is_contiguous()
    }

    /// Number of storage elements the tracker can touch
    pub fn real_size(&self) -> i64 {
        if self.size() == 0 {
            return 0;
        }
        self.views[0].valid_range().map_or(0, |(_, hi)| hi + 1)
    }

    pub fn reshape(&self, new_shape: &[i64]) -> Result<Self> {
        match self.last().reshape(new_shape)? {
            Some(view) => Ok(self.with_last(view)),
            None => {
                let mut views = self.views.clone();
                views.push(View::contiguous_of(new_shape));
                Ok(ShapeTracker { views })
            }
        }
    }

    pub fn permute(&self, axis: &[usize]) -> Result<Self> {
        Ok(self.with_last(self.last().permute(axis)?))
    }

    pub fn pad(&self, arg: &[(i64, i64)]) -> Result<Self> {
        Ok(self.with_last(self.last().pad(arg)?))
    }

    pub fn shrink(&self, arg: &[(i64, i64)]) -> Result<Self> {
        Ok(self.with_last(self.last().shrink(arg)?))
    }

    pub fn expand(&self, new_shape: &[i64]) -> Result<Self> {
        Ok(self.with_last(self.last().expand(new_shape)?))
    }

    pub fn stride(&self, mul: &[i64]) -> Result<Self> {
        Ok(self.with_last(self.last().stride(mul)?))
    }

    /// Fold the last two views while a provably equivalent single view exists
    pub fn simplify(&self) -> Self {
        let mut views = self.views.clone();
        while views.len() >= 2 {
            let n = views.len();
            match views[n - 2].merge(&views[n - 1]) {
                Some(merged) => {
                    log::trace!("folded view {:?} into {:?}", views[n - 1].shape(), merged);
                    views.truncate(n - 2);
                    views.push(merged);
                }
                None => break,
            }
        }
        ShapeTracker { views }
    }

    /// Default index variables `idx{i}` ranging over the shape
    pub fn index_vars(&self) -> Vec<Node> {
        self.shape()
            .iter()
            .enumerate()
            .map(|(i, &s)| Node::var(format!("idx{}", i), 0, (s - 1).max(0)))
            .collect()
    }

    /// Symbolic storage offset and validity of a logical multi-index
    pub fn expr_idxs(&self, idxs: Option<&[Node]>) -> (Node, Node) {
        if self.size() == 0 {
            return (Node::num(0), Node::num(0));
        }
        let idxs = match idxs {
            Some(i) => i.to_vec(),
            None => self.index_vars(),
        };
        let (idx, valid) = self.last().expr(&idxs, None);
        self.expr_inner(idx, valid)
    }

    /// Symbolic storage offset and validity of a flat logical index
    pub fn expr_node(&self, idx: Node) -> (Node, Node) {
        if self.size() == 0 {
            return (Node::num(0), Node::num(0));
        }
        let last = self.last().minify();
        let parts = Self::unravel_node(&idx, last.shape());
        let (idx, valid) = last.expr(&parts, None);
        self.expr_inner(idx, valid)
    }

    fn unravel_node(idx: &Node, shape: &[i64]) -> Vec<Node> {
        let mut parts = vec![Node::num(0); shape.len()];
        let mut acc = 1;
        for d in (0..shape.len()).rev() {
            parts[d] = idx.clone().floordiv(acc).modulo(shape[d]);
            acc *= shape[d];
        }
        parts
    }

    fn expr_inner(&self, mut idx: Node, mut valid: Node) -> (Node, Node) {
        for view in self.views[..self.views.len() - 1].iter().rev() {
            if valid.max() == 0 {
                return (Node::num(-1), valid);
            }
            let view = view.minify();
            let parts = Self::unravel_node(&idx, view.shape());
            let (i, v) = view.expr(&parts, Some(valid));
            idx = i;
            valid = v;
        }
        if valid.max() == 0 {
            return (Node::num(-1), valid);
        }
        (idx, valid)
    }

    fn check_flat(&self, i: i64) -> Result<()> {
        if i < 0 || i >= self.size() {
            return Err(KernelError::IndexOutOfBounds {
                index: i,
                size: self.size().max(0) as usize,
            });
        }
        Ok(())
    }

    /// Concrete storage offset of flat logical index `i`, `None` when masked
    pub fn getitem(&self, i: i64) -> Result<Option<i64>> {
        self.check_flat(i)?;
        let (idx, valid) = self.expr_node(Node::num(i));
        let env = HashMap::new();
        if valid.eval(&env)? == 0 {
            return Ok(None);
        }
        Ok(Some(idx.eval(&env)?))
    }

    /// Layer-by-layer evaluation with `View::index_of`
    pub fn reference_getitem(&self, i: i64) -> Result<Option<i64>> {
        self.check_flat(i)?;
        let mut addr = i;
        for view in self.views.iter().rev() {
            let idx = unravel_index(addr, view.shape());
            match view.index_of(&idx) {
                Some(a) => addr = a,
                None => return Ok(None),
            }
        }
        Ok(Some(addr))
    }

    /// Same shape and the same result for every logical index
    pub fn semantically_eq(&self, other: &ShapeTracker) -> Result<bool> {
        if self.shape() != other.shape() {
            return Ok(false);
        }
        for i in 0..self.size() {
            if self.reference_getitem(i)? != other.reference_getitem(i)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Per-axis stride when the offset is affine in that axis, `None` when
    /// the axis is masked or reaches the offset through a div/mod
    pub fn real_strides(&self) -> Vec<Option<i64>> {
        if self.views.len() == 1 {
            let v = self.last();
            return (0..v.ndim())
                .map(|d| match v.mask() {
                    Some(m) if m[d] != (0, v.shape()[d]) => None,
                    _ => Some(v.strides()[d]),
                })
                .collect();
        }
        let (idx, valid) = self.expr_idxs(None);
        let valid_vars = valid.vars();
        self.index_vars()
            .iter()
            .map(|var| match var {
                Node::Var { name, .. } => {
                    if valid_vars.iter().any(|(n, _, _)| n == name) {
                        None
                    } else {
                        idx.affine_coefficient(name)
                    }
                }
                _ => Some(0),
            })
            .collect()
    }

    /// Axes whose real stride is one
    pub fn unit_stride_axes(&self) -> Vec<usize> {
        self.real_strides()
            .iter()
            .enumerate()
            .filter(|(_, st)| **st == Some(1))
            .map(|(i, _)| i)
            .collect()
    }
}
