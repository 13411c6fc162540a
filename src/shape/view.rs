// Strided Views
//
// A `View` maps an N-dimensional index to a linear address:
// `offset + sum(idx[i] * strides[i])`, valid only inside the optional mask.
// Views are always kept in canonical form by `View::create`, so structurally
// equal views are semantically equal.

use crate::core::error::{KernelError, Result};
use crate::shape::symbolic::Node;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Half-open valid range per dimension
pub type Mask = Vec<(i64, i64)>;

/// A strided, optionally masked view of a linear buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ViewParts")]
pub struct View {
    shape: Vec<i64>,
    strides: Vec<i64>,
    offset: i64,
    mask: Option<Mask>,
    contiguous: bool,
}

/// Wire form of a view; re-canonicalised on deserialisation
#[derive(Debug, Clone, Deserialize)]
struct ViewParts {
    shape: Vec<i64>,
    strides: Vec<i64>,
    offset: i64,
    mask: Option<Mask>,
    #[serde(default)]
    #[allow(dead_code)]
    contiguous: bool,
}

impl TryFrom<ViewParts> for View {
    type Error = KernelError;

    fn try_from(parts: ViewParts) -> Result<Self> {
        View::new(&parts.shape, &parts.strides, parts.offset, parts.mask.as_deref())
    }
}

/// Row-major strides with size-1 dimensions zeroed
pub fn strides_for_shape(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1;
    for i in (0..shape.len()).rev() {
        strides[i] = if shape[i] == 1 { 0 } else { acc };
        acc *= shape[i];
    }
    strides
}

fn canonical_strides(shape: &[i64], strides: &[i64]) -> Vec<i64> {
    shape
        .iter()
        .zip(strides)
        .map(|(&s, &st)| if s == 1 { 0 } else { st })
        .collect()
}

pub(crate) fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

pub(crate) fn ceil_div(a: i64, b: i64) -> i64 {
    -floor_div(-a, b)
}

/// Row-major decomposition of `flat` into `shape`; the outermost digit is
/// left unbounded so that the decomposition is linear in `flat`
pub(crate) fn unravel(mut flat: i64, shape: &[i64]) -> Vec<i64> {
    let mut out = vec![0; shape.len()];
    for d in (1..shape.len()).rev() {
        out[d] = flat.rem_euclid(shape[d]);
        flat = flat.div_euclid(shape[d]);
    }
    if let Some(first) = out.first_mut() {
        *first = flat;
    }
    out
}

impl View {
    /// Build a view in canonical form. Lengths must agree.
    pub(crate) fn create(
        shape: &[i64],
        strides: Option<&[i64]>,
        offset: i64,
        mask: Option<&[(i64, i64)]>,
    ) -> View {
        let mut strides = match strides {
            Some(st) => canonical_strides(shape, st),
            None => strides_for_shape(shape),
        };
        let mut offset = offset;
        let mut mask: Option<Mask> = mask.map(|m| m.to_vec());

        if let Some(m) = mask.as_mut() {
            if m.iter().any(|(b, e)| b >= e) {
                // nothing is valid
                strides = vec![0; shape.len()];
                offset = 0;
                m.iter_mut().for_each(|r| *r = (0, 0));
            } else {
                // a dimension with one valid index contributes a constant
                for (i, &(b, e)) in m.iter().enumerate() {
                    if b + 1 == e {
                        offset += strides[i] * b;
                        strides[i] = 0;
                    }
                }
            }
        }
        if let Some(m) = &mask {
            if m.iter().zip(shape).all(|(&(b, e), &s)| b == 0 && e == s) {
                mask = None;
            }
        }

        let contiguous = offset == 0 && mask.is_none() && strides == strides_for_shape(shape);
        View {
            shape: shape.to_vec(),
            strides,
            offset,
            mask,
            contiguous,
        }
    }

    /// Validated constructor
    pub fn new(
        shape: &[i64],
        strides: &[i64],
        offset: i64,
        mask: Option<&[(i64, i64)]>,
    ) -> Result<View> {
        if strides.len() != shape.len() {
            return Err(KernelError::InvalidView(format!(
                "{} strides for {} dimensions",
                strides.len(),
                shape.len()
            )));
        }
        if shape.iter().any(|&s| s < 0) {
            return Err(KernelError::InvalidView(format!(
                "negative dimension in {:?}",
                shape
            )));
        }
        if let Some(m) = mask {
            if m.len() != shape.len() {
                return Err(KernelError::InvalidView(format!(
                    "mask of rank {} for {} dimensions",
                    m.len(),
                    shape.len()
                )));
            }
            if m.iter().zip(shape).any(|(&(b, e), &s)| b < 0 || e > s) {
                return Err(KernelError::InvalidView(format!(
                    "mask {:?} outside shape {:?}",
                    m, shape
                )));
            }
        }
        Ok(View::create(shape, Some(strides), offset, mask))
    }

    /// Contiguous row-major view of `shape`
    pub fn contiguous_of(shape: &[i64]) -> View {
        View::create(shape, None, 0, None)
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn mask(&self) -> Option<&[(i64, i64)]> {
        self.mask.as_deref()
    }

    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> i64 {
        self.shape.iter().product()
    }

    /// Nothing is ever valid
    pub fn is_fully_masked(&self) -> bool {
        self.size() == 0
            || self
                .mask
                .as_ref()
                .map_or(false, |m| m.iter().any(|(b, e)| b >= e))
    }

    fn full_mask(&self) -> Mask {
        self.shape.iter().map(|&s| (0, s)).collect()
    }

    /// Address of an index, or `None` when the index is masked or out of range
    pub fn index_of(&self, idx: &[i64]) -> Option<i64> {
        if idx.len() != self.shape.len() {
            return None;
        }
        let mut addr = self.offset;
        for (d, &i) in idx.iter().enumerate() {
            if i < 0 || i >= self.shape[d] {
                return None;
            }
            if let Some(m) = &self.mask {
                if i < m[d].0 || i >= m[d].1 {
                    return None;
                }
            }
            addr += i * self.strides[d];
        }
        Some(addr)
    }

    /// Inclusive range of addresses produced by valid indices
    pub fn valid_range(&self) -> Option<(i64, i64)> {
        if self.is_fully_masked() {
            return None;
        }
        let mask = self.mask.clone().unwrap_or_else(|| self.full_mask());
        let (mut lo, mut hi) = (self.offset, self.offset);
        for (&(b, e), &st) in mask.iter().zip(&self.strides) {
            let (a, z) = (b * st, (e - 1) * st);
            lo += a.min(z);
            hi += a.max(z);
        }
        Some((lo, hi))
    }

    /// Symbolic `(index, valid)` of this view for per-dimension index nodes
    pub fn expr(&self, idxs: &[Node], valid: Option<Node>) -> (Node, Node) {
        let mut terms = vec![Node::num(self.offset)];
        let mut conds: Vec<Node> = valid.into_iter().collect();
        for (d, idx) in idxs.iter().enumerate() {
            let (s, st) = (self.shape[d], self.strides[d]);
            if s != 1 && st != 0 {
                terms.push(idx.clone().mul(st));
            }
            if let Some(m) = &self.mask {
                let (b, e) = m[d];
                conds.push(idx.clone().ge(b));
                conds.push(idx.clone().lt(e));
            }
        }
        (Node::sum(terms), Node::ands(conds))
    }

    /// Reshape without moving data. `Ok(None)` means the reshape cannot be
    /// expressed as a single view.
    pub fn reshape(&self, new_shape: &[i64]) -> Result<Option<View>> {
        if self.shape == new_shape {
            return Ok(Some(self.clone()));
        }
        if new_shape.iter().any(|&s| s < 0) {
            return Err(KernelError::InvalidView(format!(
                "negative dimension in {:?}",
                new_shape
            )));
        }
        if self.size() != new_shape.iter().product::<i64>() {
            return Err(KernelError::ShapeMismatch {
                expected: self.shape.clone(),
                got: new_shape.to_vec(),
            });
        }
        if self.size() == 0 || self.contiguous {
            return Ok(Some(View::contiguous_of(new_shape)));
        }
        if self.is_fully_masked() {
            let zeros = vec![0; new_shape.len()];
            let empty = vec![(0, 0); new_shape.len()];
            return Ok(Some(View::create(new_shape, Some(&zeros), 0, Some(&empty))));
        }

        let old: Vec<usize> = (0..self.ndim()).filter(|&d| self.shape[d] != 1).collect();
        let new: Vec<usize> = (0..new_shape.len()).filter(|&d| new_shape[d] != 1).collect();
        let mut new_strides = vec![0; new_shape.len()];
        let mut new_mask: Mask = new_shape.iter().map(|&s| (0, s)).collect();
        let old_mask = self.mask.clone().unwrap_or_else(|| self.full_mask());

        let (mut i, mut j) = (0, 0);
        while i < old.len() {
            let (mut gi, mut gj) = (vec![old[i]], vec![new[j]]);
            let (mut acc_o, mut acc_n) = (self.shape[old[i]], new_shape[new[j]]);
            while acc_o != acc_n {
                if acc_o < acc_n {
                    i += 1;
                    let Some(&d) = old.get(i) else { return Ok(None) };
                    gi.push(d);
                    acc_o *= self.shape[d];
                } else {
                    j += 1;
                    let Some(&d) = new.get(j) else { return Ok(None) };
                    gj.push(d);
                    acc_n *= new_shape[d];
                }
            }

            // the old dimensions of a group must be stride-contiguous
            for w in gi.windows(2) {
                if self.strides[w[0]] != self.strides[w[1]] * self.shape[w[1]] {
                    return Ok(None);
                }
            }
            let masked = gi
                .iter()
                .any(|&d| old_mask[d] != (0, self.shape[d]));
            if masked {
                if gi.len() == 1 && gj.len() == 1 {
                    new_mask[gj[0]] = old_mask[gi[0]];
                } else {
                    return Ok(None);
                }
            }

            let mut st = self.strides[gi[gi.len() - 1]];
            for &d in gj.iter().rev() {
                new_strides[d] = st;
                st *= new_shape[d];
            }
            i += 1;
            j += 1;
        }

        let mask = self.mask.as_ref().map(|_| new_mask);
        Ok(Some(View::create(
            new_shape,
            Some(&new_strides),
            self.offset,
            mask.as_deref(),
        )))
    }

    pub fn permute(&self, axis: &[usize]) -> Result<View> {
        let mut seen = vec![false; self.ndim()];
        if axis.len() != self.ndim() {
            return Err(KernelError::InvalidView(format!(
                "permutation {:?} for {} dimensions",
                axis,
                self.ndim()
            )));
        }
        for &a in axis {
            if a >= self.ndim() || seen[a] {
                return Err(KernelError::InvalidView(format!(
                    "{:?} is not a permutation",
                    axis
                )));
            }
            seen[a] = true;
        }
        let shape: Vec<i64> = axis.iter().map(|&a| self.shape[a]).collect();
        let strides: Vec<i64> = axis.iter().map(|&a| self.strides[a]).collect();
        let mask: Option<Mask> = self
            .mask
            .as_ref()
            .map(|m| axis.iter().map(|&a| m[a]).collect());
        Ok(View::create(&shape, Some(&strides), self.offset, mask.as_deref()))
    }

    /// Broadcast size-1 dimensions
    pub fn expand(&self, new_shape: &[i64]) -> Result<View> {
        if new_shape.len() != self.ndim() {
            return Err(KernelError::ShapeMismatch {
                expected: self.shape.clone(),
                got: new_shape.to_vec(),
            });
        }
        for (&s, &ns) in self.shape.iter().zip(new_shape) {
            if s != ns && s != 1 {
                return Err(KernelError::InvalidView(format!(
                    "cannot expand {:?} to {:?}",
                    self.shape, new_shape
                )));
            }
        }
        if self.size() == 0 {
            return Ok(View::contiguous_of(new_shape));
        }
        let mask: Option<Mask> = self.mask.as_ref().map(|m| {
            m.iter()
                .zip(self.shape.iter().zip(new_shape))
                .map(|(&r, (&s, &ns))| {
                    if s == ns {
                        r
                    } else if r == (0, 1) {
                        (0, ns)
                    } else {
                        (0, 0)
                    }
                })
                .collect()
        });
        Ok(View::create(
            new_shape,
            Some(&self.strides),
            self.offset,
            mask.as_deref(),
        ))
    }

    /// Window `[b, e)` per dimension, which may reach outside the shape;
    /// `extra` intersects an additional mask in the new coordinates
    fn resize(&self, arg: &[(i64, i64)], extra: Option<&[(i64, i64)]>) -> View {
        let shape: Vec<i64> = arg.iter().map(|(b, e)| e - b).collect();
        let mut mask: Option<Mask> = self.mask.as_ref().map(|m| {
            m.iter()
                .zip(arg)
                .map(|(&(mx, my), &(ax, ay))| {
                    let span = ay - ax;
                    ((mx - ax).min(span).max(0), (my - ax).min(span).max(0))
                })
                .collect()
        });
        if let Some(extra) = extra {
            mask = Some(match mask {
                Some(m) => m
                    .iter()
                    .zip(extra)
                    .map(|(&(a, b), &(c, d))| (a.max(c), b.min(d)))
                    .collect(),
                None => extra.to_vec(),
            });
        }
        let offset = self.offset
            + arg
                .iter()
                .zip(&self.strides)
                .map(|(&(b, _), &st)| b * st)
                .sum::<i64>();
        View::create(&shape, Some(&self.strides), offset, mask.as_deref())
    }

    /// Grow each dimension by `(before, after)` masked positions
    pub fn pad(&self, arg: &[(i64, i64)]) -> Result<View> {
        if arg.len() != self.ndim() || arg.iter().any(|&(b, e)| b < 0 || e < 0) {
            return Err(KernelError::InvalidView(format!(
                "bad padding {:?} for shape {:?}",
                arg, self.shape
            )));
        }
        if arg.iter().all(|&(b, e)| b == 0 && e == 0) {
            return Ok(self.clone());
        }
        let window: Vec<(i64, i64)> = arg
            .iter()
            .zip(&self.shape)
            .map(|(&(b, e), &s)| (-b, s + e))
            .collect();
        let valid: Mask = arg
            .iter()
            .zip(&self.shape)
            .map(|(&(b, _), &s)| (b, s + b))
            .collect();
        Ok(self.resize(&window, Some(&valid)))
    }

    /// Restrict each dimension to `[b, e)`
    pub fn shrink(&self, arg: &[(i64, i64)]) -> Result<View> {
        if arg.len() != self.ndim()
            || arg
                .iter()
                .zip(&self.shape)
                .any(|(&(b, e), &s)| b < 0 || b > e || e > s)
        {
            return Err(KernelError::InvalidView(format!(
                "bad shrink {:?} for shape {:?}",
                arg, self.shape
            )));
        }
        Ok(self.resize(arg, None))
    }

    /// Take every `m`-th element per dimension; negative `m` walks backwards
    pub fn stride(&self, mul: &[i64]) -> Result<View> {
        if mul.len() != self.ndim() || mul.iter().any(|&m| m == 0) {
            return Err(KernelError::InvalidView(format!(
                "bad stride {:?} for shape {:?}",
                mul, self.shape
            )));
        }
        let strides: Vec<i64> = self.strides.iter().zip(mul).map(|(z, m)| z * m).collect();
        let shape: Vec<i64> = self
            .shape
            .iter()
            .zip(mul)
            .map(|(&s, &m)| ceil_div(s, m.abs()))
            .collect();
        let offset = self.offset
            + self
                .shape
                .iter()
                .zip(&self.strides)
                .zip(mul)
                .filter(|(_, &m)| m < 0)
                .map(|((&s, &z), _)| (s - 1) * z)
                .sum::<i64>();
        let mask: Option<Mask> = self.mask.as_ref().map(|m| {
            m.iter()
                .zip(&self.shape)
                .zip(mul)
                .map(|((&(mx, my), &s), &k)| {
                    let a = k.abs();
                    if k > 0 {
                        (ceil_div(mx, a), ceil_div(my, a))
                    } else {
                        (ceil_div(s - my, a), ceil_div(s - mx, a))
                    }
                })
                .collect()
        });
        Ok(View::create(&shape, Some(&strides), offset, mask.as_deref()))
    }

    /// Same view with stride-contiguous, unmasked neighbour dimensions merged
    pub fn minify(&self) -> View {
        let mut groups: Vec<i64> = Vec::new();
        let mut prev: Option<usize> = None;
        let full = self.full_mask();
        let mask = self.mask.as_ref().unwrap_or(&full);
        for d in 0..self.ndim() {
            if self.shape[d] == 1 {
                continue;
            }
            let unmasked = |x: usize| mask[x] == (0, self.shape[x]);
            match prev {
                Some(p)
                    if self.strides[p] == self.strides[d] * self.shape[d]
                        && unmasked(p)
                        && unmasked(d) =>
                {
                    if let Some(last) = groups.last_mut() {
                        *last *= self.shape[d];
                    }
                }
                _ => groups.push(self.shape[d]),
            }
            prev = Some(d);
        }
        if groups.len() == self.ndim() {
            return self.clone();
        }
        match self.reshape(&groups) {
            Ok(Some(v)) => v,
            _ => self.clone(),
        }
    }

    /// Fold `outer`, a view whose addresses index into `self`, into a single
    /// view equivalent to applying both. `None` when no single view exists
    /// or the fold is not provable.
    pub fn merge(&self, outer: &View) -> Option<View> {
        if outer.is_fully_masked() {
            let zeros = vec![0; outer.ndim()];
            let empty = vec![(0, 0); outer.ndim()];
            return Some(View::create(&outer.shape, Some(&zeros), 0, Some(&empty)));
        }
        let (lo, hi) = outer.valid_range()?;
        if lo < 0 || hi >= self.size() {
            return None;
        }
        if self.contiguous {
            return Some(outer.clone());
        }
        if outer.contiguous {
            if outer.shape == self.shape {
                return Some(self.clone());
            }
            if let Ok(Some(v)) = self.reshape(&outer.shape) {
                return Some(v);
            }
        }
        if let Some(mask) = &outer.mask {
            let shrunk = outer.shrink(mask).ok()?;
            let merged = self.merge(&shrunk)?;
            let pads: Vec<(i64, i64)> = mask
                .iter()
                .zip(&outer.shape)
                .map(|(&(b, e), &s)| (b, s - e))
                .collect();
            return merged.pad(&pads).ok();
        }
        self.project(outer).or_else(|| {
            let small = self.minify();
            if small.shape != self.shape {
                small.project(outer)
            } else {
                None
            }
        })
    }

    /// Merge an unmasked outer view by expressing each outer step as a
    /// constant step in the coordinates of `self`
    fn project(&self, outer: &View) -> Option<View> {
        let origin = unravel(outer.offset, &self.shape);
        let deltas: Vec<Vec<i64>> = (0..outer.ndim())
            .map(|d1| {
                if outer.shape[d1] == 1 || outer.strides[d1] == 0 {
                    vec![0; self.ndim()]
                } else {
                    unravel(outer.offset + outer.strides[d1], &self.shape)
                        .iter()
                        .zip(&origin)
                        .map(|(a, b)| a - b)
                        .collect()
                }
            })
            .collect();

        // every coordinate must stay inside its dimension over the whole box
        let mut ranges = Vec::with_capacity(self.ndim());
        for d2 in 0..self.ndim() {
            let (mut lo, mut hi) = (origin[d2], origin[d2]);
            for d1 in 0..outer.ndim() {
                let span = deltas[d1][d2] * (outer.shape[d1] - 1);
                lo += span.min(0);
                hi += span.max(0);
            }
            if lo < 0 || hi >= self.shape[d2] {
                return None;
            }
            ranges.push((lo, hi));
        }

        let strides: Vec<i64> = deltas
            .iter()
            .map(|delta| delta.iter().zip(&self.strides).map(|(a, b)| a * b).sum())
            .collect();
        let offset = self.offset
            + origin
                .iter()
                .zip(&self.strides)
                .map(|(a, b)| a * b)
                .sum::<i64>();

        let mask = match &self.mask {
            None => None,
            Some(inner_mask) => {
                let mut new_mask: Mask = outer.shape.iter().map(|&s| (0, s)).collect();
                for (d2, &(b, e)) in inner_mask.iter().enumerate() {
                    let (lo, hi) = ranges[d2];
                    if b <= lo && hi < e {
                        continue;
                    }
                    let deps: Vec<usize> = (0..outer.ndim())
                        .filter(|&d1| deltas[d1][d2] != 0)
                        .collect();
                    match deps.as_slice() {
                        [] => {
                            let zeros = vec![0; outer.ndim()];
                            let empty = vec![(0, 0); outer.ndim()];
                            return Some(View::create(
                                &outer.shape,
                                Some(&zeros),
                                0,
                                Some(&empty),
                            ));
                        }
                        [d1] => {
                            let (s, o) = (deltas[*d1][d2], origin[d2]);
                            let (first, last) = if s > 0 {
                                (ceil_div(b - o, s), floor_div(e - 1 - o, s))
                            } else {
                                (ceil_div(e - 1 - o, s), floor_div(b - o, s))
                            };
                            let r = &mut new_mask[*d1];
                            r.0 = r.0.max(first);
                            r.1 = r.1.min(last + 1);
                        }
                        _ => return None,
                    }
                }
                for r in new_mask.iter_mut() {
                    if r.0 >= r.1 {
                        *r = (0, 0);
                    }
                }
                Some(new_mask)
            }
        };

        Some(View::create(
            &outer.shape,
            Some(&strides),
            offset,
            mask.as_deref(),
        ))
    }
}
