// Symbolic Index Algebra
//
// Integer expressions over bounded index variables. Every constructor
// simplifies, so two routes to the same affine address usually meet in the
// same `Node`. Division and modulo are floor semantics and are only ever
// materialised on operands whose minimum is non-negative, which makes them
// agree with the truncating IDIV/MOD of the IR.

use crate::core::error::{KernelError, Result};
use std::collections::HashMap;
use std::fmt;

/// Symbolic integer expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Num(i64),
    Var { name: String, min: i64, max: i64 },
    Mul(Box<Node>, i64),
    /// Floor division by a positive constant
    Div(Box<Node>, i64),
    /// Floor modulo by a positive constant
    Mod(Box<Node>, i64),
    Sum(Vec<Node>),
    /// `node < k`, 0 or 1
    Lt(Box<Node>, i64),
    /// Conjunction of 0/1 nodes
    And(Vec<Node>),
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Node {
    pub fn num(v: i64) -> Node {
        Node::Num(v)
    }

    /// Variable in `min..=max`; collapses to a number when the range is a point
    pub fn var(name: impl Into<String>, min: i64, max: i64) -> Node {
        if min == max {
            return Node::Num(min);
        }
        Node::Var {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn as_num(&self) -> Option<i64> {
        match self {
            Node::Num(v) => Some(*v),
            _ => None,
        }
    }

    pub fn min(&self) -> i64 {
        self.bounds().0
    }

    pub fn max(&self) -> i64 {
        self.bounds().1
    }

    /// Inclusive `(min, max)` of the expression
    pub fn bounds(&self) -> (i64, i64) {
        match self {
            Node::Num(v) => (*v, *v),
            Node::Var { min, max, .. } => (*min, *max),
            Node::Mul(a, k) => {
                let (lo, hi) = a.bounds();
                if *k >= 0 {
                    (lo * k, hi * k)
                } else {
                    (hi * k, lo * k)
                }
            }
            Node::Div(a, k) => {
                let (lo, hi) = a.bounds();
                (lo.div_euclid(*k), hi.div_euclid(*k))
            }
            Node::Mod(_, k) => (0, k - 1),
            Node::Sum(ts) => ts.iter().fold((0, 0), |(lo, hi), t| {
                let (a, b) = t.bounds();
                (lo + a, hi + b)
            }),
            Node::Lt(..) => (0, 1),
            Node::And(ts) => ts.iter().fold((1, 1), |(lo, hi), t| {
                let (a, b) = t.bounds();
                (lo.min(a), hi.min(b))
            }),
        }
    }

    /// Split a term into `(base, coefficient)`
    fn split_coefficient(self) -> (Node, i64) {
        match self {
            Node::Mul(a, k) => (*a, k),
            Node::Num(v) => (Node::Num(1), v),
            other => (other, 1),
        }
    }

    fn from_coefficient(base: Node, k: i64) -> Node {
        match base {
            Node::Num(v) => Node::Num(v * k),
            base => base.mul(k),
        }
    }

    /// Flattening, like-term combining sum
    pub fn sum(nodes: Vec<Node>) -> Node {
        let mut flat = Vec::new();
        let mut stack: Vec<Node> = nodes.into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            match n {
                Node::Sum(ts) => stack.extend(ts.into_iter().rev()),
                other => flat.push(other),
            }
        }

        let mut constant = 0i64;
        let mut terms: Vec<(Node, i64)> = Vec::new();
        for t in flat {
            match t {
                Node::Num(v) => constant += v,
                t => {
                    let (base, k) = t.split_coefficient();
                    match terms.iter_mut().find(|(b, _)| *b == base) {
                        Some((_, coef)) => *coef += k,
                        None => terms.push((base, k)),
                    }
                }
            }
        }

        let mut out: Vec<Node> = terms
            .into_iter()
            .filter(|(_, k)| *k != 0)
            .map(|(b, k)| Node::from_coefficient(b, k))
            .collect();
        if constant != 0 || out.is_empty() {
            out.push(Node::Num(constant));
        }
        if out.len() == 1 {
            return out.pop().unwrap_or(Node::Num(0));
        }
        Node::Sum(out)
    }

    pub fn add(self, other: Node) -> Node {
        Node::sum(vec![self, other])
    }

    pub fn add_num(self, v: i64) -> Node {
        self.add(Node::Num(v))
    }

    pub fn neg(self) -> Node {
        self.mul(-1)
    }

    pub fn mul(self, k: i64) -> Node {
        match (self, k) {
            (_, 0) => Node::Num(0),
            (n, 1) => n,
            (Node::Num(v), k) => Node::Num(v * k),
            (Node::Mul(a, c), k) => a.mul(c * k),
            (Node::Sum(ts), k) => Node::sum(ts.into_iter().map(|t| t.mul(k)).collect()),
            (n, k) => Node::Mul(Box::new(n), k),
        }
    }

    /// Floor division by `k > 0`
    pub fn floordiv(self, k: i64) -> Node {
        debug_assert!(k > 0, "floordiv by non-positive {}", k);
        if k == 1 {
            return self;
        }
        if let Node::Num(v) = self {
            return Node::Num(v.div_euclid(k));
        }
        let (lo, hi) = self.bounds();
        if lo < 0 {
            let offset = lo.div_euclid(k);
            return self.add_num(-offset * k).floordiv(k).add_num(offset);
        }
        if lo / k == hi / k {
            return Node::Num(lo / k);
        }
        match self {
            Node::Mul(a, c) if c % k == 0 => a.mul(c / k),
            Node::Mul(a, c) if c > 0 && k % c == 0 => a.floordiv(k / c),
            Node::Div(a, c) => a.floordiv(c * k),
            Node::Sum(ts) => {
                let mut quotient = Vec::new();
                let mut rest = Vec::new();
                for t in ts.iter().cloned() {
                    let (base, coef) = t.clone().split_coefficient();
                    if coef % k == 0 {
                        quotient.push(Node::from_coefficient(base, coef / k));
                    } else {
                        rest.push(t);
                    }
                }
                let rest = Node::sum(rest);
                if !quotient.is_empty() && rest.min() >= 0 {
                    quotient.push(rest.floordiv(k));
                    return Node::sum(quotient);
                }
                // common factor of the remaining coefficients
                let g = ts
                    .iter()
                    .map(|t| t.clone().split_coefficient().1)
                    .fold(0, gcd);
                if g > 1 && k % g == 0 {
                    let reduced = Node::sum(
                        ts.into_iter()
                            .map(|t| {
                                let (base, coef) = t.split_coefficient();
                                Node::from_coefficient(base, coef / g)
                            })
                            .collect(),
                    );
                    return reduced.floordiv(k / g);
                }
                Node::Div(Box::new(Node::Sum(ts)), k)
            }
            n => Node::Div(Box::new(n), k),
        }
    }

    /// Floor modulo by `k > 0`
    pub fn modulo(self, k: i64) -> Node {
        debug_assert!(k > 0, "modulo by non-positive {}", k);
        if k == 1 {
            return Node::Num(0);
        }
        if let Node::Num(v) = self {
            return Node::Num(v.rem_euclid(k));
        }
        let (lo, hi) = self.bounds();
        if lo < 0 {
            let offset = lo.div_euclid(k) * k;
            return self.add_num(-offset).modulo(k);
        }
        if hi < k {
            return self;
        }
        if lo / k == hi / k {
            return self.add_num(-(lo / k) * k);
        }
        match self {
            Node::Mul(_, c) if c % k == 0 => Node::Num(0),
            Node::Mul(a, c) if c.rem_euclid(k) != c => a.mul(c.rem_euclid(k)).modulo(k),
            Node::Mod(a, c) if c % k == 0 => a.modulo(k),
            Node::Sum(ts) => {
                let reduced = Node::sum(
                    ts.iter()
                        .cloned()
                        .filter_map(|t| {
                            let (base, coef) = t.split_coefficient();
                            let r = coef.rem_euclid(k);
                            if r == 0 {
                                None
                            } else {
                                Some(Node::from_coefficient(base, if r == coef { coef } else { r }))
                            }
                        })
                        .collect(),
                );
                if reduced != Node::Sum(ts.clone()) && reduced.min() >= 0 {
                    return reduced.modulo(k);
                }
                Node::Mod(Box::new(Node::Sum(ts)), k)
            }
            n => Node::Mod(Box::new(n), k),
        }
    }

    /// `self < k` as a 0/1 node
    pub fn lt(self, k: i64) -> Node {
        let (lo, hi) = self.bounds();
        if hi < k {
            return Node::Num(1);
        }
        if lo >= k {
            return Node::Num(0);
        }
        match self {
            // a*c < k  <=>  a < ceil(k/c)
            Node::Mul(a, c) if c > 0 => a.lt(-(-k).div_euclid(c)),
            n => Node::Lt(Box::new(n), k),
        }
    }

    /// `self >= k` as a 0/1 node
    pub fn ge(self, k: i64) -> Node {
        self.neg().lt(-k + 1)
    }

    /// Conjunction; absorbs constants and duplicates
    pub fn ands(nodes: Vec<Node>) -> Node {
        let mut out: Vec<Node> = Vec::new();
        let mut stack: Vec<Node> = nodes.into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            match n {
                Node::And(ts) => stack.extend(ts.into_iter().rev()),
                Node::Num(0) => return Node::Num(0),
                Node::Num(_) => {}
                other => {
                    if !out.contains(&other) {
                        out.push(other);
                    }
                }
            }
        }
        match out.len() {
            0 => Node::Num(1),
            1 => out.pop().unwrap_or(Node::Num(1)),
            _ => Node::And(out),
        }
    }

    /// Evaluate with concrete variable values
    pub fn eval(&self, env: &HashMap<String, i64>) -> Result<i64> {
        Ok(match self {
            Node::Num(v) => *v,
            Node::Var { name, .. } => *env
                .get(name)
                .ok_or_else(|| KernelError::UnboundVariable(name.clone()))?,
            Node::Mul(a, k) => a.eval(env)? * k,
            Node::Div(a, k) => a.eval(env)?.div_euclid(*k),
            Node::Mod(a, k) => a.eval(env)?.rem_euclid(*k),
            Node::Sum(ts) => ts.iter().map(|t| t.eval(env)).sum::<Result<i64>>()?,
            Node::Lt(a, k) => (a.eval(env)? < *k) as i64,
            Node::And(ts) => {
                for t in ts {
                    if t.eval(env)? == 0 {
                        return Ok(0);
                    }
                }
                1
            }
        })
    }

    /// Replace variables by expressions, re-simplifying on the way up
    pub fn substitute(&self, env: &HashMap<String, Node>) -> Node {
        match self {
            Node::Num(_) => self.clone(),
            Node::Var { name, .. } => env.get(name).cloned().unwrap_or_else(|| self.clone()),
            Node::Mul(a, k) => a.substitute(env).mul(*k),
            Node::Div(a, k) => a.substitute(env).floordiv(*k),
            Node::Mod(a, k) => a.substitute(env).modulo(*k),
            Node::Sum(ts) => Node::sum(ts.iter().map(|t| t.substitute(env)).collect()),
            Node::Lt(a, k) => a.substitute(env).lt(*k),
            Node::And(ts) => Node::ands(ts.iter().map(|t| t.substitute(env)).collect()),
        }
    }

    /// Variables in first-appearance order
    pub fn vars(&self) -> Vec<(String, i64, i64)> {
        let mut out: Vec<(String, i64, i64)> = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<(String, i64, i64)>) {
        match self {
            Node::Num(_) => {}
            Node::Var { name, min, max } => {
                if !out.iter().any(|(n, _, _)| n == name) {
                    out.push((name.clone(), *min, *max));
                }
            }
            Node::Mul(a, _) | Node::Div(a, _) | Node::Mod(a, _) | Node::Lt(a, _) => {
                a.collect_vars(out)
            }
            Node::Sum(ts) | Node::And(ts) => ts.iter().for_each(|t| t.collect_vars(out)),
        }
    }

    /// Coefficient of `name` when it only appears linearly at the top level
    pub fn affine_coefficient(&self, name: &str) -> Option<i64> {
        let terms: Vec<&Node> = match self {
            Node::Sum(ts) => ts.iter().collect(),
            other => vec![other],
        };
        let mut coef = 0;
        for t in terms {
            match t {
                Node::Var { name: n, .. } if n == name => coef += 1,
                Node::Mul(a, k) if matches!(a.as_ref(), Node::Var { name: n, .. } if n == name) => {
                    coef += k
                }
                other => {
                    if other.vars().iter().any(|(n, _, _)| n == name) {
                        return None;
                    }
                }
            }
        }
        Some(coef)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Node::Num(v) => write!(f, "{}", v),
            Node::Var { name, .. } => write!(f, "{}", name),
            Node::Mul(a, k) => write!(f, "({}*{})", a, k),
            Node::Div(a, k) => write!(f, "({}//{})", a, k),
            Node::Mod(a, k) => write!(f, "({}%{})", a, k),
            Node::Sum(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "+")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            Node::Lt(a, k) => write!(f, "({}<{})", a, k),
            Node::And(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
        }
    }
}
