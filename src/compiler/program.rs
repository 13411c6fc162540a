// Linearized Program
//
// The ordered instruction list handed to a backend renderer, together with
// the buffers and launch axes it references.

use crate::core::error::{KernelError, Result};
use crate::ir::node::{Arg, NodeId, UOp, UOps};
use crate::ir::types::{AddrSpace, ScalarType};
use std::collections::HashMap;
use std::fmt;

/// One emitted instruction: the graph node it came from and its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub id: NodeId,
    pub uop: UOp,
}

/// A buffer the program reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDecl {
    pub id: NodeId,
    pub name: String,
    pub dtype: ScalarType,
    pub space: AddrSpace,
    /// Parameter slot of a global buffer
    pub slot: Option<usize>,
    /// Element count of a local buffer
    pub size: Option<usize>,
}

/// A parallel launch dimension named by a SPECIAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAxis {
    pub id: NodeId,
    pub name: String,
    pub bound: i64,
}

impl LaunchAxis {
    /// Work-group-local lane axis (`l...` names)
    pub fn is_local(&self) -> bool {
        self.name.starts_with('l')
    }
}

/// Ordered, synchronization-correct instruction list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    name: String,
    uops: Vec<Instruction>,
    globals: Vec<BufferDecl>,
    locals: Vec<BufferDecl>,
    specials: Vec<LaunchAxis>,
}

impl Program {
    /// Empty program
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Collect declarations from an ordered instruction list and verify it
    pub fn new(name: impl Into<String>, uops: Vec<Instruction>) -> Result<Self> {
        let mut globals = Vec::new();
        let mut locals = Vec::new();
        let mut specials = Vec::new();
        for ins in &uops {
            let uop = &ins.uop;
            match (&uop.op, &uop.arg) {
                (UOps::DefineGlobal, Arg::Global(slot)) => globals.push(BufferDecl {
                    id: ins.id,
                    name: format!("data{}", slot),
                    dtype: Self::base_of(uop)?,
                    space: AddrSpace::Global,
                    slot: Some(*slot),
                    size: None,
                }),
                (UOps::DefineLocal, Arg::Local { name, size }) => locals.push(BufferDecl {
                    id: ins.id,
                    name: name.clone(),
                    dtype: Self::base_of(uop)?,
                    space: AddrSpace::Local,
                    slot: None,
                    size: Some(*size),
                }),
                (UOps::Special, Arg::Special { name, bound }) => specials.push(LaunchAxis {
                    id: ins.id,
                    name: name.clone(),
                    bound: *bound,
                }),
                _ => {}
            }
        }
        let program = Self {
            name: name.into(),
            uops,
            globals,
            locals,
            specials,
        };
        program.verify()?;
        Ok(program)
    }

    fn base_of(uop: &UOp) -> Result<ScalarType> {
        uop.dtype
            .map(|d| d.base())
            .ok_or_else(|| KernelError::invalid(uop.op, "buffer without a dtype"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.uops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uops.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.uops
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.uops.iter()
    }

    /// Ops in emission order
    pub fn ops(&self) -> Vec<UOps> {
        self.uops.iter().map(|i| i.uop.op).collect()
    }

    /// Position of a graph node in the program
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.uops.iter().position(|i| i.id == id)
    }

    /// Number of instructions of a kind
    pub fn count(&self, op: UOps) -> usize {
        self.uops.iter().filter(|i| i.uop.op == op).count()
    }

    pub fn globals(&self) -> &[BufferDecl] {
        &self.globals
    }

    pub fn locals(&self) -> &[BufferDecl] {
        &self.locals
    }

    pub fn specials(&self) -> &[LaunchAxis] {
        &self.specials
    }

    /// Every source precedes its user and IF/ENDIF regions nest
    pub fn verify(&self) -> Result<()> {
        let mut seen: HashMap<NodeId, usize> = HashMap::with_capacity(self.uops.len());
        let mut open: Vec<NodeId> = Vec::new();
        for (pos, ins) in self.uops.iter().enumerate() {
            for &s in &ins.uop.src {
                if !seen.contains_key(&s) {
                    return Err(KernelError::Cycle { source_id: s });
                }
            }
            match ins.uop.op {
                UOps::If => open.push(ins.id),
                UOps::EndIf => {
                    let closes = ins.uop.src.first().copied();
                    if open.last().copied() != closes || closes.is_none() {
                        return Err(KernelError::RegionMismatch(format!(
                            "ENDIF at {} closes {:?} but the innermost open region is {:?}",
                            pos,
                            closes,
                            open.last()
                        )));
                    }
                    open.pop();
                }
                _ => {}
            }
            if seen.insert(ins.id, pos).is_some() {
                return Err(KernelError::invalid(
                    ins.uop.op,
                    format!("node {} emitted twice", ins.id),
                ));
            }
        }
        if let Some(unclosed) = open.last() {
            return Err(KernelError::RegionMismatch(format!(
                "IF {} is never closed",
                unclosed
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "program {}:", self.name)?;
        let pos: HashMap<NodeId, usize> =
            self.uops.iter().enumerate().map(|(p, i)| (i.id, p)).collect();
        for (p, ins) in self.uops.iter().enumerate() {
            let dtype = ins.uop.dtype.map(|d| d.to_string()).unwrap_or_default();
            let src: Vec<String> = ins
                .uop
                .src
                .iter()
                .map(|s| pos.get(s).map_or_else(|| format!("?{}", s), |p| p.to_string()))
                .collect();
            writeln!(
                f,
                "{:4} {:<12} {:<18} [{}] {}",
                p,
                format!("{:?}", ins.uop.op).to_lowercase(),
                dtype,
                src.join(", "),
                ins.uop.arg
            )?;
        }
        Ok(())
    }
}
