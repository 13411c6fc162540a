// ALU Semantics
//
// Exact result of every operator for every scalar type. Used by constant
// folding and by the interpreter, so generated code has a single oracle.

use crate::core::error::{KernelError, Result};
use crate::ir::node::{AluOp, BinaryOps, TernaryOps, UOps, UnaryOps};
use crate::ir::types::{ConstValue, DType, ScalarType};

/// Evaluate `op` on `operands` and truncate the result to `dtype`.
///
/// Comparisons always produce a `Bool` regardless of `dtype`. Integer
/// division or modulo by zero is [`KernelError::DivisionByZero`].
pub fn exec_alu(op: AluOp, dtype: ScalarType, operands: &[ConstValue]) -> Result<ConstValue> {
    if operands.len() != op.arity() {
        return Err(KernelError::invalid(
            UOps::Alu,
            format!("{} takes {} operands, got {}", op, op.arity(), operands.len()),
        ));
    }
    let raw = match op {
        AluOp::Unary(u) => exec_unary(u, operands[0]),
        AluOp::Binary(b) => exec_binary(b, operands[0], operands[1])?,
        AluOp::Ternary(t) => exec_ternary(t, operands[0], operands[1], operands[2])?,
    };
    let dtype = if op.is_comparison() {
        ScalarType::Bool
    } else {
        dtype
    };
    Ok(truncate(raw, dtype))
}

fn exec_unary(op: UnaryOps, x: ConstValue) -> ConstValue {
    match (op, x) {
        (UnaryOps::Neg, ConstValue::Bool(b)) => ConstValue::Bool(!b),
        (UnaryOps::Neg, ConstValue::Int(i)) => ConstValue::Int(i.wrapping_neg()),
        (UnaryOps::Neg, ConstValue::Float(f)) => ConstValue::Float(-f),
        (UnaryOps::Exp2, x) => ConstValue::Float(x.as_f64().exp2()),
        (UnaryOps::Log2, x) => ConstValue::Float(x.as_f64().log2()),
        (UnaryOps::Sin, x) => ConstValue::Float(x.as_f64().sin()),
        (UnaryOps::Sqrt, x) => ConstValue::Float(x.as_f64().sqrt()),
        // 1/±0 is ±inf
        (UnaryOps::Recip, x) => ConstValue::Float(1.0 / x.as_f64()),
    }
}

fn exec_binary(op: BinaryOps, a: ConstValue, b: ConstValue) -> Result<ConstValue> {
    if a.is_float() || b.is_float() {
        return float_binary(op, a.as_f64(), b.as_f64());
    }
    if let (ConstValue::Bool(x), ConstValue::Bool(y)) = (a, b) {
        if let Some(v) = bool_binary(op, x, y) {
            return Ok(ConstValue::Bool(v));
        }
    }
    int_binary(op, a.as_i128(), b.as_i128())
}

fn float_binary(op: BinaryOps, a: f64, b: f64) -> Result<ConstValue> {
    let v = match op {
        BinaryOps::Add => a + b,
        BinaryOps::Sub => a - b,
        BinaryOps::Mul => a * b,
        BinaryOps::Max => {
            if b > a {
                b
            } else {
                a
            }
        }
        BinaryOps::CmpLt => return Ok(ConstValue::Bool(a < b)),
        BinaryOps::CmpNe => return Ok(ConstValue::Bool(a != b)),
        _ => return Err(KernelError::Unsupported(format!("{} on floats", op))),
    };
    Ok(ConstValue::Float(v))
}

fn bool_binary(op: BinaryOps, a: bool, b: bool) -> Option<bool> {
    match op {
        BinaryOps::Add | BinaryOps::Max | BinaryOps::Or => Some(a || b),
        BinaryOps::Mul | BinaryOps::And => Some(a && b),
        BinaryOps::Sub | BinaryOps::Xor | BinaryOps::CmpNe => Some(a != b),
        BinaryOps::CmpLt => Some(!a && b),
        _ => None,
    }
}

fn int_binary(op: BinaryOps, a: i128, b: i128) -> Result<ConstValue> {
    let v = match op {
        BinaryOps::Add => a.wrapping_add(b),
        BinaryOps::Sub => a.wrapping_sub(b),
        BinaryOps::Mul => a.wrapping_mul(b),
        BinaryOps::IDiv => {
            if b == 0 {
                return Err(KernelError::DivisionByZero);
            }
            let q = (a.unsigned_abs() / b.unsigned_abs()) as i128;
            if (a < 0) != (b < 0) {
                -q
            } else {
                q
            }
        }
        BinaryOps::Mod => {
            if b == 0 {
                return Err(KernelError::DivisionByZero);
            }
            let r = (a.unsigned_abs() % b.unsigned_abs()) as i128;
            if a < 0 {
                -r
            } else {
                r
            }
        }
        BinaryOps::Max => a.max(b),
        BinaryOps::CmpLt => return Ok(ConstValue::Bool(a < b)),
        BinaryOps::CmpNe => return Ok(ConstValue::Bool(a != b)),
        BinaryOps::Xor => a ^ b,
        BinaryOps::And => a & b,
        BinaryOps::Or => a | b,
        BinaryOps::Shl => {
            if b < 0 {
                return Err(KernelError::Unsupported("negative shift".into()));
            }
            if b >= 128 {
                0
            } else {
                a.wrapping_shl(b as u32)
            }
        }
        BinaryOps::Shr => {
            if b < 0 {
                return Err(KernelError::Unsupported("negative shift".into()));
            }
            if b >= 128 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            }
        }
    };
    Ok(ConstValue::Int(v))
}

fn exec_ternary(op: TernaryOps, a: ConstValue, b: ConstValue, c: ConstValue) -> Result<ConstValue> {
    match op {
        TernaryOps::Where => match a {
            ConstValue::Bool(cond) => Ok(if cond { b } else { c }),
            _ => Err(KernelError::Unsupported(
                "where condition must be a bool".into(),
            )),
        },
        TernaryOps::MulAcc => {
            let prod = exec_binary(BinaryOps::Mul, a, b)?;
            exec_binary(BinaryOps::Add, prod, c)
        }
    }
}

/// Wrap an integer into the range of `st` (two's complement)
pub fn wrap_int(v: i128, st: ScalarType) -> i128 {
    let bits = st.bits();
    let modulus = 1i128 << bits;
    let m = v.rem_euclid(modulus);
    if !st.is_unsigned() && m >= modulus / 2 {
        m - modulus
    } else {
        m
    }
}

/// Represent `value` in `dtype`
pub fn truncate(value: ConstValue, dtype: ScalarType) -> ConstValue {
    match dtype {
        ScalarType::Bool => ConstValue::Bool(value.as_bool()),
        ScalarType::Float32 => ConstValue::Float(value.as_f64() as f32 as f64),
        ScalarType::Float64 => ConstValue::Float(value.as_f64()),
        st => ConstValue::Int(wrap_int(value.as_i128(), st)),
    }
}

/// Value-converting cast: floats truncate toward zero into integers,
/// integers wrap, anything non-zero is `true`
pub fn cast(value: ConstValue, dtype: ScalarType) -> ConstValue {
    truncate(value, dtype)
}

fn raw_bits(value: ConstValue, from: ScalarType) -> u64 {
    match from {
        ScalarType::Float32 => (value.as_f64() as f32).to_bits() as u64,
        ScalarType::Float64 => value.as_f64().to_bits(),
        ScalarType::Bool => value.as_bool() as u64,
        st => {
            let mask = if st.bits() == 64 {
                u64::MAX as i128
            } else {
                (1i128 << st.bits()) - 1
            };
            (wrap_int(value.as_i128(), st) & mask) as u64
        }
    }
}

/// Reinterpret the bits of `value` (of type `from`) as `to`
pub fn bitcast(value: ConstValue, from: ScalarType, to: ScalarType) -> Result<ConstValue> {
    if from.size_bytes() != to.size_bytes() {
        return Err(KernelError::Unsupported(format!(
            "bitcast between {} and {} of different widths",
            from, to
        )));
    }
    let bits = raw_bits(value, from);
    Ok(match to {
        ScalarType::Float32 => ConstValue::Float(f32::from_bits(bits as u32) as f64),
        ScalarType::Float64 => ConstValue::Float(f64::from_bits(bits)),
        ScalarType::Bool => ConstValue::Bool(bits != 0),
        st => ConstValue::Int(wrap_int(bits as i128, st)),
    })
}

fn scalar_operand(op: AluOp, dtype: &DType) -> Result<ScalarType> {
    dtype
        .scalar()
        .ok_or_else(|| KernelError::invalid(UOps::Alu, format!("{} operand is a pointer", op)))
}

fn same_types(op: AluOp, a: ScalarType, b: ScalarType) -> Result<()> {
    if a != b {
        return Err(KernelError::invalid(
            UOps::Alu,
            format!("{} operands have different types {} and {}", op, a, b),
        ));
    }
    Ok(())
}

/// Type rule for an ALU node: validate operand types and return the result type.
pub fn check_alu(op: AluOp, srcs: &[DType]) -> Result<DType> {
    if srcs.len() != op.arity() {
        return Err(KernelError::invalid(
            UOps::Alu,
            format!("{} takes {} operands, got {}", op, op.arity(), srcs.len()),
        ));
    }
    let types = srcs
        .iter()
        .map(|d| scalar_operand(op, d))
        .collect::<Result<Vec<_>>>()?;
    let unsupported = |st: ScalarType| KernelError::Unsupported(format!("{} on {}", op, st));
    let a = types[0];
    match op {
        AluOp::Unary(UnaryOps::Neg) => Ok(a.into()),
        AluOp::Unary(_) => {
            if a.is_float() {
                Ok(a.into())
            } else {
                Err(unsupported(a))
            }
        }
        AluOp::Binary(b) => {
            let rhs = types[1];
            match b {
                BinaryOps::Shl | BinaryOps::Shr => {
                    if !a.is_integer() {
                        return Err(unsupported(a));
                    }
                    if !rhs.is_integer() {
                        return Err(unsupported(rhs));
                    }
                    Ok(a.into())
                }
                BinaryOps::IDiv | BinaryOps::Mod => {
                    same_types(op, a, rhs)?;
                    if a.is_integer() {
                        Ok(a.into())
                    } else {
                        Err(unsupported(a))
                    }
                }
                BinaryOps::Xor | BinaryOps::And | BinaryOps::Or => {
                    same_types(op, a, rhs)?;
                    if a.is_float() {
                        Err(unsupported(a))
                    } else {
                        Ok(a.into())
                    }
                }
                BinaryOps::CmpLt | BinaryOps::CmpNe => {
                    same_types(op, a, rhs)?;
                    Ok(ScalarType::Bool.into())
                }
                BinaryOps::Add | BinaryOps::Sub | BinaryOps::Mul | BinaryOps::Max => {
                    same_types(op, a, rhs)?;
                    Ok(a.into())
                }
            }
        }
        AluOp::Ternary(TernaryOps::Where) => {
            if !a.is_bool() {
                return Err(KernelError::Unsupported(format!(
                    "where condition of type {}",
                    a
                )));
            }
            same_types(op, types[1], types[2])?;
            Ok(types[1].into())
        }
        AluOp::Ternary(TernaryOps::MulAcc) => {
            same_types(op, a, types[1])?;
            same_types(op, a, types[2])?;
            if a.is_bool() {
                Err(unsupported(a))
            } else {
                Ok(a.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn int(v: i128) -> ConstValue {
        ConstValue::Int(v)
    }

    fn binary(op: BinaryOps, st: ScalarType, a: i128, b: i128) -> ConstValue {
        exec_alu(op.into(), st, &[int(a), int(b)]).unwrap()
    }

    #[test]
    fn test_overflow_wraps() {
        assert_eq!(binary(BinaryOps::Add, ScalarType::Uint8, 250, 250), int(244));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Uint8, 256, 0), int(0));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Uint8, 0, -1), int(255));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Uint8, 0, -1000), int(24));

        assert_eq!(binary(BinaryOps::Add, ScalarType::Int8, 127, 0), int(127));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Int8, -128, 0), int(-128));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Int8, -100, -100), int(56));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Int8, -1000, 0), int(24));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Int8, -130, 0), int(126));
        assert_eq!(binary(BinaryOps::Add, ScalarType::Int8, 1, 1), int(2));
    }

    #[test]
    fn test_idiv_truncates() {
        assert_eq!(binary(BinaryOps::IDiv, ScalarType::Int8, 8, 2), int(4));
        assert_eq!(binary(BinaryOps::IDiv, ScalarType::Int8, 7, 3), int(2));
        assert_eq!(binary(BinaryOps::IDiv, ScalarType::Int8, 7, -3), int(-2));
        assert_eq!(binary(BinaryOps::IDiv, ScalarType::Int8, -50, 6), int(-8));
    }

    #[test]
    fn test_mod_follows_dividend() {
        assert_eq!(binary(BinaryOps::Mod, ScalarType::Int32, -7, 3), int(-1));
        assert_eq!(binary(BinaryOps::Mod, ScalarType::Int32, 7, -3), int(1));
        assert_eq!(binary(BinaryOps::Mod, ScalarType::Int32, -2, -3), int(-2));
    }

    #[test]
    fn test_division_by_zero() {
        let err = exec_alu(BinaryOps::IDiv.into(), ScalarType::Int32, &[int(1), int(0)]);
        assert_eq!(err, Err(KernelError::DivisionByZero));
        let err = exec_alu(BinaryOps::Mod.into(), ScalarType::Int32, &[int(1), int(0)]);
        assert_eq!(err, Err(KernelError::DivisionByZero));
    }

    #[test]
    fn test_float_specials() {
        let f = |op: UnaryOps, x: f64| {
            exec_alu(op.into(), ScalarType::Float32, &[ConstValue::Float(x)])
                .unwrap()
                .as_f64()
        };
        assert_eq!(f(UnaryOps::Recip, 0.0), f64::INFINITY);
        assert_eq!(f(UnaryOps::Recip, -0.0), f64::NEG_INFINITY);
        assert!(f(UnaryOps::Sqrt, -1.0).is_nan());
        assert_eq!(f(UnaryOps::Sqrt, 0.0), 0.0);
        assert_eq!(f(UnaryOps::Log2, 0.0), f64::NEG_INFINITY);
        assert!(f(UnaryOps::Log2, -2.0).is_nan());
        assert!(f(UnaryOps::Sin, f64::INFINITY).is_nan());
        assert_eq!(f(UnaryOps::Exp2, 1e6), f64::INFINITY);
    }

    #[test]
    fn test_recip_rounds_to_float32() {
        let recip3 = exec_alu(UnaryOps::Recip.into(), ScalarType::Float32, &[int(3)]).unwrap();
        let v = exec_alu(
            BinaryOps::Mul.into(),
            ScalarType::Float32,
            &[ConstValue::Float(7.0), recip3],
        )
        .unwrap();
        assert_relative_eq!(v.as_f64(), 2.0 + 1.0 / 3.0, max_relative = 2e-7);
        for x in [8i128, 7, -3, -50, 32 + 521 + 3, 34 * 34, 10] {
            let r = exec_alu(UnaryOps::Recip.into(), ScalarType::Float32, &[int(x)]).unwrap();
            assert_relative_eq!(r.as_f64(), 1.0 / x as f64, max_relative = 2e-7);
        }
    }

    #[test]
    fn test_comparison_is_bool() {
        let lt = exec_alu(BinaryOps::CmpLt.into(), ScalarType::Int32, &[int(1), int(2)]).unwrap();
        assert_eq!(lt, ConstValue::Bool(true));
        let lt = exec_alu(
            BinaryOps::CmpLt.into(),
            ScalarType::Float32,
            &[ConstValue::Float(2.0), ConstValue::Float(-3.0)],
        )
        .unwrap();
        assert_eq!(lt, ConstValue::Bool(false));
    }

    #[test]
    fn test_bool_algebra() {
        let t = ConstValue::Bool(true);
        let f = ConstValue::Bool(false);
        let b = |op: BinaryOps, x, y| exec_alu(op.into(), ScalarType::Bool, &[x, y]).unwrap();
        assert_eq!(exec_alu(UnaryOps::Neg.into(), ScalarType::Bool, &[f]).unwrap(), t);
        assert_eq!(exec_alu(UnaryOps::Neg.into(), ScalarType::Bool, &[t]).unwrap(), f);
        assert_eq!(b(BinaryOps::Add, t, f), t);
        assert_eq!(b(BinaryOps::Add, f, f), f);
        assert_eq!(b(BinaryOps::Mul, t, f), f);
        assert_eq!(b(BinaryOps::Mul, t, t), t);
        assert_eq!(b(BinaryOps::Xor, t, t), f);
        assert_eq!(b(BinaryOps::CmpLt, f, f), f);
        assert_eq!(b(BinaryOps::CmpLt, f, t), t);
        assert_eq!(b(BinaryOps::CmpLt, t, f), f);
        assert_eq!(b(BinaryOps::CmpLt, t, t), f);
    }

    #[test]
    fn test_where_selects_on_bool() {
        let w = |st, args: [ConstValue; 3]| exec_alu(TernaryOps::Where.into(), st, &args).unwrap();
        let f = ConstValue::Bool(false);
        assert_eq!(w(ScalarType::Bool, [f, f, f]), f);
        assert_eq!(w(ScalarType::Int32, [f, int(2), int(4)]), int(4));
        assert_eq!(
            w(
                ScalarType::Float32,
                [f, ConstValue::Float(2.2), ConstValue::Float(4.5)]
            ),
            ConstValue::Float(4.5)
        );
        // no numeric coercion of the condition
        let err = exec_alu(TernaryOps::Where.into(), ScalarType::Int32, &[int(1), int(2), int(4)]);
        assert!(matches!(err, Err(KernelError::Unsupported(_))));
    }

    #[test]
    fn test_mulacc() {
        let v = exec_alu(
            TernaryOps::MulAcc.into(),
            ScalarType::Float32,
            &[ConstValue::Float(2.0), ConstValue::Float(3.0), ConstValue::Float(-4.0)],
        )
        .unwrap();
        assert_eq!(v, ConstValue::Float(2.0));
    }

    #[test]
    fn test_cast_and_bitcast() {
        assert_eq!(cast(ConstValue::Float(-2.7), ScalarType::Int32), int(-2));
        assert_eq!(cast(ConstValue::Float(1.0), ScalarType::Int32), int(1));
        assert_eq!(cast(int(300), ScalarType::Uint8), int(44));
        assert_eq!(cast(int(2), ScalarType::Bool), ConstValue::Bool(true));

        let bits = bitcast(ConstValue::Float(1.0), ScalarType::Float32, ScalarType::Int32).unwrap();
        assert_eq!(bits, int(0x3f80_0000));
        let back = bitcast(bits, ScalarType::Int32, ScalarType::Float32).unwrap();
        assert_eq!(back, ConstValue::Float(1.0));
        let neg = bitcast(int(-1), ScalarType::Int32, ScalarType::Uint32).unwrap();
        assert_eq!(neg, int(u32::MAX as i128));
        assert!(bitcast(int(1), ScalarType::Int32, ScalarType::Float64).is_err());
    }

    #[test]
    fn test_check_alu_rules() {
        let f32t: DType = ScalarType::Float32.into();
        let i32t: DType = ScalarType::Int32.into();
        let boolt: DType = ScalarType::Bool.into();
        assert_eq!(check_alu(BinaryOps::CmpLt.into(), &[i32t, i32t]).unwrap(), boolt);
        assert!(matches!(
            check_alu(BinaryOps::Xor.into(), &[f32t, f32t]),
            Err(KernelError::Unsupported(_))
        ));
        assert!(matches!(
            check_alu(BinaryOps::IDiv.into(), &[f32t, f32t]),
            Err(KernelError::Unsupported(_))
        ));
        assert!(matches!(
            check_alu(UnaryOps::Sqrt.into(), &[i32t]),
            Err(KernelError::Unsupported(_))
        ));
        assert_eq!(
            check_alu(TernaryOps::Where.into(), &[boolt, f32t, f32t]).unwrap(),
            f32t
        );
        assert!(check_alu(BinaryOps::Add.into(), &[f32t, i32t]).is_err());
        assert!(check_alu(BinaryOps::Add.into(), &[f32t]).is_err());
    }
}
