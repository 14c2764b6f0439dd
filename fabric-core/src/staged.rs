//! The staged-atomic path (spec.md §4.H) for providers that cannot perform
//! native remote atomics.
//!
//! Operates on raw little-endian byte buffers tagged with an
//! [`AtomicDatatype`] — the shape a real binding would stage into a
//! temporary MR before RMA-writing the result back. Concurrency is
//! deliberately weaker than the native path: spec.md §4.H calls out a
//! single-writer assumption as acceptable, and this module does not
//! attempt to synchronize concurrent callers touching the same buffer —
//! that is the caller's responsibility, exactly as libfabric's own staged
//! emulation on EFA documents.

use crate::backend::{AtomicDatatype, AtomicOp};
use crate::error::{Error, ErrorKind, Result};

fn read_i64(buf: &[u8], dt: AtomicDatatype) -> i64 {
    match dt {
        AtomicDatatype::Int32 => i32::from_le_bytes(buf[..4].try_into().unwrap()) as i64,
        AtomicDatatype::Uint32 => u32::from_le_bytes(buf[..4].try_into().unwrap()) as i64,
        AtomicDatatype::Int64 => i64::from_le_bytes(buf[..8].try_into().unwrap()),
        AtomicDatatype::Uint64 => u64::from_le_bytes(buf[..8].try_into().unwrap()) as i64,
        AtomicDatatype::Float | AtomicDatatype::Double => {
            panic!("read_i64 called on floating-point datatype")
        }
    }
}

fn write_i64(buf: &mut [u8], dt: AtomicDatatype, value: i64) {
    match dt {
        AtomicDatatype::Int32 | AtomicDatatype::Uint32 => {
            buf[..4].copy_from_slice(&(value as i32).to_le_bytes())
        }
        AtomicDatatype::Int64 | AtomicDatatype::Uint64 => {
            buf[..8].copy_from_slice(&value.to_le_bytes())
        }
        AtomicDatatype::Float | AtomicDatatype::Double => {
            panic!("write_i64 called on floating-point datatype")
        }
    }
}

fn read_f64(buf: &[u8], dt: AtomicDatatype) -> f64 {
    match dt {
        AtomicDatatype::Float => f32::from_le_bytes(buf[..4].try_into().unwrap()) as f64,
        AtomicDatatype::Double => f64::from_le_bytes(buf[..8].try_into().unwrap()),
        _ => panic!("read_f64 called on integer datatype"),
    }
}

fn write_f64(buf: &mut [u8], dt: AtomicDatatype, value: f64) {
    match dt {
        AtomicDatatype::Float => buf[..4].copy_from_slice(&(value as f32).to_le_bytes()),
        AtomicDatatype::Double => buf[..8].copy_from_slice(&value.to_le_bytes()),
        _ => panic!("write_f64 called on integer datatype"),
    }
}

fn is_float(dt: AtomicDatatype) -> bool {
    matches!(dt, AtomicDatatype::Float | AtomicDatatype::Double)
}

/// Applies `op` to `target` using `operand` (and `compare`, for
/// compare-and-swap), writing the new value back into `target` and
/// returning the value `target` held *before* the operation — the value a
/// fetching atomic's completion delivers (spec.md §8 scenario 4).
pub fn apply(
    op: AtomicOp,
    datatype: AtomicDatatype,
    target: &mut [u8],
    operand: &[u8],
    compare: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let width = match datatype {
        AtomicDatatype::Int32 | AtomicDatatype::Uint32 | AtomicDatatype::Float => 4,
        AtomicDatatype::Int64 | AtomicDatatype::Uint64 | AtomicDatatype::Double => 8,
    };
    if target.len() < width || operand.len() < width {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "staged atomic buffer shorter than datatype width",
        ));
    }

    let old = target[..width].to_vec();

    if is_float(datatype) {
        let cur = read_f64(target, datatype);
        let arg = read_f64(operand, datatype);
        let new = match op {
            AtomicOp::Sum => cur + arg,
            AtomicOp::Prod => cur * arg,
            AtomicOp::Min => cur.min(arg),
            AtomicOp::Max => cur.max(arg),
            AtomicOp::AtomicWrite => arg,
            AtomicOp::AtomicRead => cur,
            _ => {
                return Err(Error::new(
                    ErrorKind::NotSupported,
                    "bitwise/logical atomics are not defined for floating-point datatypes",
                ))
            }
        };
        write_f64(target, datatype, new);
        return Ok(old);
    }

    let cur = read_i64(target, datatype);
    let arg = read_i64(operand, datatype);
    let new = match op {
        AtomicOp::Sum => cur.wrapping_add(arg),
        AtomicOp::Prod => cur.wrapping_mul(arg),
        AtomicOp::Min => cur.min(arg),
        AtomicOp::Max => cur.max(arg),
        AtomicOp::Band => cur & arg,
        AtomicOp::Bor => cur | arg,
        AtomicOp::Bxor => cur ^ arg,
        AtomicOp::Land => ((cur != 0) && (arg != 0)) as i64,
        AtomicOp::Lor => ((cur != 0) || (arg != 0)) as i64,
        AtomicOp::Lxor => ((cur != 0) != (arg != 0)) as i64,
        AtomicOp::AtomicWrite => arg,
        AtomicOp::AtomicRead => cur,
        AtomicOp::CompareSwap => {
            let compare = compare.ok_or_else(|| {
                Error::new(ErrorKind::InvalidArgument, "compare_swap requires a compare operand")
            })?;
            let expected = read_i64(compare, datatype);
            if cur == expected {
                arg
            } else {
                cur
            }
        }
    };
    write_i64(target, datatype, new);
    Ok(old)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_add_on_uint64_returns_old_value() {
        // spec.md §8 scenario 4.
        let mut buf = 41u64.to_le_bytes();
        let operand = 1u64.to_le_bytes();
        let old = apply(AtomicOp::Sum, AtomicDatatype::Uint64, &mut buf, &operand, None).unwrap();
        assert_eq!(u64::from_le_bytes(old.try_into().unwrap()), 41);
        assert_eq!(u64::from_le_bytes(buf), 42);
    }

    #[test]
    fn compare_swap_only_writes_on_match() {
        let mut buf = 10i32.to_le_bytes();
        let compare_mismatch = 99i32.to_le_bytes();
        let operand = 20i32.to_le_bytes();
        apply(
            AtomicOp::CompareSwap,
            AtomicDatatype::Int32,
            &mut buf,
            &operand,
            Some(&compare_mismatch),
        )
        .unwrap();
        assert_eq!(i32::from_le_bytes(buf), 10);

        let compare_match = 10i32.to_le_bytes();
        apply(
            AtomicOp::CompareSwap,
            AtomicDatatype::Int32,
            &mut buf,
            &operand,
            Some(&compare_match),
        )
        .unwrap();
        assert_eq!(i32::from_le_bytes(buf), 20);
    }

    #[test]
    fn bitwise_op_rejected_for_float() {
        let mut buf = 1.0f64.to_le_bytes();
        let operand = 2.0f64.to_le_bytes();
        let err = apply(AtomicOp::Bxor, AtomicDatatype::Double, &mut buf, &operand, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
