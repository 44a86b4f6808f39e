//! Runtime support routines callable from generated code.
//!
//! The [`intrinsic_symbols`] table is process-wide, read-only, and shared by
//! every engine. All entries use the C calling convention and follow the C
//! math library naming (`sinf` for `f32`, `sin` for `f64`), so generated
//! code can import them by their usual names without linking libm.
//!
//! [`dispatch_parallel`] is the entry point generated kernels call when they
//! request multi-way execution.

use std::sync::LazyLock;

use crate::symbols::SymbolAddress;

/// Name under which [`dispatch_parallel`] is registered.
pub const DISPATCH_PARALLEL: &str = "DispatchParallel";

/// One `{name, function pointer}` pair of the intrinsic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrinsicSymbol {
    /// Logical (unmangled) symbol name.
    pub name: &'static str,
    /// Address of the C-ABI implementation.
    pub address: SymbolAddress,
}

macro_rules! unary_math {
    ($($f32_name:ident / $f64_name:ident => $method:ident),* $(,)?) => {
        $(
            extern "C" fn $f32_name(x: f32) -> f32 {
                x.$method()
            }

            extern "C" fn $f64_name(x: f64) -> f64 {
                x.$method()
            }
        )*

        fn unary_entries(out: &mut Vec<IntrinsicSymbol>) {
            $(
                out.push(entry(stringify!($f32_name), $f32_name as extern "C" fn(f32) -> f32 as usize));
                out.push(entry(stringify!($f64_name), $f64_name as extern "C" fn(f64) -> f64 as usize));
            )*
        }
    };
}

macro_rules! binary_math {
    ($($f32_name:ident / $f64_name:ident => |$a:ident, $b:ident| $body:expr),* $(,)?) => {
        $(
            extern "C" fn $f32_name($a: f32, $b: f32) -> f32 {
                $body
            }

            extern "C" fn $f64_name($a: f64, $b: f64) -> f64 {
                $body
            }
        )*

        fn binary_entries(out: &mut Vec<IntrinsicSymbol>) {
            $(
                out.push(entry(stringify!($f32_name), $f32_name as extern "C" fn(f32, f32) -> f32 as usize));
                out.push(entry(stringify!($f64_name), $f64_name as extern "C" fn(f64, f64) -> f64 as usize));
            )*
        }
    };
}

unary_math! {
    sinf / sin => sin,
    cosf / cos => cos,
    tanf / tan => tan,
    asinf / asin => asin,
    acosf / acos => acos,
    atanf / atan => atan,
    sinhf / sinh => sinh,
    coshf / cosh => cosh,
    tanhf / tanh => tanh,
    expf / exp => exp,
    exp2f / exp2 => exp2,
    expm1f / expm1 => exp_m1,
    logf / log => ln,
    log2f / log2 => log2,
    log10f / log10 => log10,
    log1pf / log1p => ln_1p,
    sqrtf / sqrt => sqrt,
    cbrtf / cbrt => cbrt,
    fabsf / fabs => abs,
    floorf / floor => floor,
    ceilf / ceil => ceil,
    truncf / trunc => trunc,
    roundf / round => round,
}

binary_math! {
    powf / pow => |a, b| a.powf(b),
    atan2f / atan2 => |a, b| a.atan2(b),
    fmodf / fmod => |a, b| a % b,
    hypotf / hypot => |a, b| a.hypot(b),
    fminf / fmin => |a, b| a.min(b),
    fmaxf / fmax => |a, b| a.max(b),
}

fn entry(name: &'static str, address: usize) -> IntrinsicSymbol {
    IntrinsicSymbol {
        name,
        address: SymbolAddress::new(address),
    }
}

static INTRINSICS: LazyLock<Vec<IntrinsicSymbol>> = LazyLock::new(|| {
    let mut out = Vec::with_capacity(64);
    unary_entries(&mut out);
    binary_entries(&mut out);
    out
});

/// Returns the process-wide intrinsic table.
#[must_use]
pub fn intrinsic_symbols() -> &'static [IntrinsicSymbol] {
    &INTRINSICS
}

/// Kernel body invoked once per index by [`dispatch_parallel`].
pub type ParallelCallee = unsafe extern "C" fn(index: i64, packed_data: *mut u8);

/// Runs `func(i, packed_data)` for every `i` in `[start, stop)`.
///
/// Iterations execute in order on the calling thread. A null `func` or an
/// empty range is a no-op.
///
/// # Safety
///
/// `func` must be null or point to a function with the [`ParallelCallee`]
/// signature, and `packed_data` must be valid for that function.
pub unsafe extern "C" fn dispatch_parallel(func: *const u8, start: i64, stop: i64, packed_data: *mut u8) {
    if func.is_null() {
        return;
    }
    // SAFETY: the caller guarantees `func` has the `ParallelCallee` ABI.
    let callee: ParallelCallee = unsafe { std::mem::transmute::<*const u8, ParallelCallee>(func) };
    for index in start..stop {
        unsafe { callee(index, packed_data) };
    }
}

/// Address of [`dispatch_parallel`].
pub(crate) fn dispatch_parallel_address() -> usize {
    dispatch_parallel as unsafe extern "C" fn(*const u8, i64, i64, *mut u8) as usize
}
