//! Fixed-arity direct calls
//!
//! Integer-only signatures skip libffi: the target is called through a
//! function pointer of the uniform shape `fn(i32, ..) -> i32` or
//! `fn(i64, ..) -> i64`. Arguments are register images already extended
//! per native signedness, and the result is re-normalized by the caller,
//! so garbage above a narrow native result is harmless.

use super::strategy::MAX_FAST_ARITY;

macro_rules! direct_call {
    ($name:ident, $t:ty) => {
        /// Call `function` with up to six integer arguments
        ///
        /// # Safety
        /// `function` must take `args.len()` integer arguments of at most
        /// the register width used here and return an integer or nothing.
        #[inline]
        pub unsafe fn $name(function: usize, args: &[u64]) -> u64 {
            debug_assert!(args.len() <= MAX_FAST_ARITY);
            let a = |i: usize| args[i] as $t;
            let ret: $t = match args.len() {
                0 => std::mem::transmute::<usize, extern "C" fn() -> $t>(function)(),
                1 => std::mem::transmute::<usize, extern "C" fn($t) -> $t>(function)(a(0)),
                2 => std::mem::transmute::<usize, extern "C" fn($t, $t) -> $t>(function)(a(0), a(1)),
                3 => std::mem::transmute::<usize, extern "C" fn($t, $t, $t) -> $t>(function)(
                    a(0),
                    a(1),
                    a(2),
                ),
                4 => std::mem::transmute::<usize, extern "C" fn($t, $t, $t, $t) -> $t>(function)(
                    a(0),
                    a(1),
                    a(2),
                    a(3),
                ),
                5 => std::mem::transmute::<usize, extern "C" fn($t, $t, $t, $t, $t) -> $t>(
                    function,
                )(a(0), a(1), a(2), a(3), a(4)),
                _ => std::mem::transmute::<usize, extern "C" fn($t, $t, $t, $t, $t, $t) -> $t>(
                    function,
                )(a(0), a(1), a(2), a(3), a(4), a(5)),
            };
            ret as i64 as u64
        }
    };
}

direct_call!(call_int, i32);
direct_call!(call_long, i64);
