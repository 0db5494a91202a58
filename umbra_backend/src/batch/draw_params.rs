//! Layout rules for per-draw parameter structs
//!
//! Parameter arrays are read by shaders with std140 rules: every field group
//! starts on a 16-byte boundary and the struct size is a multiple of 16 so
//! that element `i` starts at `i * size_of::<P>()`.

/// Compile-time check of a per-draw parameter layout
///
/// ```ignore
/// assert_draw_params_layout!(DepthParams { mvp, texture_s, texture_t, color });
/// ```
///
/// Fails the build when the struct size is not a multiple of 16 or a listed
/// field does not start on a 16-byte boundary.
#[macro_export]
macro_rules! assert_draw_params_layout {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        const _: () = {
            assert!(
                ::std::mem::size_of::<$ty>() % 16 == 0,
                concat!(stringify!($ty), ": size must be a multiple of 16 bytes")
            );
            $(
                assert!(
                    ::std::mem::offset_of!($ty, $field) % 16 == 0,
                    concat!(stringify!($ty), "::", stringify!($field), " must start on a 16-byte boundary")
                );
            )*
        };
    };
}

