//! Approximate Gaussian blur used for the local statistics of SSIM.
//!
//! Each axis gets two passes of a 3-tap box filter (edge samples are
//! replicated), which together form a `[1, 2, 3, 2, 1] / 9` kernel. The
//! vertical axis is handled by transposing the plane and reusing the
//! horizontal routine.

use imgref::*;
#[cfg(feature = "simd")]
use wide::f32x4;

use crate::image::alloc_plane;
use crate::DssimError;

/// Returns a blurred copy of `src`.
///
/// `tmp` is working space and must hold at least `width * height` values.
/// Its contents on return are unspecified.
///
/// # Errors
/// - If the output plane cannot be allocated
pub fn blur(src: ImgRef<'_, f32>, tmp: &mut [f32]) -> Result<ImgVec<f32>, DssimError> {
    let mut dst = alloc_plane(src.width(), src.height())?;
    for (dst_row, src_row) in dst.rows_mut().zip(src.rows()) {
        dst_row.copy_from_slice(src_row);
    }
    blur_in_place(dst.as_mut(), tmp);
    Ok(dst)
}

/// Same as [`blur`], with the result written back over the input.
///
/// Padding between rows of a strided image is left untouched.
pub fn blur_in_place(mut srcdst: ImgRefMut<'_, f32>, tmp: &mut [f32]) {
    let width = srcdst.width();
    let height = srcdst.height();
    let size = width * height;
    assert!(tmp.len() >= size);
    if size == 0 {
        return;
    }
    let tmp = &mut tmp[..size];

    for row in srcdst.rows_mut() {
        box_row(row);
        box_row(row);
    }

    // After transposing, rows are `height` long and there are `width` of them
    transpose(srcdst.as_ref(), tmp);
    for col in tmp.chunks_exact_mut(height) {
        box_row(col);
        box_row(col);
    }
    transpose_back(tmp, srcdst);
}

fn box_row_scalar(row: &mut [f32]) {
    let Some(&first) = row.first() else {
        return;
    };
    let last = row.len() - 1;

    let mut prev = first;
    for i in 0..row.len() {
        let curr = row[i];
        let next = row[(i + 1).min(last)];
        row[i] = (prev + curr + next) / 3.0;
        prev = curr;
    }
}

/// One box pass over `row`, in place. `prev` carries the input value the
/// previous output overwrote.
#[inline(always)]
fn box_row(row: &mut [f32]) {
    let width = row.len();
    if width < 6 {
        box_row_scalar(row);
        return;
    }

    let mut prev = row[0];
    row[0] = (prev + row[0] + row[1]) / 3.0;

    #[allow(unused_mut)]
    let mut i = 1;

    #[cfg(feature = "simd")]
    {
        let third = f32x4::splat(3.0);
        // each step reads input[i - 1..i + 5]
        while i + 5 <= width {
            let left = f32x4::from([prev, row[i], row[i + 1], row[i + 2]]);
            let curr = load4(&row[i..]);
            let right = load4(&row[i + 1..]);
            prev = row[i + 3];
            let out = (left + curr + right) / third;
            row[i..i + 4].copy_from_slice(&out.to_array());
            i += 4;
        }
    }

    while i < width {
        let curr = row[i];
        let next = row[(i + 1).min(width - 1)];
        row[i] = (prev + curr + next) / 3.0;
        prev = curr;
        i += 1;
    }
}

#[cfg(feature = "simd")]
#[inline(always)]
fn load4(s: &[f32]) -> f32x4 {
    f32x4::from([s[0], s[1], s[2], s[3]])
}

/// Flips x/y. `dst` becomes `src.height()` wide.
#[inline(always)]
fn transpose(src: ImgRef<'_, f32>, dst: &mut [f32]) {
    let height = src.height();
    assert_eq!(dst.len(), src.width() * height);

    for (y, row) in src.rows().enumerate() {
        for (x, &px) in row.iter().enumerate() {
            dst[x * height + y] = px;
        }
    }
}

#[inline(always)]
fn transpose_back(src: &[f32], mut dst: ImgRefMut<'_, f32>) {
    let height = dst.height();
    assert_eq!(src.len(), dst.width() * height);

    for (y, row) in dst.rows_mut().enumerate() {
        for (x, px) in row.iter_mut().enumerate() {
            *px = src[x * height + y];
        }
    }
}
