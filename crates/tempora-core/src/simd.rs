//! Distance kernels with SIMD fast paths
//!
//! Every metric the forest supports reduces to one of three kernels:
//!
//! | Kernel                 | Used by                          |
//! |------------------------|----------------------------------|
//! | `dot_product`          | angular (cosine) and split sides |
//! | `l2_distance_squared`  | euclidean                        |
//! | `manhattan_distance`   | manhattan                        |
//!
//! aarch64 always takes the NEON path. x86_64 takes AVX2+FMA when the CPU
//! reports it at runtime and falls back to the scalar loops otherwise, which
//! LLVM auto-vectorizes well enough under `-C target-cpu=native`.

#[cfg(target_arch = "aarch64")]
mod neon {
    use std::arch::aarch64::*;

    #[inline(always)]
    pub unsafe fn dot_product(a: &[f32], b: &[f32]) -> f32 {
        let chunks = a.len() / 4;
        let mut acc = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(i * 4));
            let vb = vld1q_f32(b.as_ptr().add(i * 4));
            acc = vfmaq_f32(acc, va, vb);
        }
        let mut sum = vaddvq_f32(acc);
        for i in chunks * 4..a.len() {
            sum += a[i] * b[i];
        }
        sum
    }

    #[inline(always)]
    pub unsafe fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
        let chunks = a.len() / 4;
        let mut acc = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let diff = vsubq_f32(vld1q_f32(a.as_ptr().add(i * 4)), vld1q_f32(b.as_ptr().add(i * 4)));
            acc = vfmaq_f32(acc, diff, diff);
        }
        let mut sum = vaddvq_f32(acc);
        for i in chunks * 4..a.len() {
            let d = a[i] - b[i];
            sum += d * d;
        }
        sum
    }

    #[inline(always)]
    pub unsafe fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
        let chunks = a.len() / 4;
        let mut acc = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let absdiff = vabdq_f32(vld1q_f32(a.as_ptr().add(i * 4)), vld1q_f32(b.as_ptr().add(i * 4)));
            acc = vaddq_f32(acc, absdiff);
        }
        let mut sum = vaddvq_f32(acc);
        for i in chunks * 4..a.len() {
            sum += (a[i] - b[i]).abs();
        }
        sum
    }
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::*;

    /// Horizontal sum of 8 lanes.
    #[target_feature(enable = "avx2,fma")]
    #[inline]
    unsafe fn hsum(acc: __m256) -> f32 {
        let sum128 = _mm_add_ps(_mm256_castps256_ps128(acc), _mm256_extractf128_ps(acc, 1));
        let sums = _mm_add_ps(sum128, _mm_movehdup_ps(sum128));
        _mm_cvtss_f32(_mm_add_ss(sums, _mm_movehl_ps(sums, sums)))
    }

    #[target_feature(enable = "avx2,fma")]
    #[inline]
    pub unsafe fn dot_product(a: &[f32], b: &[f32]) -> f32 {
        let chunks = a.len() / 8;
        let mut acc = _mm256_setzero_ps();
        for i in 0..chunks {
            let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
            let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
            acc = _mm256_fmadd_ps(va, vb, acc);
        }
        let mut sum = hsum(acc);
        for i in chunks * 8..a.len() {
            sum += a[i] * b[i];
        }
        sum
    }

    #[target_feature(enable = "avx2,fma")]
    #[inline]
    pub unsafe fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
        let chunks = a.len() / 8;
        let mut acc = _mm256_setzero_ps();
        for i in 0..chunks {
            let diff = _mm256_sub_ps(
                _mm256_loadu_ps(a.as_ptr().add(i * 8)),
                _mm256_loadu_ps(b.as_ptr().add(i * 8)),
            );
            acc = _mm256_fmadd_ps(diff, diff, acc);
        }
        let mut sum = hsum(acc);
        for i in chunks * 8..a.len() {
            let d = a[i] - b[i];
            sum += d * d;
        }
        sum
    }

    #[target_feature(enable = "avx2,fma")]
    #[inline]
    pub unsafe fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
        let chunks = a.len() / 8;
        // Clearing the sign bit gives |x|.
        let sign_mask = _mm256_set1_ps(-0.0);
        let mut acc = _mm256_setzero_ps();
        for i in 0..chunks {
            let diff = _mm256_sub_ps(
                _mm256_loadu_ps(a.as_ptr().add(i * 8)),
                _mm256_loadu_ps(b.as_ptr().add(i * 8)),
            );
            acc = _mm256_add_ps(acc, _mm256_andnot_ps(sign_mask, diff));
        }
        let mut sum = hsum(acc);
        for i in chunks * 8..a.len() {
            sum += (a[i] - b[i]).abs();
        }
        sum
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn has_avx2() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

#[inline(always)]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline(always)]
fn l2_distance_squared_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline(always)]
fn manhattan_distance_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Dot product of two equal-length vectors.
#[inline(always)]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon::dot_product(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2() {
            return unsafe { avx2::dot_product(a, b) };
        }
    }

    #[allow(unreachable_code)]
    dot_product_scalar(a, b)
}

/// Squared Euclidean distance, ||a - b||².
#[inline(always)]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon::l2_distance_squared(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2() {
            return unsafe { avx2::l2_distance_squared(a, b) };
        }
    }

    #[allow(unreachable_code)]
    l2_distance_squared_scalar(a, b)
}

/// Manhattan (L1) distance, Σ|a - b|.
#[inline(always)]
pub fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon::manhattan_distance(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2() {
            return unsafe { avx2::manhattan_distance(a, b) };
        }
    }

    #[allow(unreachable_code)]
    manhattan_distance_scalar(a, b)
}

/// Euclidean norm ||v||.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// L2 normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// L2 normalize a vector, returning a new vector
pub fn l2_normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    l2_normalize(&mut out);
    out
}
