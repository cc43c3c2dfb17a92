//! Constant-time helpers for fixed-size byte arrays.
//!
//! Used wherever the codec compares or orders secret-derived material (MAC tags,
//! password checksums) so that timing does not depend on the position of the
//! first differing byte.

use std::cmp::Ordering;

use subtle::{ConditionallySelectable, ConstantTimeEq, ConstantTimeGreater, ConstantTimeLess};

/// Compare two byte slices for equality in constant time.
///
/// Slices of different length compare unequal; the length itself is not secret.
#[inline]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Lexicographically compare two arrays without data-dependent branches.
///
/// Every byte is visited regardless of where the first difference occurs.
pub fn ct_compare<const N: usize>(a: &[u8; N], b: &[u8; N]) -> Ordering {
    // 0 = equal so far, 1 = less, 2 = greater
    let mut state = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        let undecided = state.ct_eq(&0);
        state = u8::conditional_select(&state, &1, undecided & x.ct_lt(y));
        state = u8::conditional_select(&state, &2, undecided & x.ct_gt(y));
    }
    match state {
        1 => Ordering::Less,
        2 => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Concatenate byte slices into one buffer.
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"abcd"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn test_ct_compare_matches_ord() {
        let samples: [[u8; 4]; 6] = [
            [0, 0, 0, 0],
            [0, 0, 0, 1],
            [0, 1, 0, 0],
            [1, 0, 0, 0],
            [0xFF, 0, 0, 0],
            [0xFF, 0xFF, 0xFF, 0xFF],
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(ct_compare(a, b), a.cmp(b), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn test_ct_compare_first_difference_wins() {
        assert_eq!(ct_compare(&[1, 0xFF], &[2, 0]), Ordering::Less);
        assert_eq!(ct_compare(&[2, 0], &[1, 0xFF]), Ordering::Greater);
    }

    #[test]
    fn test_concat() {
        assert_eq!(concat(&[b"ab", b"", b"cde"]), b"abcde".to_vec());
        assert!(concat(&[]).is_empty());
    }
}
