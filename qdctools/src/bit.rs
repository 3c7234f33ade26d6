//! Bitmask tools for group masks and register fields

use bit_iter::BitIter;
use num_traits::{FromPrimitive, PrimInt, Unsigned};
use std::ops::{BitAndAssign, BitOrAssign, BitXorAssign};

/// Convert group indices (0-indexed) into a group enable mask
pub fn groups_to_mask(groups: &[u8]) -> u8 {
    let mut m = 0;
    for &g in groups {
        m |= 1 << g;
    }
    return m;
}

/// Returns all groups in mask, ascending
pub fn mask_to_groups(m: u8) -> Vec<u8> {
    BitIter::from(m).map(|b| b as u8).collect()
}

/// Bitwise set/clear/toggle/check/change operations on unsigned integers
pub trait BitOps:
    PrimInt
    + BitAndAssign
    + BitOrAssign
    + BitXorAssign
    + FromPrimitive
    + Unsigned
{
    fn set(&mut self, b: usize);
    fn clear(&mut self, b: usize);
    fn toggle(&mut self, b: usize);
    fn change(&mut self, b: usize, x: bool);
    fn check(self, b: usize) -> bool;
}

macro_rules! impl_bit_ops {
    ($($t:ty),*) => {$(
        impl BitOps for $t {
            #[inline]
            fn set(&mut self, b: usize) {
                *self |= 1 << b;
            }

            #[inline]
            fn clear(&mut self, b: usize) {
                *self &= !(1 << b);
            }

            #[inline]
            fn toggle(&mut self, b: usize) {
                *self ^= 1 << b;
            }

            #[inline]
            fn change(&mut self, b: usize, x: bool) {
                *self = (*self & !(1 << b)) | ((x as $t) << b);
            }

            #[inline]
            fn check(self, b: usize) -> bool {
                return self >> b & 1 == 1;
            }
        }
    )*};
}

impl_bit_ops!(u8, u16, u32, u64);
