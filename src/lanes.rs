//! Lane mask helpers shared by the region statistics.
//!
//! Masks are carried as `u64` with lane 0 in the least significant bit. Only the
//! low `width` bits are meaningful; anything above the compiled vector width is
//! ignored.

/// Widest vector the runtime can describe with a single `u64` mask.
pub const MAX_LANES: u32 = 64;

/// Mask with the low `width` bits set.
#[inline]
pub fn lane_mask(width: u32) -> u64 {
    if width >= MAX_LANES {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Number of active lanes among the low `width` bits of `mask`.
#[inline]
pub fn popcount(mask: u64, width: u32) -> u32 {
    (mask & lane_mask(width)).count_ones()
}

/// Whether a line that ran with `mask` used every lane the enclosing region
/// had available.
///
/// The region's initial mask is the normal ceiling. Regions where lanes can only
/// join over time may observe more lanes than they started with, so the ceiling
/// floats up to the observed count.
#[inline]
pub fn is_full_mask(mask: u64, initial_mask: u64, width: u32) -> bool {
    let used = popcount(mask, width);
    used == lanes_available(initial_mask, used, width)
}

/// Denominator used for full-mask accounting.
#[inline]
pub fn lanes_available(initial_mask: u64, lanes_used: u32, width: u32) -> u32 {
    popcount(initial_mask, width).max(lanes_used)
}

/// Render a mask as a bit string with the highest lane first.
pub fn mask_to_string(mask: u64, width: u32) -> String {
    let width = width.min(MAX_LANES);
    (0..width)
        .rev()
        .map(|lane| if (mask >> lane) & 1 == 1 { '1' } else { '0' })
        .collect()
}
