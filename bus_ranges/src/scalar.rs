// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Alignment arithmetic on bus addresses. `alignment` must be a non-zero power of two.

/// Rounds `value` up to the next multiple of `alignment`, wrapping on overflow.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    value.wrapping_add(alignment - 1) & !(alignment - 1)
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// Returns `None` if the result is not representable in a `u64`.
pub const fn checked_align_up(value: u64, alignment: u64) -> Option<u64> {
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// Rounds `value` down to a multiple of `alignment`.
pub const fn truncate_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// Returns true if `alignment` can be used with the functions in this module.
pub(crate) fn is_valid_alignment(alignment: u64) -> bool {
    alignment.is_power_of_two()
}
