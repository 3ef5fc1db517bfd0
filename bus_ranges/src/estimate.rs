// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::scalar::align_up;
use crate::scalar::is_valid_alignment;
use crate::Error;
use crate::Range;
use crate::RangeAllocator;
use crate::RangeId;
use crate::Result;

/// Bytes a request needs once placed, including any growth already recorded for it.
fn needed(range: &Range) -> u64 {
    range.total_size.saturating_add(range.extend_size)
}

impl RangeAllocator {
    /// Estimates how many bytes a window needs to hold every request in `chain`.
    ///
    /// The requests are packed from address 0 in the order given, except that a request is slid
    /// into the alignment padding in front of an earlier one when it fits there. None of the
    /// ranges are modified.
    pub fn estimate_total_size(&self, chain: &[RangeId]) -> Result<u64> {
        let mut layout: Vec<&Range> = Vec::with_capacity(chain.len());
        for &id in chain {
            let request = self.range(id)?;
            if !is_valid_alignment(request.alignment) {
                return Err(Error::BadAlignment);
            }
            let need = needed(request);
            let mut at = layout.len();
            let mut addr = 0u64;
            for (i, placed) in layout.iter().enumerate() {
                let aligned = align_up(addr, placed.alignment);
                if need <= aligned.wrapping_sub(addr) {
                    at = i;
                    break;
                }
                addr = aligned.saturating_add(needed(placed));
            }
            layout.insert(at, request);
        }

        let mut addr = 0u64;
        for range in layout {
            addr = align_up(addr, range.alignment).saturating_add(needed(range));
        }
        Ok(addr)
    }

    /// Returns the bytes left in `id` above its highest allocation, with that allocation's end
    /// rounded up to `alignment`.
    pub fn last_free(&self, id: RangeId, alignment: u64) -> Result<u64> {
        if !is_valid_alignment(alignment) {
            return Err(Error::BadAlignment);
        }
        let range = self.range(id)?;
        let last = match range.allocations.last() {
            Some(&alloc) => self.range(alloc)?.end,
            None => range.start,
        };
        Ok(range.end.saturating_sub(align_up(last, alignment)))
    }

    /// `last_free` of the final range in the chain starting at `head`.
    pub fn last_free_all(&self, head: RangeId, alignment: u64) -> Result<u64> {
        let last = self.ranges(head).last().unwrap_or(head);
        self.last_free(last, alignment)
    }
}
