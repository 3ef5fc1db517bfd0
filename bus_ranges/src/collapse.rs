// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::debug;

use crate::scalar::align_up;
use crate::scalar::is_valid_alignment;
use crate::scalar::truncate_down;
use crate::Error;
use crate::RangeAllocator;
use crate::RangeId;
use crate::Result;

impl RangeAllocator {
    /// Shrinks `id` to the `alignment`-rounded span of its allocations.
    ///
    /// With no allocations the range keeps its bounds but its `proposed_size` drops to 0, so all of
    /// it can be handed back. Otherwise `start`, `end`, `size` and `proposed_size` become the
    /// rounded span, and `extend_size` records how far that span exceeds `total_size`.
    ///
    /// Returns the number of bytes given up, or 0 once the range has grown past its original
    /// reservation. Rounding that would carry the range outside its current bounds is an
    /// invariant violation.
    pub fn collapse(&mut self, id: RangeId, alignment: u64) -> Result<u64> {
        self.check_poisoned()?;
        if !is_valid_alignment(alignment) {
            return Err(Error::BadAlignment);
        }
        let range = self.range(id)?;
        let saving = range.size;
        let before = range.span();
        let bounds = match (range.allocations.first(), range.allocations.last()) {
            (Some(&first), Some(&last)) => Some((
                truncate_down(self.range(first)?.start, alignment),
                align_up(self.range(last)?.end, alignment),
            )),
            _ => None,
        };
        if let Some((start, end)) = bounds {
            if start < before.start || end > before.end {
                return Err(self.corrupted(format!(
                    "collapse of {:?} to {:#x}..{:#x} leaves {}",
                    id, start, end, before
                )));
            }
        }

        let range = self.range_mut(id)?;
        match bounds {
            None => range.proposed_size = 0,
            Some((start, end)) => {
                range.start = start;
                range.end = end;
                range.size = end - start;
                range.proposed_size = range.size;
                range.extend_size = range.size.saturating_sub(range.total_size);
            }
        }
        let proposed = range.proposed_size;
        let total = range.total_size;
        let ty = range.ty;
        let span = range.span();

        if proposed > saving {
            return Err(self.corrupted(format!(
                "collapse of {:?} grew it from {:#x} to {:#x} bytes",
                id, saving, proposed
            )));
        }
        let reclaimed = if proposed >= total {
            0
        } else {
            saving - proposed
        };
        debug!(
            "{}: collapsed {:?} to {} ({:#x} reclaimed)",
            ty, id, span, reclaimed
        );
        Ok(reclaimed)
    }

    /// Collapses every range of the chain starting at `head` and returns the total reclaimed.
    pub fn collapse_all(&mut self, head: RangeId, alignment: u64) -> Result<u64> {
        let chain: Vec<RangeId> = self.ranges(head).collect();
        let mut total = 0u64;
        for id in chain {
            total = total.saturating_add(self.collapse(id, alignment)?);
        }
        Ok(total)
    }
}
