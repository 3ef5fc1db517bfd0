// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::debug;

use crate::range::RangeFlags;
use crate::scalar::truncate_down;
use crate::RangeAllocator;
use crate::RangeId;
use crate::Result;

impl RangeAllocator {
    /// Hands the free space of `id` to its relocatable allocations.
    ///
    /// The free space is every gap that follows an allocation, up to the end of `id`. Allocations
    /// are visited from the highest address down, and each `RELOCATABLE` one is moved up against
    /// the allocation above it (or the end of `id`):
    /// * `MAXIMIZE_SIZE` allocations first grow by an aligned share of the free space. Every
    ///   `MAXIMIZE_SIZE`, `MAXIMIZE_ROOT` or `SPLAY` allocation counts towards the split.
    /// * `SPLAY` allocations keep their size and leave their share to those below them.
    ///
    /// Allocations that hold allocations of their own are not moved.
    ///
    /// Nothing moves past its neighbour, so the allocation order is unchanged.
    pub fn optimize(&mut self, id: RangeId) -> Result<()> {
        self.check_poisoned()?;
        let parent = self.range(id)?;
        let bounds = parent.span();
        let allocations = parent.allocations.clone();

        let mut free = 0u64;
        let mut count = 0u64;
        for (i, &child) in allocations.iter().enumerate() {
            let range = self.range(child)?;
            let next_start = match allocations.get(i + 1) {
                Some(&next) => self.range(next)?.start,
                None => bounds.end,
            };
            free = free.saturating_add(next_start.saturating_sub(range.end));
            if range.flags.intersects(RangeFlags::GROWABLE) {
                count += 1;
            }
        }
        if free == 0 {
            return Ok(());
        }

        let mut boundary = bounds.end;
        for &child in allocations.iter().rev() {
            if free == 0 {
                break;
            }
            let range = self.range_mut(child)?;
            // A range holding allocations of its own stays put with them.
            if !range.flags.contains(RangeFlags::RELOCATABLE) || !range.allocations.is_empty() {
                boundary = range.start;
                continue;
            }

            let mut chunk = 0;
            if range.flags.contains(RangeFlags::SPLAY) {
                count = count.saturating_sub(1);
            } else if range.flags.contains(RangeFlags::MAXIMIZE_SIZE) && count > 0 {
                chunk = truncate_down(free / count, range.alignment);
                free -= chunk;
                count -= 1;
            }
            let old = range.span();
            let Some(room) = boundary.checked_sub(range.end) else {
                return Err(self.corrupted(format!(
                    "allocation {:?} at {} runs past {:#x}",
                    child, old, boundary
                )));
            };
            let tail = truncate_down(room, range.alignment);
            chunk = chunk.min(tail);

            if range.flags.contains(RangeFlags::SPLAY) {
                range.start += tail;
                range.end += tail;
            } else {
                range.size += chunk;
                range.proposed_size = range.size;
                range.start = truncate_down(boundary - range.size, range.alignment);
                range.end = range.start + range.size;
            }

            let moved = range.span();
            if range.start & (range.alignment - 1) != 0 || !bounds.contains_range(moved) {
                return Err(self.corrupted(format!(
                    "allocation {:?} moved from {} to {} outside {}",
                    child, old, moved, bounds
                )));
            }
            if moved != old {
                debug!("{}: moved {:?} from {} to {}", range.ty, child, old, moved);
            }
            boundary = moved.start;
        }
        Ok(())
    }

    /// Optimizes every range of the chain starting at `head`.
    pub fn optimize_all(&mut self, head: RangeId) -> Result<()> {
        let chain: Vec<RangeId> = self.ranges(head).collect();
        for id in chain {
            self.optimize(id)?;
        }
        Ok(())
    }
}
