// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::range::RangeFlags;
use crate::Range;
use crate::RangeAllocator;
use crate::RangeId;
use crate::Result;

/// Placement priority of a request. Higher values are placed first.
fn state_order(range: &Range) -> u32 {
    let mut order = 0;
    if range.is_placed() {
        order |= 1 << 31;
    }
    if range.start != 0 {
        order |= 1 << 30;
    }
    if !range.flags.intersects(RangeFlags::GROWABLE) {
        order |= 1 << 29;
    }
    if range.proposed_size <= range.size {
        order |= 1 << 28;
    }
    order
}

/// Requests waiting to be placed into one window.
///
/// Requests that are already placed or ask for a fixed address come first, so they claim
/// their addresses before anything floating is laid out around them. Growable requests come
/// last. Within a class, larger alignments go first.
#[derive(Clone, Debug, Default)]
pub struct RequestQueue {
    requests: Vec<RangeId>,
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue::default()
    }

    /// Queues `id` by placement priority.
    pub fn push(&mut self, allocator: &RangeAllocator, id: RangeId) -> Result<()> {
        let request = allocator.range(id)?;
        let order = state_order(request);
        let mut at = self.requests.len();
        for (i, &queued) in self.requests.iter().enumerate() {
            let other = allocator.range(queued)?;
            let other_order = state_order(other);
            let goes_before = if order != other_order {
                order > other_order
            } else if request.alignment != other.alignment {
                request.alignment > other.alignment
            } else {
                request.proposed_size >= other.proposed_size
            };
            if goes_before {
                at = i;
                break;
            }
        }
        self.requests.insert(at, id);
        Ok(())
    }

    /// Queues `id` behind every request with the same or a larger alignment.
    pub fn push_by_alignment(&mut self, allocator: &RangeAllocator, id: RangeId) -> Result<()> {
        let alignment = allocator.range(id)?.alignment;
        let mut at = self.requests.len();
        for (i, &queued) in self.requests.iter().enumerate() {
            if alignment > allocator.range(queued)?.alignment {
                at = i;
                break;
            }
        }
        self.requests.insert(at, id);
        Ok(())
    }

    /// Takes the next request to place.
    pub fn pop(&mut self) -> Option<RangeId> {
        if self.requests.is_empty() {
            None
        } else {
            Some(self.requests.remove(0))
        }
    }

    pub fn as_slice(&self) -> &[RangeId] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
