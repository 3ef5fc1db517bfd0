// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Placement of a bridge window's pending requests, followed by the shortage, optimize and
//! collapse bookkeeping that decides whether the window itself must be resized.

use log::debug;
use log::warn;

use crate::dump::flag_letters;
use crate::range::RangeFlags;
use crate::scalar::align_up;
use crate::scalar::is_valid_alignment;
use crate::Error;
use crate::RangeAllocator;
use crate::RangeId;
use crate::RequestQueue;
use crate::Result;

/// Outcome of `place_window`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowReport {
    /// Requests that ended up placed, including short ones.
    pub placed: usize,
    /// Bytes the window lacks to satisfy every request in full.
    pub shortage: u64,
    /// Largest alignment among the requests that fell short.
    pub shortage_alignment: u64,
    /// Bytes given back by collapsing the window.
    pub reclaimed: u64,
    /// True if the window's `extend_size` or `proposed_size` changed, so the window has to be
    /// sized again by its own parent.
    pub size_changed: bool,
}

/// Places every request of `queue` into `window`, emptying the queue.
///
/// A request that cannot be placed in full but is relocatable and asked for a specific address
/// is retried once anywhere in the window. Whatever still does not fit is summed into the
/// shortage, and if the free space at the top of the window cannot absorb it the window's
/// `extend_size` is raised (in `min_alignment` units) to the growth it needs. A window flagged
/// `MAXIMIZE_ROOT` never asks to grow.
///
/// When everything fits the window is optimized (if any request wanted to grow or splay) and then
/// collapsed to `min_alignment`, unless it is flagged `NO_COLLAPSE`.
pub fn place_window(
    allocator: &mut RangeAllocator,
    window: RangeId,
    queue: &mut RequestQueue,
    min_alignment: u64,
) -> Result<WindowReport> {
    if !is_valid_alignment(min_alignment) {
        return Err(Error::BadAlignment);
    }
    let mut report = WindowReport::default();
    let mut grows = false;
    let mut retried = Vec::new();

    while let Some(id) = queue.pop() {
        let request = allocator.range(id)?;
        if request
            .flags
            .intersects(RangeFlags::SPLAY | RangeFlags::MAXIMIZE_SIZE)
        {
            grows = true;
        }
        let fits = match allocator.allocate(window, id, None) {
            Ok(()) => true,
            Err(Error::OutOfSpace) => false,
            Err(e) => return Err(e),
        };

        let request = allocator.range(id)?;
        let short = !fits || request.size < request.proposed_size;
        if !short {
            report.placed += 1;
            continue;
        }
        if request.flags.contains(RangeFlags::RELOCATABLE)
            && request.start != 0
            && !retried.contains(&id)
        {
            debug!(
                "{}: retrying {:?} away from {:#x}",
                request.ty, id, request.start
            );
            if request.is_placed() {
                allocator.deallocate(window, id)?;
            }
            let request = allocator.range_mut(id)?;
            request.start = 0;
            request.end = 0;
            retried.push(id);
            queue.push(allocator, id)?;
            continue;
        }

        let missing = if request.is_placed() {
            report.placed += 1;
            request.proposed_size - request.size
        } else {
            request.proposed_size
        };
        debug!(
            "{}: {:?} short by {:#x} ({})",
            request.ty,
            id,
            missing,
            flag_letters(request)
        );
        report.shortage = report.shortage.saturating_add(missing);
        report.shortage_alignment = report.shortage_alignment.max(request.alignment);
    }

    if report.shortage != 0 {
        let available = allocator.last_free(window, report.shortage_alignment)?;
        if report.shortage > available {
            let range = allocator.range_mut(window)?;
            if !range.flags.contains(RangeFlags::MAXIMIZE_ROOT) {
                let new_size = range.size.saturating_add(report.shortage - available);
                let extend = align_up(new_size.saturating_sub(range.total_size), min_alignment);
                if extend != range.extend_size {
                    range.extend_size = extend;
                    report.size_changed = true;
                }
            }
        }
        let range = allocator.range(window)?;
        warn!(
            "{}: window {} short by {:#x} bytes (align {:#x}), {:#x} free at top, extend {:#x}",
            range.ty,
            range.span(),
            report.shortage,
            report.shortage_alignment,
            available,
            range.extend_size
        );
        return Ok(report);
    }

    if grows {
        allocator.optimize(window)?;
    }
    let range = allocator.range(window)?;
    if !range.flags.contains(RangeFlags::NO_COLLAPSE) {
        let before = range.proposed_size;
        report.reclaimed = allocator.collapse(window, min_alignment)?;
        report.size_changed = allocator.range(window)?.proposed_size != before;
    }
    Ok(report)
}

/// Size a window must request to hold every request of `queue`, rounded up to
/// `min_alignment`. A window that maximizes asks for at least `min_alignment` even when empty.
pub fn estimate_window_size(
    allocator: &RangeAllocator,
    queue: &RequestQueue,
    min_alignment: u64,
    maximize: bool,
) -> Result<u64> {
    if !is_valid_alignment(min_alignment) {
        return Err(Error::BadAlignment);
    }
    let mut size = allocator.estimate_total_size(queue.as_slice())?;
    if maximize && size == 0 {
        size = min_alignment;
    }
    Ok(align_up(size, min_alignment))
}
