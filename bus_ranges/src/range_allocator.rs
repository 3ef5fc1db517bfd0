// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp;
use std::ops::Index;

use log::debug;
use log::error;
use log::trace;

use crate::range::RangeFlags;
use crate::scalar::checked_align_up;
use crate::scalar::is_valid_alignment;
use crate::scalar::truncate_down;
use crate::AddressRange;
use crate::Error;
use crate::Range;
use crate::RangeId;
use crate::ResourceType;
use crate::Result;

/// A chain of top-level apertures, sorted by address and never overlapping.
///
/// The list only records its first range; the rest are reached through `Range::next`. The
/// ranges themselves live in the `RangeAllocator` that built the list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RangeList {
    head: Option<RangeId>,
}

impl RangeList {
    pub fn new() -> Self {
        RangeList { head: None }
    }

    /// The lowest range of the list, if any.
    pub fn head(&self) -> Option<RangeId> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Candidate placement found while scanning the free gaps of a list.
#[derive(Debug, Clone, Copy)]
struct Placement {
    parent: RangeId,
    index: usize,
    start: u64,
    size: u64,
}

/// Per-call view of a request, fixed before the gap walk starts.
struct Request {
    alignment: u64,
    min_address: u64,
    end_limit: u64,
    flags: RangeFlags,
    fixed: Option<u64>,
    /// Span of the request's own allocations, which any new placement must still cover.
    cover: Option<AddressRange>,
}

/// A gap that can hold the request.
struct Fit {
    start: u64,
    len: u64,
    waste: u64,
    scored: bool,
}

impl Request {
    /// Checks whether `gap` can hold between `min_size` and `max_size` bytes of the request.
    fn fit(&self, gap: AddressRange, min_size: u64, max_size: u64) -> Option<Fit> {
        let mut waste = gap.len();
        let mut pos = cmp::max(gap.start, self.min_address);
        let mut end_pos = cmp::min(gap.end, self.end_limit);
        match self.fixed {
            Some(fixed) => {
                if fixed < pos || fixed >= end_pos {
                    return None;
                }
                pos = fixed;
            }
            None => pos = checked_align_up(pos, self.alignment)?,
        }
        if self.flags.contains(RangeFlags::MAXIMIZE_ROOT) {
            end_pos = truncate_down(end_pos, self.alignment);
        }
        if end_pos < pos {
            return None;
        }
        let len = end_pos - pos;
        if len < min_size {
            return None;
        }
        let len = cmp::min(len, max_size);
        if let Some(cover) = self.cover {
            if pos > cover.start || pos + len < cover.end {
                return None;
            }
        }

        // Fixed, short and root placements take any gap that fits; everything else is ranked.
        let scored = self.fixed.is_none()
            && len >= max_size
            && !self.flags.contains(RangeFlags::MAXIMIZE_ROOT);
        if scored {
            waste = if self
                .flags
                .intersects(RangeFlags::SPLAY | RangeFlags::MAXIMIZE_SIZE)
            {
                // Biggest free area first.
                u64::MAX - waste
            } else {
                // Least waste first.
                waste.saturating_sub(len)
            };
        }
        Some(Fit {
            start: pos,
            len,
            waste,
            scored,
        })
    }
}

/// Owns every range record and performs placement within range lists.
///
/// Ranges are referred to by `RangeId`. Apertures are added to a `RangeList` with `add_range`,
/// and detached requests made with `create_range` are placed with `allocate`. A placed range
/// may itself hold allocations, which makes it usable as the head of a list for its own
/// children (as a bridge window is for the devices behind it).
///
/// The allocator is not synchronized; callers serialize access to it.
#[derive(Debug, Default)]
pub struct RangeAllocator {
    slots: Vec<Option<Range>>,
    free_slots: Vec<usize>,
    /// Ranges that are members of some `RangeList`.
    listed: Vec<bool>,
    poisoned: bool,
}

impl RangeAllocator {
    pub fn new() -> Self {
        RangeAllocator::default()
    }

    /// Creates a detached request for `proposed_size` bytes aligned to `alignment`.
    ///
    /// A non-zero `start` asks for placement at exactly that address. An `alignment` of 0 aligns
    /// the range to its own size.
    pub fn create_range(
        &mut self,
        ty: ResourceType,
        start: u64,
        proposed_size: u64,
        alignment: u64,
    ) -> RangeId {
        self.insert(Range::new(ty, start, proposed_size, alignment))
    }

    /// Removes a detached range from the allocator and returns its final state.
    ///
    /// Fails with `RangeInUse` if the range is placed, still holds allocations or belongs to a
    /// `RangeList`.
    pub fn destroy(&mut self, id: RangeId) -> Result<Range> {
        let range = self.range(id)?;
        if range.is_placed() || !range.allocations.is_empty() || self.is_listed(id) {
            return Err(Error::RangeInUse(id));
        }
        self.remove(id)
    }

    /// Returns the range for `id`, if it exists.
    pub fn get(&self, id: RangeId) -> Option<&Range> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Returns the range for `id` for adjustment of its request fields.
    ///
    /// The placement fields of a placed range should only be changed through this allocator.
    pub fn get_mut(&mut self, id: RangeId) -> Option<&mut Range> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Allocations placed inside `id`, by ascending address.
    pub fn allocations(&self, id: RangeId) -> Result<&[RangeId]> {
        Ok(&self.range(id)?.allocations)
    }

    /// Iterates over the chain of top-level ranges starting at `head`.
    pub fn ranges(&self, head: RangeId) -> impl Iterator<Item = RangeId> + '_ {
        std::iter::successors(Some(head), move |id| self.get(*id).and_then(|r| r.next))
    }

    /// Iterates over the ranges of `list`.
    pub fn list_ranges<'a>(&'a self, list: &RangeList) -> impl Iterator<Item = RangeId> + 'a {
        list.head
            .into_iter()
            .flat_map(move |head| self.ranges(head))
    }

    /// Returns true once an invariant violation was detected. A poisoned allocator refuses
    /// further mutation.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Adds the aperture `start..start + size` to `list`.
    ///
    /// An aperture that touches an existing one is merged into it, and if that closes the gap to
    /// the following aperture the two are joined. Overlapping an existing aperture is an error and
    /// leaves the list untouched.
    pub fn add_range(
        &mut self,
        list: &mut RangeList,
        ty: ResourceType,
        start: u64,
        size: u64,
        alignment: u64,
    ) -> Result<()> {
        self.check_poisoned()?;
        if size == 0 {
            return Err(Error::AllocSizeZero);
        }
        let new = AddressRange::from_start_and_size(start, size)
            .ok_or(Error::PoolOverflow { base: start, size })?;

        let mut prev = None;
        let mut cursor = list.head;
        while let Some(id) = cursor {
            let existing = self.range(id)?;
            let span = existing.span();
            let next = existing.next;
            if new.overlaps(span) {
                return Err(Error::RegionOverlap(new));
            }
            if new.end == span.start {
                let range = self.range_mut(id)?;
                range.start = new.start;
                Self::resize_aperture(range);
                debug!("{}: extended {} down to {:#x}", ty, span, new.start);
                return Ok(());
            }
            if new.start == span.end {
                return self.extend_up(id, new, next);
            }
            if span.start > new.end {
                break;
            }
            prev = Some(id);
            cursor = next;
        }

        let mut range = Range::new_occupied(ty, start, size, alignment);
        range.next = cursor;
        let id = self.insert(range);
        self.set_listed(id, true);
        match prev {
            Some(prev) => self.range_mut(prev)?.next = Some(id),
            None => list.head = Some(id),
        }
        debug!("{}: added aperture {}", ty, new);
        Ok(())
    }

    /// Grows aperture `id` up over `new`, joining the following aperture if they now touch.
    fn extend_up(&mut self, id: RangeId, new: AddressRange, next: Option<RangeId>) -> Result<()> {
        let mut end = new.end;
        let mut joined = None;
        if let Some(next_id) = next {
            let following = self.range(next_id)?;
            if new.overlaps(following.span()) {
                return Err(Error::RegionOverlap(new));
            }
            if following.start == end {
                end = following.end;
                joined = Some(next_id);
            }
        }

        if let Some(next_id) = joined {
            let following = self.remove(next_id)?;
            self.set_listed(next_id, false);
            for &child in &following.allocations {
                self.range_mut(child)?.parent = Some(id);
            }
            let joined_span = following.span();
            let range = self.range_mut(id)?;
            range.next = following.next;
            range.allocations.extend(following.allocations);
            debug!("{}: joined {} with {}", range.ty, range.span(), joined_span);
        }

        let range = self.range_mut(id)?;
        range.end = end;
        Self::resize_aperture(range);
        debug!("{}: extended aperture to {}", range.ty, range.span());
        Ok(())
    }

    fn resize_aperture(range: &mut Range) {
        range.size = range.end - range.start;
        range.proposed_size = range.size;
        range.total_size = range.size;
    }

    /// Places `request` in one of the apertures of the chain starting at `head`.
    ///
    /// The request is placed at `fixed_start` if given, otherwise at its own `start` if that is
    /// non-zero, otherwise wherever the placement policy of its flags prefers:
    /// * `SPLAY` or `MAXIMIZE_SIZE`: the biggest free gap.
    /// * otherwise: the gap that leaves the least space unused.
    ///
    /// A request that is already placed is treated as free space while searching, so it can be
    /// grown or shrunk in place by changing its `proposed_size` and allocating it again. When its
    /// `size` is non-zero and smaller than `proposed_size`, any gap of at least `size` bytes is
    /// accepted and the largest such gap, up to `proposed_size`, wins. A request that holds
    /// allocations of its own only takes a placement that still covers all of them.
    ///
    /// Returns `OutOfSpace`, with nothing changed, if no gap fits.
    pub fn allocate(
        &mut self,
        head: RangeId,
        request: RangeId,
        fixed_start: Option<u64>,
    ) -> Result<()> {
        self.check_poisoned()?;
        let req = self.range(request)?;
        if req.proposed_size == 0 {
            return Err(Error::AllocSizeZero);
        }
        if !is_valid_alignment(req.alignment) {
            return Err(Error::BadAlignment);
        }
        let max_size = req.proposed_size;
        let mut min_size = if req.size != 0 { req.size } else { max_size };
        min_size = cmp::min(min_size, max_size);
        let fixed = fixed_start.or(if req.start != 0 { Some(req.start) } else { None });
        let cover = match (req.allocations.first(), req.allocations.last()) {
            (Some(&first), Some(&last)) => Some(AddressRange::from_start_and_end(
                self.range(first)?.start,
                self.range(last)?.end,
            )),
            _ => None,
        };
        let params = Request {
            alignment: req.alignment,
            min_address: req.min_address,
            end_limit: req.max_address.saturating_add(1),
            flags: req.flags,
            fixed,
            cover,
        };
        let ty = req.ty;

        let heads: Vec<RangeId> = self.ranges(head).collect();
        if self.is_listed(request) {
            return Err(Error::RangeInUse(request));
        }
        for &aperture in &heads {
            let mut cursor = Some(aperture);
            while let Some(id) = cursor {
                if id == request {
                    return Err(Error::RangeInUse(request));
                }
                cursor = self.range(id)?.parent;
            }
        }

        let mut best_fit = u64::MAX;
        let mut best: Option<Placement> = None;
        'search: for &aperture in &heads {
            let parent = self.range(aperture)?;
            if parent.size == 0 {
                continue;
            }
            let mut pos = parent.start;
            let mut index = 0;
            let mut siblings = parent.allocations.iter().filter(|&&id| id != request);
            loop {
                let sibling = match siblings.next() {
                    Some(&id) => Some(self.range(id)?),
                    None => None,
                };
                let end_pos = sibling.map_or(parent.end, |s| s.start);
                let gap = AddressRange::from_start_and_end(pos, end_pos);

                match params.fit(gap, min_size, max_size) {
                    Some(fit) if !fit.scored || best.is_none() || fit.waste < best_fit => {
                        if fit.scored {
                            best_fit = fit.waste;
                        }
                        min_size = fit.len;
                        best = Some(Placement {
                            parent: aperture,
                            index,
                            start: fit.start,
                            size: fit.len,
                        });
                        if fixed.is_some() || fit.waste == 0 {
                            break 'search;
                        }
                    }
                    _ => trace!("{}: gap {} rejected for {:?}", ty, gap, request),
                }

                match sibling {
                    Some(s) => {
                        pos = s.end;
                        index += 1;
                    }
                    None => break,
                }
            }
        }

        let placement = match best {
            Some(placement) => placement,
            None => {
                debug!(
                    "{}: no room for {:?} ({:#x} bytes, align {:#x})",
                    ty, request, max_size, params.alignment
                );
                return Err(Error::OutOfSpace);
            }
        };

        if let Some(old_parent) = self.range(request)?.parent {
            self.range_mut(old_parent)?
                .allocations
                .retain(|&id| id != request);
        }
        self.range_mut(placement.parent)?
            .allocations
            .insert(placement.index, request);
        let range = self.range_mut(request)?;
        range.set_span(placement.start, placement.size);
        range.parent = Some(placement.parent);
        if range.flags.contains(RangeFlags::MAXIMIZE_ROOT) {
            range.proposed_size = range.size;
        }
        debug!(
            "{}: placed {:?} at {} in {:?}{}",
            ty,
            request,
            range.span(),
            placement.parent,
            if range.size < range.proposed_size {
                " (short)"
            } else {
                ""
            }
        );
        Ok(())
    }

    /// Removes `victim` from whichever aperture of the chain starting at `head` holds it.
    ///
    /// Allocations nested inside `victim` are removed first. The victim's `start` and `end` are
    /// cleared, but its `size`, `proposed_size` and `extend_size` are kept so that a later
    /// `allocate` asks for the same amount again.
    ///
    /// Returns `NotAllocated`, with nothing changed, if no aperture of the chain holds `victim`.
    pub fn deallocate(&mut self, head: RangeId, victim: RangeId) -> Result<()> {
        self.check_poisoned()?;
        self.range(victim)?;
        let heads: Vec<RangeId> = self.ranges(head).collect();
        let mut holder = None;
        for aperture in heads {
            if self.range(aperture)?.allocations.contains(&victim) {
                holder = Some(aperture);
                break;
            }
        }
        let parent = holder.ok_or(Error::NotAllocated(victim))?;

        self.release_children(victim)?;
        self.range_mut(parent)?
            .allocations
            .retain(|&id| id != victim);
        let range = self.range_mut(victim)?;
        debug!("{}: released {:?} from {}", range.ty, victim, range.span());
        Self::detach(range);
        Ok(())
    }

    fn release_children(&mut self, id: RangeId) -> Result<()> {
        let children = std::mem::take(&mut self.range_mut(id)?.allocations);
        for child in children {
            self.release_children(child)?;
            Self::detach(self.range_mut(child)?);
        }
        Ok(())
    }

    fn detach(range: &mut Range) {
        range.start = 0;
        range.end = 0;
        range.parent = None;
    }

    pub(crate) fn range(&self, id: RangeId) -> Result<&Range> {
        self.get(id).ok_or(Error::InvalidRange(id))
    }

    pub(crate) fn range_mut(&mut self, id: RangeId) -> Result<&mut Range> {
        self.get_mut(id).ok_or(Error::InvalidRange(id))
    }

    pub(crate) fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            Err(Error::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Records an invariant violation. Every later mutation of this allocator fails.
    pub(crate) fn corrupted(&mut self, what: String) -> Error {
        error!("range allocator poisoned: {}", what);
        self.poisoned = true;
        Error::Corrupted(what)
    }

    fn insert(&mut self, range: Range) -> RangeId {
        match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(range);
                RangeId(slot)
            }
            None => {
                self.slots.push(Some(range));
                self.listed.push(false);
                RangeId(self.slots.len() - 1)
            }
        }
    }

    fn remove(&mut self, id: RangeId) -> Result<Range> {
        let range = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(Error::InvalidRange(id))?;
        self.free_slots.push(id.0);
        Ok(range)
    }

    fn is_listed(&self, id: RangeId) -> bool {
        self.listed.get(id.0).copied().unwrap_or(false)
    }

    fn set_listed(&mut self, id: RangeId, listed: bool) {
        if let Some(slot) = self.listed.get_mut(id.0) {
            *slot = listed;
        }
    }
}

impl Index<RangeId> for RangeAllocator {
    type Output = Range;

    fn index(&self, id: RangeId) -> &Range {
        match self.get(id) {
            Some(range) => range,
            None => panic!("no range with handle {:?}", id),
        }
    }
}
