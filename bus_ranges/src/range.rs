// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

use crate::AddressRange;
use crate::ResourceType;

bitflags! {
    /// Placement policy flags carried by a range.
    #[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
    #[serde(transparent)]
    #[repr(transparent)]
    pub struct RangeFlags: u32 {
        /// Grow to take a share of the free space left in the parent.
        const MAXIMIZE_SIZE = 0x0000_0001;
        /// Never shrink this range when collapsing.
        const NO_COLLAPSE = 0x0000_0002;
        /// Root aperture that claims whole alignment-sized chunks of what is left.
        const MAXIMIZE_ROOT = 0x0000_0004;
        /// Keep the size but move up against the next allocation.
        const SPLAY = 0x0000_0008;
        /// May be moved or resized after it was first placed.
        const RELOCATABLE = 0x0000_0010;
        /// Space held back for later use, such as hotplug.
        const RESERVE = 0x0000_0020;
        /// Assigned by firmware; its requested size must not change.
        const PERMANENT = 0x0000_0040;
        /// Backed by a 64-bit BAR.
        const BAR64 = 0x0000_0080;
    }
}

impl Default for RangeFlags {
    fn default() -> Self {
        RangeFlags::empty()
    }
}

impl RangeFlags {
    /// Flags that make a range a candidate for growth or repositioning.
    pub const GROWABLE: RangeFlags = RangeFlags::MAXIMIZE_SIZE
        .union(RangeFlags::MAXIMIZE_ROOT)
        .union(RangeFlags::SPLAY);
}

/// Handle to a range owned by a `RangeAllocator`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RangeId(pub(crate) usize);

/// A reserved aperture or an allocation placed within one.
///
/// A range whose `parent` is set is placed: `start..end` lies inside the parent and it is
/// linked into the parent's allocation list. A detached range only carries a request: the
/// `proposed_size`, `alignment`, address bounds and flags the allocator will honour, and
/// optionally a non-zero `start` naming the address it wants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
    /// `end - start` while placed.
    pub size: u64,
    /// Size asked for. May differ from `size` while a grow or shrink is pending.
    pub proposed_size: u64,
    /// Size reserved when the range was created.
    pub total_size: u64,
    /// Growth past `total_size` found by collapse or required by a shortage.
    pub extend_size: u64,
    pub alignment: u64,
    /// Lowest address the range may start at.
    pub min_address: u64,
    /// Highest address the range may cover (inclusive).
    pub max_address: u64,
    pub ty: ResourceType,
    pub flags: RangeFlags,
    pub(crate) next: Option<RangeId>,
    pub(crate) parent: Option<RangeId>,
    pub(crate) allocations: Vec<RangeId>,
}

impl Range {
    /// Creates a detached request for `proposed_size` bytes.
    ///
    /// An `alignment` of 0 means the range is aligned to its own size.
    pub fn new(ty: ResourceType, start: u64, proposed_size: u64, alignment: u64) -> Self {
        Range {
            start,
            end: start,
            size: 0,
            proposed_size,
            total_size: proposed_size,
            extend_size: 0,
            alignment: if alignment != 0 {
                alignment
            } else {
                proposed_size
            },
            min_address: 0,
            max_address: u64::MAX,
            ty,
            flags: RangeFlags::empty(),
            next: None,
            parent: None,
            allocations: Vec::new(),
        }
    }

    /// Creates a range that already covers `start..start + size`, as used for apertures.
    pub(crate) fn new_occupied(ty: ResourceType, start: u64, size: u64, alignment: u64) -> Self {
        let mut range = Range::new(ty, start, size, alignment);
        range.size = size;
        range.end = start + size;
        range
    }

    /// Returns the addresses currently covered.
    pub fn span(&self) -> AddressRange {
        AddressRange::from_start_and_end(self.start, self.end)
    }

    /// Returns true if the range is linked into a parent's allocation list.
    pub fn is_placed(&self) -> bool {
        self.parent.is_some()
    }

    /// The range whose allocation list holds this one.
    pub fn parent(&self) -> Option<RangeId> {
        self.parent
    }

    /// The next top-level range of the list this range heads or belongs to.
    pub fn next(&self) -> Option<RangeId> {
        self.next
    }

    /// Allocations placed inside this range, by ascending address.
    pub fn allocations(&self) -> &[RangeId] {
        &self.allocations
    }

    pub(crate) fn set_span(&mut self, start: u64, size: u64) {
        self.start = start;
        self.size = size;
        self.end = start + size;
    }
}
