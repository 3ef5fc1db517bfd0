// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Manages bus resource apertures and the sub-ranges placed inside them.
//!
//! A `RangeAllocator` owns every range record. Top-level apertures (for example a PCI bridge's
//! memory or I/O window) are added to a `RangeList`, and requests created with
//! `RangeAllocator::create_range` are then placed into those apertures, grown, moved, removed,
//! and finally collapsed or optimized once the layout is settled.

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use crate::address_range::AddressRange;
pub use crate::config::AllocatorConfig;
pub use crate::config::WindowConfig;
pub use crate::dump::RangeDump;
pub use crate::range::Range;
pub use crate::range::RangeFlags;
pub use crate::range::RangeId;
pub use crate::range_allocator::RangeAllocator;
pub use crate::range_allocator::RangeList;
pub use crate::request_queue::RequestQueue;
pub use crate::scalar::align_up;
pub use crate::scalar::checked_align_up;
pub use crate::scalar::truncate_down;
pub use crate::window::estimate_window_size;
pub use crate::window::place_window;
pub use crate::window::WindowReport;

mod address_range;
mod collapse;
mod config;
mod dump;
mod estimate;
mod optimize;
mod range;
mod range_allocator;
mod request_queue;
mod scalar;
mod window;

/// Resource class of a range.
///
/// The allocator stores the tag but never interprets it; it is there so callers can tell the
/// apertures of a bridge apart and so dumps are readable.
#[derive(Debug, Default, Eq, PartialEq, Hash, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    /// Non-prefetchable memory space.
    #[default]
    Memory,
    /// Prefetchable memory space.
    PrefetchMemory,
    /// I/O port space.
    Io,
    /// Bus numbers behind a bridge.
    BusNumber,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            ResourceType::Memory => "MEM",
            ResourceType::PrefetchMemory => "PFM",
            ResourceType::Io => "I/O",
            ResourceType::BusNumber => "BUS",
        })
    }
}

#[sorted]
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    #[error("Allocation cannot have size of 0")]
    AllocSizeZero,
    #[error("Alignment must be a power of 2")]
    BadAlignment,
    /// An internal invariant no longer holds. This is unrecoverable: the allocator that
    /// returned it is poisoned and must not be used for further placement.
    #[error("Range bookkeeping corrupted: {0}")]
    Corrupted(String),
    #[error("Range handle {0:?} does not exist")]
    InvalidRange(RangeId),
    #[error("Range {0:?} is not allocated in this list")]
    NotAllocated(RangeId),
    #[error("Out of space")]
    OutOfSpace,
    #[error("Allocator poisoned by an earlier invariant violation")]
    Poisoned,
    #[error("base={base} + size={size} overflows")]
    PoolOverflow { base: u64, size: u64 },
    #[error("Range {0:?} is still in use")]
    RangeInUse(RangeId),
    #[error("Overlapping region {0}")]
    RegionOverlap(AddressRange),
}

pub type Result<T> = std::result::Result<T, Error>;
