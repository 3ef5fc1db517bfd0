// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;

use log::debug;
use log::log_enabled;
use log::Level;

use crate::range::RangeFlags;
use crate::Range;
use crate::RangeAllocator;
use crate::RangeId;
use crate::RangeList;

/// Human-readable listing of a range list, produced by `RangeAllocator::dump`.
///
/// Every top-level range is printed with its allocations, one field per line. Each allocation
/// also shows its flag letters (see `flag_letters`). The listing is for tracing and tests only.
pub struct RangeDump<'a> {
    allocator: &'a RangeAllocator,
    head: Option<RangeId>,
}

/// Returns `ARSMBV` with a letter in upper case when the range is placed (`A`), relocatable,
/// splayed, maximized, a maximized root or a reserve, in that order.
pub(crate) fn flag_letters(range: &Range) -> String {
    let letter = |set: bool, c: char| {
        if set {
            c
        } else {
            c.to_ascii_lowercase()
        }
    };
    [
        letter(range.is_placed(), 'A'),
        letter(range.flags.contains(RangeFlags::RELOCATABLE), 'R'),
        letter(range.flags.contains(RangeFlags::SPLAY), 'S'),
        letter(range.flags.contains(RangeFlags::MAXIMIZE_SIZE), 'M'),
        letter(range.flags.contains(RangeFlags::MAXIMIZE_ROOT), 'B'),
        letter(range.flags.contains(RangeFlags::RESERVE), 'V'),
    ]
    .iter()
    .collect()
}

impl fmt::Display for RangeDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(head) = self.head {
            for id in self.allocator.ranges(head) {
                let Some(range) = self.allocator.get(id) else {
                    break;
                };
                writeln!(f, "head.start     {:#x}", range.start)?;
                writeln!(f, "head.size      {:#x}", range.size)?;
                writeln!(f, "head.end       {:#x}", range.end)?;
                writeln!(f, "head.alignment {:#x}", range.alignment)?;
                writeln!(f, "allocs:")?;
                for (i, alloc) in range
                    .allocations
                    .iter()
                    .filter_map(|&alloc| self.allocator.get(alloc))
                    .enumerate()
                {
                    writeln!(f, "[{}].start     {:#x}", i, alloc.start)?;
                    writeln!(f, "[{}].size      {:#x}", i, alloc.size)?;
                    writeln!(f, "[{}].end       {:#x}", i, alloc.end)?;
                    writeln!(f, "[{}].alignment {:#x}", i, alloc.alignment)?;
                    writeln!(f, "[{}].flags     {}", i, flag_letters(alloc))?;
                }
                writeln!(f, "[end]")?;
                writeln!(f, "------")?;
            }
        }
        writeln!(f, "------------------------------------")
    }
}

impl RangeAllocator {
    /// Returns a printable listing of `list`.
    pub fn dump(&self, list: &RangeList) -> RangeDump<'_> {
        RangeDump {
            allocator: self,
            head: list.head(),
        }
    }

    /// Writes the listing of `list` to the log at debug level.
    pub fn log_dump(&self, list: &RangeList) {
        if log_enabled!(Level::Debug) {
            for line in self.dump(list).to_string().lines() {
                debug!("{}", line);
            }
        }
    }
}
