// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::HashMap;

use log::debug;
use serde::Deserialize;
use serde::Serialize;

use crate::range::RangeFlags;
use crate::scalar::is_valid_alignment;
use crate::Error;
use crate::RangeAllocator;
use crate::RangeList;
use crate::ResourceType;
use crate::Result;

fn default_min_alignment() -> u64 {
    1
}

/// One aperture to seed an allocator with.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct WindowConfig {
    #[serde(rename = "type", default)]
    pub ty: ResourceType,
    pub start: u64,
    pub size: u64,
    /// Alignment of the aperture itself. Defaults to its size.
    #[serde(default)]
    pub alignment: Option<u64>,
    #[serde(default)]
    pub flags: RangeFlags,
    /// Granularity used when the window is collapsed or extended by `place_window`.
    #[serde(default = "default_min_alignment")]
    pub min_alignment: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            ty: ResourceType::default(),
            start: 0,
            size: 0,
            alignment: None,
            flags: RangeFlags::empty(),
            min_alignment: default_min_alignment(),
        }
    }
}

/// Apertures available to an allocator, for example the windows decoded from a host bridge.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AllocatorConfig {
    #[serde(default)]
    pub windows: Vec<WindowConfig>,
}

impl RangeAllocator {
    /// Builds an allocator holding every window of `config`, with one `RangeList` per resource
    /// type. Windows that touch are merged as `add_range` does.
    pub fn from_config(
        config: &AllocatorConfig,
    ) -> Result<(RangeAllocator, HashMap<ResourceType, RangeList>)> {
        let mut allocator = RangeAllocator::new();
        let mut lists: HashMap<ResourceType, RangeList> = HashMap::new();
        for window in &config.windows {
            let alignment = window.alignment.unwrap_or(0);
            if alignment != 0 && !is_valid_alignment(alignment) {
                return Err(Error::BadAlignment);
            }
            if !is_valid_alignment(window.min_alignment) {
                return Err(Error::BadAlignment);
            }
            let list = lists.entry(window.ty).or_default();
            allocator.add_range(list, window.ty, window.start, window.size, alignment)?;

            if !window.flags.is_empty() {
                let holder = allocator
                    .list_ranges(list)
                    .find(|&id| allocator[id].span().contains(window.start));
                if let Some(id) = holder {
                    allocator.range_mut(id)?.flags |= window.flags;
                }
            }
            debug!(
                "{}: window {:#x}+{:#x} flags {:?}",
                window.ty, window.start, window.size, window.flags
            );
        }
        Ok((allocator, lists))
    }
}
