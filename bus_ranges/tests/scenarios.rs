// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bus_ranges::place_window;
use bus_ranges::AddressRange;
use bus_ranges::AllocatorConfig;
use bus_ranges::Error;
use bus_ranges::RangeAllocator;
use bus_ranges::RangeFlags;
use bus_ranges::RangeId;
use bus_ranges::RangeList;
use bus_ranges::RequestQueue;
use bus_ranges::ResourceType;

/// Checks ordering, non-overlap, containment and alignment below `parent`, recursively.
fn check_layout(allocator: &RangeAllocator, parent: RangeId) {
    let outer = allocator[parent].span();
    let mut prev_end = outer.start;
    for &id in allocator[parent].allocations() {
        let range = &allocator[id];
        assert_eq!(range.parent(), Some(parent));
        assert!(
            outer.contains_range(range.span()),
            "{} outside {}",
            range.span(),
            outer
        );
        assert!(range.start >= prev_end, "{} overlaps previous", range.span());
        assert!(range.start >= range.min_address);
        assert!(range.end - 1 <= range.max_address);
        assert_eq!(range.start % range.alignment, 0);
        assert_eq!(range.end - range.start, range.size);
        prev_end = range.end;
        check_layout(allocator, id);
    }
}

fn check_list(allocator: &RangeAllocator, list: &RangeList) {
    let mut prev: Option<AddressRange> = None;
    for head in allocator.list_ranges(list) {
        let span = allocator[head].span();
        if let Some(prev) = prev {
            assert!(prev.end < span.start, "{} not after {}", span, prev);
        }
        prev = Some(span);
        check_layout(allocator, head);
    }
}

#[test]
fn first_aligned_fit_in_aperture() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0xd1c0_0000, 0xd0_0000, 0x40_0000)
        .unwrap();
    let head = list.head().unwrap();

    let bar = allocator.create_range(ResourceType::Memory, 0, 0x50_0000, 0x40_0000);
    allocator.get_mut(bar).unwrap().flags = RangeFlags::RELOCATABLE;
    assert_eq!(allocator.allocate(head, bar, None), Ok(()));
    assert_eq!(allocator[bar].start, 0xd1c0_0000);
    assert_eq!(allocator[bar].end, 0xd210_0000);
    check_list(&allocator, &list);
}

#[test]
fn ten_allocations_over_two_apertures() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x8000_0000, 0x7000_0000, 0)
        .unwrap();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x7f_8000_0000, 0x8000_0000, 0)
        .unwrap();
    let head = list.head().unwrap();

    let sizes = [
        0x4, 0x10, 0x100, 0x1000, 0x10000, 0x8, 0x40, 0x400, 0x4000, 0x2000,
    ];
    let mut placed = Vec::new();
    for size in sizes {
        let id = allocator.create_range(ResourceType::Memory, 0, size, 0);
        allocator.allocate(head, id, None).unwrap();
        placed.push(id);
    }

    for (i, &a) in placed.iter().enumerate() {
        let span = allocator[a].span();
        assert_eq!(span.len(), sizes[i]);
        assert_eq!(span.start % sizes[i], 0);
        for &b in &placed[i + 1..] {
            assert!(!span.overlaps(allocator[b].span()));
        }
    }
    check_list(&allocator, &list);
}

#[test]
fn abutting_apertures_merge() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Io, 0x2000, 0x1000, 0)
        .unwrap();
    allocator
        .add_range(&mut list, ResourceType::Io, 0x3000, 0x1000, 0)
        .unwrap();

    let heads: Vec<RangeId> = allocator.list_ranges(&list).collect();
    assert_eq!(heads.len(), 1);
    assert_eq!(
        allocator[heads[0]].span(),
        AddressRange::from(0x2000..0x4000)
    );
}

#[test]
fn empty_collapse_reclaims_whole_range() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0xa000_0000, 0x20_0000, 0)
        .unwrap();
    let head = list.head().unwrap();

    assert_eq!(allocator.collapse(head, 0x10_0000), Ok(0x20_0000));
    assert_eq!(allocator[head].proposed_size, 0);
}

#[test]
fn splay_optimize_moves_forward() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0xa000_0000, 0x10_0000, 0)
        .unwrap();
    let head = list.head().unwrap();

    let bar = allocator.create_range(ResourceType::Memory, 0, 0x1_0000, 0x1_0000);
    allocator.get_mut(bar).unwrap().flags = RangeFlags::RELOCATABLE | RangeFlags::SPLAY;
    allocator.allocate(head, bar, None).unwrap();
    let before = allocator[bar].span();
    let free = allocator.last_free(head, 1).unwrap();
    assert_eq!(free, 0xf_0000);

    allocator.optimize(head).unwrap();
    let after = allocator[bar].span();
    assert_eq!(after.start, before.start + free);
    assert_eq!(after.end, before.end + free);
    assert_eq!(after.len(), before.len());
    check_list(&allocator, &list);
}

#[test]
fn allocate_deallocate_round_trip() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x1_0000, 0x1_0000, 0)
        .unwrap();
    let head = list.head().unwrap();

    let a = allocator.create_range(ResourceType::Memory, 0, 0x1000, 0);
    let b = allocator.create_range(ResourceType::Memory, 0, 0x2000, 0);
    allocator.allocate(head, a, None).unwrap();
    let before = allocator.allocations(head).unwrap().to_vec();

    allocator.allocate(head, b, None).unwrap();
    let b_span = allocator[b].span();
    allocator.deallocate(head, b).unwrap();
    assert_eq!(allocator.allocations(head).unwrap(), &before[..]);

    // The freed space is offered again.
    allocator.allocate(head, b, None).unwrap();
    assert_eq!(allocator[b].span(), b_span);
    check_list(&allocator, &list);
}

#[test]
fn deallocate_keeps_size_for_reallocation() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x10_0000, 0x10_0000, 0)
        .unwrap();
    let head = list.head().unwrap();

    let a = allocator.create_range(ResourceType::Memory, 0, 0x4000, 0);
    allocator.allocate(head, a, None).unwrap();
    allocator.get_mut(a).unwrap().extend_size = 0x1000;
    allocator.deallocate(head, a).unwrap();

    let range = &allocator[a];
    assert_eq!((range.start, range.end), (0, 0));
    assert_eq!(range.size, 0x4000);
    assert_eq!(range.proposed_size, 0x4000);
    assert_eq!(range.extend_size, 0x1000);
    assert!(range.parent().is_none());
}

#[test]
fn estimate_does_not_touch_ranges() {
    let mut allocator = RangeAllocator::new();
    let chain: Vec<RangeId> = [0x1000u64, 0x10_0000, 0x800, 0x4_0000]
        .iter()
        .map(|&size| allocator.create_range(ResourceType::Memory, 0, size, 0))
        .collect();
    let snapshot: Vec<_> = chain.iter().map(|&id| allocator[id].clone()).collect();

    let total = allocator.estimate_total_size(&chain).unwrap();
    assert!(total >= 0x1000 + 0x10_0000 + 0x800 + 0x4_0000);
    assert_eq!(allocator.estimate_total_size(&chain), Ok(total));
    for (i, &id) in chain.iter().enumerate() {
        assert_eq!(allocator[id], snapshot[i]);
    }
}

#[test]
fn grow_in_place_keeps_start() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x4000_0000, 0x100_0000, 0)
        .unwrap();
    let head = list.head().unwrap();

    let a = allocator.create_range(ResourceType::Memory, 0, 0x10_0000, 0x10_0000);
    allocator.allocate(head, a, None).unwrap();
    let start = allocator[a].start;

    allocator.get_mut(a).unwrap().proposed_size = 0x40_0000;
    allocator.allocate(head, a, None).unwrap();
    assert_eq!(allocator[a].start, start);
    assert_eq!(allocator[a].size, 0x40_0000);
    assert_eq!(allocator.allocations(head).unwrap(), &[a]);
}

#[test]
fn bridge_windows_nest() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x8000_0000, 0x1000_0000, 0)
        .unwrap();
    let root = list.head().unwrap();

    let bridge = allocator.create_range(ResourceType::Memory, 0, 0x100_0000, 0x10_0000);
    allocator.allocate(root, bridge, None).unwrap();
    let devices: Vec<RangeId> = [0x1000u64, 0x4000, 0x10_0000]
        .iter()
        .map(|&size| {
            let id = allocator.create_range(ResourceType::Memory, 0, size, 0);
            allocator.allocate(bridge, id, None).unwrap();
            id
        })
        .collect();
    check_list(&allocator, &list);

    assert_eq!(
        allocator.deallocate(root, devices[0]),
        Err(Error::NotAllocated(devices[0]))
    );
    allocator.deallocate(root, bridge).unwrap();
    assert!(allocator.allocations(root).unwrap().is_empty());
    for id in devices {
        assert!(!allocator[id].is_placed());
        assert!(allocator.destroy(id).is_ok());
    }
    assert!(allocator.destroy(bridge).is_ok());
}

#[test]
fn many_allocations_keep_layout() {
    let mut allocator = RangeAllocator::new();
    let mut list = RangeList::new();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x1_0000_0000, 0x1000_0000, 0)
        .unwrap();
    allocator
        .add_range(&mut list, ResourceType::Memory, 0x2_0000_0000, 0x400_0000, 0)
        .unwrap();
    let head = list.head().unwrap();

    // xorshift, so the sequence is fixed between runs.
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let mut live = Vec::new();
    for _ in 0..200 {
        let roll = next();
        if roll % 4 == 0 && !live.is_empty() {
            let victim = live.swap_remove((roll as usize / 4) % live.len());
            allocator.deallocate(head, victim).unwrap();
            allocator.destroy(victim).unwrap();
        } else {
            let size = 1u64 << (4 + (roll >> 8) % 18);
            let id = allocator.create_range(ResourceType::Memory, 0, size, 0);
            if roll & 0x10 != 0 {
                allocator.get_mut(id).unwrap().flags = RangeFlags::SPLAY;
            }
            match allocator.allocate(head, id, None) {
                Ok(()) => live.push(id),
                Err(Error::OutOfSpace) => {
                    allocator.destroy(id).unwrap();
                }
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        check_list(&allocator, &list);
    }
}

#[test]
fn configured_window_pass() {
    let config: AllocatorConfig = serde_json::from_str(
        r#"{
            "windows": [
                { "type": "memory", "start": 3221225472, "size": 268435456,
                  "min-alignment": 1048576 }
            ]
        }"#,
    )
    .unwrap();
    let (mut allocator, lists) = RangeAllocator::from_config(&config).unwrap();
    let list = lists[&ResourceType::Memory];
    let head = list.head().unwrap();
    let min_alignment = config.windows[0].min_alignment;

    let mut queue = RequestQueue::new();
    for size in [0x2_0000u64, 0x1000, 0x80_0000, 0x4000] {
        let id = allocator.create_range(ResourceType::Memory, 0, size, 0);
        allocator.get_mut(id).unwrap().flags = RangeFlags::RELOCATABLE;
        queue.push(&allocator, id).unwrap();
    }
    let estimate = bus_ranges::estimate_window_size(&allocator, &queue, min_alignment, false)
        .unwrap();
    assert_eq!(estimate, 0x90_0000);

    let report = place_window(&mut allocator, head, &mut queue, min_alignment).unwrap();
    assert_eq!(report.placed, 4);
    assert_eq!(report.shortage, 0);
    assert_eq!(allocator[head].size, estimate);
    assert_eq!(report.reclaimed, 0x1000_0000 - estimate);
    check_list(&allocator, &list);

    let dump = allocator.dump(&list).to_string();
    assert!(dump.starts_with("head.start     0xc0000000\n"));
    assert_eq!(dump.matches("].flags     ARsmbv").count(), 4);
}
