//! Property tests for the slot allocator
//!
//! Run with: cargo test --test slots_test

use proptest::prelude::*;
use schain_manager::{SlotAllocator, SlotRef};

const NODE: u64 = 1;

#[derive(Debug, Clone)]
enum Op {
    Assign(u8),
    Release(usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            any::<u8>().prop_map(Op::Assign),
            (0usize..16).prop_map(Op::Release),
        ],
        0..64,
    )
}

fn slot(tag: u8) -> SlotRef {
    SlotRef {
        schain: [tag; 32],
        part_of_node: 8,
    }
}

proptest! {
    #[test]
    fn assign_reuses_lowest_hole(ops in arb_ops()) {
        let mut slots = SlotAllocator::new();
        let mut model: Vec<Option<u8>> = Vec::new();

        for op in ops {
            match op {
                Op::Assign(tag) => {
                    let expected = model.iter().position(|s| s.is_none()).unwrap_or(model.len());
                    let position = slots.assign(NODE, slot(tag));
                    prop_assert_eq!(position, expected);
                    if position == model.len() {
                        model.push(Some(tag));
                    } else {
                        model[position] = Some(tag);
                    }
                }
                Op::Release(position) => {
                    let live = model.get(position).map(|s| s.is_some()).unwrap_or(false);
                    prop_assert_eq!(slots.release(NODE, position).is_ok(), live);
                    if live {
                        model[position] = None;
                    }
                }
            }

            let holes: Vec<usize> = model
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_none())
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(slots.holes(NODE), holes.as_slice());
            prop_assert_eq!(slots.live_count(NODE), model.iter().flatten().count());
            prop_assert_eq!(slots.slots(NODE).len(), model.len());
        }
    }
}

#[test]
fn test_release_then_reuse_keeps_positions() {
    let mut slots = SlotAllocator::new();
    slots.assign(NODE, slot(0xA));
    slots.assign(NODE, slot(0xB));
    slots.release_schain(NODE, &[0xA; 32]).unwrap();
    slots.assign(NODE, slot(0xC));
    assert_eq!(
        slots.schain_ids_for_node(NODE),
        vec![[0xC; 32], [0xB; 32]]
    );
}

#[test]
fn test_holes_read_as_zero_ids() {
    let mut slots = SlotAllocator::new();
    slots.assign(NODE, slot(1));
    slots.assign(NODE, slot(2));
    slots.assign(NODE, slot(3));
    slots.release(NODE, 1).unwrap();
    assert_eq!(
        slots.schain_ids_for_node(NODE),
        vec![[1; 32], [0; 32], [3; 32]]
    );
    assert_eq!(slots.live_schains(NODE), vec![[1; 32], [3; 32]]);
    assert_eq!(slots.occupied_capacity(NODE, 128), 32);
    assert_eq!(slots.free_capacity(NODE, 128), 96);
}
