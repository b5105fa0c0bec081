//! The frame finder: one traversal of the table tree that answers "which
//! frame hosts the next table level or restored page".
//!
//! The traversal carries three answers at once and the caller picks by
//! priority: a completely empty table frame (reclaimed in place), the
//! highest frame index in use (the next pristine frame, if the pool isn't
//! exhausted), and the resident page with the greatest cyclic distance from
//! the faulting page (the eviction victim).

use crate::{PhysicalMemory, VirtualMemory, ROOT_FRAME};

/// Cyclic distance between two pages on a ring of `num_pages`.
pub(crate) fn page_dist(p: u64, q: u64, num_pages: u64) -> u64 {
    let d = p.abs_diff(q);
    d.min(num_pages - d)
}

/// An all-zero table frame, reclaimable after unlinking it from its parent.
struct EmptyTable {
    frame: u64,
    parent_slot: u64,
}

/// The resident page farthest from the faulting one.
struct Victim {
    page: u64,
    frame: u64,
    parent_slot: u64,
}

struct Survey {
    /// Page being faulted in; distances are measured from it.
    target_page: u64,
    /// The frame the caller is about to link from. Freeing it would put the
    /// chosen frame on its own translation path and form a cycle.
    origin_frame: u64,
    /// Largest frame index observed anywhere in the reachable tree.
    max_used_frame: u64,
    empty_table: Option<EmptyTable>,
    victim: Option<Victim>,
}

impl<M, const VA_WIDTH: u32, const OFFSET_WIDTH: u32, const NUM_FRAMES: u64>
    VirtualMemory<M, VA_WIDTH, OFFSET_WIDTH, NUM_FRAMES>
where
    M: PhysicalMemory,
{
    /// Finds a frame to host a new table level (`is_leaf == false`, returned
    /// zeroed) or a page about to be restored (`is_leaf == true`, returned
    /// as-is).
    ///
    /// The returned frame is not `origin_frame`, not the root, and no longer
    /// linked anywhere in the tree.
    pub(crate) fn find_frame(&mut self, target_page: u64, origin_frame: u64, is_leaf: bool) -> u64 {
        let mut survey = Survey {
            target_page,
            origin_frame,
            max_used_frame: 0,
            empty_table: None,
            victim: None,
        };
        self.survey_tree(ROOT_FRAME, 0, 0, None, &mut survey);

        if let Some(empty) = survey.empty_table {
            // Already all-zero, so it is ready either way: a table needs no
            // scrubbing and a leaf is about to be overwritten by restore.
            self.mem.write(empty.parent_slot, 0);
            debug_assert!(empty.frame != ROOT_FRAME && empty.frame != origin_frame);
            return empty.frame;
        }

        if survey.max_used_frame + 1 < NUM_FRAMES {
            let frame = survey.max_used_frame + 1;
            if !is_leaf {
                self.zero_frame(frame);
            }
            return frame;
        }

        let victim = survey
            .victim
            .expect("a full frame pool always holds at least one resident page");
        log::trace!(
            "evicting page {} from frame {} for page {target_page}",
            victim.page,
            victim.frame
        );
        self.mem.evict(victim.frame, victim.page);
        self.mem.write(victim.parent_slot, 0);
        if !is_leaf {
            self.zero_frame(victim.frame);
        }
        debug_assert!(victim.frame != ROOT_FRAME && victim.frame != origin_frame);
        victim.frame
    }

    /// Depth-first walk over the reachable tree.
    ///
    /// `route` accumulates the table offsets along the path; at leaf depth it
    /// is the page number of the resident page in `frame`. Stops as soon as
    /// an empty table frame is found.
    fn survey_tree(
        &mut self,
        frame: u64,
        depth: u32,
        route: u64,
        parent_slot: Option<u64>,
        survey: &mut Survey,
    ) {
        if depth == Self::TABLES_DEPTH {
            let better = match &survey.victim {
                None => true,
                // Strictly greater: on ties the first page encountered wins.
                Some(v) => {
                    page_dist(survey.target_page, route, Self::NUM_PAGES)
                        > page_dist(survey.target_page, v.page, Self::NUM_PAGES)
                }
            };
            if better {
                survey.victim = Some(Victim {
                    page: route,
                    frame,
                    // Data frames always hang off a parent table.
                    parent_slot: parent_slot.unwrap(),
                });
            }
            return;
        }

        let mut has_children = false;
        for i in 0..Self::PAGE_SIZE {
            let slot = frame * Self::PAGE_SIZE + i;
            let child = self.mem.read(slot);
            if child == 0 {
                continue;
            }
            has_children = true;
            if child > survey.max_used_frame {
                survey.max_used_frame = child;
            }
            self.survey_tree(child, depth + 1, (route << OFFSET_WIDTH) | i, Some(slot), survey);
            if survey.empty_table.is_some() {
                return;
            }
        }

        // An all-zero table frame is reclaimable, but never the root (no
        // parent to unlink from) and never the frame the caller links from.
        if !has_children && frame != survey.origin_frame {
            if let Some(parent_slot) = parent_slot {
                survey.empty_table = Some(EmptyTable { frame, parent_slot });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::page_dist;
    use crate::testutil::TestMemory;
    use crate::{PhysicalMemory, VirtualMemory};

    // 6-bit addresses, 4-word pages: a root plus one inner table level,
    // 16 pages. Small enough to build trees by hand.
    type Vm = VirtualMemory<TestMemory, 6, 2, 4>;

    fn fresh() -> Vm {
        let mut vm = Vm::new(TestMemory::new(4, Vm::PAGE_SIZE));
        vm.initialize();
        vm
    }

    #[test]
    fn cyclic_distance() {
        assert_eq!(page_dist(0, 0, 16), 0);
        assert_eq!(page_dist(0, 1, 16), 1);
        assert_eq!(page_dist(1, 0, 16), 1);
        assert_eq!(page_dist(0, 15, 16), 1);
        assert_eq!(page_dist(0, 8, 16), 8);
        assert_eq!(page_dist(3, 13, 16), 6);
    }

    #[test]
    fn pristine_pool_hands_out_the_next_frame() {
        let mut vm = fresh();
        assert_eq!(vm.find_frame(0, 0, false), 1);
    }

    #[test]
    fn empty_table_is_reclaimed_and_unlinked() {
        let mut vm = fresh();
        // Root links to table frame 1, which has no entries.
        vm.mem.write(0, 1);

        let frame = vm.find_frame(9, 0, true);
        assert_eq!(frame, 1);
        // The parent entry was cleared.
        assert_eq!(vm.mem.read(0), 0);
    }

    #[test]
    fn origin_frame_is_never_reclaimed() {
        let mut vm = fresh();
        // Frame 1 is empty but is the table the caller extends.
        vm.mem.write(0, 1);

        assert_eq!(vm.find_frame(9, 1, true), 2);
    }

    #[test]
    fn farthest_page_is_evicted() {
        let mut vm = fresh();
        // Full pool: root[0] -> table 1 -> pages 0 and 1 in frames 2 and 3.
        vm.mem.write(0, 1);
        vm.mem.write(Vm::PAGE_SIZE, 2);
        vm.mem.write(Vm::PAGE_SIZE + 1, 3);

        // From page 8: dist(8,0) = 8, dist(8,1) = 7, so page 0 goes.
        let frame = vm.find_frame(8, 1, true);
        assert_eq!(frame, 2);

        let mem = vm.into_inner();
        assert_eq!(mem.evicts, vec![(2, 0)]);
        // Page 0's parent entry was cleared, page 1's kept.
        assert_eq!(mem.ram[Vm::PAGE_SIZE as usize], 0);
        assert_eq!(mem.ram[Vm::PAGE_SIZE as usize + 1], 3);
    }

    #[test]
    fn eviction_ties_go_to_the_first_page_seen() {
        let mut vm = fresh();
        vm.mem.write(0, 1);
        vm.mem.write(Vm::PAGE_SIZE, 2); // page 0
        vm.mem.write(Vm::PAGE_SIZE + 2, 3); // page 2

        // From page 1 both neighbours are at distance 1.
        let frame = vm.find_frame(1, 1, true);
        assert_eq!(frame, 2);
        assert_eq!(vm.into_inner().evicts, vec![(2, 0)]);
    }

    #[test]
    fn interior_frame_is_zeroed_after_eviction() {
        let mut vm = fresh();
        vm.mem.write(0, 1);
        vm.mem.write(Vm::PAGE_SIZE, 2);
        vm.mem.write(Vm::PAGE_SIZE + 1, 3);
        // Give the future victim some content.
        vm.mem.write(2 * Vm::PAGE_SIZE, 42);

        let frame = vm.find_frame(8, 1, false);
        assert_eq!(frame, 2);
        let mem = vm.into_inner();
        assert!(mem.ram[2 * Vm::PAGE_SIZE as usize..3 * Vm::PAGE_SIZE as usize]
            .iter()
            .all(|&w| w == 0));
        // The content went to the backing store first.
        assert_eq!(mem.homes[&0][0], 42);
    }

    #[test]
    fn max_used_frame_sees_the_whole_tree() {
        let mut vm = fresh();
        // Root links frame 3 as a table which in turn holds page frames 1
        // and 2; the highest index in use is 3 even though it sits mid-path.
        vm.mem.write(1, 3);
        vm.mem.write(3 * Vm::PAGE_SIZE, 1);
        vm.mem.write(3 * Vm::PAGE_SIZE + 1, 2);

        // Pool of 4 is exhausted (0..=3), so this must evict, not hand out
        // frame 4.
        let frame = vm.find_frame(0, 3, true);
        assert!(frame < 4);
        assert_eq!(vm.into_inner().evicts.len(), 1);
    }
}
