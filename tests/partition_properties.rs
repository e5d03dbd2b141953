//! Property tests for the topology partitioner
//!
//! For any SMT topology with enough physical cores, the workload set and
//! every reserved sibling set must stay pairwise disjoint, and all of them
//! must stay inside the online set.

use std::collections::BTreeSet;

use proptest::prelude::*;
use vatio::topology::{CpuTopology, ReservationPlan, TopologyError};

/// Build sibling sets the way the kernel numbers them: either consecutive
/// (0,1 / 2,3 / ..) or folded (0,N / 1,N+1 / ..).
fn build_sets(cores: usize, threads: usize, folded: bool) -> Vec<Vec<usize>> {
    (0..cores)
        .map(|core| {
            (0..threads)
                .map(|t| {
                    if folded {
                        core + t * cores
                    } else {
                        core * threads + t
                    }
                })
                .collect()
        })
        .collect()
}

proptest! {
    #[test]
    fn workload_is_disjoint_from_every_reservation(
        cores in 4usize..16,
        threads in 2usize..4,
        folded in any::<bool>(),
    ) {
        let sets = build_sets(cores, threads, folded);
        let topo = CpuTopology::from_sibling_sets(&sets);
        let plan = ReservationPlan {
            helper_core: sets[0][0],
            power_core: sets[1][0],
            split_core: sets[2][0],
        };
        let assignment = topo.partition(&plan).unwrap();

        let online = topo.online();
        let mut reserved: BTreeSet<usize> = assignment.power.iter().copied().collect();
        reserved.insert(assignment.memory);
        reserved.insert(assignment.counters);
        for set in &sets[0..1] {
            // the helper core never shows up anywhere
            for cpu in set {
                prop_assert!(!assignment.workload.contains(cpu));
                prop_assert!(!reserved.contains(cpu));
            }
        }

        for cpu in &assignment.workload {
            prop_assert!(online.contains(cpu));
            prop_assert!(!reserved.contains(cpu));
        }
        for cpu in &reserved {
            prop_assert!(online.contains(cpu));
        }
    }

    #[test]
    fn split_core_threads_are_distinct_siblings(
        cores in 4usize..16,
        threads in 2usize..4,
        folded in any::<bool>(),
    ) {
        let sets = build_sets(cores, threads, folded);
        let topo = CpuTopology::from_sibling_sets(&sets);
        let plan = ReservationPlan {
            helper_core: sets[0][0],
            power_core: sets[1][0],
            split_core: sets[2][0],
        };
        let assignment = topo.partition(&plan).unwrap();

        prop_assert_ne!(assignment.memory, assignment.counters);
        let split = topo.sibling_set(assignment.memory).unwrap();
        prop_assert!(split.contains(&assignment.counters));
    }
}

#[test]
fn test_three_cores_leave_no_room_for_the_workload() {
    // default plan reserves exactly three cores; a three-core box has
    // nothing left to run the workload on
    let sets = build_sets(3, 2, true);
    let topo = CpuTopology::from_sibling_sets(&sets);
    assert!(matches!(
        topo.partition(&ReservationPlan::default()),
        Err(TopologyError::EmptyWorkloadSet)
    ));
}
