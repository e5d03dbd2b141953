//! CPU topology inspection and sampler/workload partitioning
//!
//! The workload must never share a physical core with a sampling agent, so
//! reservations are made in whole sibling sets (the hardware threads of one
//! physical core). Which cores are reserved is configuration, not a constant.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

const SYSFS_CPU: &str = "/sys/devices/system/cpu";

/// Errors raised while inspecting or partitioning the CPU topology
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("no online CPU information available")]
    NoOnlineCpus,

    #[error("cpu list entry {0:?} is not a number or range")]
    BadCpuList(String),

    #[error("topology has no core {0}")]
    UnknownCore(usize),

    #[error("core {core} exposes {have} hardware thread(s), need at least 2")]
    NoSiblingPair { core: usize, have: usize },

    #[error("reserved cores {a} and {b} share hardware threads")]
    OverlappingReservations { a: usize, b: usize },

    #[error("reservations leave no CPUs for the workload")]
    EmptyWorkloadSet,

    #[error("failed to read {path}")]
    Sysfs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which physical cores are carved out of the workload set.
///
/// `helper_core` is excluded entirely (left for OS helpers such as GPU
/// driver threads). `power_core`'s whole sibling set hosts the power
/// sampler. `split_core` must expose two hardware threads; they host the
/// memory-bandwidth and instruction-counter samplers individually.
#[derive(Debug, Clone, Copy)]
pub struct ReservationPlan {
    pub helper_core: usize,
    pub power_core: usize,
    pub split_core: usize,
}

impl Default for ReservationPlan {
    fn default() -> Self {
        Self {
            helper_core: 0,
            power_core: 1,
            split_core: 2,
        }
    }
}

/// Disjoint CPU sets derived from the topology and a reservation plan
#[derive(Debug, Clone)]
pub struct CpuSetAssignment {
    /// Every online CPU not reserved for a sampler or the helper core.
    pub workload: BTreeSet<usize>,
    /// Sibling set hosting the power sampler.
    pub power: BTreeSet<usize>,
    /// Hardware thread hosting the memory-bandwidth sampler.
    pub memory: usize,
    /// Hardware thread hosting the instruction/cache-miss sampler.
    pub counters: usize,
}

/// Online logical CPUs and their physical-core sibling sets.
///
/// Computed once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    online: BTreeSet<usize>,
    siblings: BTreeMap<usize, BTreeSet<usize>>,
}

impl CpuTopology {
    /// Read the topology from sysfs.
    pub fn detect() -> Result<Self, TopologyError> {
        Self::from_sysfs(Path::new(SYSFS_CPU))
    }

    fn from_sysfs(root: &Path) -> Result<Self, TopologyError> {
        let online_path = root.join("online");
        let raw = std::fs::read_to_string(&online_path).map_err(|source| TopologyError::Sysfs {
            path: online_path,
            source,
        })?;
        let online = parse_cpu_list(raw.trim())?;
        if online.is_empty() {
            return Err(TopologyError::NoOnlineCpus);
        }

        let mut siblings = BTreeMap::new();
        for &cpu in &online {
            let path = root.join(format!("cpu{cpu}/topology/thread_siblings_list"));
            let raw = std::fs::read_to_string(&path)
                .map_err(|source| TopologyError::Sysfs { path, source })?;
            siblings.insert(cpu, parse_cpu_list(raw.trim())?);
        }
        Ok(Self { online, siblings })
    }

    /// Build a topology from explicit sibling sets, one per physical core.
    /// The online set is the union of all sets.
    pub fn from_sibling_sets(sets: &[Vec<usize>]) -> Self {
        let mut online = BTreeSet::new();
        let mut siblings = BTreeMap::new();
        for set in sets {
            let members: BTreeSet<usize> = set.iter().copied().collect();
            for &cpu in &members {
                online.insert(cpu);
                siblings.insert(cpu, members.clone());
            }
        }
        Self { online, siblings }
    }

    /// All online logical CPU ids, ascending.
    pub fn online(&self) -> &BTreeSet<usize> {
        &self.online
    }

    /// The sibling set (hardware threads of one physical core) containing
    /// logical CPU `cpu`.
    pub fn sibling_set(&self, cpu: usize) -> Option<&BTreeSet<usize>> {
        self.siblings.get(&cpu)
    }

    /// Carve the reserved sibling sets out of the online set.
    ///
    /// Fatal before any process is launched: a bad plan means the run cannot
    /// be isolated, so nothing is spawned.
    pub fn partition(&self, plan: &ReservationPlan) -> Result<CpuSetAssignment, TopologyError> {
        if self.online.is_empty() {
            return Err(TopologyError::NoOnlineCpus);
        }

        let helper = self
            .sibling_set(plan.helper_core)
            .ok_or(TopologyError::UnknownCore(plan.helper_core))?;
        let power = self
            .sibling_set(plan.power_core)
            .ok_or(TopologyError::UnknownCore(plan.power_core))?;
        let split = self
            .sibling_set(plan.split_core)
            .ok_or(TopologyError::UnknownCore(plan.split_core))?;

        if split.len() < 2 {
            return Err(TopologyError::NoSiblingPair {
                core: plan.split_core,
                have: split.len(),
            });
        }
        // two agents on one physical core would break launch-time isolation
        if power.intersection(split).next().is_some() {
            return Err(TopologyError::OverlappingReservations {
                a: plan.power_core,
                b: plan.split_core,
            });
        }
        let mut threads = split.iter().copied();
        let memory = threads.next().ok_or(TopologyError::NoSiblingPair {
            core: plan.split_core,
            have: 0,
        })?;
        let counters = threads.next().ok_or(TopologyError::NoSiblingPair {
            core: plan.split_core,
            have: 1,
        })?;

        let mut workload = self.online.clone();
        for reserved in [helper, power, split] {
            for cpu in reserved {
                workload.remove(cpu);
            }
        }
        if workload.is_empty() {
            return Err(TopologyError::EmptyWorkloadSet);
        }

        Ok(CpuSetAssignment {
            workload,
            power: power.clone(),
            memory,
            counters,
        })
    }
}

/// Parse a kernel cpu list such as `0-3,8,10-11` into a set of ids.
pub fn parse_cpu_list(expr: &str) -> Result<BTreeSet<usize>, TopologyError> {
    let mut out = BTreeSet::new();
    if expr.is_empty() {
        return Ok(out);
    }
    for part in expr.split(',') {
        let part = part.trim();
        if let Some((a, b)) = part.split_once('-') {
            let lo: usize = a
                .trim()
                .parse()
                .map_err(|_| TopologyError::BadCpuList(part.to_string()))?;
            let hi: usize = b
                .trim()
                .parse()
                .map_err(|_| TopologyError::BadCpuList(part.to_string()))?;
            if hi < lo {
                return Err(TopologyError::BadCpuList(part.to_string()));
            }
            out.extend(lo..=hi);
        } else {
            let cpu: usize = part
                .parse()
                .map_err(|_| TopologyError::BadCpuList(part.to_string()))?;
            out.insert(cpu);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smt_topology() -> CpuTopology {
        // 4 physical cores, 2 threads each, kernel-style pairing
        CpuTopology::from_sibling_sets(&[
            vec![0, 4],
            vec![1, 5],
            vec![2, 6],
            vec![3, 7],
        ])
    }

    #[test]
    fn test_parse_cpu_list_single() {
        let set = parse_cpu_list("3").unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_parse_cpu_list_range() {
        let set = parse_cpu_list("0-3").unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_cpu_list_mixed() {
        let set = parse_cpu_list("0,2-4,7").unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![0, 2, 3, 4, 7]);
    }

    #[test]
    fn test_parse_cpu_list_rejects_garbage() {
        assert!(parse_cpu_list("0,x").is_err());
        assert!(parse_cpu_list("5-2").is_err());
    }

    #[test]
    fn test_partition_is_disjoint() {
        let topo = smt_topology();
        let assignment = topo.partition(&ReservationPlan::default()).unwrap();

        assert_eq!(
            assignment.workload.iter().copied().collect::<Vec<_>>(),
            vec![3, 7]
        );
        assert!(!assignment.workload.contains(&assignment.memory));
        assert!(!assignment.workload.contains(&assignment.counters));
        for cpu in &assignment.power {
            assert!(!assignment.workload.contains(cpu));
        }
        assert_ne!(assignment.memory, assignment.counters);
    }

    #[test]
    fn test_partition_splits_the_designated_core() {
        let topo = smt_topology();
        let assignment = topo.partition(&ReservationPlan::default()).unwrap();
        // core 2 pairs threads 2 and 6
        assert_eq!(assignment.memory, 2);
        assert_eq!(assignment.counters, 6);
    }

    #[test]
    fn test_partition_respects_plan_indices() {
        let topo = smt_topology();
        let plan = ReservationPlan {
            helper_core: 3,
            power_core: 2,
            split_core: 1,
        };
        let assignment = topo.partition(&plan).unwrap();
        assert_eq!(assignment.memory, 1);
        assert_eq!(assignment.counters, 5);
        assert_eq!(
            assignment.workload.iter().copied().collect::<Vec<_>>(),
            vec![0, 4]
        );
    }

    #[test]
    fn test_partition_requires_smt_on_split_core() {
        let topo = CpuTopology::from_sibling_sets(&[vec![0], vec![1], vec![2], vec![3]]);
        let err = topo.partition(&ReservationPlan::default()).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::NoSiblingPair { core: 2, have: 1 }
        ));
    }

    #[test]
    fn test_partition_unknown_core() {
        let topo = CpuTopology::from_sibling_sets(&[vec![0, 1]]);
        let err = topo
            .partition(&ReservationPlan {
                helper_core: 0,
                power_core: 8,
                split_core: 0,
            })
            .unwrap_err();
        assert!(matches!(err, TopologyError::UnknownCore(8)));
    }

    #[test]
    fn test_partition_rejects_power_and_split_on_one_core() {
        let topo = smt_topology();
        let plan = ReservationPlan {
            helper_core: 0,
            power_core: 2,
            split_core: 6, // other hardware thread of core 2
        };
        let err = topo.partition(&plan).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::OverlappingReservations { a: 2, b: 6 }
        ));
    }

    #[test]
    fn test_partition_rejects_empty_workload() {
        // Three cores, all reserved: nothing left to run the workload on
        let topo = CpuTopology::from_sibling_sets(&[vec![0, 3], vec![1, 4], vec![2, 5]]);
        let err = topo.partition(&ReservationPlan::default()).unwrap_err();
        assert!(matches!(err, TopologyError::EmptyWorkloadSet));
    }

    #[test]
    fn test_empty_topology_is_an_error() {
        let topo = CpuTopology::from_sibling_sets(&[]);
        assert!(matches!(
            topo.partition(&ReservationPlan::default()),
            Err(TopologyError::NoOnlineCpus)
        ));
    }
}
