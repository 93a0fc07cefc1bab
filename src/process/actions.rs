//! Process control: terminate single processes, trees and group rows

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{TelemetryError, TelemetryResult};
use crate::platform::ProcessSource;

/// Result of a multi-process kill.
#[derive(Debug, Default)]
pub struct KillReport {
    pub killed: Vec<u32>,
    pub failed: Vec<(u32, TelemetryError)>,
}

impl KillReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, pid: u32, result: TelemetryResult<()>) {
        match result {
            // Already gone counts as done.
            Ok(()) | Err(TelemetryError::Exited(_)) => self.killed.push(pid),
            Err(err) => self.failed.push((pid, err)),
        }
    }
}

/// Every descendant of `root`, deepest first. Cycles in the parent map are
/// walked at most once.
pub fn descendants(parents: &HashMap<u32, u32>, root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, &ppid) in parents {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }
    for list in children.values_mut() {
        list.sort_unstable();
    }

    let mut out = Vec::new();
    let mut visited = HashSet::from([root]);
    // Iterative post-order.
    let mut stack = vec![(root, false)];
    while let Some((pid, expanded)) = stack.pop() {
        if expanded {
            if pid != root {
                out.push(pid);
            }
            continue;
        }
        stack.push((pid, true));
        if let Some(kids) = children.get(&pid) {
            for &kid in kids.iter().rev() {
                if visited.insert(kid) {
                    stack.push((kid, false));
                }
            }
        }
    }
    out
}

#[derive(Clone)]
pub struct ProcessActions {
    source: Arc<dyn ProcessSource>,
}

impl ProcessActions {
    pub fn new(source: Arc<dyn ProcessSource>) -> Self {
        Self { source }
    }

    pub fn kill(&self, pid: u32) -> TelemetryResult<()> {
        tracing::info!(pid, "terminating process");
        self.source.terminate(pid)
    }

    /// Terminate `pid` and everything below it, children before parents.
    pub fn kill_tree(&self, pid: u32) -> KillReport {
        let parents = self.source.parent_map().unwrap_or_else(|err| {
            tracing::debug!(error = %err, "parent map unavailable; killing root only");
            HashMap::new()
        });
        let mut report = KillReport::default();
        for child in descendants(&parents, pid) {
            report.record(child, self.source.terminate(child));
        }
        report.record(pid, self.kill(pid));
        report
    }

    /// Terminate every member of a group row.
    pub fn kill_group(&self, pids: &[u32], as_trees: bool) -> KillReport {
        let mut report = KillReport::default();
        for &pid in pids {
            if as_trees {
                let sub = self.kill_tree(pid);
                report.killed.extend(sub.killed);
                report.failed.extend(sub.failed);
            } else {
                report.record(pid, self.kill(pid));
            }
        }
        report
    }

    pub fn executable_path(&self, pid: u32) -> TelemetryResult<PathBuf> {
        self.source.executable_path(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockProcessSource;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_descendants_deepest_first() {
        let parents = HashMap::from([(2, 1), (3, 2), (4, 1), (5, 9)]);
        assert_eq!(descendants(&parents, 1), vec![3, 2, 4]);
        assert!(descendants(&parents, 5).is_empty());
    }

    #[test]
    fn test_descendants_survive_cycles() {
        let parents = HashMap::from([(2, 3), (3, 2), (4, 4)]);
        assert_eq!(descendants(&parents, 2), vec![3]);
        assert!(descendants(&parents, 4).is_empty());
    }

    #[test]
    fn test_kill_tree_order() {
        let mut source = MockProcessSource::new();
        source
            .expect_parent_map()
            .returning(|| Ok(HashMap::from([(20, 10), (30, 20)])));
        let mut seq = Sequence::new();
        for pid in [30u32, 20, 10] {
            source
                .expect_terminate()
                .with(eq(pid))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        let report = ProcessActions::new(Arc::new(source)).kill_tree(10);
        assert_eq!(report.killed, vec![30, 20, 10]);
        assert!(report.success());
    }

    #[test]
    fn test_kill_group_reports_failures() {
        let mut source = MockProcessSource::new();
        source.expect_terminate().returning(|pid| match pid {
            1 => Ok(()),
            2 => Err(TelemetryError::Exited(2)),
            _ => Err(TelemetryError::PermissionDenied(format!("process {}", pid))),
        });
        let report = ProcessActions::new(Arc::new(source)).kill_group(&[1, 2, 3], false);
        assert_eq!(report.killed, vec![1, 2]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 3);
        assert!(!report.success());
    }
}
