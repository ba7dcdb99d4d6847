use std::collections::{HashMap, HashSet};

use super::TransactionId;

/// Directed graph with an edge T1 -> T2 whenever T1 is blocked on a lock T2
/// holds. A cycle means none of the transactions on it can ever proceed.
#[derive(Debug)]
pub struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self {
            edges: HashMap::new(),
        }
    }

    pub fn add_edge(&mut self, from: TransactionId, to: TransactionId) {
        self.edges.entry(from).or_default().insert(to);
    }

    /// Drops every outgoing edge of `tid`, called once its lock request was
    /// granted.
    pub fn remove_waits_of(&mut self, tid: TransactionId) {
        self.edges.remove(&tid);
    }

    /// Drops the transaction from the graph entirely, incoming edges
    /// included, called when it commits or aborts.
    pub fn remove_transaction(&mut self, tid: TransactionId) {
        self.edges.remove(&tid);
        for targets in self.edges.values_mut() {
            targets.remove(&tid);
        }
    }

    /// Searches for a cycle and returns the transactions on it.
    pub fn find_cycle(&self) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut on_path = HashSet::new();

        let mut starts: Vec<TransactionId> = self.edges.keys().copied().collect();
        starts.sort_unstable();
        for tid in starts {
            if let Some(cycle) = self.visit(tid, &mut visited, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        tid: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<TransactionId>,
        on_path: &mut HashSet<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        if on_path.contains(&tid) {
            let start = path.iter().position(|t| *t == tid).unwrap();
            return Some(path[start..].to_vec());
        }
        if !visited.insert(tid) {
            return None;
        }

        path.push(tid);
        on_path.insert(tid);
        if let Some(targets) = self.edges.get(&tid) {
            let mut targets: Vec<TransactionId> = targets.iter().copied().collect();
            targets.sort_unstable();
            for target in targets {
                if let Some(cycle) = self.visit(target, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        on_path.remove(&tid);
        None
    }
}
