//! Module dependency graph using petgraph::DiGraph indexed by ModuleId

use std::collections::{BTreeSet, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::ids::ModuleId;

/// Import edges live in the graph; use edges are kept per module because they do not
/// propagate.
pub struct ImportGraph {
    inner: DiGraph<ModuleId, ()>,
    uses: Vec<Vec<ModuleId>>,
}

impl std::fmt::Debug for ImportGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportGraph")
            .field("module_count", &self.inner.node_count())
            .field("import_count", &self.inner.edge_count())
            .finish()
    }
}

/// Transitive visibility computed from an [`ImportGraph`].
#[derive(Debug, Default)]
pub struct Closures {
    /// Per module: what importers of it get to see.
    pub exports: Vec<BTreeSet<ModuleId>>,
    /// Per module: everything it can see through imports and uses.
    pub visible: Vec<BTreeSet<ModuleId>>,
    /// Strongly connected groups of more than one module.
    pub cycles: Vec<Vec<ModuleId>>,
}

impl ImportGraph {
    /// One node per module id `0..count`.
    pub fn with_modules(count: usize) -> Self {
        let mut inner = DiGraph::with_capacity(count, count);
        for i in 0..count {
            inner.add_node(ModuleId::new(i));
        }
        ImportGraph {
            inner,
            uses: vec![Vec::new(); count],
        }
    }

    fn node(module: ModuleId) -> NodeIndex {
        NodeIndex::new(module.index())
    }

    /// Add a re-exporting edge. Self edges and duplicates are dropped.
    pub fn add_import(&mut self, from: ModuleId, to: ModuleId) {
        let (a, b) = (Self::node(from), Self::node(to));
        if from != to && !self.inner.contains_edge(a, b) {
            self.inner.add_edge(a, b, ());
        }
    }

    pub fn add_use(&mut self, from: ModuleId, to: ModuleId) {
        let uses = &mut self.uses[from.index()];
        if from != to && !uses.contains(&to) {
            uses.push(to);
        }
    }

    pub fn imports(&self, module: ModuleId) -> impl Iterator<Item = ModuleId> + '_ {
        self.inner.neighbors(Self::node(module)).map(|ix| self.inner[ix])
    }

    pub fn uses(&self, module: ModuleId) -> &[ModuleId] {
        &self.uses[module.index()]
    }

    /// Import closures on strongly connected components.
    ///
    /// `tarjan_scc` yields components successors-first, so every component can union the
    /// already finished export sets of its successors. Members of a cycle export each
    /// other, including themselves.
    pub fn closures(&self) -> Closures {
        let count = self.inner.node_count();
        let mut exports: Vec<BTreeSet<ModuleId>> = vec![BTreeSet::new(); count];
        let mut cycles = Vec::new();

        for component in tarjan_scc(&self.inner) {
            let members: BTreeSet<ModuleId> = component.iter().map(|ix| self.inner[*ix]).collect();
            let mut exported = BTreeSet::new();
            if members.len() > 1 {
                exported.extend(members.iter().copied());
                cycles.push(members.iter().copied().collect());
            }
            for ix in &component {
                for succ in self.inner.neighbors(*ix) {
                    let target = self.inner[succ];
                    if !members.contains(&target) {
                        exported.insert(target);
                        exported.extend(exports[target.index()].iter().copied());
                    }
                }
            }
            for member in &members {
                exports[member.index()] = exported.clone();
            }
        }

        let visible = (0..count)
            .map(|i| {
                let mut set = exports[i].clone();
                for used in &self.uses[i] {
                    set.insert(*used);
                    set.extend(exports[used.index()].iter().copied());
                }
                set
            })
            .collect();

        Closures {
            exports,
            visible,
            cycles,
        }
    }

    /// Shortest dependency chain from any of `starts` to a module accepted by `is_target`.
    /// Use edges only count as the first hop.
    pub fn shortest_path(&self, starts: &[ModuleId], is_target: impl Fn(ModuleId) -> bool) -> Option<Vec<ModuleId>> {
        let mut queue: VecDeque<Vec<ModuleId>> = VecDeque::new();
        let mut visited: HashSet<ModuleId> = HashSet::new();
        for start in starts {
            if visited.insert(*start) {
                queue.push_back(vec![*start]);
            }
        }

        while let Some(path) = queue.pop_front() {
            let Some(&last) = path.last() else {
                continue;
            };
            if is_target(last) {
                return Some(path);
            }
            let first_hop = path.len() == 1;
            let next = self
                .imports(last)
                .chain(first_hop.then(|| self.uses(last).iter().copied()).into_iter().flatten());
            for succ in next {
                if visited.insert(succ) {
                    let mut extended = path.clone();
                    extended.push(succ);
                    queue.push_back(extended);
                }
            }
        }
        None
    }

    pub fn import_count(&self) -> usize {
        self.inner.edge_count()
    }
}
