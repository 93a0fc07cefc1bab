//! Process tree reconciliation
//!
//! Each tick a flat process table is folded into a long-lived forest:
//!
//! 1. upsert one node per pid, mutating existing nodes in place
//! 2. prune pids that were not sampled (clearing a stale selection)
//! 3. attach children to parents, except under launcher/wrapper processes
//! 4. merge configured helper bundles under their anchor
//! 5. aggregate metrics bottom-up
//! 6. optionally collapse same-named roots into group nodes
//! 7. order by smoothed keys, pinned first, at most every 900ms
//! 8. apply the result to every list as a minimal diff
//!
//! Nodes live in one map keyed by `NodeKey`; a node is never replaced while
//! its key stays live, so its serial (and any selection on it) survives
//! across ticks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::collection::{MutationStats, ObservableList};
use super::sampler::ProcessSnapshot;
use crate::config::{BundleRule, ProcessConfig};
use crate::telemetry::rate::{ema, sanitize_percent};

const SORT_THROTTLE: Duration = Duration::from_millis(900);
const SMOOTHING_ALPHA: f64 = 0.35;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Pid(u32),
    /// Same-named roots collapsed together, keyed by lowercase name.
    Group(String),
    /// Stand-in anchor for a bundle whose anchor process is not running.
    Bundle(String),
}

impl NodeKey {
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Pid(pid) => Some(*pid),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pid(pid) => write!(f, "{}", pid),
            Self::Group(name) => write!(f, "group:{}", name),
            Self::Bundle(name) => write!(f, "bundle:{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    Name,
    #[default]
    Cpu,
    Memory,
    Gpu,
}

impl SortColumn {
    pub fn default_descending(self) -> bool {
        self != Self::Name
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "name"),
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "ram"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "cpu" => Ok(Self::Cpu),
            "ram" | "mem" | "memory" => Ok(Self::Memory),
            "gpu" => Ok(Self::Gpu),
            other => Err(format!("unknown sort column '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub column: SortColumn,
    pub descending: bool,
}

impl Default for SortState {
    fn default() -> Self {
        Self {
            column: SortColumn::Cpu,
            descending: true,
        }
    }
}

/// A long-lived process (or synthetic group) entity.
#[derive(Debug, Clone)]
pub struct ProcessNode {
    serial: u64,
    pub key: NodeKey,
    pub name: String,
    pub own_cpu: f64,
    pub own_memory: u64,
    pub own_gpu: f64,
    /// Own readings plus all descendants'.
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub gpu_percent: f64,
    pub parent_pid: u32,
    /// Structural parent in the current forest.
    pub parent: Option<NodeKey>,
    pub children: ObservableList<NodeKey>,
    pub is_group: bool,
    pub instance_count: usize,
    pub is_pinned: bool,
    pub is_selected: bool,
    pub is_expanded: bool,
}

impl ProcessNode {
    fn new(serial: u64, key: NodeKey, name: String) -> Self {
        Self {
            serial,
            is_group: matches!(key, NodeKey::Group(_)),
            key,
            name,
            own_cpu: 0.0,
            own_memory: 0,
            own_gpu: 0.0,
            cpu_percent: 0.0,
            memory_bytes: 0,
            gpu_percent: 0.0,
            parent_pid: 0,
            parent: None,
            children: ObservableList::new(),
            instance_count: 1,
            is_pinned: false,
            is_selected: false,
            is_expanded: false,
        }
    }

    /// Unique per created node; unchanged for as long as the node lives.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn pid(&self) -> Option<u32> {
        self.key.pid()
    }
}

/// Immutable per-row view of the forest.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRow {
    pub key: NodeKey,
    pub depth: usize,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub gpu_percent: f64,
    pub instance_count: usize,
    pub is_group: bool,
    pub is_pinned: bool,
    pub is_selected: bool,
    pub is_expanded: bool,
    pub has_children: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct SmoothedKeys {
    cpu: f64,
    memory: f64,
    gpu: f64,
}

pub struct ProcessTreeReconciler {
    nodes: HashMap<NodeKey, ProcessNode>,
    roots: ObservableList<NodeKey>,
    visible: ObservableList<NodeKey>,
    top: ObservableList<NodeKey>,
    smoothed: HashMap<NodeKey, SmoothedKeys>,
    selection: Option<NodeKey>,
    sort: SortState,
    last_sort: Option<Instant>,
    force_sort: bool,
    suppress_sort: bool,
    next_serial: u64,
    grouping: bool,
    search: String,
    launcher_names: HashSet<String>,
    launcher_suffixes: Vec<String>,
    bundles: Vec<BundleRule>,
    name_suffix: String,
    top_n: usize,
}

impl ProcessTreeReconciler {
    pub fn new(config: &ProcessConfig) -> Self {
        let mut reconciler = Self {
            nodes: HashMap::new(),
            roots: ObservableList::new(),
            visible: ObservableList::new(),
            top: ObservableList::new(),
            smoothed: HashMap::new(),
            selection: None,
            sort: SortState::default(),
            last_sort: None,
            force_sort: false,
            suppress_sort: false,
            next_serial: 0,
            grouping: config.group_same_names,
            search: String::new(),
            launcher_names: HashSet::new(),
            launcher_suffixes: Vec::new(),
            bundles: Vec::new(),
            name_suffix: String::new(),
            top_n: config.top_n,
        };
        reconciler.apply_config(config);
        reconciler
    }

    /// Pick up live settings. Takes effect on the next reconcile.
    pub fn apply_config(&mut self, config: &ProcessConfig) {
        self.name_suffix = config.name_suffix.to_lowercase();
        self.launcher_names = config
            .launcher_names
            .iter()
            .map(|n| self.base_name(n))
            .collect();
        self.launcher_suffixes = config
            .launcher_suffixes
            .iter()
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self.bundles = config
            .bundles
            .iter()
            .map(|b| BundleRule {
                anchor: self.base_name(&b.anchor),
                helpers: b.helpers.iter().map(|h| self.base_name(h)).collect(),
            })
            .collect();
        self.top_n = config.top_n;
        self.set_grouping(config.group_same_names);
    }

    /// Lowercase name without the configured display suffix.
    fn base_name(&self, name: &str) -> String {
        let lower = name.trim().to_lowercase();
        if !self.name_suffix.is_empty() {
            if let Some(stripped) = lower.strip_suffix(&self.name_suffix) {
                return stripped.to_string();
            }
        }
        lower
    }

    fn is_launcher(&self, name: &str) -> bool {
        let base = self.base_name(name);
        self.launcher_names.contains(&base)
            || self.launcher_suffixes.iter().any(|s| base.ends_with(s.as_str()))
    }

    fn ensure_node(&mut self, key: &NodeKey, name: &str) -> &mut ProcessNode {
        let serial = &mut self.next_serial;
        self.nodes.entry(key.clone()).or_insert_with(|| {
            *serial += 1;
            ProcessNode::new(*serial, key.clone(), name.to_string())
        })
    }

    pub fn reconcile(&mut self, snapshots: &[ProcessSnapshot]) {
        self.reconcile_at(snapshots, Instant::now());
    }

    pub fn reconcile_at(&mut self, snapshots: &[ProcessSnapshot], now: Instant) {
        // Upsert.
        let mut live: HashSet<u32> = HashSet::with_capacity(snapshots.len());
        for snap in snapshots {
            if !live.insert(snap.pid) {
                continue;
            }
            let name = if snap.name.trim().is_empty() {
                format!("pid {}", snap.pid)
            } else {
                snap.name.clone()
            };
            let node = self.ensure_node(&NodeKey::Pid(snap.pid), &name);
            node.name = name;
            node.own_cpu = sanitize_percent(snap.cpu_percent);
            node.own_memory = snap.memory_bytes;
            node.own_gpu = sanitize_percent(snap.gpu_percent);
            node.parent_pid = snap.parent_pid;
            node.instance_count = 1;
        }

        // Prune.
        self.nodes.retain(|key, _| match key {
            NodeKey::Pid(pid) => live.contains(pid),
            _ => true,
        });

        let mut pids: Vec<u32> = live.into_iter().collect();
        pids.sort_unstable();

        // Parent links, skipping launchers.
        let mut edges: HashMap<u32, NodeKey> = HashMap::new();
        for &pid in &pids {
            let ppid = self.nodes[&NodeKey::Pid(pid)].parent_pid;
            if ppid == 0 || ppid == pid {
                continue;
            }
            match self.nodes.get(&NodeKey::Pid(ppid)) {
                Some(parent) if !self.is_launcher(&parent.name) => {
                    edges.insert(pid, NodeKey::Pid(ppid));
                }
                _ => {}
            }
        }

        // Bundles.
        let mut live_synthetic: HashSet<NodeKey> = HashSet::new();
        let bundles = self.bundles.clone();
        for rule in &bundles {
            let helpers: Vec<u32> = pids
                .iter()
                .copied()
                .filter(|p| rule.helpers.contains(&self.base_name(&self.nodes[&NodeKey::Pid(*p)].name)))
                .collect();
            if helpers.is_empty() {
                continue;
            }
            let anchor_pid = pids
                .iter()
                .copied()
                .find(|p| self.base_name(&self.nodes[&NodeKey::Pid(*p)].name) == rule.anchor);
            let anchor = match anchor_pid {
                Some(pid) => NodeKey::Pid(pid),
                None => {
                    let key = NodeKey::Bundle(rule.anchor.clone());
                    let display = format!("{}{}", rule.anchor, self.name_suffix);
                    self.ensure_node(&key, &display);
                    live_synthetic.insert(key.clone());
                    key
                }
            };
            for helper in helpers {
                if Some(helper) != anchor_pid {
                    edges.insert(helper, anchor.clone());
                }
            }
        }

        break_cycles(&mut edges, &pids);

        // Grouping of same-named roots.
        let mut group_of: HashMap<u32, NodeKey> = HashMap::new();
        if self.grouping {
            let mut by_name: BTreeMap<String, Vec<u32>> = BTreeMap::new();
            for &pid in &pids {
                if !edges.contains_key(&pid) {
                    let name = self.nodes[&NodeKey::Pid(pid)].name.to_lowercase();
                    by_name.entry(name).or_default().push(pid);
                }
            }
            for (name, members) in by_name {
                if members.len() < 2 {
                    continue;
                }
                let key = NodeKey::Group(name);
                let display = self.nodes[&NodeKey::Pid(members[0])].name.clone();
                let group = self.ensure_node(&key, &display);
                group.name = display;
                group.instance_count = members.len();
                live_synthetic.insert(key.clone());
                for pid in members {
                    group_of.insert(pid, key.clone());
                }
            }
        }

        // Drop synthetic nodes no longer needed.
        self.nodes.retain(|key, _| key.pid().is_some() || live_synthetic.contains(key));
        if let Some(selected) = &self.selection {
            if !self.nodes.contains_key(selected) {
                self.selection = None;
            }
        }
        let nodes = &self.nodes;
        self.smoothed.retain(|key, _| nodes.contains_key(key));

        // Structure.
        let mut children: HashMap<NodeKey, Vec<NodeKey>> = HashMap::new();
        let mut roots: Vec<NodeKey> = Vec::new();
        for &pid in &pids {
            let key = NodeKey::Pid(pid);
            let parent = edges.remove(&pid).or_else(|| group_of.get(&pid).cloned());
            match &parent {
                Some(p) => children.entry(p.clone()).or_default().push(key.clone()),
                None => roots.push(key.clone()),
            }
            if let Some(node) = self.nodes.get_mut(&key) {
                node.parent = parent;
            }
        }
        let mut synthetic: Vec<NodeKey> = live_synthetic.into_iter().collect();
        synthetic.sort();
        for key in synthetic {
            if let Some(node) = self.nodes.get_mut(&key) {
                node.parent = None;
                node.own_cpu = 0.0;
                node.own_memory = 0;
                node.own_gpu = 0.0;
            }
            roots.push(key);
        }

        for root in &roots {
            aggregate(&mut self.nodes, &children, root);
        }

        self.update_smoothing();
        let selection = self.selection.clone();
        for (key, node) in self.nodes.iter_mut() {
            node.is_selected = selection.as_ref() == Some(key);
        }

        let sorting = self.force_sort
            || match self.last_sort {
                None => true,
                Some(at) => !self.suppress_sort && now.saturating_duration_since(at) >= SORT_THROTTLE,
            };
        let pinned = self.pinned_closure();

        let desired_roots = self.order(self.roots.as_slice(), roots, sorting, &pinned);
        let mut desired_children: HashMap<NodeKey, Vec<NodeKey>> = HashMap::new();
        for (parent, kids) in children {
            let prior = self
                .nodes
                .get(&parent)
                .map(|n| n.children.as_slice().to_vec())
                .unwrap_or_default();
            let ordered = self.order(&prior, kids, sorting, &pinned);
            desired_children.insert(parent, ordered);
        }
        let desired_top = self.top_order(&desired_roots, sorting);

        self.roots.apply(&desired_roots);
        for (key, node) in self.nodes.iter_mut() {
            let desired = desired_children.remove(key).unwrap_or_default();
            node.children.apply(&desired);
        }
        self.top.apply(&desired_top);
        self.refresh_visible();

        if sorting {
            self.last_sort = Some(now);
            self.force_sort = false;
        }
    }

    fn update_smoothing(&mut self) {
        for (key, node) in &self.nodes {
            let current = SmoothedKeys {
                cpu: node.cpu_percent,
                memory: node.memory_bytes as f64,
                gpu: node.gpu_percent,
            };
            self.smoothed
                .entry(key.clone())
                .and_modify(|s| {
                    s.cpu = ema(s.cpu, current.cpu, SMOOTHING_ALPHA);
                    s.memory = ema(s.memory, current.memory, SMOOTHING_ALPHA);
                    s.gpu = ema(s.gpu, current.gpu, SMOOTHING_ALPHA);
                })
                .or_insert(current);
        }
    }

    /// Pinned nodes plus every ancestor of a pinned node.
    fn pinned_closure(&self) -> HashSet<NodeKey> {
        let mut out = HashSet::new();
        for node in self.nodes.values().filter(|n| n.is_pinned) {
            let mut current = Some(node.key.clone());
            while let Some(key) = current {
                if !out.insert(key.clone()) {
                    break;
                }
                current = self.nodes.get(&key).and_then(|n| n.parent.clone());
            }
        }
        out
    }

    fn smoothed_value(&self, key: &NodeKey, column: SortColumn) -> f64 {
        let s = self.smoothed.get(key).copied().unwrap_or_default();
        match column {
            SortColumn::Cpu => s.cpu,
            SortColumn::Memory => s.memory,
            SortColumn::Gpu => s.gpu,
            SortColumn::Name => 0.0,
        }
    }

    fn compare(&self, a: &NodeKey, b: &NodeKey, pinned: &HashSet<NodeKey>) -> Ordering {
        pinned.contains(b).cmp(&pinned.contains(a)).then_with(|| {
            let ord = match self.sort.column {
                SortColumn::Name => {
                    let name = |k: &NodeKey| {
                        self.nodes
                            .get(k)
                            .map(|n| n.name.to_lowercase())
                            .unwrap_or_default()
                    };
                    name(a).cmp(&name(b))
                }
                column => self
                    .smoothed_value(a, column)
                    .total_cmp(&self.smoothed_value(b, column)),
            };
            if self.sort.descending {
                ord.reverse()
            } else {
                ord
            }
        })
    }

    /// Prior order first (new members appended in key order), then a stable
    /// sort when this tick sorts, so equal keys keep their prior positions.
    fn order(
        &self,
        prior: &[NodeKey],
        mut members: Vec<NodeKey>,
        sorting: bool,
        pinned: &HashSet<NodeKey>,
    ) -> Vec<NodeKey> {
        let index: HashMap<&NodeKey, usize> = prior.iter().enumerate().map(|(i, k)| (k, i)).collect();
        members.sort_by(|a, b| {
            let ia = index.get(a).copied().unwrap_or(usize::MAX);
            let ib = index.get(b).copied().unwrap_or(usize::MAX);
            ia.cmp(&ib).then_with(|| a.cmp(b))
        });
        if sorting {
            members.sort_by(|a, b| self.compare(a, b, pinned));
        }
        members
    }

    /// Busiest roots by smoothed CPU. Between sorts the previous ranking is
    /// kept, minus roots that disappeared.
    fn top_order(&self, roots: &[NodeKey], sorting: bool) -> Vec<NodeKey> {
        if !sorting {
            let live: HashSet<&NodeKey> = roots.iter().collect();
            return self.top.iter().filter(|k| live.contains(k)).cloned().collect();
        }
        let mut ranked = roots.to_vec();
        ranked.sort_by(|a, b| {
            self.smoothed_value(b, SortColumn::Cpu)
                .total_cmp(&self.smoothed_value(a, SortColumn::Cpu))
        });
        ranked.truncate(self.top_n);
        ranked
    }

    fn matches_search(&self, key: &NodeKey, query: &str) -> bool {
        let Some(node) = self.nodes.get(key) else {
            return false;
        };
        node.name.to_lowercase().contains(query)
            || node.children.iter().any(|child| {
                self.nodes
                    .get(child)
                    .is_some_and(|c| c.name.to_lowercase().contains(query))
            })
    }

    fn refresh_visible(&mut self) {
        let query = self.search.trim().to_lowercase();
        let desired: Vec<NodeKey> = if query.is_empty() {
            self.roots.as_slice().to_vec()
        } else {
            self.roots
                .iter()
                .filter(|k| self.matches_search(k, &query))
                .cloned()
                .collect()
        };
        self.visible.apply(&desired);
    }

    pub fn node(&self, key: &NodeKey) -> Option<&ProcessNode> {
        self.nodes.get(key)
    }

    pub fn node_for_pid(&self, pid: u32) -> Option<&ProcessNode> {
        self.nodes.get(&NodeKey::Pid(pid))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeKey] {
        self.roots.as_slice()
    }

    /// Roots matching the search query.
    pub fn visible(&self) -> &[NodeKey] {
        self.visible.as_slice()
    }

    pub fn top(&self) -> &[NodeKey] {
        self.top.as_slice()
    }

    pub fn children_of(&self, key: &NodeKey) -> &[NodeKey] {
        self.nodes.get(key).map_or(&[], |n| n.children.as_slice())
    }

    pub fn selection(&self) -> Option<&NodeKey> {
        self.selection.as_ref()
    }

    pub fn sort_state(&self) -> SortState {
        self.sort
    }

    pub fn grouping(&self) -> bool {
        self.grouping
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    /// Pids a row stands for: itself, or every member of a group or bundle.
    pub fn member_pids(&self, key: &NodeKey) -> Vec<u32> {
        match key {
            NodeKey::Pid(pid) => vec![*pid],
            _ => self.children_of(key).iter().filter_map(NodeKey::pid).collect(),
        }
    }

    pub fn mutation_stats(&self) -> MutationStats {
        self.nodes
            .values()
            .map(|n| n.children.stats())
            .fold(self.roots.stats() + self.visible.stats() + self.top.stats(), |acc, s| acc + s)
    }

    pub fn reset_mutation_stats(&mut self) {
        self.roots.reset_stats();
        self.visible.reset_stats();
        self.top.reset_stats();
        for node in self.nodes.values_mut() {
            node.children.reset_stats();
        }
    }

    pub fn select(&mut self, key: Option<NodeKey>) {
        let key = key.filter(|k| self.nodes.contains_key(k));
        for (k, node) in self.nodes.iter_mut() {
            node.is_selected = key.as_ref() == Some(k);
        }
        self.selection = key;
    }

    pub fn toggle_selection(&mut self, key: &NodeKey) {
        if self.selection.as_ref() == Some(key) {
            self.select(None);
        } else {
            self.select(Some(key.clone()));
        }
    }

    /// Returns the new pinned state. Forces a sort on the next reconcile.
    pub fn toggle_pin(&mut self, key: &NodeKey) -> bool {
        let Some(node) = self.nodes.get_mut(key) else {
            return false;
        };
        node.is_pinned = !node.is_pinned;
        self.force_sort = true;
        node.is_pinned
    }

    pub fn toggle_expanded(&mut self, key: &NodeKey) -> bool {
        match self.nodes.get_mut(key) {
            Some(node) => {
                node.is_expanded = !node.is_expanded;
                node.is_expanded
            }
            None => false,
        }
    }

    /// Same column flips direction; a new column starts descending for
    /// numbers and ascending for names.
    pub fn set_sort(&mut self, column: SortColumn) {
        if self.sort.column == column {
            self.sort.descending = !self.sort.descending;
        } else {
            self.sort = SortState {
                column,
                descending: column.default_descending(),
            };
        }
        self.force_sort = true;
    }

    pub fn set_sort_state(&mut self, sort: SortState) {
        self.sort = sort;
        self.force_sort = true;
    }

    pub fn set_grouping(&mut self, enabled: bool) {
        if self.grouping != enabled {
            self.grouping = enabled;
            self.force_sort = true;
        }
    }

    /// Filter roots by name. Changing the query clears the selection.
    pub fn set_search(&mut self, query: &str) {
        if self.search == query {
            return;
        }
        self.search = query.to_string();
        self.select(None);
        self.refresh_visible();
    }

    /// Defer throttled sorts while the user is interacting with the list.
    pub fn set_suppress_sort(&mut self, suppress: bool) {
        self.suppress_sort = suppress;
    }

    /// Visible rows, descending into expanded nodes (or every node when
    /// `expand_all`).
    pub fn rows(&self, expand_all: bool) -> Vec<ProcessRow> {
        let mut out = Vec::new();
        for key in self.visible.iter() {
            self.push_rows(key, 0, expand_all, &mut out);
        }
        out
    }

    /// Copy one node into a view row.
    pub fn row(&self, key: &NodeKey, depth: usize) -> Option<ProcessRow> {
        let node = self.nodes.get(key)?;
        Some(ProcessRow {
            key: key.clone(),
            depth,
            name: node.name.clone(),
            cpu_percent: node.cpu_percent,
            memory_bytes: node.memory_bytes,
            gpu_percent: node.gpu_percent,
            instance_count: node.instance_count,
            is_group: node.is_group,
            is_pinned: node.is_pinned,
            is_selected: node.is_selected,
            is_expanded: node.is_expanded,
            has_children: !node.children.is_empty(),
        })
    }

    fn push_rows(&self, key: &NodeKey, depth: usize, expand_all: bool, out: &mut Vec<ProcessRow>) {
        let Some(row) = self.row(key, depth) else {
            return;
        };
        out.push(row);
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        if expand_all || node.is_expanded {
            for child in node.children.iter() {
                self.push_rows(child, depth + 1, expand_all, out);
            }
        }
    }
}

/// Cut the edge that closes any parent cycle. Each cycle is cut at its
/// lowest pid.
fn break_cycles(edges: &mut HashMap<u32, NodeKey>, order: &[u32]) {
    for &start in order {
        let mut seen = HashSet::from([start]);
        let mut current = start;
        while let Some(NodeKey::Pid(next)) = edges.get(&current) {
            let next = *next;
            if next == start {
                tracing::trace!(pid = start, "breaking parent cycle");
                edges.remove(&start);
                break;
            }
            if !seen.insert(next) {
                break;
            }
            current = next;
        }
    }
}

/// Post-order sum of own readings into every ancestor.
fn aggregate(
    nodes: &mut HashMap<NodeKey, ProcessNode>,
    children: &HashMap<NodeKey, Vec<NodeKey>>,
    key: &NodeKey,
) -> (f64, u64, f64) {
    let (mut cpu, mut memory, mut gpu) = nodes
        .get(key)
        .map(|n| (n.own_cpu, n.own_memory, n.own_gpu))
        .unwrap_or_default();
    if let Some(kids) = children.get(key) {
        for kid in kids {
            let (c, m, g) = aggregate(nodes, children, kid);
            cpu += c;
            memory = memory.saturating_add(m);
            gpu += g;
        }
    }
    let cpu = sanitize_percent(cpu);
    let gpu = sanitize_percent(gpu);
    if let Some(node) = nodes.get_mut(key) {
        node.cpu_percent = cpu;
        node.memory_bytes = memory;
        node.gpu_percent = gpu;
    }
    (cpu, memory, gpu)
}
