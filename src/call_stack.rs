//! Call-tree reconstruction from call/return events
//!
//! One LIFO stack per correlation id. A `call` becomes a child of the node on
//! top of its stack, or a new root when the stack is empty; the matching
//! `return` pops it and fixes its duration. Roots across all correlation ids
//! are capped, and evicting a root frees its whole subtree.
//!
//! Nodes live in an id-keyed arena owned by the reconstructor. Callers only
//! ever see owned [`CallTraceNode`] snapshots.
//!
//! Stacks themselves are bounded too. Frames stop at the depth cap (deeper
//! calls are only counted), the number of live stacks is capped with the
//! least recently called stack dropped first, and [`CallStackReconstructor::sweep`]
//! drops stacks that have seen no call for the stale age.

use crate::event::{function_key, EventType, TraceEvent};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

type NodeId = u64;

/// Owned snapshot of one call and its callees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallTraceNode {
    pub call_id: String,
    pub module: String,
    pub function: String,
    pub file: String,
    pub line: u32,
    pub timestamp: f64,
    /// Seconds; `None` until the matching return arrives
    pub duration: Option<f64>,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    pub children: Vec<CallTraceNode>,
}

impl CallTraceNode {
    pub fn function_key(&self) -> String {
        function_key(&self.module, &self.function)
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.duration.map(|d| d * 1000.0)
    }

    /// Number of nodes in this subtree, including self
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(CallTraceNode::subtree_size).sum::<usize>()
    }

    /// Depth-first search for a call id
    pub fn find(&self, call_id: &str) -> Option<&CallTraceNode> {
        if self.call_id == call_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(call_id))
    }
}

/// Root invocations of one entry-point function, with their collected children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPointGroup {
    pub entry_point: String,
    pub invocations: Vec<CallTraceNode>,
    pub completed: usize,
    /// Seconds, summed over completed invocations
    pub total_duration: f64,
}

impl EntryPointGroup {
    pub fn average_duration(&self) -> Option<f64> {
        (self.completed > 0).then(|| self.total_duration / self.completed as f64)
    }
}

/// What a return event did to its stack
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnOutcome {
    /// Popped the matching frame; carries the node duration when the node is
    /// still retained
    Matched { duration: Option<f64>, unwound: usize },
    /// Closed a call that was past the depth cap
    DepthLimited,
    /// No frame with this call id on the stack
    Unmatched,
}

/// Counters for irregular call/return sequences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StackStats {
    /// Returns with no matching frame
    pub mismatched_returns: u64,
    /// Frames discarded because a deeper return arrived first
    pub orphaned_frames: u64,
    /// Roots dropped by the retention cap
    pub evicted_roots: u64,
    /// Calls past the depth cap (aggregated, not in trees)
    pub depth_limited_calls: u64,
    /// Stacks dropped by the live-stack cap
    pub evicted_stacks: u64,
    /// Stacks dropped by a sweep after going quiet
    pub stale_stacks: u64,
}

#[derive(Debug)]
struct NodeData {
    call_id: String,
    module: String,
    function: String,
    file: String,
    line: u32,
    timestamp: f64,
    duration: Option<f64>,
    correlation_id: String,
    exception: Option<String>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Frame {
    call_id: String,
    /// None for frames not materialized in a tree
    node: Option<NodeId>,
}

#[derive(Debug, Default)]
struct Stack {
    frames: Vec<Frame>,
    /// Calls past the depth cap still waiting for their return
    overflow: usize,
    /// Event time of the newest call
    last_call: f64,
    /// Matches the newest entry for this stack in the activity queue
    touch: u64,
}

/// Per-correlation call stacks plus the retained call trees
#[derive(Debug)]
pub struct CallStackReconstructor {
    nodes: HashMap<NodeId, NodeData>,
    next_id: NodeId,
    stacks: HashMap<String, Stack>,
    /// `(stack key, touch)` in call order; entries with an old touch are stale
    activity: VecDeque<(String, u64)>,
    next_touch: u64,
    roots: VecDeque<NodeId>,
    max_roots: usize,
    max_depth: usize,
    max_stacks: usize,
    stale_after_secs: f64,
    stats: StackStats,
}

impl CallStackReconstructor {
    pub fn new(max_roots: usize, max_depth: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
            stacks: HashMap::new(),
            activity: VecDeque::new(),
            next_touch: 0,
            roots: VecDeque::new(),
            max_roots: max_roots.max(1),
            max_depth: max_depth.max(1),
            max_stacks: 10_000,
            stale_after_secs: f64::INFINITY,
            stats: StackStats::default(),
        }
    }

    /// Cap on live correlation stacks
    pub fn with_max_stacks(mut self, max_stacks: usize) -> Self {
        self.max_stacks = max_stacks.max(1);
        self
    }

    /// Stacks with no call for this long (event time) are dropped by `sweep`
    pub fn with_stale_after(mut self, secs: f64) -> Self {
        self.stale_after_secs = secs;
        self
    }

    /// Push a call onto its correlation stack
    pub fn on_call(&mut self, event: &TraceEvent) {
        let key = event.stack_key().to_string();
        if !self.stacks.contains_key(&key) {
            self.make_room_for_stack();
        }
        self.compact_activity();

        let touch = self.next_touch;
        self.next_touch += 1;
        self.activity.push_back((key.clone(), touch));
        let stack = self.stacks.entry(key.clone()).or_default();
        stack.touch = touch;
        stack.last_call = event.timestamp;

        if stack.frames.len() >= self.max_depth {
            self.stats.depth_limited_calls += 1;
            stack.overflow += 1;
            return;
        }

        let parent = match stack.frames.last().map(|f| f.node) {
            None => None,
            Some(Some(id)) if self.nodes.contains_key(&id) => Some(id),
            // Parent is untracked or was evicted: keep the frame for matching only
            Some(_) => {
                stack.frames.push(Frame {
                    call_id: event.call_id.clone(),
                    node: None,
                });
                return;
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        stack.frames.push(Frame {
            call_id: event.call_id.clone(),
            node: Some(id),
        });
        self.nodes.insert(
            id,
            NodeData {
                call_id: event.call_id.clone(),
                module: event.module.clone(),
                function: event.function.clone(),
                file: event.file.clone(),
                line: event.line,
                timestamp: event.timestamp,
                duration: None,
                correlation_id: key,
                exception: None,
                children: Vec::new(),
            },
        );

        match parent {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.push(id);
                }
            }
            None => {
                self.roots.push_back(id);
                while self.roots.len() > self.max_roots {
                    if let Some(oldest) = self.roots.pop_front() {
                        self.remove_subtree(oldest);
                        self.stats.evicted_roots += 1;
                    }
                }
            }
        }
    }

    /// Pop the frame matching a return (or exception) event
    ///
    /// A return whose call id sits below the top of the stack unwinds the
    /// frames above it, since their returns were lost. A return matching no
    /// frame is counted and otherwise ignored. An empty call id matches the
    /// top frame. While calls past the depth cap are open, returns close those
    /// first unless they name the top frame.
    pub fn on_return(&mut self, event: &TraceEvent) -> ReturnOutcome {
        let key = event.stack_key();
        let Some(stack) = self.stacks.get_mut(key) else {
            self.stats.mismatched_returns += 1;
            return ReturnOutcome::Unmatched;
        };

        if stack.overflow > 0 {
            let names_top = !event.call_id.is_empty()
                && stack.frames.last().is_some_and(|f| f.call_id == event.call_id);
            if !names_top {
                stack.overflow -= 1;
                if stack.overflow == 0 && stack.frames.is_empty() {
                    self.stacks.remove(key);
                }
                return ReturnOutcome::DepthLimited;
            }
            // The capped calls above the top frame lost their returns
            self.stats.orphaned_frames += stack.overflow as u64;
            stack.overflow = 0;
        }

        let position = if event.call_id.is_empty() {
            stack.frames.len().checked_sub(1)
        } else {
            stack.frames.iter().rposition(|f| f.call_id == event.call_id)
        };
        let Some(position) = position else {
            self.stats.mismatched_returns += 1;
            return ReturnOutcome::Unmatched;
        };

        let unwound = stack.frames.len() - position - 1;
        stack.frames.truncate(position + 1);
        let frame = stack.frames.pop();
        if stack.frames.is_empty() {
            self.stacks.remove(key);
        }
        self.stats.orphaned_frames += unwound as u64;

        let duration = frame
            .and_then(|f| f.node)
            .and_then(|id| self.nodes.get_mut(&id))
            .map(|node| {
                let duration = (event.timestamp - node.timestamp).max(0.0);
                node.duration = Some(duration);
                if event.event_type == EventType::Exception {
                    node.exception = Some(event.exception.clone().unwrap_or_default());
                }
                duration
            });

        ReturnOutcome::Matched { duration, unwound }
    }

    /// Retained root trees, oldest first
    pub fn roots(&self) -> Vec<CallTraceNode> {
        self.roots.iter().filter_map(|id| self.snapshot(*id)).collect()
    }

    /// Root trees for one correlation id, oldest first
    pub fn roots_for(&self, correlation_id: &str) -> Vec<CallTraceNode> {
        self.roots
            .iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| n.correlation_id == correlation_id)
            })
            .filter_map(|id| self.snapshot(*id))
            .collect()
    }

    /// Group retained roots by entry-point function
    ///
    /// Read-only re-projection of the collected trees: groups appear in order
    /// of their first invocation, invocations in arrival order.
    pub fn full_stack_view(&self) -> Vec<EntryPointGroup> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, EntryPointGroup> = HashMap::new();

        for root in self.roots() {
            let key = root.function_key();
            let group = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                EntryPointGroup {
                    entry_point: key,
                    invocations: Vec::new(),
                    completed: 0,
                    total_duration: 0.0,
                }
            });
            if let Some(d) = root.duration {
                group.completed += 1;
                group.total_duration += d;
            }
            group.invocations.push(root);
        }

        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .collect()
    }

    /// Drop stacks whose newest call is older than the stale age at `now`
    ///
    /// Returns how many stacks were dropped. Their frames belong to calls
    /// whose returns will not arrive; late returns count as mismatched.
    pub fn sweep(&mut self, now: f64) -> usize {
        let mut swept = 0;
        while let Some((key, touch)) = self.activity.front().cloned() {
            let stale = self
                .stacks
                .get(&key)
                .filter(|s| s.touch == touch)
                .map(|s| now - s.last_call > self.stale_after_secs);
            match stale {
                Some(false) => break,
                Some(true) => {
                    self.stacks.remove(&key);
                    swept += 1;
                }
                None => {}
            }
            self.activity.pop_front();
        }
        self.stats.stale_stacks += swept as u64;
        swept
    }

    /// Frames held for a correlation stack (never more than the depth cap)
    pub fn depth(&self, correlation_id: &str) -> usize {
        self.stacks.get(correlation_id).map_or(0, |s| s.frames.len())
    }

    pub fn active_stacks(&self) -> usize {
        self.stacks.len()
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn stats(&self) -> StackStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.stacks.clear();
        self.activity.clear();
        self.roots.clear();
        self.stats = StackStats::default();
    }

    fn snapshot(&self, id: NodeId) -> Option<CallTraceNode> {
        let node = self.nodes.get(&id)?;
        Some(CallTraceNode {
            call_id: node.call_id.clone(),
            module: node.module.clone(),
            function: node.function.clone(),
            file: node.file.clone(),
            line: node.line,
            timestamp: node.timestamp,
            duration: node.duration,
            correlation_id: node.correlation_id.clone(),
            exception: node.exception.clone(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        })
    }

    /// Evict least recently called stacks until a new one fits
    fn make_room_for_stack(&mut self) {
        while self.stacks.len() >= self.max_stacks {
            let Some((key, touch)) = self.activity.pop_front() else {
                break;
            };
            if self.stacks.get(&key).is_some_and(|s| s.touch == touch) {
                self.stacks.remove(&key);
                self.stats.evicted_stacks += 1;
            }
        }
    }

    /// Drop stale activity entries once they outnumber live stacks
    fn compact_activity(&mut self) {
        if self.activity.len() > 2 * self.stacks.len() + 64 {
            let stacks = &self.stacks;
            self.activity
                .retain(|(key, touch)| stacks.get(key).is_some_and(|s| s.touch == *touch));
        }
    }

    fn remove_subtree(&mut self, root: NodeId) {
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                pending.extend(node.children);
            }
        }
    }
}
