//! # Streaming Module Graph (C10)
//!
//! Nodes are polymorphic wiring points — `Source`, `Pipe`, `Sink`,
//! `Demux`, `Decap` — linked into parent/child trees that fan TS packets
//! out to every child in insertion order. This mirrors the original
//! `module_stream_t`: a node owns its child list (not the children
//! themselves), an optional TS callback, and an optional per-PID
//! reference-count vector whose 0↔1 transitions call the parent's
//! join/leave hooks.
//!
//! Nodes live in an arena (`Vec<Option<NodeSlot>>`) addressed by
//! [`NodeId`] rather than as an `Rc<RefCell<_>>` graph, so a callback can
//! hold `&mut Graph` and freely detach or destroy nodes — including
//! itself — without fighting the borrow checker over shared ownership
//! cycles parent/child links would otherwise require.

use std::collections::HashSet;

use log::error;

use crate::utils::CursorList;

const MAX_PID: usize = 8192;

/// What role a node plays in the graph. Carried for diagnostics; the
/// wiring contract (attach/detach/send/demux) is identical across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Produces TS packets (e.g. a socket or file reader).
    Source,
    /// Transforms packets in place (e.g. a PES engine).
    Pipe,
    /// Terminal consumer (e.g. a sync buffer or child process).
    Sink,
    /// Splits traffic by PID membership.
    Demux,
    /// De-encapsulates an inner stream (e.g. T2-MI).
    Decap,
}

/// A stable handle to a node in a [`Graph`]. Carries a generation so a
/// handle to a destroyed (and slot-reused) node is detected rather than
/// silently addressing the wrong node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

type TsCallback = Box<dyn FnMut(&mut Graph, NodeId, &[u8]) + Send>;
type PidHook = Box<dyn FnMut(&mut Graph, u16) + Send>;

struct NodeSlot {
    kind: NodeKind,
    generation: u32,
    parent: Option<NodeId>,
    children: CursorList<NodeId>,
    on_ts: Option<TsCallback>,
    pid_counts: Option<Box<[u16; MAX_PID]>>,
    join_pid: Option<PidHook>,
    leave_pid: Option<PidHook>,
}

impl NodeSlot {
    fn new(kind: NodeKind, generation: u32) -> Self {
        Self {
            kind,
            generation,
            parent: None,
            children: CursorList::new(),
            on_ts: None,
            pid_counts: None,
            join_pid: None,
            leave_pid: None,
        }
    }
}

/// The streaming module graph: an arena of nodes linked into parent/child
/// trees with PID-demux reference counting.
#[derive(Default)]
pub struct Graph {
    slots: Vec<Option<NodeSlot>>,
    free: Vec<u32>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new, unattached node of the given kind.
    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        if let Some(index) = self.free.pop() {
            let generation = self.slots[index as usize]
                .as_ref()
                .map(|s| s.generation)
                .unwrap_or(0)
                .wrapping_add(1);
            self.slots[index as usize] = Some(NodeSlot::new(kind, generation));
            NodeId { index, generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(NodeSlot::new(kind, 0)));
            NodeId { index, generation: 0 }
        }
    }

    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.slots
            .get(id.index as usize)
            .and_then(|s| s.as_ref())
            .filter(|s| s.generation == id.generation)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.slots
            .get_mut(id.index as usize)
            .and_then(|s| s.as_mut())
            .filter(|s| s.generation == id.generation)
    }

    /// Whether `id` still addresses a live node.
    pub fn is_valid(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    /// The kind of a node, if it still exists.
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.slot(id).map(|s| s.kind)
    }

    /// The parent of a node, if it has one.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|s| s.parent)
    }

    /// Registers the TS callback a node runs when its parent sends it a
    /// packet.
    pub fn set_on_ts(&mut self, id: NodeId, callback: impl FnMut(&mut Graph, NodeId, &[u8]) + Send + 'static) {
        if let Some(slot) = self.slot_mut(id) {
            slot.on_ts = Some(Box::new(callback));
        }
    }

    /// Enables PID-demux reference counting on a node and registers the
    /// hooks its parent's 0↔1 transitions invoke.
    pub fn set_demux(
        &mut self,
        id: NodeId,
        join_pid: impl FnMut(&mut Graph, u16) + Send + 'static,
        leave_pid: impl FnMut(&mut Graph, u16) + Send + 'static,
    ) {
        if let Some(slot) = self.slot_mut(id) {
            slot.pid_counts = Some(Box::new([0u16; MAX_PID]));
            slot.join_pid = Some(Box::new(join_pid));
            slot.leave_pid = Some(Box::new(leave_pid));
        }
    }

    /// Inserts `child` into `parent`'s ordered child list, detaching it
    /// from any previous parent first.
    pub fn attach(&mut self, child: NodeId, parent: NodeId) {
        self.detach(child);

        if let Some(slot) = self.slot_mut(parent) {
            slot.children.insert_tail(child);
        }
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = Some(parent);
        }
    }

    /// Removes `child` from its parent's child list and clears its
    /// back-reference. A no-op (idempotent) if `child` has no parent.
    pub fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.slot(child).and_then(|s| s.parent) else {
            return;
        };

        if let Some(slot) = self.slot_mut(parent) {
            slot.children.remove_item(&child);
        }
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = None;
        }
    }

    /// Invokes the TS callback of every child of `node`, in insertion
    /// order. Children may attach, detach, or destroy themselves (or
    /// siblings) during their callback; iteration runs over a snapshot of
    /// the child list taken before the first callback fires, and each
    /// child's continued existence is re-checked just before it runs.
    pub fn send(&mut self, node: NodeId, ts: &[u8]) {
        let Some(children) = self.slot(node).map(|s| s.children.iter().copied().collect::<Vec<_>>()) else {
            return;
        };

        for child in children {
            let Some(mut callback) = self.slot_mut(child).and_then(|s| s.on_ts.take()) else {
                continue;
            };

            callback(self, child, ts);

            if let Some(slot) = self.slot_mut(child) {
                slot.on_ts = Some(callback);
            }
        }
    }

    /// Joins `pid` on `node`. On a 0→1 transition, calls the parent's
    /// `join_pid` hook, if both exist.
    pub fn demux_join(&mut self, node: NodeId, pid: u16) {
        let pid = pid as usize % MAX_PID;

        let became_active = match self.slot_mut(node).and_then(|s| s.pid_counts.as_mut()) {
            Some(counts) => {
                counts[pid] += 1;
                counts[pid] == 1
            }
            None => return,
        };

        if !became_active {
            return;
        }

        self.call_parent_hook(node, pid as u16, true);
    }

    /// Leaves `pid` on `node`. On a 1→0 transition, calls the parent's
    /// `leave_pid` hook. A leave with no matching join is logged and
    /// otherwise ignored (no underflow).
    pub fn demux_leave(&mut self, node: NodeId, pid: u16) {
        let pid_idx = pid as usize % MAX_PID;

        let became_inactive = match self.slot_mut(node).and_then(|s| s.pid_counts.as_mut()) {
            Some(counts) if counts[pid_idx] > 0 => {
                counts[pid_idx] -= 1;
                counts[pid_idx] == 0
            }
            Some(_) => {
                error!("demux_leave: double leave of pid {} with no matching join", pid);
                return;
            }
            None => return,
        };

        if !became_inactive {
            return;
        }

        self.call_parent_hook(node, pid, false);
    }

    fn call_parent_hook(&mut self, node: NodeId, pid: u16, join: bool) {
        let Some(parent) = self.slot(node).and_then(|s| s.parent) else {
            return;
        };

        let hook = self.slot_mut(parent).and_then(|s| {
            if join {
                s.join_pid.take()
            } else {
                s.leave_pid.take()
            }
        });

        let Some(mut hook) = hook else {
            return;
        };

        hook(self, pid);

        if let Some(slot) = self.slot_mut(parent) {
            if join {
                slot.join_pid = Some(hook);
            } else {
                slot.leave_pid = Some(hook);
            }
        }
    }

    /// Destroys a node: leaves every PID it had joined, detaches from its
    /// parent, clears its children's back-references (they become
    /// orphans, not destroyed themselves), and frees the slot for reuse.
    pub fn destroy(&mut self, id: NodeId) {
        if let Some(pids) = self.slot(id).and_then(|s| s.pid_counts.as_ref()) {
            let active: Vec<u16> = pids
                .iter()
                .enumerate()
                .filter(|&(_, &count)| count > 0)
                .map(|(pid, _)| pid as u16)
                .collect();
            for pid in active {
                self.demux_leave(id, pid);
            }
        }

        self.detach(id);

        if let Some(children) = self.slot(id).map(|s| s.children.iter().copied().collect::<Vec<_>>()) {
            for child in children {
                if let Some(slot) = self.slot_mut(child) {
                    slot.parent = None;
                }
            }
        }

        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            *slot = None;
        }
        self.free.push(id.index);
    }

    /// Number of live nodes. Intended for tests and diagnostics, not a
    /// hot-path query.
    pub fn live_count(&self) -> usize {
        let indices: HashSet<u32> = self.free.iter().copied().collect();
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, s)| s.is_some() && !indices.contains(&(*i as u32)))
            .count()
    }
}
