//! Basic blocks and the control-flow graph arena.
//!
//! Blocks live in an arena whose lifetime dominates the analysis; every
//! cross-reference between blocks is an arena index, never a pointer.
//! The edge-surgery operations the lifting passes need are small methods
//! here so the invariant maintenance stays in one place:
//!
//! - every edge `b -> b'` has exactly one matching entry in `b'.in_edges`;
//! - `in_edges` arrays are densely packed;
//! - a block flagged invalid is logically removed and no live block may
//!   reference it.

use bitflags::bitflags;
use serde::Serialize;

/// Arena index of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BbId(pub usize);

/// Which out-edge of a two-way block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSide {
    /// Fall-through side.
    Then,
    /// Jump-target side.
    Else,
}

impl EdgeSide {
    fn index(self) -> usize {
        match self {
            Self::Then => 0,
            Self::Else => 1,
        }
    }
}

/// Basic-block classification by terminating instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Unconditional branch.
    OneBranch,
    /// Conditional branch.
    TwoBranch,
    /// Falls into the next block.
    FallThrough,
    /// Procedure return.
    Return,
    /// Ends in a call.
    Call,
    /// Program termination.
    Terminate,
}

bitflags! {
    /// Basic-block flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BbFlags: u32 {
        /// The block has been removed by a rewrite.
        const INVALID = 1;
    }
}

/// One basic block.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Index of the first icode.
    pub start: usize,
    /// Number of icodes.
    pub length: usize,
    /// Classification.
    pub node_type: NodeType,
    /// Out-edges, indexed by [`EdgeSide`].
    pub out_edges: [Option<BbId>; 2],
    /// Predecessor blocks, densely packed.
    pub in_edges: Vec<BbId>,
    /// Flag word.
    pub flags: BbFlags,
}

impl BasicBlock {
    /// Whether the block has been removed.
    pub fn is_invalid(&self) -> bool {
        self.flags.contains(BbFlags::INVALID)
    }
}

/// The basic-block arena.
#[derive(Debug, Clone, Default)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
}

impl Cfg {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block covering `length` icodes from `start`.
    pub fn add_block(&mut self, start: usize, length: usize, node_type: NodeType) -> BbId {
        self.blocks.push(BasicBlock {
            start,
            length,
            node_type,
            out_edges: [None, None],
            in_edges: Vec::new(),
            flags: BbFlags::empty(),
        });
        BbId(self.blocks.len() - 1)
    }

    /// Number of blocks in the arena, including removed ones.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block by id.
    pub fn block(&self, id: BbId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    /// Mutable block by id.
    pub fn block_mut(&mut self, id: BbId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    /// The out-edge target on the given side.
    pub fn out_edge(&self, id: BbId, side: EdgeSide) -> Option<BbId> {
        self.blocks[id.0].out_edges[side.index()]
    }

    /// Redirect an out-edge. The in-edge bookkeeping of the old and new
    /// targets is the caller's responsibility.
    pub fn set_out_edge(&mut self, id: BbId, side: EdgeSide, target: BbId) {
        self.blocks[id.0].out_edges[side.index()] = Some(target);
    }

    /// Wire `from -> to` on `side`, maintaining `to`'s in-edges.
    pub fn link(&mut self, from: BbId, side: EdgeSide, to: BbId) {
        self.set_out_edge(from, side, to);
        self.push_in_edge(to, from);
    }

    /// Append a predecessor to a block's in-edge array.
    pub fn push_in_edge(&mut self, of: BbId, pred: BbId) {
        self.blocks[of.0].in_edges.push(pred);
    }

    /// Packed-delete the first in-edge entry referring to `pred`.
    pub fn remove_in_edge(&mut self, of: BbId, pred: BbId) {
        let edges = &mut self.blocks[of.0].in_edges;
        if let Some(pos) = edges.iter().position(|&p| p == pred) {
            edges.remove(pos);
        }
    }

    /// Packed-delete every in-edge entry referring to any of `preds`.
    pub fn remove_in_edges(&mut self, of: BbId, preds: &[BbId]) {
        self.blocks[of.0].in_edges.retain(|p| !preds.contains(p));
    }

    /// Flag a block as removed.
    pub fn mark_invalid(&mut self, id: BbId) {
        self.blocks[id.0].flags |= BbFlags::INVALID;
    }

    /// Whether a block has been removed.
    pub fn is_invalid(&self, id: BbId) -> bool {
        self.blocks[id.0].is_invalid()
    }

    /// Iterate over the live blocks.
    pub fn live_blocks(&self) -> impl Iterator<Item = (BbId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_invalid())
            .map(|(i, b)| (BbId(i), b))
    }

    /// Count live blocks and live out-edges.
    pub fn count_live(&self) -> (usize, usize) {
        let mut bbs = 0;
        let mut edges = 0;
        for (_, block) in self.live_blocks() {
            bbs += 1;
            edges += block.out_edges.iter().flatten().count();
        }
        (bbs, edges)
    }

    /// Verify the graph contract over the live blocks: out-edges point at
    /// live blocks, each edge `b -> b'` has exactly one `in_edges` entry,
    /// and every in-edge entry is backed by a real out-edge.
    pub fn is_consistent(&self) -> bool {
        for (id, block) in self.live_blocks() {
            for target in block.out_edges.iter().flatten() {
                if self.is_invalid(*target) {
                    return false;
                }
                let expected = block
                    .out_edges
                    .iter()
                    .flatten()
                    .filter(|t| *t == target)
                    .count();
                let found = self
                    .block(*target)
                    .in_edges
                    .iter()
                    .filter(|&&p| p == id)
                    .count();
                if expected != found {
                    return false;
                }
            }
            for &pred in &block.in_edges {
                if self.is_invalid(pred) {
                    return false;
                }
                if !self
                    .block(pred)
                    .out_edges
                    .iter()
                    .flatten()
                    .any(|&t| t == id)
                {
                    return false;
                }
            }
        }
        true
    }
}

/// Graph-rewrite statistics, tracked across a lifting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    /// Live blocks before the pass.
    pub num_bb_before: usize,
    /// Live blocks after the pass.
    pub num_bb_after: usize,
    /// Live edges before the pass.
    pub num_edges_before: usize,
    /// Live edges after the pass.
    pub num_edges_after: usize,
}

impl RewriteStats {
    /// Snapshot the live counts of a graph as the starting point.
    pub fn before_pass(cfg: &Cfg) -> Self {
        let (bbs, edges) = cfg.count_live();
        Self {
            num_bb_before: bbs,
            num_bb_after: bbs,
            num_edges_before: edges,
            num_edges_after: edges,
        }
    }
}
