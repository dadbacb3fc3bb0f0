//! Long-variable propagation.
//!
//! 16-bit code manipulates 32-bit values half by half: two MOVs, two
//! PUSHes, or a CMP per half with a branch ladder in between. This pass
//! walks every long local identifier, finds the half-pair idioms that
//! refer to it, and rewrites each into a single high-level icode over the
//! long value — destructively updating the basic-block graph when a
//! branch ladder collapses into one long conditional.
//!
//! Rewrites are all-or-nothing: every structural precondition is checked
//! before the first mutation, so a failed half-match leaves the icode and
//! the graph exactly as they were.

use crate::cfg::{Cfg, EdgeSide, NodeType, RewriteStats};
use crate::icode::{BinOp, Expr, HlIcode, Icode, LlIcode, LlOpcode, LlOperand};
use crate::locals::{LocalIdTable, LongLoc};
use crate::proc::Procedure;
use crate::types::{HlType, Register};

/// Which frame the long identifier's halves live in, with the payload
/// needed to match an icode operand against a half.
#[derive(Debug, Clone, Copy)]
enum Halves {
    Stack { off_high: i16, off_low: i16 },
    Reg { high: Register, low: Register },
}

impl Halves {
    /// Whether `hi`/`lo` are exactly this identifier's halves.
    fn matches(self, hi: LlOperand, lo: LlOperand) -> bool {
        match self {
            Self::Stack { off_high, off_low } => {
                hi.stk_off() == Some(off_high) && lo.stk_off() == Some(off_low)
            }
            Self::Reg { high, low } => hi.reg() == Some(high) && lo.reg() == Some(low),
        }
    }
}

/// Propagate every long local of the procedure, converting the low-level
/// icodes that realize it into high-level ones.
pub fn propagate_longs(proc: &mut Procedure, cfg: &mut Cfg, stats: &mut RewriteStats) {
    for i in 0..proc.locals.len() {
        let Some(local) = proc.locals.get(i) else {
            continue;
        };
        if !local.typ.is_long() {
            continue;
        }
        let typ = local.typ;
        let loc = local.loc;
        let occurrences = local.idx.clone();
        match loc {
            LongLoc::Stack { off_high, off_low } => {
                prop_long_stk(i, typ, off_high, off_low, proc, cfg, stats);
            }
            LongLoc::Reg { high, low } => {
                prop_long_reg(i, typ, high, low, &occurrences, proc, cfg, stats);
            }
            LongLoc::Glob { .. } => prop_long_glb(i, proc),
        }
    }
}

/// Global long identifiers pass through untouched.
fn prop_long_glb(_i: usize, _proc: &mut Procedure) {}

/// Scan the whole icode stream for half-pair accesses to a long stack
/// identifier.
fn prop_long_stk(
    i: usize,
    typ: HlType,
    off_high: i16,
    off_low: i16,
    proc: &mut Procedure,
    cfg: &mut Cfg,
    stats: &mut RewriteStats,
) {
    let halves = Halves::Stack { off_high, off_low };
    let mut k = 0;
    while k + 1 < proc.icode.len() {
        let mut advance = 1;
        if let Some(cur) = ll_copy_live(&proc.icode, k) {
            let next = ll_copy_live(&proc.icode, k + 1);
            if let Some(nx) = next.filter(|nx| nx.opcode == cur.opcode) {
                match cur.opcode {
                    LlOpcode::Mov => {
                        // store order: high word first
                        if halves.matches(cur.dst, nx.dst) {
                            if let Some(rhs) =
                                long_operand_expr(&mut proc.locals, typ, cur.src, nx.src, k)
                            {
                                lift_pair(
                                    proc,
                                    k,
                                    HlIcode::Asgn {
                                        lhs: Expr::LongId(i),
                                        rhs,
                                    },
                                );
                                advance = 2;
                            }
                        }
                    }
                    LlOpcode::And | LlOpcode::Or | LlOpcode::Xor => {
                        if halves.matches(cur.dst, nx.dst) {
                            if let Some(src) =
                                long_operand_expr(&mut proc.locals, typ, cur.src, nx.src, k)
                            {
                                let rhs =
                                    Expr::bin(bitwise_op(cur.opcode), Expr::LongId(i), src);
                                lift_pair(
                                    proc,
                                    k,
                                    HlIcode::Asgn {
                                        lhs: Expr::LongId(i),
                                        rhs,
                                    },
                                );
                                advance = 2;
                            }
                        }
                    }
                    LlOpcode::Push => {
                        // operand order: high word pushed first
                        if halves.matches(cur.src, nx.src) {
                            lift_pair(proc, k, HlIcode::Push(Expr::LongId(i)));
                            advance = 2;
                        }
                    }
                    LlOpcode::Pop => {
                        // pop order: low word first
                        if halves.matches(nx.dst, cur.dst) {
                            lift_pair(proc, k, HlIcode::Pop(Expr::LongId(i)));
                            advance = 2;
                        }
                    }
                    _ => {}
                }
            } else if cur.opcode == LlOpcode::Cmp {
                advance = try_long_conditional(i, typ, halves, k, proc, cfg, stats);
            }
        }
        k += advance;
    }
}

/// Propagate a long register pair: for each recorded occurrence, first
/// look backwards for the defining half pair, then forwards for a use
/// pair, a long-conditional ladder, or the OR/Jcc zero-test idiom.
fn prop_long_reg(
    i: usize,
    typ: HlType,
    high: Register,
    low: Register,
    occurrences: &[usize],
    proc: &mut Procedure,
    cfg: &mut Cfg,
    stats: &mut RewriteStats,
) {
    for &occ in occurrences {
        if backward_def_scan(i, typ, high, low, occ, proc) {
            continue;
        }
        forward_use_scan(i, typ, high, low, occ, proc, cfg, stats);
    }
}

/// Walk backwards from an occurrence looking for the pair that defines
/// the long register. Only the first match is taken.
fn backward_def_scan(
    i: usize,
    typ: HlType,
    high: Register,
    low: Register,
    occ: usize,
    proc: &mut Procedure,
) -> bool {
    if occ < 2 {
        return false;
    }
    for p in (0..=occ - 2).rev() {
        let Some(cur) = ll_copy_live(&proc.icode, p) else {
            continue;
        };
        let Some(nx) = ll_copy_live(&proc.icode, p + 1) else {
            continue;
        };
        if cur.opcode != nx.opcode {
            continue;
        }
        match cur.opcode {
            LlOpcode::Mov => {
                // definition order: high word first
                if cur.dst.reg() == Some(high) && nx.dst.reg() == Some(low) {
                    if let Some(rhs) = long_operand_expr(&mut proc.locals, typ, cur.src, nx.src, p)
                    {
                        proc.locals.record_occurrence(i, p);
                        proc.icode[p].add_def(low);
                        lift_pair(
                            proc,
                            p,
                            HlIcode::Asgn {
                                lhs: Expr::LongId(i),
                                rhs,
                            },
                        );
                        return true;
                    }
                }
            }
            LlOpcode::Pop => {
                // pop order: low word first
                if nx.dst.reg() == Some(high) && cur.dst.reg() == Some(low) {
                    proc.icode[p].add_def(high);
                    lift_pair(proc, p, HlIcode::Pop(Expr::LongId(i)));
                    return true;
                }
            }
            LlOpcode::And | LlOpcode::Or | LlOpcode::Xor => {
                // the bitwise idiom works low word first
                if nx.dst.reg() == Some(high) && cur.dst.reg() == Some(low) {
                    if let Some(src) = long_operand_expr(&mut proc.locals, typ, nx.src, cur.src, p)
                    {
                        let rhs = Expr::bin(bitwise_op(cur.opcode), Expr::LongId(i), src);
                        proc.icode[p].add_use_def(high);
                        lift_pair(
                            proc,
                            p,
                            HlIcode::Asgn {
                                lhs: Expr::LongId(i),
                                rhs,
                            },
                        );
                        return true;
                    }
                }
            }
            _ => {}
        }
    }
    false
}

/// Walk forwards from an occurrence looking for a use of the long
/// register. Pair uses stop at the first match; the OR/Jcc idiom rewrites
/// in place and keeps scanning.
fn forward_use_scan(
    i: usize,
    typ: HlType,
    high: Register,
    low: Register,
    occ: usize,
    proc: &mut Procedure,
    cfg: &mut Cfg,
    stats: &mut RewriteStats,
) {
    let halves = Halves::Reg { high, low };
    let mut k = occ + 1;
    while k + 1 < proc.icode.len() {
        let mut advance = 1;
        if let Some(cur) = ll_copy_live(&proc.icode, k) {
            let next = ll_copy_live(&proc.icode, k + 1);
            if let Some(nx) = next.filter(|nx| nx.opcode == cur.opcode) {
                match cur.opcode {
                    LlOpcode::Mov => {
                        if cur.src.reg() == Some(high) && nx.src.reg() == Some(low) {
                            if let Some(lhs) =
                                long_operand_expr(&mut proc.locals, typ, cur.dst, nx.dst, k)
                            {
                                proc.icode[k].add_use(low);
                                lift_pair(
                                    proc,
                                    k,
                                    HlIcode::Asgn {
                                        lhs,
                                        rhs: Expr::LongId(i),
                                    },
                                );
                                return;
                            }
                        }
                    }
                    LlOpcode::Push => {
                        if cur.src.reg() == Some(high) && nx.src.reg() == Some(low) {
                            proc.icode[k].add_use(low);
                            lift_pair(proc, k, HlIcode::Push(Expr::LongId(i)));
                            return;
                        }
                    }
                    LlOpcode::And | LlOpcode::Or | LlOpcode::Xor => {
                        if nx.dst.reg() == Some(high) && cur.dst.reg() == Some(low) {
                            if let Some(src) =
                                long_operand_expr(&mut proc.locals, typ, nx.src, cur.src, k)
                            {
                                let rhs = Expr::bin(bitwise_op(cur.opcode), Expr::LongId(i), src);
                                proc.icode[k].add_use_def(high);
                                lift_pair(
                                    proc,
                                    k,
                                    HlIcode::Asgn {
                                        lhs: Expr::LongId(i),
                                        rhs,
                                    },
                                );
                                return;
                            }
                        }
                    }
                    _ => {}
                }
            } else if cur.opcode == LlOpcode::Cmp {
                advance = try_long_conditional(i, typ, halves, k, proc, cfg, stats);
            } else if cur.opcode == LlOpcode::Or {
                // OR regH, regL / Jcc => JCOND (long <op> 0): better code
                // than a test on the OR of the halves
                if let Some(nx) = next.filter(|nx| nx.opcode.is_jcond()) {
                    if cur.dst.reg() == Some(high) && cur.src.reg() == Some(low) {
                        if let Some(op) = nx.opcode.cond_op() {
                            let cond = Expr::bin(op, Expr::LongId(i), Expr::Const(0));
                            let uses = proc.icode[k].du.uses;
                            let jc = &mut proc.icode[k + 1];
                            jc.set_high(HlIcode::JCond(cond));
                            jc.du.uses = uses;
                            proc.icode[k].invalidate();
                        }
                    }
                }
            }
        }
        k += advance;
    }
}

/// Try both long-conditional shapes at a CMP; returns how far the scan
/// should advance.
fn try_long_conditional(
    i: usize,
    typ: HlType,
    halves: Halves,
    k: usize,
    proc: &mut Procedure,
    cfg: &mut Cfg,
    stats: &mut RewriteStats,
) -> usize {
    if let Some((off, arc)) = is_long23(&proc.icode, k, cfg) {
        let Some(cur) = ll_copy_live(&proc.icode, k) else {
            return 1;
        };
        let Some(far) = ll_copy_live(&proc.icode, k + off) else {
            return 1;
        };
        if halves.matches(cur.dst, far.dst) {
            if let Some(rhs) = long_operand_expr(&mut proc.locals, typ, cur.src, far.src, k) {
                return long_jcond23(Expr::LongId(i), rhs, k, off, arc, proc, cfg, stats);
            }
        }
        1
    } else if let Some(off) = is_long22(&proc.icode, k) {
        let Some(cur) = ll_copy_live(&proc.icode, k) else {
            return 1;
        };
        let Some(far) = ll_copy_live(&proc.icode, k + off) else {
            return 1;
        };
        if halves.matches(cur.dst, far.dst) {
            if let Some(rhs) = long_operand_expr(&mut proc.locals, typ, cur.src, far.src, k) {
                return long_jcond22(Expr::LongId(i), rhs, k, proc, cfg, stats);
            }
        }
        1
    } else {
        1
    }
}

/// Recognize the 2-CMP / 3-branch ladder: the CMP's two-way block feeds a
/// length-1 two-way block (on either arc) whose fall-through is a length-2
/// two-way block opening with the second CMP. Returns the distance to the
/// second CMP and the arc it hangs off.
fn is_long23(icode: &[Icode], k: usize, cfg: &Cfg) -> Option<(usize, EdgeSide)> {
    let pbb = icode.get(k)?.in_bb?;
    if cfg.block(pbb).node_type != NodeType::TwoBranch {
        return None;
    }
    let t = cfg.out_edge(pbb, EdgeSide::Then)?;
    let e = cfg.out_edge(pbb, EdgeSide::Else)?;

    let (mid, arc) = {
        let tb = cfg.block(t);
        if tb.length == 1 && tb.node_type == NodeType::TwoBranch && tb.in_edges.len() == 1 {
            (t, EdgeSide::Then)
        } else {
            let eb = cfg.block(e);
            if eb.length == 1 && eb.node_type == NodeType::TwoBranch && eb.in_edges.len() == 1 {
                (e, EdgeSide::Else)
            } else {
                return None;
            }
        }
    };

    let obb2 = cfg.out_edge(mid, EdgeSide::Then)?;
    let second = cfg.block(obb2);
    if second.length == 2 && second.node_type == NodeType::TwoBranch {
        let first_ic = icode.get(second.start)?;
        if !first_ic.invalid && first_ic.ll().map(|ll| ll.opcode) == Some(LlOpcode::Cmp) {
            return Some((second.start.checked_sub(k)?, arc));
        }
    }
    None
}

/// Recognize the 2-CMP / 2-branch shape: CMP, Jcc, CMP, Jcc back to back.
fn is_long22(icode: &[Icode], k: usize) -> Option<usize> {
    if k + 3 >= icode.len() {
        return None;
    }
    let second_cmp = ll_copy_live(icode, k + 2)?;
    let first_jcc = ll_copy_live(icode, k + 1)?;
    let second_jcc = ll_copy_live(icode, k + 3)?;
    if second_cmp.opcode == LlOpcode::Cmp
        && first_jcc.opcode.is_jcond()
        && second_jcc.opcode.is_jcond()
    {
        Some(2)
    } else {
        None
    }
}

/// Collapse a 2-CMP / 3-branch ladder into one long JCOND at `k + 1`,
/// removing the two intermediate blocks from the graph. Returns the scan
/// advance (the ladder length on the THEN arc, the outer pair otherwise).
fn long_jcond23(
    lhs: Expr,
    rhs: Expr,
    k: usize,
    off: usize,
    arc: EdgeSide,
    proc: &mut Procedure,
    cfg: &mut Cfg,
    stats: &mut RewriteStats,
) -> usize {
    // the relation comes from the third branch, behind the second CMP
    let Some(op) = proc
        .icode
        .get(k + off + 1)
        .filter(|ic| !ic.invalid)
        .and_then(|ic| ic.ll())
        .and_then(|ll| ll.opcode.cond_op())
    else {
        return 1;
    };
    let Some(pbb) = proc.icode[k].in_bb else {
        return 1;
    };
    let Some(obb1) = cfg.out_edge(pbb, arc) else {
        return 1;
    };
    let Some(obb2) = cfg.out_edge(obb1, EdgeSide::Then) else {
        return 1;
    };
    let Some(tbb) = cfg.out_edge(obb2, EdgeSide::Then) else {
        return 1;
    };

    match arc {
        EdgeSide::Then => {
            let Some(ebb) = cfg.out_edge(pbb, EdgeSide::Else) else {
                return 1;
            };
            // the header now jumps straight to the ladder target
            cfg.set_out_edge(pbb, EdgeSide::Then, tbb);
            cfg.remove_in_edges(tbb, &[obb1, obb2]);
            cfg.push_in_edge(tbb, pbb);
            // the ELSE block loses the second CMP's arc
            cfg.remove_in_edge(ebb, obb2);
        }
        EdgeSide::Else => {
            let Some(fbb) = cfg.out_edge(obb2, EdgeSide::Else) else {
                return 1;
            };
            cfg.remove_in_edge(tbb, obb2);
            cfg.remove_in_edges(fbb, &[obb1, obb2]);
            cfg.push_in_edge(fbb, pbb);
            cfg.set_out_edge(pbb, EdgeSide::Else, fbb);
        }
    }

    let cond = Expr::bin(op, lhs, rhs);
    let uses = proc.icode[k].du.uses | proc.icode[k + off].du.uses;
    let jc = &mut proc.icode[k + 1];
    jc.set_high(HlIcode::JCond(cond));
    jc.du.uses = uses;

    cfg.mark_invalid(obb1);
    cfg.mark_invalid(obb2);
    stats.num_bb_after = stats.num_bb_after.saturating_sub(2);
    stats.num_edges_after = stats.num_edges_after.saturating_sub(4);

    proc.icode[k].invalidate();
    let first = cfg.block(obb1).start;
    let second = cfg.block(obb2).start;
    for pos in [first, second, second + 1] {
        if let Some(ic) = proc.icode.get_mut(pos) {
            ic.invalidate();
        }
    }

    match arc {
        EdgeSide::Then => 5,
        EdgeSide::Else => 2,
    }
}

/// Collapse the 2-CMP / 2-branch shape into one long equality JCOND at
/// `k + 1`. The graph loses the fall-through block when the outer block
/// ends at the first branch.
fn long_jcond22(
    lhs: Expr,
    rhs: Expr,
    k: usize,
    proc: &mut Procedure,
    cfg: &mut Cfg,
    stats: &mut RewriteStats,
) -> usize {
    let Some(third) = proc
        .icode
        .get(k + 3)
        .filter(|ic| !ic.invalid)
        .and_then(|ic| ic.ll())
        .map(|ll| ll.opcode)
    else {
        return 1;
    };
    let Some(op) = third.cond_op() else {
        return 1;
    };

    let cond = Expr::bin(op, lhs, rhs);
    let uses = proc.icode[k].du.uses | proc.icode[k + 2].du.uses;
    let jc = &mut proc.icode[k + 1];
    jc.set_high(HlIcode::JCond(cond));
    jc.du.uses = uses;

    if let Some(pbb) = proc.icode[k].in_bb {
        let ends_at_branch = {
            let block = cfg.block(pbb);
            block.start + block.length == k + 2
        };
        if ends_at_branch {
            if let Some(obb1) = cfg.out_edge(pbb, EdgeSide::Then) {
                if let (Some(tbb_then), Some(tbb_else)) = (
                    cfg.out_edge(obb1, EdgeSide::Then),
                    cfg.out_edge(obb1, EdgeSide::Else),
                ) {
                    let keeps_then_arc = third != LlOpcode::Je;
                    cfg.set_out_edge(pbb, EdgeSide::Then, tbb_then);
                    cfg.remove_in_edge(tbb_then, obb1);
                    if keeps_then_arc {
                        cfg.push_in_edge(tbb_then, pbb);
                    }
                    cfg.set_out_edge(pbb, EdgeSide::Else, tbb_else);
                    cfg.remove_in_edge(tbb_else, obb1);
                    if !keeps_then_arc {
                        cfg.push_in_edge(tbb_else, pbb);
                    }
                    cfg.mark_invalid(obb1);
                    stats.num_bb_after = stats.num_bb_after.saturating_sub(1);
                    stats.num_edges_after = stats.num_edges_after.saturating_sub(2);
                }
            }
        }
    }

    proc.icode[k].invalidate();
    proc.icode[k + 2].invalidate();
    proc.icode[k + 3].invalidate();
    4
}

/// Reconstruct the long expression formed by a high/low operand pair:
/// a long constant from two immediates, or the long identifier matching a
/// register or stack pair (created on demand, with the occurrence
/// recorded).
fn long_operand_expr(
    locals: &mut LocalIdTable,
    typ: HlType,
    hi: LlOperand,
    lo: LlOperand,
    pos: usize,
) -> Option<Expr> {
    match (hi, lo) {
        (LlOperand::Imm(h), LlOperand::Imm(l)) => {
            Some(Expr::Const((u32::from(h) << 16) | u32::from(l)))
        }
        (LlOperand::Reg(h), LlOperand::Reg(l)) => {
            let id = locals.find_or_insert_reg_pair(h, l, typ);
            locals.record_occurrence(id, pos);
            Some(Expr::LongId(id))
        }
        (LlOperand::Stk { off: h }, LlOperand::Stk { off: l }) => {
            let id = locals.find_or_insert_stk_pair(h, l, typ);
            locals.record_occurrence(id, pos);
            Some(Expr::LongId(id))
        }
        _ => None,
    }
}

/// Replace `icode[k]` with the lifted form, folding the def/use bits of
/// the consumed second half in, and invalidate `icode[k + 1]`.
fn lift_pair(proc: &mut Procedure, k: usize, hl: HlIcode) {
    let next_du = proc.icode[k + 1].du;
    let ic = &mut proc.icode[k];
    ic.du.def |= next_du.def;
    ic.du.uses |= next_du.uses;
    ic.set_high(hl);
    proc.icode[k + 1].invalidate();
}

fn bitwise_op(op: LlOpcode) -> BinOp {
    match op {
        LlOpcode::And => BinOp::And,
        LlOpcode::Or => BinOp::Or,
        _ => BinOp::Xor,
    }
}

/// Copy of the live low-level payload at `k`, if there is one.
fn ll_copy_live(icode: &[Icode], k: usize) -> Option<LlIcode> {
    let ic = icode.get(k)?;
    if ic.invalid {
        return None;
    }
    ic.ll().copied()
}
