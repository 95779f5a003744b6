//! Client-side ordered mirror of a single scope.
//!
//! A mirror holds the cards of one `(board, lane)` scope in display order,
//! each carrying its own `position`. User-initiated reorders apply
//! immediately (optimistic) and the matching mutation request is queued on
//! the pending-op log for asynchronous submission; broadcast events from
//! other clients' actions land through [`CardMirror::apply_event`]. The two
//! paths are reconciled only by replacement: a positions broadcast with a
//! newer rev overwrites, anything older is dropped, and a failed request
//! flags the mirror for a full re-fetch.
//!
//! All operations are O(N); scopes are expected to stay small.

use std::collections::VecDeque;

use crate::events::{BoardEvent, PositionPair};
use crate::model::{Card, Scope};

/// A reorder request queued for asynchronous submission.
///
/// Once marked sent it is never cancelled; whatever the server answers is
/// applied when it arrives, last write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOp {
    pub op_id: u64,
    pub card_id: String,
    /// Target scope for cross-lane moves; `None` for in-scope reorders.
    pub new_scope: Option<Scope>,
    pub new_position: usize,
    pub sent: bool,
}

/// Drag interaction state. The auto-scroll flag is a side effect of the
/// `Dragging` state and is cleared on any exit from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragState {
    Idle,
    Dragging {
        card_id: String,
        origin: usize,
        autoscroll: bool,
    },
}

/// One-step snapshot of the most recent optimistic move, for cancellation.
#[derive(Debug, Clone)]
struct LastMove {
    card_id: String,
    from_index: usize,
}

/// Ordered mirror of one scope.
#[derive(Debug)]
pub struct CardMirror {
    scope: Scope,
    cards: Vec<Card>,
    drag: DragState,
    last_move: Option<LastMove>,
    pending: VecDeque<PendingOp>,
    next_op_id: u64,
    /// Highest positions-event rev applied; older broadcasts are dropped.
    last_rev: i64,
    /// Set when a request failed or state is known stale; the owner should
    /// re-fetch the scope, there is no replay.
    pub needs_refetch: bool,
}

impl CardMirror {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            cards: Vec::new(),
            drag: DragState::Idle,
            last_move: None,
            pending: VecDeque::new(),
            next_op_id: 1,
            last_rev: 0,
            needs_refetch: false,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Replace the mirror contents from a full fetch and repair inherited
    /// position inconsistency with dense generic indexes.
    pub fn load(&mut self, cards: Vec<Card>, rev: i64) {
        self.cards = cards;
        self.assign_generic_indexes();
        self.last_rev = rev;
        self.needs_refetch = false;
    }

    /// Current display order as `(id, position)`.
    pub fn ordering(&self) -> Vec<(String, i64)> {
        self.cards.iter().map(|c| (c.id.clone(), c.position)).collect()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.cards.iter().position(|c| c.id == id)
    }

    // ===== Ordered-sequence primitives =====

    /// Splice a card in at `index`, renumbering every follower to its new
    /// index.
    pub fn insert(&mut self, mut card: Card, index: usize) {
        let index = index.min(self.cards.len());
        card.position = index as i64;
        self.cards.insert(index, card);
        for (i, c) in self.cards.iter_mut().enumerate().skip(index + 1) {
            c.position = i as i64;
        }
    }

    /// Splice out the matching card, decrementing the position of everything
    /// after it. Unknown ids are a no-op.
    pub fn remove_by_id(&mut self, id: &str) -> Option<Card> {
        let index = self.index_of(id)?;
        let card = self.cards.remove(index);
        for c in self.cards.iter_mut().skip(index) {
            c.position -= 1;
        }
        Some(card)
    }

    /// Shift everything strictly between a card's old index and `new_pos`
    /// by one (direction depending on the move), set the card's position,
    /// then stable-sort by position.
    pub fn update_position_for_card(&mut self, id: &str, new_pos: usize) {
        let Some(old) = self.index_of(id) else {
            return;
        };
        let new_pos = new_pos.min(self.cards.len().saturating_sub(1));
        let (old, new_i64) = (old as i64, new_pos as i64);

        for c in &mut self.cards {
            if new_i64 < old && c.position >= new_i64 && c.position < old {
                c.position += 1;
            } else if new_i64 > old && c.position > old && c.position <= new_i64 {
                c.position -= 1;
            }
        }
        if let Some(card) = self.cards.iter_mut().find(|c| c.id == id) {
            card.position = new_i64;
        }
        self.cards.sort_by_key(|c| c.position);
    }

    /// Overwrite the position of every locally present card named in
    /// `pairs`, silently ignoring unknown ids, then stable-sort.
    pub fn apply_list_positions(&mut self, pairs: &[PositionPair]) {
        for pair in pairs {
            if let Some(card) = self.cards.iter_mut().find(|c| c.id == pair.id) {
                card.position = pair.position;
            }
        }
        self.cards.sort_by_key(|c| c.position);
    }

    /// Sort by existing position, then overwrite with the dense `0..N-1`
    /// index. Used once after an initial bulk load.
    pub fn assign_generic_indexes(&mut self) {
        self.cards.sort_by_key(|c| c.position);
        for (i, c) in self.cards.iter_mut().enumerate() {
            c.position = i as i64;
        }
    }

    // ===== Broadcast application =====

    /// Apply a broadcast event if it concerns this scope.
    pub fn apply_event(&mut self, event: &BoardEvent) {
        match event {
            BoardEvent::CardPositionsChanged { scope, pairs, rev } if *scope == self.scope => {
                // Rev-stamped last-write-wins: drop anything not newer than
                // what we already applied.
                if *rev <= self.last_rev {
                    return;
                }
                self.last_rev = *rev;
                self.apply_list_positions(pairs);
            }
            BoardEvent::CardAdded { card } if card.scope() == self.scope => {
                if self.index_of(&card.id).is_none() {
                    self.insert(card.clone(), card.position as usize);
                }
            }
            BoardEvent::CardArchived { card_id, scope } if *scope == self.scope => {
                self.remove_by_id(card_id);
            }
            BoardEvent::CardMovedLane {
                card,
                from_scope,
                to_scope,
            } => {
                if *from_scope == self.scope {
                    self.remove_by_id(&card.id);
                }
                if *to_scope == self.scope && self.index_of(&card.id).is_none() {
                    self.insert(card.clone(), card.position as usize);
                }
            }
            BoardEvent::CardEdited { card } if card.scope() == self.scope => {
                if let Some(local) = self.cards.iter_mut().find(|c| c.id == card.id) {
                    let position = local.position;
                    *local = card.clone();
                    // Field edits never move anything.
                    local.position = position;
                }
            }
            _ => {}
        }
    }

    // ===== Drag state machine =====

    pub fn drag_state(&self) -> &DragState {
        &self.drag
    }

    /// Pick a card up. Returns `false` when already dragging or the card is
    /// not present.
    pub fn begin_drag(&mut self, card_id: &str) -> bool {
        if !matches!(self.drag, DragState::Idle) {
            return false;
        }
        let Some(origin) = self.index_of(card_id) else {
            return false;
        };
        self.drag = DragState::Dragging {
            card_id: card_id.to_string(),
            origin,
            autoscroll: false,
        };
        self.last_move = None;
        true
    }

    /// Optimistically move the dragged card to `index`, keeping a one-step
    /// snapshot so a cancel can revert the most recent move only.
    pub fn preview_move(&mut self, index: usize) {
        let DragState::Dragging { card_id, .. } = &self.drag else {
            return;
        };
        let card_id = card_id.clone();
        let Some(from_index) = self.index_of(&card_id) else {
            return;
        };
        if from_index == index {
            return;
        }
        self.last_move = Some(LastMove {
            card_id: card_id.clone(),
            from_index,
        });
        self.update_position_for_card(&card_id, index);
    }

    /// Mark the auto-scroll side effect while dragging; ignored otherwise.
    pub fn set_autoscroll(&mut self, active: bool) {
        if let DragState::Dragging { autoscroll, .. } = &mut self.drag {
            *autoscroll = active;
        }
    }

    pub fn autoscroll_active(&self) -> bool {
        matches!(self.drag, DragState::Dragging { autoscroll: true, .. })
    }

    /// Drop the card at `index`: apply the optimistic reorder and queue the
    /// mutation request. Returns the queued op for asynchronous submission.
    pub fn commit_drag(&mut self, index: usize) -> Option<PendingOp> {
        let DragState::Dragging { card_id, .. } = std::mem::replace(&mut self.drag, DragState::Idle)
        else {
            return None;
        };
        self.update_position_for_card(&card_id, index);
        self.last_move = None;

        let op = PendingOp {
            op_id: self.next_op_id,
            card_id,
            new_scope: None,
            new_position: index,
            sent: false,
        };
        self.next_op_id += 1;
        self.pending.push_back(op.clone());
        Some(op)
    }

    /// Abandon the drag: revert only the single most recent preview move and
    /// send nothing.
    pub fn cancel_drag(&mut self) {
        if !matches!(self.drag, DragState::Dragging { .. }) {
            return;
        }
        self.drag = DragState::Idle;
        if let Some(last) = self.last_move.take() {
            self.update_position_for_card(&last.card_id, last.from_index);
        }
    }

    // ===== Pending-operation log =====

    /// The next queued request not yet on the wire, marking it sent.
    pub fn take_next_request(&mut self) -> Option<PendingOp> {
        let op = self.pending.iter_mut().find(|op| !op.sent)?;
        op.sent = true;
        Some(op.clone())
    }

    /// Record the server's answer for a sent request. Failure (or an answer
    /// for an unknown op) marks the mirror stale for a full re-fetch; the
    /// optimistic state is otherwise left as ground truth.
    pub fn resolve_request(&mut self, op_id: u64, success: bool) {
        let known = self.pending.iter().any(|op| op.op_id == op_id);
        self.pending.retain(|op| op.op_id != op_id);
        if !success || !known {
            self.needs_refetch = true;
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
