use std::collections::HashMap;

use crate::board::models::{Application, Stage};
use crate::errors::DragError;

/// A row that lives at a dense position inside a group.
pub trait OrderedItem: Clone {
    fn id(&self) -> &str;
    fn group_id(&self) -> &str;
    fn position(&self) -> i64;
    fn place(&mut self, group_id: &str, position: i64);
}

impl OrderedItem for Application {
    fn id(&self) -> &str {
        &self.id
    }

    fn group_id(&self) -> &str {
        &self.stage_id
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn place(&mut self, group_id: &str, position: i64) {
        if self.stage_id != group_id {
            self.stage_id = group_id.to_string();
        }
        self.position = position;
    }
}

impl OrderedItem for Stage {
    fn id(&self) -> &str {
        &self.id
    }

    fn group_id(&self) -> &str {
        &self.pipeline_id
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn place(&mut self, group_id: &str, position: i64) {
        if self.pipeline_id != group_id {
            self.pipeline_id = group_id.to_string();
        }
        self.position = position;
    }
}

/// What the pointer is over during a drag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// The empty area of a group; drops append.
    Group(String),
    /// A sibling item; drops land before it.
    Item(String),
}

/// A move the server has to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveIntent {
    pub gesture: u64,
    pub item_id: String,
    pub from_group: String,
    pub to_group: String,
    pub position: i64,
}

#[derive(Debug)]
enum Phase<T> {
    Idle,
    Dragging {
        gesture: u64,
        item_id: String,
        snapshot: Vec<T>,
        applied: Option<DropTarget>,
        pending: Option<DropTarget>,
    },
    /// Dropped; waiting for the server to answer the move.
    Settling { gesture: u64, snapshot: Vec<T> },
}

/// Project a drag over `target`: pull the dragged item out of its group,
/// insert it before the hovered sibling (or at the end of a hovered group),
/// and renumber both affected groups from 0.
///
/// Returns `None` when the projection would not change anything or the
/// target is unknown.
pub fn project<T: OrderedItem>(items: &[T], dragged_id: &str, target: &DropTarget) -> Option<Vec<T>> {
    let dragged = items.iter().find(|i| i.id() == dragged_id)?;
    let source_group = dragged.group_id().to_string();

    let dest_group = match target {
        DropTarget::Group(group) => group.clone(),
        DropTarget::Item(id) if id == dragged_id => return None,
        DropTarget::Item(id) => items.iter().find(|i| i.id() == id)?.group_id().to_string(),
    };

    let mut dest: Vec<&T> = items
        .iter()
        .filter(|i| i.group_id() == dest_group && i.id() != dragged_id)
        .collect();
    dest.sort_by_key(|i| i.position());

    let index = match target {
        DropTarget::Group(_) => dest.len(),
        DropTarget::Item(id) => dest.iter().position(|i| i.id() == id)?,
    };

    let mut order: Vec<&str> = dest.iter().map(|i| i.id()).collect();
    order.insert(index, dragged_id);

    let mut placements: HashMap<String, (String, i64)> = order
        .iter()
        .enumerate()
        .map(|(pos, id)| (id.to_string(), (dest_group.clone(), pos as i64)))
        .collect();

    if source_group != dest_group {
        let mut source: Vec<&T> = items
            .iter()
            .filter(|i| i.group_id() == source_group && i.id() != dragged_id)
            .collect();
        source.sort_by_key(|i| i.position());
        for (pos, item) in source.iter().enumerate() {
            placements.insert(item.id().to_string(), (source_group.clone(), pos as i64));
        }
    }

    let unchanged = items.iter().all(|i| match placements.get(i.id()) {
        Some((group, pos)) => i.group_id() == group && i.position() == *pos,
        None => true,
    });
    if unchanged {
        return None;
    }

    Some(
        items
            .iter()
            .map(|i| {
                let mut next = i.clone();
                if let Some((group, pos)) = placements.get(i.id()) {
                    next.place(group, *pos);
                }
                next
            })
            .collect(),
    )
}

/// Client-side optimistic ordering state for one board.
///
/// Drag events mutate the local items immediately. The pre-drag snapshot is
/// kept until the server has confirmed or rejected the move, and canonical
/// data from the server is ignored while a gesture is in flight.
#[derive(Debug)]
pub struct DragReducer<T: OrderedItem> {
    items: Vec<T>,
    phase: Phase<T>,
    last_gesture: u64,
}

impl<T: OrderedItem> DragReducer<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            phase: Phase::Idle,
            last_gesture: 0,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Items of one group in position order.
    pub fn group(&self, group_id: &str) -> Vec<&T> {
        let mut group: Vec<&T> = self
            .items
            .iter()
            .filter(|i| i.group_id() == group_id)
            .collect();
        group.sort_by_key(|i| i.position());
        group
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, Phase::Dragging { .. })
    }

    /// True while dragging or while a dropped move awaits the server.
    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Begin a gesture on `item_id` and return its gesture id.
    ///
    /// A gesture that was still dragging is abandoned and its projection
    /// discarded. A gesture awaiting the server keeps its optimistic state but
    /// any later answer for it is ignored.
    pub fn drag_start(&mut self, item_id: &str) -> Result<u64, DragError> {
        if let Phase::Dragging { snapshot, .. } = std::mem::replace(&mut self.phase, Phase::Idle) {
            self.items = snapshot;
        }
        if !self.items.iter().any(|i| i.id() == item_id) {
            return Err(DragError::UnknownItem(item_id.to_string()));
        }
        self.last_gesture += 1;
        self.phase = Phase::Dragging {
            gesture: self.last_gesture,
            item_id: item_id.to_string(),
            snapshot: self.items.clone(),
            applied: None,
            pending: None,
        };
        tracing::trace!(gesture = self.last_gesture, item_id, "drag started");
        Ok(self.last_gesture)
    }

    /// Record the hovered target. Projection waits for the next
    /// `on_animation_frame`; repeats of the current target are coalesced.
    pub fn drag_over(&mut self, target: DropTarget) -> Result<(), DragError> {
        if let DropTarget::Item(id) = &target {
            if !self.items.iter().any(|i| i.id() == id) {
                return Err(DragError::UnknownItem(id.clone()));
            }
        }
        match &mut self.phase {
            Phase::Dragging {
                applied, pending, ..
            } => {
                let current = pending.as_ref().or(applied.as_ref());
                if current != Some(&target) {
                    *pending = Some(target);
                }
                Ok(())
            }
            _ => Err(DragError::NotDragging),
        }
    }

    /// Apply the pending projection, if any. Returns true when the items
    /// changed.
    pub fn on_animation_frame(&mut self) -> bool {
        let Phase::Dragging {
            item_id,
            applied,
            pending,
            ..
        } = &mut self.phase
        else {
            return false;
        };
        let Some(target) = pending.take() else {
            return false;
        };
        let projected = project(&self.items, item_id, &target);
        *applied = Some(target);
        match projected {
            Some(items) => {
                self.items = items;
                true
            }
            None => false,
        }
    }

    /// Finish the gesture. Returns the move to send, or `None` when the item
    /// ended where it started.
    pub fn drag_end(&mut self) -> Result<Option<MoveIntent>, DragError> {
        if !self.is_dragging() {
            return Err(DragError::NotDragging);
        }
        self.on_animation_frame();
        let Phase::Dragging {
            gesture,
            item_id,
            snapshot,
            ..
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return Err(DragError::NotDragging);
        };

        let origin = snapshot
            .iter()
            .find(|i| i.id() == item_id)
            .ok_or_else(|| DragError::UnknownItem(item_id.clone()))?;
        let landed = self
            .items
            .iter()
            .find(|i| i.id() == item_id)
            .ok_or_else(|| DragError::UnknownItem(item_id.clone()))?;

        if origin.group_id() == landed.group_id() && origin.position() == landed.position() {
            self.items = snapshot;
            return Ok(None);
        }

        let intent = MoveIntent {
            gesture,
            item_id: item_id.clone(),
            from_group: origin.group_id().to_string(),
            to_group: landed.group_id().to_string(),
            position: landed.position(),
        };
        self.phase = Phase::Settling { gesture, snapshot };
        Ok(Some(intent))
    }

    /// Abort the gesture and restore the pre-drag state.
    pub fn drag_cancel(&mut self) -> Result<(), DragError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Dragging { snapshot, .. } => {
                self.items = snapshot;
                Ok(())
            }
            other => {
                self.phase = other;
                Err(DragError::NotDragging)
            }
        }
    }

    /// The server rejected the move of `gesture`. Restores the snapshot
    /// unless a newer gesture has started. Returns true if it rolled back.
    ///
    /// A false return for a superseded gesture leaves that gesture's
    /// placement on the board; the caller must refetch and `reconcile` once
    /// the reducer is idle.
    pub fn move_failed(&mut self, gesture: u64) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Settling {
                gesture: current,
                snapshot,
            } if current == gesture => {
                self.items = snapshot;
                tracing::debug!(gesture, "move rejected, rolled back");
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// The server accepted the move of `gesture`. The optimistic state stays
    /// until canonical data arrives through `reconcile`.
    pub fn move_succeeded(&mut self, gesture: u64) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Settling {
                gesture: current, ..
            } if current == gesture => true,
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// Replace local items with server truth. Ignored while a gesture is in
    /// progress; returns whether the data was applied.
    pub fn reconcile(&mut self, canonical: Vec<T>) -> bool {
        if self.is_busy() {
            tracing::trace!("reconcile suppressed during gesture");
            return false;
        }
        self.items = canonical;
        true
    }
}
