use std::collections::VecDeque;

use crate::task::TaskPriority;

/// Priority queue of task ids
///
/// One FIFO lane per priority class. `pop` drains `critical` before `high`
/// before `normal` before `low`; within a lane, ids leave in insertion order.
#[derive(Debug, Default, Clone)]
pub struct TaskQueue {
    lanes: [VecDeque<String>; 4],
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an id to the back of its priority lane
    pub fn push(&mut self, id: impl Into<String>, priority: TaskPriority) {
        self.lanes[priority.rank()].push_back(id.into());
    }

    /// Removes and returns the next id to dispatch
    pub fn pop(&mut self) -> Option<String> {
        self.lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    /// Removes an id wherever it sits. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        for lane in self.lanes.iter_mut() {
            if let Some(pos) = lane.iter().position(|queued| queued == id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    /// Removes every id for which `evict` returns true, in dispatch order
    pub fn drain_where<F>(&mut self, mut evict: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut evicted = Vec::new();
        for lane in self.lanes.iter_mut() {
            lane.retain(|id| {
                if evict(id) {
                    evicted.push(id.clone());
                    false
                } else {
                    true
                }
            });
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    /// Queue depth per priority class, highest class first
    pub fn depth_by_priority(&self) -> [(TaskPriority, usize); 4] {
        [
            (TaskPriority::Critical, self.lanes[0].len()),
            (TaskPriority::High, self.lanes[1].len()),
            (TaskPriority::Normal, self.lanes[2].len()),
            (TaskPriority::Low, self.lanes[3].len()),
        ]
    }
}
