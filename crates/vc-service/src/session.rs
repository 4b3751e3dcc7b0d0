//! Client sessions

use crate::subdev::SubDeviceId;
use crate::task::TaskId;
use parking_lot::Condvar;
use std::collections::VecDeque;
use std::sync::Arc;
use vc_hw::TaskType;

/// Session identifier
pub type SessionId = u32;

/// One client connection
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Owning process
    pub pid: u32,
    pub subdev: SubDeviceId,
    /// Declared engine type, `None` until set
    pub kind: Option<TaskType>,
    pub waiting: VecDeque<TaskId>,
    pub running: VecDeque<TaskId>,
    pub done: VecDeque<TaskId>,
    /// Tasks of this session currently on hardware
    pub task_running: usize,
    /// Signalled on completion, close and secure interrupts
    pub wait: Arc<Condvar>,
}

impl Session {
    pub fn new(id: SessionId, pid: u32, subdev: SubDeviceId) -> Self {
        Self {
            id,
            pid,
            subdev,
            kind: None,
            waiting: VecDeque::new(),
            running: VecDeque::new(),
            done: VecDeque::new(),
            task_running: 0,
            wait: Arc::new(Condvar::new()),
        }
    }

    /// Every task this session still owns, oldest first per queue
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiting
            .iter()
            .chain(self.running.iter())
            .chain(self.done.iter())
            .copied()
    }

    pub fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty() && self.done.is_empty()
    }
}

/// Remove `id` from `queue`, returning whether it was there
pub(crate) fn unlink(queue: &mut VecDeque<TaskId>, id: TaskId) -> bool {
    match queue.iter().position(|&t| t == id) {
        Some(pos) => {
            queue.remove(pos);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlink_keeps_order() {
        let mut queue: VecDeque<TaskId> = [1, 2, 3].into_iter().collect();
        assert!(unlink(&mut queue, 2));
        assert!(!unlink(&mut queue, 2));
        assert_eq!(queue, VecDeque::from(vec![1, 3]));
    }

    #[test]
    fn test_task_ids_span_all_queues() {
        let mut session = Session::new(1, 100, 0);
        assert!(session.is_idle());
        session.waiting.push_back(3);
        session.running.push_back(2);
        session.done.push_back(1);
        assert_eq!(session.task_ids().collect::<Vec<_>>(), vec![3, 2, 1]);
    }
}
