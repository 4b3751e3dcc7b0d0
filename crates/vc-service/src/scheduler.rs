//! Task admission
//!
//! Only the head of the global waiting queue is considered, so tasks are
//! admitted in submission order across all engine types.

use crate::service::{ServiceInner, ServiceState};
use crate::session::unlink;
use crate::task::{TaskId, TaskStatus};
use std::sync::atomic::Ordering;
use vc_hw::TaskType;

/// Result of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Submit the head task now
    pub admit: bool,
    /// Run the pending reset first
    pub reset: bool,
}

/// Whether a `kind` task fits next to the current slot occupancy.
///
/// `codec` is the type of the task holding the codec slot.
pub fn can_admit(kind: TaskType, codec: Option<TaskType>, pproc_busy: bool, auto_freq: bool) -> bool {
    match kind {
        TaskType::Enc | TaskType::DecPp => codec.is_none() && !pproc_busy,
        // No clock change while the post-processor runs
        TaskType::Dec => codec.is_none() && !(auto_freq && pproc_busy),
        TaskType::Pp => match codec {
            None => !pproc_busy,
            Some(TaskType::Dec) => !pproc_busy && !auto_freq,
            Some(_) => false,
        },
    }
}

/// Admission decision for the head task.
///
/// A pending reset runs only once the pipeline is idle; until then it
/// blocks admission of anything that needs an idle pipeline and lets the
/// rest through.
pub fn decide(
    kind: TaskType,
    codec: Option<TaskType>,
    pproc_busy: bool,
    auto_freq: bool,
    reset_pending: bool,
) -> Admission {
    let idle = codec.is_none() && !pproc_busy;
    Admission {
        admit: (idle || !reset_pending) && can_admit(kind, codec, pproc_busy, auto_freq),
        reset: reset_pending && idle,
    }
}

impl ServiceInner {
    /// One scheduling pass. Runs after every submission and completion.
    pub(crate) fn try_set_reg(&self, state: &mut ServiceState) {
        let Some(&head) = state.waiting.front() else {
            // Idle clock reduction applies only with nothing on the hardware, for every variant
            if state.running.is_empty() {
                self.reduce_freq(state);
            }
            return;
        };

        self.power_on(state);

        let Some((kind, subdev)) = state.tasks.get(&head).map(|t| (t.kind, t.subdev)) else {
            tracing::error!("waiting task {} missing from arena", head);
            state.waiting.pop_front();
            return;
        };
        let codec = state
            .slots
            .codec
            .and_then(|id| state.tasks.get(&id))
            .map(|t| t.kind);
        let decision = decide(
            kind,
            codec,
            state.slots.pproc.is_some(),
            state.auto_freq,
            self.reset_request.load(Ordering::Acquire) > 0,
        );

        if decision.reset {
            self.reset(state, subdev);
        }
        if decision.admit {
            self.admit(state, head);
        } else {
            tracing::debug!(
                "{:?} task {} waits: codec {:?}, pproc {:?}",
                kind,
                head,
                state.slots.codec,
                state.slots.pproc
            );
        }
    }

    fn admit(&self, state: &mut ServiceState, id: TaskId) {
        unlink(&mut state.waiting, id);
        state.running.push_back(id);

        let Some(task) = state.tasks.get_mut(&id) else {
            return;
        };
        task.status = TaskStatus::Running;
        let session = task.session;
        if let Some(s) = state.sessions.get_mut(&session) {
            unlink(&mut s.waiting, id);
            s.running.push_back(id);
        }

        tracing::debug!("task {} of session {} admitted", id, session);
        self.copy_to_hw(state, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskType::*;

    #[test]
    fn test_encoder_needs_idle_pipeline() {
        assert!(can_admit(Enc, None, false, false));
        assert!(!can_admit(Enc, Some(Dec), false, false));
        assert!(!can_admit(Enc, None, true, false));
    }

    #[test]
    fn test_decoder_and_auto_freq() {
        assert!(can_admit(Dec, None, true, false));
        assert!(!can_admit(Dec, None, true, true));
        assert!(!can_admit(Dec, Some(Enc), false, false));
    }

    #[test]
    fn test_pp_chains_off_decode() {
        assert!(can_admit(Pp, None, false, true));
        assert!(can_admit(Pp, Some(Dec), false, false));
        assert!(!can_admit(Pp, Some(Dec), false, true));
        assert!(!can_admit(Pp, Some(Enc), false, false));
        assert!(!can_admit(Pp, Some(Dec), true, false));
    }

    #[test]
    fn test_combined_needs_both_slots() {
        assert!(can_admit(DecPp, None, false, true));
        assert!(!can_admit(DecPp, None, true, false));
    }

    #[test]
    fn test_reset_waits_for_idle() {
        let busy = decide(Dec, None, true, false, true);
        assert_eq!(busy, Admission { admit: false, reset: false });

        let idle = decide(Enc, None, false, false, true);
        assert_eq!(idle, Admission { admit: true, reset: true });

        // Without a pending reset the normal rule applies
        let pp = decide(Pp, Some(Dec), false, false, false);
        assert!(pp.admit && !pp.reset);
    }
}
