//! Message-stream rewriting.
//!
//! [`PlanMutator`] lazily applies a [`MsgMutator`] to every message of a
//! plan. A mutator may forward a message unchanged, replace it, or surround it
//! with inserted messages; it never sees messages out of order.

use std::collections::VecDeque;
use std::iter::FusedIterator;

use super::msg::Msg;
use crate::error::PlanResult;

/// Rewrites one message into the messages that replace it.
pub trait MsgMutator {
    /// Messages to emit in place of `msg`, in order.
    fn mutate(&mut self, msg: Msg) -> PlanResult<Vec<Msg>>;
}

impl<F> MsgMutator for F
where
    F: FnMut(Msg) -> PlanResult<Vec<Msg>>,
{
    fn mutate(&mut self, msg: Msg) -> PlanResult<Vec<Msg>> {
        self(msg)
    }
}

/// Iterator over a plan rewritten by a [`MsgMutator`].
///
/// Yields `Err` at most once; the iterator ends after it.
#[derive(Debug)]
pub struct PlanMutator<I, M> {
    plan: I,
    mutator: M,
    pending: VecDeque<Msg>,
    failed: bool,
}

impl<I, M> PlanMutator<I, M>
where
    I: Iterator<Item = Msg>,
    M: MsgMutator,
{
    /// Rewrite `plan` with `mutator`.
    pub fn new(plan: I, mutator: M) -> Self {
        Self {
            plan,
            mutator,
            pending: VecDeque::new(),
            failed: false,
        }
    }

    /// The mutator, for inspecting its state.
    pub fn mutator(&self) -> &M {
        &self.mutator
    }
}

impl<I, M> Iterator for PlanMutator<I, M>
where
    I: Iterator<Item = Msg>,
    M: MsgMutator,
{
    type Item = PlanResult<Msg>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(msg) = self.pending.pop_front() {
                return Some(Ok(msg));
            }

            let msg = self.plan.next()?;
            match self.mutator.mutate(msg) {
                Ok(replacement) => self.pending.extend(replacement),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<I, M> FusedIterator for PlanMutator<I, M>
where
    I: Iterator<Item = Msg>,
    M: MsgMutator,
{
}

/// Rewrite `plan` with `mutator`.
pub fn plan_mutator<P, M>(plan: P, mutator: M) -> PlanMutator<P::IntoIter, M>
where
    P: IntoIterator<Item = Msg>,
    M: MsgMutator,
{
    PlanMutator::new(plan.into_iter(), mutator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlanError;
    use crate::plan::msg::{Command, DeviceRef};
    use crate::plan::stubs;

    #[test]
    fn test_identity_passes_through() {
        let det = DeviceRef::new("det");
        let plan = stubs::count(&[det], 2);
        let out: Vec<Msg> = plan_mutator(plan.clone(), |msg: Msg| Ok(vec![msg]))
            .collect::<PlanResult<_>>()
            .unwrap();
        assert_eq!(out, plan);
    }

    #[test]
    fn test_insert_and_drop() {
        let det = DeviceRef::new("det");
        let plan = vec![stubs::checkpoint(), stubs::read(&det), stubs::save()];
        let out: Vec<Command> = plan_mutator(plan, |msg: Msg| {
            Ok(match msg.command {
                Command::Checkpoint => vec![],
                Command::Read => vec![stubs::create("primary"), msg],
                _ => vec![msg],
            })
        })
        .map(|m| m.map(|m| m.command))
        .collect::<PlanResult<_>>()
        .unwrap();
        assert_eq!(out, vec![Command::Create, Command::Read, Command::Save]);
    }

    #[test]
    fn test_error_ends_stream() {
        let plan = vec![stubs::checkpoint(), stubs::save(), stubs::checkpoint()];
        let mut mutated = plan_mutator(plan, |msg: Msg| {
            if msg.command == Command::Save {
                Err(PlanError::MisconfiguredScan("boom".to_string()))
            } else {
                Ok(vec![msg])
            }
        });

        assert!(matches!(mutated.next(), Some(Ok(_))));
        assert!(matches!(mutated.next(), Some(Err(PlanError::MisconfiguredScan(_)))));
        assert!(mutated.next().is_none());
        assert!(mutated.next().is_none());
    }
}
