use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::task::Task;

/// Outcome of a routing pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSelection {
    /// Winning capability
    pub selected: String,
    /// Score of the winner
    pub score: f64,
    /// Every capability that passed the filters, in registration order
    pub candidates: Vec<String>,
}

impl RouteSelection {
    /// Whether the choice was contested and is worth auditing
    pub fn is_contested(&self) -> bool {
        self.candidates.len() > 1
    }
}

/// Picks the best capability for a task
#[derive(Debug, Default, Clone, Copy)]
pub struct CapabilityRouter;

impl CapabilityRouter {
    pub fn new() -> Self {
        Self
    }

    /// Whether a capability is eligible to serve the task right now
    pub fn is_candidate(task: &Task, capability: &Capability) -> bool {
        capability.enabled
            && capability.has_capacity()
            && capability.capability_type.serves(task.task_type)
            && capability.has_tags(&task.required_tags)
    }

    /// Selects the highest scoring candidate. Ties go to the earliest registered.
    pub fn select<'a, I>(&self, task: &Task, capabilities: I) -> Option<RouteSelection>
    where
        I: IntoIterator<Item = &'a Capability>,
    {
        let candidates: Vec<&Capability> = capabilities
            .into_iter()
            .filter(|capability| Self::is_candidate(task, capability))
            .collect();

        let mut best: Option<(&Capability, f64)> = None;
        for capability in &candidates {
            let score = capability.score();
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((capability, score)),
            }
        }

        best.map(|(winner, score)| RouteSelection {
            selected: winner.id.clone(),
            score,
            candidates: candidates.iter().map(|c| c.id.clone()).collect(),
        })
    }
}
