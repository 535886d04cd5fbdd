//! Transfer targets and the instructions that introduce them.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::agents::{Agent, LlmAgent};
use crate::tools::TRANSFER_TO_AGENT;

/// Agents `agent` may hand the turn to.
///
/// Children are always eligible. The parent and siblings are eligible only
/// when the parent is itself model-driven and the agent allows it.
pub fn transfer_targets(root: &Arc<Agent>, agent: &Arc<Agent>, llm: &LlmAgent) -> Vec<Arc<Agent>> {
    let mut targets: Vec<Arc<Agent>> = agent.sub_agents().to_vec();

    let Some(parent) = Agent::find_parent(root, agent.name()) else {
        return targets;
    };
    if parent.as_llm().is_none() {
        return targets;
    }
    if !llm.disallow_transfer_to_parent {
        targets.push(Arc::clone(&parent));
    }
    if !llm.disallow_transfer_to_peers {
        targets.extend(
            parent
                .sub_agents()
                .iter()
                .filter(|peer| peer.name() != agent.name())
                .cloned(),
        );
    }
    targets
}

/// Instruction listing the targets and how to transfer to them.
pub fn transfer_instructions(targets: &[Arc<Agent>], parent: Option<&Arc<Agent>>) -> String {
    let mut text = String::from("You have a list of other agents to transfer to:\n");
    for target in targets {
        let _ = write!(
            text,
            "\nAgent name: {}\nAgent description: {}\n",
            target.name(),
            target.description()
        );
    }
    let _ = write!(
        text,
        "\nIf you are the best to answer the question according to your description, you \
         can answer it.\n\nIf another agent is better for answering the question according \
         to its description, call `{TRANSFER_TO_AGENT}` function to transfer the question to \
         that agent. When transferring, do not generate any text other than the function \
         call.\n"
    );
    if let Some(parent) = parent {
        if targets.iter().any(|t| t.name() == parent.name()) {
            let _ = write!(
                text,
                "\nYour parent agent is {}. If neither the other agents nor you are best for \
                 answering the question according to the descriptions, transfer to your parent \
                 agent.\n",
                parent.name()
            );
        }
    }
    text
}
