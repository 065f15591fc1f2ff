//! Language Action Tree Search
//!
//! UCT-guided search over the whole tree. Each iteration selects the best
//! leaf, expands it, scores all new children, rolls the most promising child
//! forward with the proposer's top choices, and backpropagates the rollout's
//! reward through the committed ancestors.
//!
//! Rollout nodes hang off the tree through their parent link only. They are
//! reported, kept for the final pick, and otherwise left out of selection
//! and backpropagation.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    collaborators::{CandidateAction, CollaboratorError, ProposalRequest, SessionHandle},
    engine::{Replay, SearchEngine, SearchStatus, Verdict},
    progress::{Phase, SearchEvent, SelectionPurpose},
    tree::{NodeId, SearchTree},
    utils,
};

/// Outcome of one rollout
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rollout {
    /// Score of the rolled-out trajectory
    pub(crate) reward: f64,
    /// Node the rollout ended at
    pub(crate) terminal: NodeId,
    /// Rollout nodes created, in order
    pub(crate) simulated: Vec<NodeId>,
}

/// Result of one continuation step
enum Step {
    Executed(NodeId),
    Finished { node: NodeId, confidence: f64 },
    ProposerDone,
    Failed,
}

/// Orders candidate results by `(reward, depth)`
///
/// Equal rewards go to the deeper node.
pub fn compare_reward_depth(tree: &SearchTree, a: NodeId, b: NodeId) -> Ordering {
    let (a, b) = (&tree[a], &tree[b]);
    a.reward
        .total_cmp(&b.reward)
        .then_with(|| a.depth().cmp(&b.depth()))
}

/// Picks the best of `candidates` by `(reward, depth)`; the earliest wins a
/// full tie
pub fn best_by_reward_depth(
    tree: &SearchTree,
    candidates: impl IntoIterator<Item = NodeId>,
) -> Option<NodeId> {
    candidates.into_iter().fold(None, |best, node| match best {
        Some(current) if compare_reward_depth(tree, node, current) != Ordering::Greater => {
            Some(current)
        }
        _ => Some(node),
    })
}

impl SearchEngine {
    pub(crate) async fn run_lats(&mut self) -> Verdict {
        let root = self.tree.root();
        let mut rollout_ends = Vec::new();

        for iteration in 1..=self.config.iterations {
            if self.should_stop() {
                break;
            }
            self.statistics.iterations = iteration;
            self.emit(SearchEvent::IterationStart { iteration });
            info!("LATS iteration {}/{}", iteration, self.config.iterations);

            self.phase_start(Phase::Selection, Some(root));
            let selected = self.tree.best_leaf(root, &*self.selection_policy);
            self.phase_complete(Phase::Selection, selected);
            let Some(selected) = selected else {
                info!("All paths lead to terminal nodes. Ending search.");
                break;
            };

            let Some(expanded) = self.expand_selected(selected).await else {
                break;
            };
            if self.should_stop() {
                break;
            }

            self.evaluate_children(expanded).await;
            if self.should_stop() {
                break;
            }

            let Some(start) = self.most_valuable_child(expanded) else {
                continue;
            };
            let rollout = self.rollout(start).await;
            rollout_ends.push(rollout.terminal);
            if self.should_stop() {
                break;
            }

            self.backpropagate(rollout.terminal, rollout.reward, self.config.backpropagate_root);
            self.emit_tree_update();

            if rollout.reward >= 1.0 {
                info!("Rollout from node {} reached the goal", start);
                return Verdict::node(SearchStatus::Success, rollout.reward, rollout.terminal);
            }
        }

        let candidates = self.tree.committed().into_iter().chain(rollout_ends);
        let best = match best_by_reward_depth(&self.tree, candidates) {
            Some(best) if best != root => best,
            _ => return Verdict::nothing(),
        };
        let reward = self.tree[best].reward;
        let status = if reward >= 1.0 {
            SearchStatus::Success
        } else if reward > 0.0 {
            SearchStatus::PartialSuccess
        } else {
            SearchStatus::Failure
        };
        info!(
            "Best node {} at depth {} with reward {:.3}",
            best,
            self.tree[best].depth(),
            reward
        );
        Verdict::node(status, reward, best)
    }

    /// Expands the selected leaf, reselecting while expansion produces
    /// nothing
    ///
    /// Returns the node that got children, or `None` once the tree is
    /// exhausted or the search was cancelled.
    async fn expand_selected(&mut self, selected: NodeId) -> Option<NodeId> {
        let root = self.tree.root();
        let mut node = selected;

        loop {
            self.emit(SearchEvent::NodeSelected {
                node,
                purpose: SelectionPurpose::Expansion,
                depth: self.tree[node].depth(),
            });

            let children = if self.tree[node].is_leaf() {
                self.expand(node).await
            } else {
                self.tree[node].children().to_vec()
            };
            if self.is_cancelled() {
                return None;
            }

            for &child in &children {
                self.close_at_depth_bound(child);
            }
            self.propagate_terminal(node);

            if !children.is_empty() {
                return Some(node);
            }

            debug!("Node {} produced no children, reselecting", node);
            node = self.tree.best_leaf(root, &*self.selection_policy)?;
        }
    }

    /// First child holding the highest value
    fn most_valuable_child(&self, node: NodeId) -> Option<NodeId> {
        let mut best: Option<NodeId> = None;
        for &child in self.tree[node].children() {
            match best {
                Some(current) if self.tree[child].value <= self.tree[current].value => {}
                _ => best = Some(child),
            }
        }
        best
    }

    /// Rolls `start` forward until the goal checker is satisfied or the
    /// depth bound is reached
    pub(crate) async fn rollout(&mut self, start: NodeId) -> Rollout {
        self.phase_start(Phase::Simulation, Some(start));
        self.emit(SearchEvent::NodeSelected {
            node: start,
            purpose: SelectionPurpose::Simulation,
            depth: self.tree[start].depth(),
        });

        let rollout = match self.replay(start).await {
            Replay::Completed(session) => self.continue_rollout(start, session).await,
            Replay::Failed(failed) => Rollout {
                reward: 0.0,
                terminal: failed,
                simulated: Vec::new(),
            },
            Replay::SessionUnavailable | Replay::Interrupted => Rollout {
                reward: 0.0,
                terminal: start,
                simulated: Vec::new(),
            },
        };

        let terminal = &mut self.tree[rollout.terminal];
        terminal.reward = if terminal.is_simulated() {
            rollout.reward
        } else {
            terminal.reward.max(rollout.reward)
        };

        info!(
            "Rollout from node {} ended at {} after {} steps with reward {:.3}",
            start,
            rollout.terminal,
            rollout.simulated.len(),
            rollout.reward
        );
        self.emit(SearchEvent::SimulationResult {
            node: rollout.terminal,
            reward: rollout.reward,
            steps: rollout.simulated.len(),
        });
        if !rollout.simulated.is_empty() {
            self.emit(SearchEvent::SimulationRemoved {
                nodes: rollout.simulated.clone(),
                trajectory: self.tree.action_trajectory(rollout.terminal),
            });
        }
        self.phase_complete(Phase::Simulation, Some(start));
        rollout
    }

    async fn continue_rollout(&mut self, start: NodeId, session: SessionHandle) -> Rollout {
        let mut current = start;
        let mut simulated = Vec::new();
        let mut restarts = 0;
        let mut finished = None;

        while self.tree[current].depth() < self.config.max_depth && !self.is_cancelled() {
            match self.rollout_step(&session, current).await {
                Step::Executed(node) => {
                    simulated.push(node);
                    current = node;
                }
                Step::Finished { node, confidence } => {
                    simulated.push(node);
                    current = node;
                    finished = Some(confidence);
                    break;
                }
                Step::ProposerDone => break,
                Step::Failed => {
                    restarts += 1;
                    if restarts > self.config.max_rollout_restarts {
                        warn!(
                            "Rollout step from node {} failed {} times; keeping partial rollout",
                            current, restarts
                        );
                        break;
                    }
                    debug!("Restarting rollout step from node {}", current);
                }
            }
        }

        let reward = match finished {
            Some(confidence) => confidence,
            None if self.is_cancelled() => 0.0,
            None => self.final_goal_check(&session, current).await,
        };

        Rollout {
            reward,
            terminal: current,
            simulated,
        }
    }

    /// Proposes, executes and checks one continuation action
    async fn rollout_step(&mut self, session: &SessionHandle, current: NodeId) -> Step {
        let observation = self.observe(session).await;
        let trajectory = self.tree.action_trajectory(current);
        let proposer = Arc::clone(&self.collaborators.proposer);
        let request = ProposalRequest {
            trajectory: &trajectory,
            goal: &self.goal,
            images: &self.images,
            observation: observation.as_ref(),
            branching_factor: self.config.branching_factor,
        };
        let candidate = match self
            .guarded("propose", self.config.llm_timeout(), proposer.propose(request))
            .await
        {
            Ok(candidates) => match candidates.into_iter().next() {
                Some(candidate) => candidate,
                None => return Step::ProposerDone,
            },
            Err(CollaboratorError::Cancelled) => return Step::Failed,
            Err(e) => {
                self.statistics.proposer_failures += 1;
                self.report_failure("propose", Some(current), &e);
                return Step::Failed;
            }
        };
        if candidate.is_finish() {
            debug!("Proposer finished the rollout at node {}", current);
            return Step::ProposerDone;
        }

        for attempt in 1..=self.config.rollout_retry_count {
            if self.is_cancelled() {
                return Step::Failed;
            }
            match self.execute_continuation(session, current, &candidate).await {
                Ok(node) => {
                    self.tree[node].observation = observation.clone();
                    return match self.goal_check(node, None).await {
                        Some(confidence) => {
                            self.tree[node].reward = confidence;
                            Step::Finished { node, confidence }
                        }
                        None => Step::Executed(node),
                    };
                }
                Err(e) => debug!(
                    "Rollout attempt {}/{} of {} failed: {}",
                    attempt, self.config.rollout_retry_count, candidate.action, e
                ),
            }
        }

        Step::Failed
    }

    /// Runs one continuation action and records it as a rollout node
    async fn execute_continuation(
        &mut self,
        session: &SessionHandle,
        current: NodeId,
        candidate: &CandidateAction,
    ) -> Result<NodeId, CollaboratorError> {
        let browser = Arc::clone(&self.collaborators.browser);
        let target = self
            .guarded(
                "resolve_element",
                self.config.action_timeout(),
                browser.resolve_element(session, &candidate.action),
            )
            .await
            .unwrap_or(None);

        let executed = self
            .guarded(
                "execute",
                self.config.action_timeout(),
                browser.execute(session, &candidate.action, target.as_ref()),
            )
            .await?;
        if !executed {
            return Err(CollaboratorError::failed(format!(
                "action {} could not run",
                candidate.action
            )));
        }

        let feedback = Arc::clone(&self.collaborators.feedback);
        let description = candidate.description.clone();
        let page = match self
            .guarded(
                "feedback",
                self.config.llm_timeout(),
                feedback.feedback(session, &self.goal, &description),
            )
            .await
        {
            Ok(text) => Some(text),
            Err(CollaboratorError::Cancelled) => None,
            Err(e) => {
                self.report_failure("feedback", Some(current), &e);
                None
            }
        };

        let node = self.tree.add_simulated(current, candidate.clone(), target);
        self.tree[node].feedback = page;
        let simulated = &self.tree[node];
        self.emit(SearchEvent::NodeSimulated {
            node,
            parent: current,
            action: simulated.label().to_string(),
            description: simulated.description.clone(),
            depth: simulated.depth(),
        });
        Ok(node)
    }

    /// Asks the goal checker about the trajectory ending at `node`
    ///
    /// Returns the confidence when the goal is reached.
    async fn goal_check(&self, node: NodeId, screenshot: Option<&[u8]>) -> Option<f64> {
        let checker = Arc::clone(&self.collaborators.goal_checker);
        let trajectory = self.tree.action_trajectory(node);
        match self
            .guarded(
                "is_finished",
                self.config.llm_timeout(),
                checker.is_finished(&trajectory, &self.goal, screenshot),
            )
            .await
        {
            Ok(assessment) if assessment.finished => {
                Some(utils::normalize_score(assessment.confidence).unwrap_or(0.0))
            }
            Ok(_) => None,
            Err(CollaboratorError::Cancelled) => None,
            Err(e) => {
                self.report_failure("is_finished", Some(node), &e);
                None
            }
        }
    }

    /// Goal check on the full rollout trajectory with a fresh screenshot
    async fn final_goal_check(&self, session: &SessionHandle, node: NodeId) -> f64 {
        let observation = self.observe(session).await;
        let screenshot = observation.as_ref().and_then(|o| o.screenshot.as_deref());
        self.goal_check(node, screenshot).await.unwrap_or(0.0)
    }
}
