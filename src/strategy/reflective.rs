//! Monte Carlo search with reflection
//!
//! The state is one path from the root. Each iteration descends from the end
//! of the path, expands the leaf it reaches, scores the path and pushes that
//! score through every node on it. A poor score triggers a reflection: the
//! advisor names an earlier step to backtrack to, and the next iteration
//! resumes from there instead of from the root.

use log::{debug, info, warn};

use crate::{
    collaborators::{ChildSummary, CollaboratorError, TrajectoryStep},
    engine::{SearchEngine, SearchStatus, Verdict},
    progress::{Phase, SearchEvent, SelectionPurpose},
    tree::NodeId,
};

/// Truncation length for a backtrack to `step` on a path of `len` nodes
///
/// Keeps `step + 1` nodes, but never fewer than two while the path holds at
/// least one action. `None` when `step` is outside the path.
pub fn backtrack_len(len: usize, step: usize) -> Option<usize> {
    if step >= len {
        return None;
    }
    if len > 1 {
        Some(step.max(1) + 1)
    } else {
        Some(1)
    }
}

impl SearchEngine {
    pub(crate) async fn run_reflective_mcts(&mut self) -> Verdict {
        let root = self.tree.root();
        let mut path = vec![root];
        let mut best: Option<(f64, NodeId)> = None;

        for iteration in 1..=self.config.iterations {
            if self.should_stop() {
                break;
            }
            if self.tree[root].is_terminal() {
                info!("Every path from the root is terminal. Ending search.");
                break;
            }
            self.statistics.iterations = iteration;
            self.emit(SearchEvent::IterationStart { iteration });
            info!("Reflective MCTS iteration {}/{}", iteration, self.config.iterations);

            self.drop_terminal_tail(&mut path);

            self.phase_start(Phase::Selection, path.last().copied());
            self.descend(&mut path).await;
            self.phase_complete(Phase::Selection, path.last().copied());
            if self.should_stop() {
                break;
            }

            let leaf = *path.last().unwrap_or(&root);
            if !self.tree[leaf].is_terminal()
                && self.tree[leaf].depth() < self.config.max_depth
                && self.tree[leaf].is_leaf()
            {
                let children = self.expand(leaf).await;
                debug!("Expanded node {} into {} children", leaf, children.len());
            }
            if self.should_stop() {
                break;
            }

            self.phase_start(Phase::Simulation, Some(leaf));
            let score = self.score_trajectory(leaf).await.unwrap_or(0.0);
            self.phase_complete(Phase::Simulation, Some(leaf));
            self.settle_at_depth_bound(leaf);
            info!("Path of {} actions scored {:.3}", path.len() - 1, score);

            if best.map_or(true, |(best_score, _)| score > best_score) {
                info!("New best path found with score {:.3}", score);
                best = Some((score, leaf));
            }

            if score < self.config.reflection_threshold {
                self.reflect(&mut path, score).await;
            }

            let end = *path.last().unwrap_or(&root);
            self.backpropagate(end, score, true);
            self.emit_tree_update();
        }

        match best {
            Some((score, node)) if score > 0.0 => {
                let status = if score >= self.config.success_threshold {
                    SearchStatus::Success
                } else {
                    SearchStatus::PartialSuccess
                };
                Verdict::node(status, score, node)
            }
            _ => {
                let fallback = &self.config.fallback_action;
                warn!("No path scored above zero; returning fallback action {}", fallback.action);
                Verdict {
                    status: SearchStatus::Failure,
                    score: 0.0,
                    best_node: None,
                    actions: Some(vec![TrajectoryStep {
                        action: fallback.action.clone(),
                        description: fallback.description.clone(),
                        target: None,
                        feedback: None,
                    }]),
                }
            }
        }
    }

    /// Pops terminal leaves off the end of the path so selection can move on
    fn drop_terminal_tail(&mut self, path: &mut Vec<NodeId>) {
        let from_len = path.len();
        while path.len() > 1 {
            let last = path[path.len() - 1];
            if self.tree[last].is_terminal() {
                path.pop();
            } else {
                break;
            }
        }
        if path.len() != from_len {
            self.emit(SearchEvent::Backtracking {
                from_len,
                to_len: path.len(),
            });
        }
    }

    /// Extends the path downwards until it reaches a leaf or terminal node
    async fn descend(&mut self, path: &mut Vec<NodeId>) {
        loop {
            let current = match path.last() {
                Some(&current) => current,
                None => return,
            };
            if self.tree[current].is_terminal() || self.tree[current].is_leaf() {
                return;
            }

            let next = match self.collaborators.advisor.clone() {
                Some(advisor) => {
                    let children = self.tree[current].children().to_vec();
                    let summaries: Vec<ChildSummary> = children
                        .iter()
                        .map(|&c| {
                            let node = &self.tree[c];
                            ChildSummary {
                                action: node.label().to_string(),
                                description: node.description.clone(),
                                visits: node.visits,
                                value: node.value,
                            }
                        })
                        .collect();
                    let trajectory = self.tree.action_trajectory(current);
                    let picked = self
                        .guarded(
                            "select_child",
                            self.config.llm_timeout(),
                            advisor.select_child(&self.goal, &trajectory, &summaries),
                        )
                        .await;
                    match picked {
                        Ok(index) if index < children.len() => Some(children[index]),
                        Ok(index) => {
                            warn!(
                                "Advisor picked child {} of {}; ending selection",
                                index,
                                children.len()
                            );
                            None
                        }
                        Err(CollaboratorError::Cancelled) => None,
                        Err(e) => {
                            self.report_failure("select_child", Some(current), &e);
                            None
                        }
                    }
                }
                None => self.selection_policy.select_child(&self.tree, current),
            };

            let Some(next) = next else { return };
            path.push(next);
            self.emit(SearchEvent::NodeSelected {
                node: next,
                purpose: SelectionPurpose::Path,
                depth: self.tree[next].depth(),
            });
        }
    }

    /// Asks the advisor where to backtrack and truncates the path
    async fn reflect(&mut self, path: &mut Vec<NodeId>, score: f64) {
        self.phase_start(Phase::Reflection, path.last().copied());

        let Some(advisor) = self.collaborators.advisor.clone() else {
            debug!("No advisor configured; skipping reflection");
            self.emit(SearchEvent::Reflection {
                score,
                backtrack_to_step: None,
                reason: "no advisor configured".to_string(),
                skipped: true,
            });
            self.phase_complete(Phase::Reflection, path.last().copied());
            return;
        };

        let end = *path.last().unwrap_or(&self.tree.root());
        let trajectory = self.tree.action_trajectory(end);
        let reflected = self
            .guarded(
                "reflect",
                self.config.llm_timeout(),
                advisor.reflect(&self.goal, &trajectory, score),
            )
            .await;

        match reflected {
            Ok(reflection) => {
                for improvement in &reflection.suggested_improvements {
                    debug!("Suggested improvement: {}", improvement);
                }
                let from_len = path.len();
                let to_len = backtrack_len(from_len, reflection.backtrack_to_step);
                self.emit(SearchEvent::Reflection {
                    score,
                    backtrack_to_step: Some(reflection.backtrack_to_step),
                    reason: reflection.reason.clone(),
                    skipped: to_len.is_none(),
                });
                match to_len {
                    Some(to_len) if to_len == from_len => {
                        debug!("Backtrack target is the end of the path; nothing to drop");
                    }
                    Some(to_len) => {
                        info!(
                            "Backtracking to step {}: {}",
                            reflection.backtrack_to_step, reflection.reason
                        );
                        path.truncate(to_len);
                        self.emit(SearchEvent::Backtracking { from_len, to_len });
                    }
                    None => warn!(
                        "Backtrack step {} is outside a path of {} nodes",
                        reflection.backtrack_to_step, from_len
                    ),
                }
            }
            Err(e) => {
                if !matches!(e, CollaboratorError::Cancelled) {
                    self.report_failure("reflect", Some(end), &e);
                }
                self.emit(SearchEvent::Reflection {
                    score,
                    backtrack_to_step: None,
                    reason: e.to_string(),
                    skipped: true,
                });
            }
        }

        self.phase_complete(Phase::Reflection, path.last().copied());
    }
}
