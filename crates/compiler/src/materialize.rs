//! Declarative document → execution graph.
//!
//! `Materializer` places entries whose parents already exist, pass after
//! pass, until every entry is placed:
//! 1. An entry without parents becomes the root (only one is allowed).
//! 2. An entry with one parent becomes a trigger of that parent.
//! 3. An entry with several parents hangs off a join over exactly that set of
//!    parents, shared with every other entry that has the same set.
//!
//! The result is then canonicalized so that it does not depend on the order
//! in which entries were visited.

use std::collections::{BTreeMap, BTreeSet};

use catalog::{HookModelCatalog, TemplateCatalog};
use tracing::{debug, info, instrument, warn};

use crate::declarative::{self, NodeEntry};
use crate::defaults::expand_defaults;
use crate::error::{CompileError, Result};
use crate::models::{Conditions, Hook, Node, NodeContext, NodeId, NodeKind, Workflow, DEFAULT_HISTORY_LENGTH};
use crate::notifications;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the materializer.
#[derive(Debug, Clone)]
pub struct MaterializeConfig {
    /// Upper bound on placement passes. A pass that places nothing stops the
    /// loop earlier.
    pub max_attempts: usize,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self { max_attempts: 10_000 }
    }
}

// ---------------------------------------------------------------------------
// Synthetic references
// ---------------------------------------------------------------------------

/// Hands out join references for one materialization.
#[derive(Debug, Default)]
pub struct RefAllocator {
    next: usize,
}

impl RefAllocator {
    pub fn next_join_ref(&mut self) -> String {
        self.next += 1;
        format!("join-{}", self.next)
    }
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

pub struct Materializer<'a> {
    hooks: &'a dyn HookModelCatalog,
    templates: &'a dyn TemplateCatalog,
    config: MaterializeConfig,
}

impl<'a> Materializer<'a> {
    pub fn new(hooks: &'a dyn HookModelCatalog, templates: &'a dyn TemplateCatalog) -> Self {
        Self {
            hooks,
            templates,
            config: MaterializeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MaterializeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the execution graph of `doc`, with hooks, notifications,
    /// permissions and metadata.
    #[instrument(skip_all, fields(workflow = %doc.name, entries = doc.workflow.len()))]
    pub fn materialize(&self, doc: &declarative::Workflow) -> Result<Workflow> {
        doc.check_validity()?;
        doc.check_dependencies()?;
        doc.dependency_graph().detect_loops()?;
        for entry in &doc.notifications {
            notifications::check_entry(entry, |name| doc.workflow.contains_key(name))?;
        }

        let mut workflow = self.materialize_entries(&doc.name, &doc.workflow)?;

        for (name, entries) in &doc.hooks {
            let id = workflow
                .node_by_name(name)
                .ok_or_else(|| CompileError::NodeNotFound(name.clone()))?;
            for entry in entries {
                let model = self.hooks.require_hook_model(&entry.model)?;
                let hook = Hook {
                    model: entry.model.clone(),
                    config: expand_defaults(&entry.config, &model.default_config),
                    conditions: entry
                        .conditions
                        .as_ref()
                        .map(declarative::ConditionEntry::to_conditions)
                        .unwrap_or_default(),
                };
                debug!(node = %name, model = %hook.model, "attached hook");
                workflow.nodes[id.0].hooks.push(hook);
            }
        }

        workflow.description = doc.description.clone();
        workflow.permissions = doc.permissions.clone();
        workflow.notifications = notifications::resolve(&doc.notifications, &workflow, self.templates)?;
        workflow.metadata = doc.metadata.clone();
        workflow.purge_tags = doc.purge_tags.clone();
        workflow.retention_policy = doc.retention_policy.clone();
        workflow.history_length = doc
            .history_length
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_HISTORY_LENGTH);

        info!(
            nodes = workflow.nodes.len(),
            joins = workflow.joins.len(),
            notifications = workflow.notifications.len(),
            "workflow materialized"
        );
        Ok(workflow)
    }

    /// Build the node graph of `entries`, visited in the order given.
    ///
    /// Any visiting order yields the same workflow.
    pub fn materialize_entries<'e>(
        &self,
        name: &str,
        entries: impl IntoIterator<Item = (&'e String, &'e NodeEntry)>,
    ) -> Result<Workflow> {
        let mut pending: Vec<(&'e str, &'e NodeEntry)> =
            entries.into_iter().map(|(n, e)| (n.as_str(), e)).collect();
        declarative::check_payload_placement(pending.iter().copied())?;

        let mut builder = GraphBuilder::new(self.hooks);
        let mut attempts = 0usize;
        while !pending.is_empty() {
            if attempts >= self.config.max_attempts {
                warn!(attempts, pending = pending.len(), "placement attempt bound reached");
                break;
            }
            attempts += 1;

            let before = pending.len();
            let mut waiting = Vec::with_capacity(before);
            for (node_name, entry) in pending {
                if !builder.place(node_name, entry)? {
                    waiting.push((node_name, entry));
                }
            }
            pending = waiting;

            if pending.len() == before {
                break;
            }
        }

        if !pending.is_empty() {
            let mut nodes: Vec<String> = pending.iter().map(|(n, _)| n.to_string()).collect();
            nodes.sort();
            return Err(CompileError::UnresolvedNodes { nodes });
        }

        debug!(attempts, "all entries placed");
        builder.finish(name)
    }
}

// ---------------------------------------------------------------------------
// Graph builder
// ---------------------------------------------------------------------------

struct GraphBuilder<'a> {
    hooks: &'a dyn HookModelCatalog,
    nodes: Vec<Node>,
    by_name: BTreeMap<String, NodeId>,
    root: Option<NodeId>,
    joins: Vec<NodeId>,
    refs: RefAllocator,
}

impl<'a> GraphBuilder<'a> {
    fn new(hooks: &'a dyn HookModelCatalog) -> Self {
        Self {
            hooks,
            nodes: Vec::new(),
            by_name: BTreeMap::new(),
            root: None,
            joins: Vec::new(),
            refs: RefAllocator::default(),
        }
    }

    /// Place `entry` if all of its parents exist. Returns whether it was
    /// placed.
    fn place(&mut self, name: &str, entry: &NodeEntry) -> Result<bool> {
        let parents = entry.parents();
        if !parents.iter().all(|p| self.by_name.contains_key(*p)) {
            return Ok(false);
        }

        if parents.is_empty() {
            if let Some(root) = self.root {
                return Err(CompileError::SecondRoot {
                    node: name.to_string(),
                    root: self.nodes[root.0].name.clone(),
                });
            }
            let node = self.build_node(name, entry)?;
            let id = self.push(node);
            self.root = Some(id);
            debug!(node = %name, "placed root");
        } else if parents.len() == 1 {
            let parent = parents
                .first()
                .and_then(|p| self.by_name.get(*p))
                .copied()
                .ok_or_else(|| CompileError::NodeNotFound(name.to_string()))?;
            let node = self.build_node(name, entry)?;
            let id = self.push(node);
            self.nodes[parent.0].triggers.push(id);
            debug!(node = %name, parent = %self.nodes[parent.0].name, "placed trigger");
        } else if entry.is_join() {
            entry.check_join(name)?;
            let node = Node {
                permissions: entry.permissions.clone(),
                ..Node::new(
                    name,
                    name,
                    NodeKind::Join {
                        parents: parents.iter().map(|p| p.to_string()).collect(),
                        conditions: entry.conditions()?,
                    },
                )
            };
            let id = self.push(node);
            self.joins.push(id);
            debug!(node = %name, parents = parents.len(), "placed named join");
        } else {
            let node = self.build_node(name, entry)?;
            let join = self.join_for(&parents);
            let id = self.push(node);
            self.nodes[join.0].triggers.push(id);
            debug!(node = %name, join = %self.nodes[join.0].reference, "placed under join");
        }

        Ok(true)
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        if !node.name.is_empty() {
            self.by_name.insert(node.name.clone(), id);
        }
        self.nodes.push(node);
        id
    }

    /// The anonymous join over exactly `parents`, created on first use.
    fn join_for(&mut self, parents: &BTreeSet<&str>) -> NodeId {
        let wanted: Vec<String> = parents.iter().map(|p| p.to_string()).collect();
        let existing = self.joins.iter().copied().find(|id| {
            let node = &self.nodes[id.0];
            node.name.is_empty() && node.join_parents() == Some(wanted.as_slice())
        });
        if let Some(id) = existing {
            return id;
        }

        let reference = self.refs.next_join_ref();
        let id = self.push(Node::new(
            "",
            reference,
            NodeKind::Join {
                parents: wanted,
                conditions: Conditions::default(),
            },
        ));
        self.joins.push(id);
        id
    }

    fn build_node(&self, name: &str, entry: &NodeEntry) -> Result<Node> {
        let context = NodeContext {
            pipeline: entry.pipeline.clone(),
            application: entry.application.clone(),
            environment: entry.environment.clone(),
            integration: entry.integration.clone(),
            mutex: entry.one_at_a_time.unwrap_or(false),
            conditions: entry.conditions()?,
            default_payload: entry.payload.clone(),
            default_parameters: entry.parameters.clone(),
        };

        let kind = match (&entry.trigger, &entry.pipeline) {
            (Some(model), _) => {
                let outgoing = self.hooks.require_outgoing_hook_model(model)?;
                NodeKind::OutgoingHook {
                    context,
                    hook: Hook {
                        model: model.clone(),
                        config: expand_defaults(&entry.config, &outgoing.default_config),
                        conditions: Conditions::default(),
                    },
                }
            }
            (None, Some(_)) => NodeKind::Pipeline { context },
            (None, None) => NodeKind::Fork { context },
        };

        Ok(Node {
            permissions: entry.permissions.clone(),
            ..Node::new(name, name, kind)
        })
    }

    fn finish(self, name: &str) -> Result<Workflow> {
        let root = self.root.ok_or(CompileError::MissingRoot)?;
        canonicalize(name, self.nodes, root, self.joins)
    }
}

// ---------------------------------------------------------------------------
// Canonical form
// ---------------------------------------------------------------------------

/// Renumber the arena in a visiting order that only depends on names:
/// triggers sorted by child name, then the root subtree, then every join
/// subtree with joins sorted by parent set. Anonymous joins are renamed
/// `join-1..n` in that order, skipping references taken by a node name.
fn canonicalize(name: &str, mut nodes: Vec<Node>, root: NodeId, mut joins: Vec<NodeId>) -> Result<Workflow> {
    let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
    for node in nodes.iter_mut() {
        node.triggers.sort_by(|a, b| names[a.0].cmp(&names[b.0]));
    }
    joins.sort_by(|a, b| {
        let (a, b) = (&nodes[a.0], &nodes[b.0]);
        a.join_parents().cmp(&b.join_parents()).then_with(|| a.name.cmp(&b.name))
    });

    let mut order: Vec<NodeId> = Vec::with_capacity(nodes.len());
    let mut seen = vec![false; nodes.len()];
    for start in std::iter::once(root).chain(joins.iter().copied()) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            order.push(id);
            stack.extend(nodes[id.0].triggers.iter().rev().copied());
        }
    }
    order.extend((0..nodes.len()).map(NodeId).filter(|id| !seen[id.0]));

    let mut new_id = vec![NodeId(0); nodes.len()];
    for (position, old) in order.iter().enumerate() {
        new_id[old.0] = NodeId(position);
    }

    let mut slots: Vec<Option<Node>> = nodes.drain(..).map(Some).collect();
    let mut arena = Vec::with_capacity(slots.len());
    for old in &order {
        let mut node = slots[old.0]
            .take()
            .ok_or_else(|| CompileError::NodeNotFound(old.to_string()))?;
        for trigger in node.triggers.iter_mut() {
            *trigger = new_id[trigger.0];
        }
        arena.push(node);
    }

    let joins: Vec<NodeId> = joins.iter().map(|j| new_id[j.0]).collect();
    let taken: BTreeSet<String> = arena
        .iter()
        .filter(|n| !n.name.is_empty())
        .map(|n| n.name.clone())
        .collect();
    let mut refs = RefAllocator::default();
    for id in &joins {
        let join = &mut arena[id.0];
        if join.name.is_empty() {
            let mut reference = refs.next_join_ref();
            while taken.contains(&reference) {
                reference = refs.next_join_ref();
            }
            join.reference = reference;
        }
    }

    Ok(Workflow {
        name: name.to_string(),
        description: String::new(),
        nodes: arena,
        root: new_id[root.0],
        joins,
        permissions: BTreeMap::new(),
        notifications: Vec::new(),
        metadata: BTreeMap::new(),
        purge_tags: Vec::new(),
        retention_policy: None,
        history_length: DEFAULT_HISTORY_LENGTH,
    })
}
