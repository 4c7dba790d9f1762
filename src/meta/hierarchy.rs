//! Rooted forest of subsumption relations.

use crate::identifier::Identifier;

struct Node {
    id: Identifier,
    children: Vec<Node>,
}

impl Node {
    fn leaf(id: Identifier) -> Self {
        Self {
            id,
            children: Vec::new(),
        }
    }

    fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }

    /// Removes and returns the subtree rooted at `id`, searching this node's
    /// children recursively (not this node itself).
    fn take_child(&mut self, id: Identifier) -> Option<Node> {
        if let Some(pos) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.remove(pos));
        }
        for child in &mut self.children {
            if let Some(found) = child.take_child(id) {
                return Some(found);
            }
        }
        None
    }

    fn find(&self, id: Identifier) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    fn to_string_verbose(&self, indent: &str) -> String {
        let mut out = format!("{indent}\u{2218}{}\n", display_id(self.id));
        for child in &self.children {
            out.push_str(&child.to_string_verbose(&format!("{indent}\t")));
        }
        out
    }

    fn to_string_compact(&self, indent: &str) -> String {
        if self.is_terminal() {
            return String::new();
        }
        let mut out = format!("{indent}\u{2218}{}\n", display_id(self.id));
        let mut model_agent_count = 0usize;
        for child in &self.children {
            if child.is_terminal() {
                model_agent_count += 1;
                continue;
            }
            out.push_str(&child.to_string_compact(&format!("{indent}\t")));
        }
        if model_agent_count > 0 {
            out.push_str(&format!(
                "{indent}\t\u{2218}[...] ({model_agent_count} model agents)\n"
            ));
        }
        out
    }
}

fn display_id(id: Identifier) -> String {
    id.to_string()
}

/// Rooted forest tracking which agent subsumes which. Every model agent
/// begins as a root; subsumption moves subsumed nodes under a new parent
/// node, which itself becomes a root; dissolution reparents a node's direct
/// children to wherever the dissolved node itself was attached (spec §4.6).
#[derive(Default)]
pub struct MetaHierarchy {
    roots: Vec<Node>,
}

impl MetaHierarchy {
    /// Builds a fresh forest with every agent in `agents` as an unparented
    /// root.
    #[must_use]
    pub fn new(agents: impl IntoIterator<Item = Identifier>) -> Self {
        Self {
            roots: agents.into_iter().map(Node::leaf).collect(),
        }
    }

    /// Registers a fresh root-level agent (used when a model agent is added
    /// after the hierarchy was first built).
    pub fn add_agent(&mut self, id: Identifier) {
        self.roots.push(Node::leaf(id));
    }

    fn remove_root(&mut self, id: Identifier) -> Option<Node> {
        let pos = self.roots.iter().position(|n| n.id == id)?;
        Some(self.roots.remove(pos))
    }

    fn take_node(&mut self, id: Identifier) -> Option<Node> {
        if let Some(node) = self.remove_root(id) {
            return Some(node);
        }
        for root in &mut self.roots {
            if let Some(node) = root.take_child(id) {
                return Some(node);
            }
        }
        None
    }

    /// Moves every id in `subsumed_agents` (wherever it currently sits in the
    /// forest — root or nested) under a brand-new node `meta_agent`, which is
    /// itself added as a root.
    pub fn subsume(&mut self, meta_agent: Identifier, subsumed_agents: &[Identifier]) {
        let children = subsumed_agents
            .iter()
            .filter_map(|id| self.take_node(*id))
            .collect();
        self.roots.push(Node {
            id: meta_agent,
            children,
        });
    }

    /// Detaches `meta_agent`, re-rooting its direct children to wherever
    /// `meta_agent` itself was attached (the forest root, since a meta-agent
    /// is always pushed as a root by `subsume` — this asymmetry matches the
    /// reference implementation exactly), and removes `meta_agent` from the
    /// forest. A no-op if `meta_agent` is not present.
    pub fn dissolve(&mut self, meta_agent: Identifier) {
        let Some(mut node) = self.take_node(meta_agent) else {
            return;
        };
        self.roots.append(&mut node.children);
    }

    #[must_use]
    pub fn contains(&self, id: Identifier) -> bool {
        self.roots.iter().any(|root| root.find(id).is_some())
    }

    #[must_use]
    pub fn children_of(&self, id: Identifier) -> Option<Vec<Identifier>> {
        self.roots
            .iter()
            .find_map(|root| root.find(id))
            .map(|node| node.children.iter().map(|c| c.id).collect())
    }

    #[must_use]
    pub fn to_string_verbose(&self) -> String {
        self.roots.iter().map(|r| r.to_string_verbose("")).collect()
    }

    #[must_use]
    pub fn to_string_compact(&self) -> String {
        let mut out = String::new();
        let mut model_agent_count = 0usize;
        for root in &self.roots {
            if root.is_terminal() {
                model_agent_count += 1;
                continue;
            }
            out.push_str(&root.to_string_compact(""));
        }
        if model_agent_count > 0 {
            out.push_str(&format!("\u{2218}[...] ({model_agent_count} model agents)\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn every_agent_starts_as_a_root() {
        let a = Identifier::generate();
        let b = Identifier::generate();
        let hierarchy = MetaHierarchy::new([a, b]);
        assert!(hierarchy.contains(a));
        assert!(hierarchy.contains(b));
        assert_eq!(hierarchy.children_of(a), Some(vec![]));
    }

    #[test]
    fn subsume_then_dissolve_round_trips_to_a_flat_root_set() {
        let a = Identifier::generate();
        let b = Identifier::generate();
        let meta = Identifier::generate();
        let mut hierarchy = MetaHierarchy::new([a, b]);

        hierarchy.subsume(meta, &[a, b]);
        let mut children = hierarchy.children_of(meta).unwrap();
        children.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(children, expected);

        hierarchy.dissolve(meta);
        assert!(!hierarchy.contains(meta));
        assert!(hierarchy.contains(a));
        assert!(hierarchy.contains(b));
        assert_eq!(hierarchy.children_of(a), Some(vec![]));
        assert_eq!(hierarchy.children_of(b), Some(vec![]));
    }

    #[test]
    fn nested_subsumption_reparents_one_level_on_dissolve() {
        let a = Identifier::generate();
        let meta1 = Identifier::generate();
        let meta2 = Identifier::generate();
        let mut hierarchy = MetaHierarchy::new([a]);

        hierarchy.subsume(meta1, &[a]);
        hierarchy.subsume(meta2, &[meta1]);
        assert_eq!(hierarchy.children_of(meta2), Some(vec![meta1]));

        hierarchy.dissolve(meta2);
        assert!(hierarchy.contains(meta1));
        assert!(!hierarchy.contains(meta2));
        assert_eq!(hierarchy.children_of(meta1), Some(vec![a]));
    }

    #[test]
    fn compact_rendering_collapses_terminal_children_into_a_count() {
        let a = Identifier::generate();
        let b = Identifier::generate();
        let meta = Identifier::generate();
        let mut hierarchy = MetaHierarchy::new([a, b]);
        hierarchy.subsume(meta, &[a, b]);

        let compact = hierarchy.to_string_compact();
        assert!(compact.contains("2 model agents"));
    }

    proptest! {
        /// Subsume then dissolve must return the hierarchy exactly to its
        /// prior shape for the affected subtree, order-insensitive on
        /// siblings (spec §8 round trip property).
        #[test]
        fn subsume_then_dissolve_round_trips_for_any_group_size(group_size in 1usize..12) {
            let agents: Vec<Identifier> = (0..group_size).map(|_| Identifier::generate()).collect();
            let meta = Identifier::generate();
            let mut hierarchy = MetaHierarchy::new(agents.clone());

            hierarchy.subsume(meta, &agents);
            prop_assert!(hierarchy.contains(meta));
            for agent in &agents {
                prop_assert_eq!(hierarchy.children_of(*agent), Some(vec![]));
            }

            hierarchy.dissolve(meta);
            prop_assert!(!hierarchy.contains(meta));
            for agent in &agents {
                prop_assert!(hierarchy.contains(*agent));
                prop_assert_eq!(hierarchy.children_of(*agent), Some(vec![]));
            }
        }

        /// Dissolving a meta-agent that subsumed only a subset of the
        /// population must leave the untouched roots alone.
        #[test]
        fn dissolve_does_not_disturb_unrelated_roots(
            subsumed_count in 1usize..6,
            untouched_count in 1usize..6,
        ) {
            let subsumed: Vec<Identifier> = (0..subsumed_count).map(|_| Identifier::generate()).collect();
            let untouched: Vec<Identifier> = (0..untouched_count).map(|_| Identifier::generate()).collect();
            let meta = Identifier::generate();
            let mut all = subsumed.clone();
            all.extend(untouched.iter().copied());
            let mut hierarchy = MetaHierarchy::new(all);

            hierarchy.subsume(meta, &subsumed);
            hierarchy.dissolve(meta);

            for agent in &untouched {
                prop_assert_eq!(hierarchy.children_of(*agent), Some(vec![]));
            }
        }
    }
}
