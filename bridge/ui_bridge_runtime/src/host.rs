//! Host nodes: the local mirror of the renderer's widget tree.
//!
//! Children form a singly-linked sibling list owned by the parent
//! (`first_child` -> `next_sibling` -> ...); the parent link is weak.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::protocol::{Action, Handler};
use crate::reactive::Teardown;
use crate::vnode::PropValue;

/// Handler bucket on an element: one specific action, or every action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    Action(Action),
    Any,
}

pub(crate) struct ElementData {
    pub(crate) tag: String,
    pub(crate) widget_kind: String,
    pub(crate) props: RefCell<HashMap<String, PropValue>>,
    pub(crate) style: RefCell<Map<String, Value>>,
    pub(crate) params: RefCell<Map<String, Value>>,
    pub(crate) handlers: RefCell<HashMap<HandlerKey, Vec<Handler>>>,
}

pub(crate) enum NodeKind {
    Root { attach_to: Option<String> },
    Element(ElementData),
    Text { text: RefCell<String> },
}

pub(crate) struct NodeInner {
    pub(crate) kind: NodeKind,
    widget_id: RefCell<Option<String>>,
    parent: RefCell<Weak<NodeInner>>,
    first_child: RefCell<Option<HostNode>>,
    next_sibling: RefCell<Option<HostNode>>,
    mounted: Cell<bool>,
    disposed: Cell<bool>,
    // Identity of the virtual node this was materialized from.
    origin: Cell<Option<usize>>,
    teardowns: RefCell<Vec<Teardown>>,
}

#[derive(Clone)]
pub struct HostNode(pub(crate) Rc<NodeInner>);

#[derive(Clone)]
pub struct WeakHostNode(Weak<NodeInner>);

impl WeakHostNode {
    pub fn upgrade(&self) -> Option<HostNode> {
        self.0.upgrade().map(HostNode)
    }
}

impl HostNode {
    fn with_kind(kind: NodeKind, widget_id: Option<String>, mounted: bool) -> Self {
        HostNode(Rc::new(NodeInner {
            kind,
            widget_id: RefCell::new(widget_id),
            parent: RefCell::new(Weak::new()),
            first_child: RefCell::new(None),
            next_sibling: RefCell::new(None),
            mounted: Cell::new(mounted),
            disposed: Cell::new(false),
            origin: Cell::new(None),
            teardowns: RefCell::new(Vec::new()),
        }))
    }

    /// Sentinel parent standing for an existing remote widget (or the
    /// top-level container). Always mounted.
    pub fn new_root(attach_to: Option<String>) -> Self {
        Self::with_kind(NodeKind::Root { attach_to }, None, true)
    }

    pub(crate) fn new_element(
        tag: &str,
        widget_kind: &str,
        widget_id: String,
        style: Map<String, Value>,
    ) -> Self {
        Self::with_kind(
            NodeKind::Element(ElementData {
                tag: tag.to_string(),
                widget_kind: widget_kind.to_string(),
                props: RefCell::new(HashMap::new()),
                style: RefCell::new(style),
                params: RefCell::new(Map::new()),
                handlers: RefCell::new(HashMap::new()),
            }),
            Some(widget_id),
            false,
        )
    }

    pub(crate) fn new_text(widget_id: String, text: String) -> Self {
        Self::with_kind(
            NodeKind::Text {
                text: RefCell::new(text),
            },
            Some(widget_id),
            false,
        )
    }

    pub fn downgrade(&self) -> WeakHostNode {
        WeakHostNode(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &HostNode) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn parent(&self) -> Option<HostNode> {
        self.0.parent.borrow().upgrade().map(HostNode)
    }

    pub fn first_child(&self) -> Option<HostNode> {
        self.0.first_child.borrow().clone()
    }

    pub fn next_sibling(&self) -> Option<HostNode> {
        self.0.next_sibling.borrow().clone()
    }

    pub fn children(&self) -> Vec<HostNode> {
        let mut children = Vec::new();
        let mut cursor = self.first_child();
        while let Some(child) = cursor {
            cursor = child.next_sibling();
            children.push(child);
        }
        children
    }

    pub fn is_text(&self) -> bool {
        matches!(self.0.kind, NodeKind::Text { .. })
    }

    pub fn is_root(&self) -> bool {
        matches!(self.0.kind, NodeKind::Root { .. })
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    pub(crate) fn set_mounted(&self, mounted: bool) {
        self.0.mounted.set(mounted);
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    pub(crate) fn mark_disposed(&self) {
        self.0.disposed.set(true);
    }

    pub(crate) fn origin(&self) -> Option<usize> {
        self.0.origin.get()
    }

    pub(crate) fn set_origin(&self, origin: usize) {
        self.0.origin.set(Some(origin));
    }

    pub fn widget_id(&self) -> Option<String> {
        self.0.widget_id.borrow().clone()
    }

    pub(crate) fn set_widget_id(&self, widget_id: String) {
        *self.0.widget_id.borrow_mut() = Some(widget_id);
    }

    /// Remote id children of this node are created under. For a root that is
    /// its attach point; `None` means the top-level container.
    pub(crate) fn remote_parent_id(&self) -> Option<String> {
        match &self.0.kind {
            NodeKind::Root { attach_to } => attach_to.clone(),
            NodeKind::Element(_) | NodeKind::Text { .. } => self.widget_id(),
        }
    }

    pub fn tag(&self) -> Option<String> {
        self.element().map(|element| element.tag.clone())
    }

    pub fn widget_kind(&self) -> Option<String> {
        match &self.0.kind {
            NodeKind::Element(element) => Some(element.widget_kind.clone()),
            NodeKind::Text { .. } => Some("label".to_string()),
            NodeKind::Root { .. } => None,
        }
    }

    pub fn text(&self) -> Option<String> {
        match &self.0.kind {
            NodeKind::Text { text } => Some(text.borrow().clone()),
            NodeKind::Element(element) => element
                .props
                .borrow()
                .get("text")
                .map(PropValue::to_text),
            NodeKind::Root { .. } => None,
        }
    }

    pub(crate) fn set_text(&self, value: String) -> bool {
        match &self.0.kind {
            NodeKind::Text { text } => {
                let changed = *text.borrow() != value;
                *text.borrow_mut() = value;
                changed
            }
            NodeKind::Element(_) | NodeKind::Root { .. } => false,
        }
    }

    pub(crate) fn element(&self) -> Option<&ElementData> {
        match &self.0.kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Root { .. } | NodeKind::Text { .. } => None,
        }
    }

    pub fn prop(&self, name: &str) -> Option<PropValue> {
        self.element()
            .and_then(|element| element.props.borrow().get(name).cloned())
    }

    pub fn style(&self) -> Map<String, Value> {
        self.element()
            .map(|element| element.style.borrow().clone())
            .unwrap_or_default()
    }

    pub fn params(&self) -> Map<String, Value> {
        self.element()
            .map(|element| element.params.borrow().clone())
            .unwrap_or_default()
    }

    pub fn handlers_for(&self, key: HandlerKey) -> Vec<Handler> {
        self.element()
            .and_then(|element| element.handlers.borrow().get(&key).cloned())
            .unwrap_or_default()
    }

    pub(crate) fn add_handler(&self, key: HandlerKey, handler: Handler) {
        if let Some(element) = self.element() {
            element
                .handlers
                .borrow_mut()
                .entry(key)
                .or_default()
                .push(handler);
        }
    }

    pub(crate) fn clear_handlers_for(&self, key: HandlerKey) {
        if let Some(element) = self.element() {
            element.handlers.borrow_mut().remove(&key);
        }
    }

    pub(crate) fn clear_handlers(&self) {
        if let Some(element) = self.element() {
            element.handlers.borrow_mut().clear();
        }
    }

    pub(crate) fn add_teardown(&self, teardown: Teardown) {
        self.0.teardowns.borrow_mut().push(teardown);
    }

    pub(crate) fn take_teardowns(&self) -> Vec<Teardown> {
        std::mem::take(&mut *self.0.teardowns.borrow_mut())
    }

    /// Drops every tree link of this node. Children are detached too, so a
    /// disposed subtree does not keep its descendants alive.
    pub(crate) fn clear_links(&self) {
        *self.0.parent.borrow_mut() = Weak::new();
        self.0.next_sibling.borrow_mut().take();
        self.0.first_child.borrow_mut().take();
    }
}

impl fmt::Debug for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.0.kind {
            NodeKind::Root { .. } => "root",
            NodeKind::Element(element) => element.tag.as_str(),
            NodeKind::Text { .. } => "#text",
        };
        f.debug_struct("HostNode")
            .field("kind", &kind)
            .field("widget_id", &self.widget_id())
            .field("mounted", &self.is_mounted())
            .finish_non_exhaustive()
    }
}

fn describe(node: &HostNode) -> String {
    node.widget_id().unwrap_or_else(|| "root".to_string())
}

/// Removes `node` from `parent`'s child list. Returns whether it was there.
pub fn unlink(parent: &HostNode, node: &HostNode) -> bool {
    let mut previous: Option<HostNode> = None;
    let mut cursor = parent.first_child();

    while let Some(current) = cursor {
        if current.ptr_eq(node) {
            let next = node.0.next_sibling.borrow_mut().take();
            match previous {
                Some(previous) => *previous.0.next_sibling.borrow_mut() = next,
                None => *parent.0.first_child.borrow_mut() = next,
            }
            *node.0.parent.borrow_mut() = Weak::new();
            return true;
        }

        cursor = current.next_sibling();
        previous = Some(current);
    }

    false
}

/// Inserts `node` into `parent`'s child list right before `anchor`, or at the
/// end when there is no anchor.
pub fn link_before(
    parent: &HostNode,
    node: &HostNode,
    anchor: Option<&HostNode>,
) -> Result<(), ReconcileError> {
    if parent.is_text() {
        return Err(ReconcileError::TextParent(describe(parent)));
    }

    let mut previous: Option<HostNode> = None;
    let mut cursor = parent.first_child();

    loop {
        let at_anchor = match (&cursor, anchor) {
            (Some(current), Some(anchor)) => current.ptr_eq(anchor),
            (None, None) => true,
            (None, Some(anchor)) => {
                return Err(ReconcileError::AnchorNotFound {
                    parent: describe(parent),
                    anchor: describe(anchor),
                });
            }
            (Some(_), None) => false,
        };

        if at_anchor {
            *node.0.next_sibling.borrow_mut() = cursor;
            match previous {
                Some(previous) => *previous.0.next_sibling.borrow_mut() = Some(node.clone()),
                None => *parent.0.first_child.borrow_mut() = Some(node.clone()),
            }
            *node.0.parent.borrow_mut() = Rc::downgrade(&parent.0);
            return Ok(());
        }

        let Some(current) = cursor else {
            return Ok(());
        };
        cursor = current.next_sibling();
        previous = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WidgetEvent;

    fn element(id: &str) -> HostNode {
        HostNode::new_element("box", "sizedbox", id.to_string(), Map::new())
    }

    fn ids(parent: &HostNode) -> Vec<String> {
        parent
            .children()
            .iter()
            .filter_map(HostNode::widget_id)
            .collect()
    }

    #[test]
    fn append_and_insert_before_keep_order() {
        let parent = element("p");
        let (a, b, c) = (element("a"), element("b"), element("c"));

        link_before(&parent, &a, None).expect("append a");
        link_before(&parent, &c, None).expect("append c");
        link_before(&parent, &b, Some(&c)).expect("insert b");

        assert_eq!(ids(&parent), vec!["a", "b", "c"]);
        assert!(b.parent().expect("parent").ptr_eq(&parent));
        assert!(a.next_sibling().expect("sibling").ptr_eq(&b));
    }

    #[test]
    fn insert_before_first_child_updates_head() {
        let parent = element("p");
        let (a, b) = (element("a"), element("b"));

        link_before(&parent, &b, None).expect("append b");
        link_before(&parent, &a, Some(&b)).expect("insert a");

        assert!(parent.first_child().expect("first").ptr_eq(&a));
        assert_eq!(ids(&parent), vec!["a", "b"]);
    }

    #[test]
    fn unlink_repoints_predecessor() {
        let parent = element("p");
        let (a, b, c) = (element("a"), element("b"), element("c"));
        for node in [&a, &b, &c] {
            link_before(&parent, node, None).expect("append");
        }

        assert!(unlink(&parent, &b));
        assert_eq!(ids(&parent), vec!["a", "c"]);
        assert!(b.parent().is_none());
        assert!(b.next_sibling().is_none());

        assert!(unlink(&parent, &a));
        assert_eq!(ids(&parent), vec!["c"]);

        assert!(!unlink(&parent, &a));
    }

    #[test]
    fn foreign_anchor_is_rejected() {
        let parent = element("p");
        let stranger = element("s");
        let node = element("n");

        let err = link_before(&parent, &node, Some(&stranger)).expect_err("expected rejection");
        assert_eq!(
            err,
            ReconcileError::AnchorNotFound {
                parent: "p".to_string(),
                anchor: "s".to_string(),
            }
        );
        assert!(parent.children().is_empty());
    }

    #[test]
    fn text_nodes_cannot_hold_children() {
        let text = HostNode::new_text("t1".to_string(), "hi".to_string());
        let err = link_before(&text, &element("x"), None).expect_err("expected rejection");
        assert_eq!(err, ReconcileError::TextParent("t1".to_string()));
    }

    #[test]
    fn root_reports_attach_point() {
        let root = HostNode::new_root(Some("host-7".to_string()));
        assert!(root.is_root());
        assert!(root.is_mounted());
        assert_eq!(root.remote_parent_id(), Some("host-7".to_string()));
        assert_eq!(HostNode::new_root(None).remote_parent_id(), None);
    }

    #[test]
    fn handler_buckets_are_separate() {
        let node = element("b");
        node.add_handler(HandlerKey::Action(Action::Click), Rc::new(|_: &WidgetEvent| {}));
        node.add_handler(HandlerKey::Any, Rc::new(|_: &WidgetEvent| {}));
        node.add_handler(HandlerKey::Any, Rc::new(|_: &WidgetEvent| {}));

        assert_eq!(node.handlers_for(HandlerKey::Action(Action::Click)).len(), 1);
        assert_eq!(node.handlers_for(HandlerKey::Any).len(), 2);
        assert!(node.handlers_for(HandlerKey::Action(Action::Hover)).is_empty());

        node.clear_handlers();
        assert!(node.handlers_for(HandlerKey::Any).is_empty());
    }
}
