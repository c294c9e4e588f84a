//! Immutable virtual nodes describing the UI to reconcile.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::protocol::{Handler, WidgetEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Json(Value),
    Bytes(Rc<Vec<u8>>),
}

impl PropValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PropValue::Json(value) => Some(value),
            PropValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropValue::Bytes(bytes) => Some(bytes),
            PropValue::Json(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(Value::as_bool)
    }

    /// Text form used for labels: strings verbatim, null as empty, other JSON
    /// values in their compact encoding.
    pub fn to_text(&self) -> String {
        match self {
            PropValue::Json(Value::String(s)) => s.clone(),
            PropValue::Json(Value::Null) => String::new(),
            PropValue::Json(other) => other.to_string(),
            PropValue::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<Value> for PropValue {
    fn from(value: Value) -> Self {
        PropValue::Json(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Json(Value::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Json(Value::from(value))
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Json(Value::from(value))
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Json(Value::from(value))
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Json(Value::from(value))
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Json(Value::from(value))
    }
}

impl From<u32> for PropValue {
    fn from(value: u32) -> Self {
        PropValue::Json(Value::from(value))
    }
}

impl From<Vec<u8>> for PropValue {
    fn from(value: Vec<u8>) -> Self {
        PropValue::Bytes(Rc::new(value))
    }
}

pub type Accessor = Rc<dyn Fn() -> PropValue>;
pub type ChildrenAccessor = Rc<dyn Fn() -> Vec<VNode>>;
pub type TextAccessor = Rc<dyn Fn() -> String>;

#[derive(Clone)]
pub enum Prop {
    Static(PropValue),
    Reactive(Accessor),
    Handler(Handler),
    Children(Vec<Child>),
}

impl fmt::Debug for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Prop::Reactive(_) => f.write_str("Reactive(..)"),
            Prop::Handler(_) => f.write_str("Handler(..)"),
            Prop::Children(children) => f.debug_tuple("Children").field(children).finish(),
        }
    }
}

#[derive(Clone)]
pub enum Child {
    Node(VNode),
    Reactive(ChildrenAccessor),
}

impl Child {
    pub fn is_reactive(&self) -> bool {
        matches!(self, Child::Reactive(_))
    }
}

impl fmt::Debug for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Child::Node(node) => node.fmt(f),
            Child::Reactive(_) => f.write_str("Reactive(..)"),
        }
    }
}

#[derive(Clone)]
pub enum TextContent {
    Static(String),
    Reactive(TextAccessor),
}

pub enum VNodeKind {
    Element {
        tag: String,
        props: Vec<(String, Prop)>,
    },
    Text(TextContent),
}

/// Reference-counted virtual node. Clones share identity, which is what the
/// reconciler caches host nodes by.
#[derive(Clone)]
pub struct VNode(Rc<VNodeKind>);

impl VNode {
    pub fn kind(&self) -> &VNodeKind {
        &self.0
    }

    pub fn tag(&self) -> Option<&str> {
        match &*self.0 {
            VNodeKind::Element { tag, .. } => Some(tag),
            VNodeKind::Text(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &VNode) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            VNodeKind::Element { tag, props } => f
                .debug_struct("Element")
                .field("tag", tag)
                .field("props", props)
                .finish(),
            VNodeKind::Text(TextContent::Static(text)) => {
                f.debug_tuple("Text").field(text).finish()
            }
            VNodeKind::Text(TextContent::Reactive(_)) => f.write_str("Text(..)"),
        }
    }
}

pub fn element(tag: impl Into<String>) -> ElementBuilder {
    ElementBuilder {
        tag: tag.into(),
        props: Vec::new(),
    }
}

pub fn text(value: impl Into<String>) -> VNode {
    VNode(Rc::new(VNodeKind::Text(TextContent::Static(value.into()))))
}

pub fn text_fn(accessor: impl Fn() -> String + 'static) -> VNode {
    VNode(Rc::new(VNodeKind::Text(TextContent::Reactive(Rc::new(
        accessor,
    )))))
}

#[must_use]
pub struct ElementBuilder {
    tag: String,
    props: Vec<(String, Prop)>,
}

impl ElementBuilder {
    pub fn prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.push((name.into(), Prop::Static(value.into())));
        self
    }

    pub fn reactive<V, F>(mut self, name: impl Into<String>, accessor: F) -> Self
    where
        V: Into<PropValue>,
        F: Fn() -> V + 'static,
    {
        self.props.push((
            name.into(),
            Prop::Reactive(Rc::new(move || accessor().into())),
        ));
        self
    }

    pub fn on(mut self, name: impl Into<String>, handler: impl Fn(&WidgetEvent) + 'static) -> Self {
        self.props.push((name.into(), Prop::Handler(Rc::new(handler))));
        self
    }

    pub fn child(self, node: VNode) -> Self {
        self.push_child(Child::Node(node))
    }

    pub fn children(self, nodes: impl IntoIterator<Item = VNode>) -> Self {
        nodes.into_iter().fold(self, |builder, node| builder.child(node))
    }

    pub fn children_fn(self, accessor: impl Fn() -> Vec<VNode> + 'static) -> Self {
        self.push_child(Child::Reactive(Rc::new(accessor)))
    }

    fn push_child(mut self, child: Child) -> Self {
        let existing = self
            .props
            .iter()
            .position(|(name, prop)| name == "children" && matches!(prop, Prop::Children(_)));

        match existing {
            Some(index) => {
                if let Prop::Children(children) = &mut self.props[index].1 {
                    children.push(child);
                }
            }
            None => self
                .props
                .push(("children".to_string(), Prop::Children(vec![child]))),
        }
        self
    }

    pub fn build(self) -> VNode {
        VNode(Rc::new(VNodeKind::Element {
            tag: self.tag,
            props: self.props,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn children_collect_into_one_prop() {
        let node = element("column")
            .prop("gap", 4)
            .child(text("a"))
            .children_fn(Vec::new)
            .children([text("b"), text("c")])
            .build();

        let VNodeKind::Element { props, .. } = node.kind() else {
            panic!("expected element");
        };
        let children: Vec<_> = props
            .iter()
            .filter_map(|(name, prop)| match prop {
                Prop::Children(children) if name == "children" => Some(children),
                _ => None,
            })
            .collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].len(), 4);
        assert!(children[0][1].is_reactive());
    }

    #[test]
    fn clones_share_identity() {
        let node = element("button").prop("text", "Go").build();
        let copy = node.clone();
        let other = element("button").prop("text", "Go").build();

        assert!(node.ptr_eq(&copy));
        assert_eq!(node.identity(), copy.identity());
        assert!(!node.ptr_eq(&other));
    }

    #[test]
    fn prop_value_conversions() {
        assert_eq!(PropValue::from("x").as_str(), Some("x"));
        assert_eq!(PropValue::from(2.5).as_f64(), Some(2.5));
        assert_eq!(PropValue::from(true).as_bool(), Some(true));
        assert_eq!(PropValue::from(vec![1_u8, 2]).as_bytes(), Some(&[1_u8, 2][..]));
        assert_eq!(PropValue::from(json!(3)).to_text(), "3");
        assert_eq!(PropValue::from(json!(null)).to_text(), "");
    }
}
