//! Host-tree reconciliation.
//!
//! Virtual nodes are materialized into host nodes once (cached by virtual-node
//! identity), mounted parent-first, and kept current by reactive
//! subscriptions that translate each prop change into the smallest command.
//! Children lists with a reactive member are rebuilt wholesale on change.

pub mod kind;
pub mod props;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::error::ReconcileError;
use crate::host::{self, HostNode};
use crate::protocol::{Command, Handler, InboundMessage, normalize_event};
use crate::reactive::{Subscribe, watch};
use crate::transport::{ListenerId, Transport};
use crate::vnode::{Accessor, Child, Prop, PropValue, TextContent, VNode, VNodeKind};

use self::props::PropTarget;

struct ReconcilerInner {
    transport: Rc<RefCell<Transport>>,
    dispatcher: Rc<Dispatcher>,
    runtime: Rc<dyn Subscribe>,
    cache: RefCell<HashMap<usize, (VNode, HostNode)>>,
    next_id: Cell<u64>,
    dispatch_listener: Cell<Option<ListenerId>>,
}

#[derive(Clone)]
pub struct Reconciler {
    inner: Rc<ReconcilerInner>,
}

#[derive(Clone)]
struct WeakReconciler(Weak<ReconcilerInner>);

impl WeakReconciler {
    fn upgrade(&self) -> Option<Reconciler> {
        self.0.upgrade().map(|inner| Reconciler { inner })
    }
}

fn describe(node: &HostNode) -> String {
    node.widget_id().unwrap_or_else(|| "root".to_string())
}

fn json_text(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_else(|| "null".to_string())
}

impl Reconciler {
    pub fn new(
        transport: Rc<RefCell<Transport>>,
        dispatcher: Rc<Dispatcher>,
        runtime: Rc<dyn Subscribe>,
    ) -> Self {
        Self {
            inner: Rc::new(ReconcilerInner {
                transport,
                dispatcher,
                runtime,
                cache: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                dispatch_listener: Cell::new(None),
            }),
        }
    }

    fn downgrade(&self) -> WeakReconciler {
        WeakReconciler(Rc::downgrade(&self.inner))
    }

    pub fn dispatcher(&self) -> &Rc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatch_listener.get().is_some()
    }

    pub fn cached_len(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    pub(crate) fn send(&self, command: Command) {
        self.inner.transport.borrow_mut().send(command);
    }

    fn allocate_id(&self) -> String {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        format!("w{id}")
    }

    pub fn create_element(&self, tag: &str) -> Result<HostNode, ReconcileError> {
        let spec = kind::classify(tag).ok_or_else(|| ReconcileError::UnknownTag(tag.to_string()))?;
        Ok(HostNode::new_element(
            tag,
            spec.kind,
            self.allocate_id(),
            spec.implied_style(),
        ))
    }

    pub fn create_text_node(&self, value: &str) -> HostNode {
        HostNode::new_text(self.allocate_id(), value.to_string())
    }

    pub fn get_parent_node(&self, node: &HostNode) -> Option<HostNode> {
        node.parent()
    }

    pub fn get_first_child(&self, node: &HostNode) -> Option<HostNode> {
        node.first_child()
    }

    pub fn get_next_sibling(&self, node: &HostNode) -> Option<HostNode> {
        node.next_sibling()
    }

    pub fn is_text_node(&self, node: &HostNode) -> bool {
        node.is_text()
    }

    pub fn replace_text(&self, node: &HostNode, text: &str) {
        if node.is_disposed() {
            return;
        }

        if !node.is_text() {
            if let Err(err) = self.set_property(node, "text", Some(PropValue::from(text))) {
                warn!(error = %err, "failed to replace element text");
            }
            return;
        }

        if node.set_text(text.to_string()) && node.is_mounted() {
            if let Some(id) = node.widget_id() {
                self.send(Command::SetWidgetText {
                    id,
                    text: text.to_string(),
                });
            }
        }
    }

    /// Applies one prop value to `node`; `None` removes it. Mounted nodes get
    /// the matching command, unchanged values emit nothing.
    pub fn set_property(
        &self,
        node: &HostNode,
        name: &str,
        value: Option<PropValue>,
    ) -> Result<(), ReconcileError> {
        if node.is_disposed() {
            return Err(ReconcileError::NodeDisposed(describe(node)));
        }

        if node.is_text() {
            if name == "text" {
                let text = value.map(|value| value.to_text()).unwrap_or_default();
                self.replace_text(node, &text);
            } else {
                debug!(prop = name, "ignoring non-text prop on text node");
            }
            return Ok(());
        }

        let Some(element) = node.element() else {
            return Ok(());
        };

        let target = props::classify(name);
        match target {
            PropTarget::Children => return Ok(()),
            PropTarget::Event => {
                if value.is_none() {
                    self.set_handler(node, name, None)?;
                } else {
                    warn!(prop = name, "event prop given a plain value; ignoring");
                }
                return Ok(());
            }
            PropTarget::Id => {
                self.assign_id(node, value.as_ref());
                return Ok(());
            }
            _ => {}
        }

        {
            let mut props = element.props.borrow_mut();
            if props.get(name) == value.as_ref() {
                return Ok(());
            }
            match &value {
                Some(value) => props.insert(name.to_string(), value.clone()),
                None => props.remove(name),
            };
        }

        let Some(id) = node.widget_id() else {
            return Ok(());
        };
        let mounted = node.is_mounted();
        let json = value.as_ref().and_then(PropValue::as_json).cloned();

        match target {
            PropTarget::Text => {
                if mounted {
                    let text = value.map(|value| value.to_text()).unwrap_or_default();
                    self.send(Command::SetWidgetText { id, text });
                }
            }
            PropTarget::Visible => {
                if mounted {
                    let visible = value.and_then(|value| value.as_bool()).unwrap_or(true);
                    self.send(Command::SetWidgetVisible { id, visible });
                }
            }
            PropTarget::Value => {
                set_entry(&mut element.params.borrow_mut(), name, json);
                if mounted {
                    match value.and_then(|value| value.as_f64()) {
                        Some(value) => self.send(Command::SetWidgetValue { id, value }),
                        None => warn!(widget_id = %id, "value prop is not numeric"),
                    }
                }
            }
            PropTarget::Checked => {
                set_entry(&mut element.params.borrow_mut(), name, json);
                if mounted {
                    let checked = value.and_then(|value| value.as_bool()).unwrap_or(false);
                    self.send(Command::SetWidgetChecked { id, checked });
                }
            }
            PropTarget::Data => {
                if mounted {
                    match value.as_ref().and_then(PropValue::as_bytes) {
                        Some(bytes) => self.send(Command::SetImageData {
                            id,
                            data: bytes.to_vec(),
                        }),
                        None => warn!(widget_id = %id, "data prop is not binary"),
                    }
                }
            }
            PropTarget::Style => {
                let mut style = kind::classify(&element.tag)
                    .map(|spec| spec.implied_style())
                    .unwrap_or_default();
                match json {
                    Some(Value::Object(given)) => style.extend(given),
                    Some(Value::Null) | None => {}
                    Some(other) => {
                        warn!(widget_id = %id, style = %other, "style prop is not an object")
                    }
                }
                // Single style props the new style dropped or changed must not
                // short-circuit a later set of the same value.
                element.props.borrow_mut().retain(|prop, value| {
                    props::classify(prop) != PropTarget::StyleProperty
                        || value.as_json() == style.get(prop.as_str())
                });
                *element.style.borrow_mut() = style.clone();
                if mounted {
                    self.send(Command::SetWidgetStyle {
                        id,
                        style_json: Value::Object(style).to_string(),
                    });
                }
            }
            PropTarget::Param => {
                let text = json_text(json.as_ref());
                set_entry(&mut element.params.borrow_mut(), name, json);
                if mounted {
                    self.send(Command::SetStyleProperty {
                        id,
                        property: name.to_string(),
                        value: text,
                    });
                }
            }
            PropTarget::StyleProperty => {
                let text = json_text(json.as_ref());
                set_entry(&mut element.style.borrow_mut(), name, json);
                if mounted {
                    self.send(Command::SetStyleProperty {
                        id,
                        property: name.to_string(),
                        value: text,
                    });
                }
            }
            PropTarget::Id | PropTarget::Children | PropTarget::Event => {}
        }

        Ok(())
    }

    fn assign_id(&self, node: &HostNode, value: Option<&PropValue>) {
        let Some(id) = value.and_then(PropValue::as_str) else {
            warn!("id prop must be a string");
            return;
        };

        if node.is_mounted() {
            if node.widget_id().as_deref() != Some(id) {
                warn!(
                    widget_id = ?node.widget_id(),
                    requested = id,
                    "widget id is fixed once created"
                );
            }
            return;
        }

        node.set_widget_id(id.to_string());
    }

    /// Registers (or with `None`, clears) the handlers for an event prop.
    pub fn set_handler(
        &self,
        node: &HostNode,
        name: &str,
        handler: Option<Handler>,
    ) -> Result<(), ReconcileError> {
        let Some(key) = props::event_key(name) else {
            if props::is_event_name(name) {
                warn!(prop = name, "no renderer action for event prop; ignoring");
                return Ok(());
            }
            return Err(ReconcileError::InvalidHandlerProp(name.to_string()));
        };

        match handler {
            Some(handler) => {
                node.add_handler(key, handler);
                self.ensure_dispatch();
            }
            None => node.clear_handlers_for(key),
        }
        Ok(())
    }

    fn ensure_dispatch(&self) {
        if self.is_dispatching() {
            return;
        }

        let dispatcher = Rc::downgrade(&self.inner.dispatcher);
        let listener = self
            .inner
            .transport
            .borrow_mut()
            .on_event(Rc::new(move |message: &InboundMessage| {
                let InboundMessage::UiEvent { event } = message else {
                    return;
                };
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.dispatch(&normalize_event(event));
                }
            }));
        self.inner.dispatch_listener.set(Some(listener));
        debug!("event dispatch subscribed");
    }

    /// Links `node` under `parent` before `anchor` (or last) and mounts it when
    /// the parent is mounted.
    pub fn insert_node(
        &self,
        parent: &HostNode,
        node: &HostNode,
        anchor: Option<&HostNode>,
    ) -> Result<(), ReconcileError> {
        if node.is_disposed() {
            return Err(ReconcileError::NodeDisposed(describe(node)));
        }
        if parent.is_disposed() {
            return Err(ReconcileError::NodeDisposed(describe(parent)));
        }
        if node.parent().is_some() {
            return Err(ReconcileError::NodeAlreadyAttached(describe(node)));
        }

        host::link_before(parent, node, anchor)?;

        if parent.is_mounted() {
            self.mount(node);
        }
        Ok(())
    }

    /// Unlinks `node` from `parent` and tears its subtree down.
    pub fn remove_node(&self, parent: &HostNode, node: &HostNode) {
        if !host::unlink(parent, node) {
            debug!(widget_id = %describe(node), "removing node that was not linked under parent");
        }
        self.dispose(node);
    }

    fn mount(&self, node: &HostNode) {
        let mut stack = vec![node.clone()];

        while let Some(current) = stack.pop() {
            if !current.is_mounted() {
                let parent_id = current.parent().and_then(|parent| parent.remote_parent_id());
                self.emit_create(&current, parent_id);
                current.set_mounted(true);
                if current.element().is_some() {
                    self.inner.dispatcher.register(&current);
                }
            }

            let mut children = current.children();
            children.reverse();
            stack.extend(children);
        }
    }

    fn emit_create(&self, node: &HostNode, parent_id: Option<String>) {
        let Some(id) = node.widget_id() else {
            return;
        };

        let Some(element) = node.element() else {
            self.send(Command::CreateWidget {
                id,
                kind: "label".to_string(),
                parent_id,
                text: node.text(),
                style_json: None,
                widget_params_json: None,
                data: None,
            });
            return;
        };

        let style = element.style.borrow().clone();
        let params = element.params.borrow().clone();
        let hidden = node.prop("visible").and_then(|value| value.as_bool()) == Some(false);

        self.send(Command::CreateWidget {
            id: id.clone(),
            kind: element.widget_kind.clone(),
            parent_id,
            text: node.text(),
            style_json: (!style.is_empty()).then(|| Value::Object(style).to_string()),
            widget_params_json: (!params.is_empty()).then(|| Value::Object(params).to_string()),
            data: node
                .prop("data")
                .and_then(|value| value.as_bytes().map(<[u8]>::to_vec)),
        });

        if hidden {
            self.send(Command::SetWidgetVisible { id, visible: false });
        }
    }

    /// Children before parents, in reverse mount order. Every node in the
    /// subtree becomes inert.
    fn dispose(&self, node: &HostNode) {
        let mut order = Vec::new();
        let mut stack = vec![node.clone()];
        while let Some(current) = stack.pop() {
            let mut children = current.children();
            children.reverse();
            stack.extend(children);
            order.push(current);
        }

        for current in order.iter().rev() {
            if let Some(id) = current.widget_id() {
                self.inner.dispatcher.unregister(&id, current);
            }
            current.clear_handlers();

            for teardown in current.take_teardowns() {
                teardown();
            }

            if current.is_mounted() {
                current.set_mounted(false);
                if let Some(id) = current.widget_id() {
                    self.send(Command::RemoveWidget { id });
                }
            }

            current.mark_disposed();
            current.clear_links();
            self.forget(current);
        }
    }

    fn forget(&self, node: &HostNode) {
        let Some(key) = node.origin() else {
            return;
        };

        let removed = {
            let mut cache = self.inner.cache.borrow_mut();
            let owned = cache.get(&key).is_some_and(|(_, cached)| cached.ptr_eq(node));
            if owned { cache.remove(&key) } else { None }
        };
        drop(removed);
    }

    /// Returns the host node for `vnode`, building it on first sight.
    pub fn materialize(&self, vnode: &VNode) -> Result<HostNode, ReconcileError> {
        let key = vnode.identity();
        if let Some((_, node)) = self.inner.cache.borrow().get(&key) {
            return Ok(node.clone());
        }

        let node = match vnode.kind() {
            VNodeKind::Text(content) => self.materialize_text(content),
            VNodeKind::Element { tag, props } => self.materialize_element(tag, props)?,
        };

        node.set_origin(key);
        self.inner
            .cache
            .borrow_mut()
            .insert(key, (vnode.clone(), node.clone()));
        Ok(node)
    }

    fn materialize_text(&self, content: &TextContent) -> HostNode {
        match content {
            TextContent::Static(text) => self.create_text_node(text),
            TextContent::Reactive(accessor) => {
                let node = self.create_text_node("");
                let reconciler = self.downgrade();
                let target = node.downgrade();
                let accessor = accessor.clone();

                let (initial, teardown) = watch(
                    &*self.inner.runtime,
                    move || accessor(),
                    move |text: String| {
                        if let (Some(reconciler), Some(node)) =
                            (reconciler.upgrade(), target.upgrade())
                        {
                            reconciler.replace_text(&node, &text);
                        }
                    },
                );

                if let Some(text) = initial {
                    node.set_text(text);
                }
                node.add_teardown(teardown);
                node
            }
        }
    }

    fn materialize_element(
        &self,
        tag: &str,
        props: &[(String, Prop)],
    ) -> Result<HostNode, ReconcileError> {
        let node = self.create_element(tag)?;

        if let Err(err) = self.apply_props(&node, props) {
            self.dispose(&node);
            return Err(err);
        }

        let required = node
            .widget_kind()
            .and_then(|widget_kind| kind::required_prop(&widget_kind));
        if let Some(prop) = required {
            if node.prop(prop).is_none() {
                self.dispose(&node);
                return Err(ReconcileError::MissingProp {
                    tag: tag.to_string(),
                    prop,
                });
            }
        }

        Ok(node)
    }

    fn apply_props(&self, node: &HostNode, props: &[(String, Prop)]) -> Result<(), ReconcileError> {
        for (name, prop) in props {
            match prop {
                Prop::Static(value) => self.set_property(node, name, Some(value.clone()))?,
                Prop::Reactive(accessor) => self.bind_prop(node, name, accessor.clone())?,
                Prop::Handler(handler) => self.set_handler(node, name, Some(handler.clone()))?,
                Prop::Children(children) => self.attach_children(node, children),
            }
        }
        Ok(())
    }

    fn bind_prop(
        &self,
        node: &HostNode,
        name: &str,
        accessor: Accessor,
    ) -> Result<(), ReconcileError> {
        let reconciler = self.downgrade();
        let target = node.downgrade();
        let prop = name.to_string();

        let (initial, teardown) = watch(
            &*self.inner.runtime,
            move || accessor(),
            move |value: PropValue| {
                let (Some(reconciler), Some(node)) = (reconciler.upgrade(), target.upgrade())
                else {
                    return;
                };
                if let Err(err) = reconciler.set_property(&node, &prop, Some(value)) {
                    warn!(prop = %prop, error = %err, "reactive prop update failed");
                }
            },
        );
        node.add_teardown(teardown);

        match initial {
            Some(value) => self.set_property(node, name, Some(value)),
            None => Ok(()),
        }
    }

    fn attach_children(&self, node: &HostNode, children: &[Child]) {
        if children.iter().any(Child::is_reactive) {
            self.bind_children(node, children.to_vec());
            return;
        }

        for child in children {
            if let Child::Node(vnode) = child {
                self.attach_child(node, vnode);
            }
        }
    }

    fn attach_child(&self, parent: &HostNode, vnode: &VNode) -> Option<HostNode> {
        let child = match self.materialize(vnode) {
            Ok(child) => child,
            Err(err) => {
                warn!(
                    parent = %describe(parent),
                    error = %err,
                    "skipping child that failed to materialize"
                );
                return None;
            }
        };

        match self.insert_node(parent, &child, None) {
            Ok(()) => Some(child),
            Err(err) => {
                warn!(
                    parent = %describe(parent),
                    error = %err,
                    "skipping child that could not be inserted"
                );
                None
            }
        }
    }

    fn bind_children(&self, node: &HostNode, children: Vec<Child>) {
        let owned: Rc<RefCell<Vec<HostNode>>> = Rc::new(RefCell::new(Vec::new()));

        let reconciler = self.downgrade();
        let target = node.downgrade();
        let region = owned.clone();

        let (initial, teardown) = watch(
            &*self.inner.runtime,
            move || flatten_children(&children),
            move |vnodes: Vec<VNode>| {
                if let (Some(reconciler), Some(node)) = (reconciler.upgrade(), target.upgrade()) {
                    reconciler.rebuild_children(&node, &region, &vnodes);
                }
            },
        );
        node.add_teardown(teardown);

        if let Some(vnodes) = initial {
            self.rebuild_children(node, &owned, &vnodes);
        }
    }

    fn rebuild_children(
        &self,
        node: &HostNode,
        region: &RefCell<Vec<HostNode>>,
        vnodes: &[VNode],
    ) {
        if node.is_disposed() {
            return;
        }

        let previous = std::mem::take(&mut *region.borrow_mut());
        for child in previous.iter().rev() {
            self.remove_node(node, child);
        }

        let fresh: Vec<HostNode> = vnodes
            .iter()
            .filter_map(|vnode| self.attach_child(node, vnode))
            .collect();
        *region.borrow_mut() = fresh;
    }

    /// Materializes `vnode` and appends it under `parent`.
    pub fn render(&self, vnode: &VNode, parent: &HostNode) -> Result<HostNode, ReconcileError> {
        let node = self.materialize(vnode)?;
        self.insert_node(parent, &node, None)?;
        Ok(node)
    }
}

fn flatten_children(children: &[Child]) -> Vec<VNode> {
    children
        .iter()
        .flat_map(|child| match child {
            Child::Node(vnode) => vec![vnode.clone()],
            Child::Reactive(accessor) => accessor(),
        })
        .collect()
}

fn set_entry(map: &mut Map<String, Value>, name: &str, value: Option<Value>) {
    match value {
        Some(Value::Null) | None => {
            map.remove(name);
        }
        Some(value) => {
            map.insert(name.to_string(), value);
        }
    }
}
