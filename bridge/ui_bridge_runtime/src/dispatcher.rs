use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::host::{HandlerKey, HostNode, WeakHostNode};
use crate::protocol::BridgeEvent;
use crate::reactive::panic_message;

/// Routes normalized widget events to the handlers of the mounted element
/// that owns the widget id.
#[derive(Default)]
pub struct Dispatcher {
    nodes: RefCell<HashMap<String, WeakHostNode>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: &HostNode) {
        if let Some(widget_id) = node.widget_id() {
            self.nodes.borrow_mut().insert(widget_id, node.downgrade());
        }
    }

    /// Forgets `widget_id` if it still points at `node`.
    pub fn unregister(&self, widget_id: &str, node: &HostNode) {
        let mut nodes = self.nodes.borrow_mut();
        let owned = nodes
            .get(widget_id)
            .and_then(WeakHostNode::upgrade)
            .is_none_or(|registered| registered.ptr_eq(node));
        if owned {
            nodes.remove(widget_id);
        }
    }

    pub fn lookup(&self, widget_id: &str) -> Option<HostNode> {
        self.nodes.borrow().get(widget_id).and_then(WeakHostNode::upgrade)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Returns how many handlers were invoked.
    pub fn dispatch(&self, event: &BridgeEvent) -> usize {
        let BridgeEvent::WidgetAction(event) = event else {
            return 0;
        };

        let Some(node) = self.lookup(&event.widget_id) else {
            debug!(widget_id = %event.widget_id, "event for unknown widget dropped");
            return 0;
        };

        let mut handlers = node.handlers_for(HandlerKey::Action(event.action));
        handlers.extend(node.handlers_for(HandlerKey::Any));

        for handler in &handlers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!(
                    widget_id = %event.widget_id,
                    action = event.action.as_str(),
                    panic = panic_message(&*payload),
                    "event handler panicked"
                );
            }
        }

        handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Action, EventValue, WidgetEvent, WindowEvent};
    use serde_json::Map;
    use std::cell::Cell;
    use std::rc::Rc;

    fn button(id: &str) -> HostNode {
        HostNode::new_element("button", "button", id.to_string(), Map::new())
    }

    fn click(id: &str) -> BridgeEvent {
        BridgeEvent::WidgetAction(WidgetEvent {
            widget_id: id.to_string(),
            action: Action::Click,
            value: None,
        })
    }

    #[test]
    fn specific_handlers_run_before_wildcard() {
        let node = button("btn1");
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = order.clone();
        node.add_handler(
            HandlerKey::Any,
            Rc::new(move |event: &WidgetEvent| {
                log.borrow_mut().push(format!("any:{}", event.action.as_str()))
            }),
        );
        let log = order.clone();
        node.add_handler(
            HandlerKey::Action(Action::Click),
            Rc::new(move |_: &WidgetEvent| log.borrow_mut().push("click".to_string())),
        );

        let dispatcher = Dispatcher::new();
        dispatcher.register(&node);

        assert_eq!(dispatcher.dispatch(&click("btn1")), 2);
        assert_eq!(*order.borrow(), vec!["click", "any:click"]);
    }

    #[test]
    fn unknown_widget_invokes_nothing() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.dispatch(&click("btn1")), 0);
        assert_eq!(
            dispatcher.dispatch(&BridgeEvent::Window(WindowEvent::CloseRequested)),
            0
        );
        assert_eq!(dispatcher.dispatch(&BridgeEvent::Unknown), 0);
    }

    #[test]
    fn other_actions_do_not_match() {
        let node = button("s1");
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        node.add_handler(
            HandlerKey::Action(Action::ValueChanged),
            Rc::new(move |event: &WidgetEvent| {
                assert_eq!(event.value, Some(EventValue::Number(0.5)));
                counter.set(counter.get() + 1);
            }),
        );

        let dispatcher = Dispatcher::new();
        dispatcher.register(&node);

        assert_eq!(dispatcher.dispatch(&click("s1")), 0);
        let changed = BridgeEvent::WidgetAction(WidgetEvent {
            widget_id: "s1".to_string(),
            action: Action::ValueChanged,
            value: Some(EventValue::Number(0.5)),
        });
        assert_eq!(dispatcher.dispatch(&changed), 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let node = button("btn1");
        let hits = Rc::new(Cell::new(0));

        node.add_handler(
            HandlerKey::Action(Action::Click),
            Rc::new(|_: &WidgetEvent| panic!("handler failure")),
        );
        let counter = hits.clone();
        node.add_handler(
            HandlerKey::Action(Action::Click),
            Rc::new(move |_: &WidgetEvent| counter.set(counter.get() + 1)),
        );

        let dispatcher = Dispatcher::new();
        dispatcher.register(&node);

        assert_eq!(dispatcher.dispatch(&click("btn1")), 2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn unregister_only_removes_the_owning_node() {
        let dispatcher = Dispatcher::new();
        let old = button("w1");
        let new = button("w1");
        dispatcher.register(&old);
        dispatcher.register(&new);

        dispatcher.unregister("w1", &old);
        assert!(dispatcher.lookup("w1").expect("still registered").ptr_eq(&new));

        dispatcher.unregister("w1", &new);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn dropped_nodes_are_not_dispatched_to() {
        let dispatcher = Dispatcher::new();
        {
            let node = button("gone");
            dispatcher.register(&node);
        }
        assert!(dispatcher.lookup("gone").is_none());
        assert_eq!(dispatcher.dispatch(&click("gone")), 0);
    }
}
