use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commands sent to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    SetTitle {
        title: String,
    },
    ResizeWindow {
        width: u32,
        height: u32,
    },
    CloseWindow,
    CreateWidget {
        id: String,
        kind: String,
        parent_id: Option<String>,
        text: Option<String>,
        style_json: Option<String>,
        widget_params_json: Option<String>,
        #[serde(default, with = "serde_bytes")]
        data: Option<Vec<u8>>,
    },
    RemoveWidget {
        id: String,
    },
    SetWidgetText {
        id: String,
        text: String,
    },
    SetWidgetVisible {
        id: String,
        visible: bool,
    },
    SetWidgetValue {
        id: String,
        value: f64,
    },
    SetWidgetChecked {
        id: String,
        checked: bool,
    },
    SetWidgetStyle {
        id: String,
        style_json: String,
    },
    SetStyleProperty {
        id: String,
        property: String,
        value: String,
    },
    SetImageData {
        id: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    PlayVideo {
        id: String,
    },
    PauseVideo {
        id: String,
    },
    SeekVideo {
        id: String,
        time_secs: f64,
    },
    ExitApp,
}

impl Command {
    pub fn widget_id(&self) -> Option<&str> {
        match self {
            Command::CreateWidget { id, .. }
            | Command::RemoveWidget { id }
            | Command::SetWidgetText { id, .. }
            | Command::SetWidgetVisible { id, .. }
            | Command::SetWidgetValue { id, .. }
            | Command::SetWidgetChecked { id, .. }
            | Command::SetWidgetStyle { id, .. }
            | Command::SetStyleProperty { id, .. }
            | Command::SetImageData { id, .. }
            | Command::PlayVideo { id }
            | Command::PauseVideo { id }
            | Command::SeekVideo { id, .. } => Some(id),
            Command::SetTitle { .. }
            | Command::ResizeWindow { .. }
            | Command::CloseWindow
            | Command::ExitApp => None,
        }
    }
}

/// Messages received from the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    UiEvent {
        event: Value,
    },
    RuntimeError {
        source: String,
        message: String,
        fatal: bool,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Click,
    DoubleClick,
    ValueChanged,
    TextChanged,
    Hover,
    Custom,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::DoubleClick => "doubleClick",
            Action::ValueChanged => "valueChanged",
            Action::TextChanged => "textChanged",
            Action::Hover => "hover",
            Action::Custom => "custom",
        }
    }

    /// Accepts both the renderer's variant names and the normalized names.
    pub fn from_name(name: &str) -> Option<Action> {
        match name {
            "Click" | "click" => Some(Action::Click),
            "DoubleClick" | "doubleClick" => Some(Action::DoubleClick),
            "ValueChanged" | "valueChanged" => Some(Action::ValueChanged),
            "TextChanged" | "textChanged" => Some(Action::TextChanged),
            "Hover" | "hover" | "HoverChanged" | "hoverChanged" => Some(Action::Hover),
            "Custom" | "custom" => Some(Action::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl EventValue {
    fn from_json(value: &Value) -> Option<EventValue> {
        match value {
            Value::Number(n) => n.as_f64().map(EventValue::Number),
            Value::String(s) => Some(EventValue::Text(s.clone())),
            Value::Bool(b) => Some(EventValue::Bool(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EventValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetEvent {
    pub widget_id: String,
    pub action: Action,
    pub value: Option<EventValue>,
}

pub type Handler = Rc<dyn Fn(&WidgetEvent)>;

#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    Resized { width: u32, height: u32 },
    CloseRequested,
    FocusChanged(bool),
}

/// Stable shape of a renderer event after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    WidgetAction(WidgetEvent),
    Window(WindowEvent),
    Unknown,
}

/// Maps an opaque renderer event payload onto [`BridgeEvent`].
///
/// The renderer emits its events externally tagged
/// (`{"WidgetAction": {"widget_id": "b1", "action": "Click"}}`, unit variants as
/// bare strings). Payloads already in the flat camelCase shape
/// (`{"type": "widgetAction", "widgetId": "b1", "action": "click"}`) are accepted
/// too. Anything else is `Unknown`.
pub fn normalize_event(event: &Value) -> BridgeEvent {
    match event {
        Value::Object(map) => {
            if let Some(kind) = map.get("type").and_then(Value::as_str) {
                return normalize_flat(kind, map);
            }

            let mut entries = map.iter();
            match (entries.next(), entries.next()) {
                (Some((tag, body)), None) => normalize_tagged(tag, body),
                _ => BridgeEvent::Unknown,
            }
        }
        Value::String(tag) => normalize_tagged(tag, &Value::Null),
        _ => BridgeEvent::Unknown,
    }
}

fn normalize_tagged(tag: &str, body: &Value) -> BridgeEvent {
    match tag {
        "WidgetAction" => {
            let widget_id = body
                .get("widget_id")
                .or_else(|| body.get("widgetId"))
                .and_then(Value::as_str);
            let action = body.get("action").and_then(native_action);

            match (widget_id, action) {
                (Some(widget_id), Some((action, value))) => {
                    BridgeEvent::WidgetAction(WidgetEvent {
                        widget_id: widget_id.to_string(),
                        action,
                        value,
                    })
                }
                _ => BridgeEvent::Unknown,
            }
        }
        "WindowResized" => window_resized(body),
        "WindowCloseRequested" => BridgeEvent::Window(WindowEvent::CloseRequested),
        "WindowFocusChanged" => body
            .get("focused")
            .and_then(Value::as_bool)
            .or_else(|| body.as_bool())
            .map(|focused| BridgeEvent::Window(WindowEvent::FocusChanged(focused)))
            .unwrap_or(BridgeEvent::Unknown),
        _ => BridgeEvent::Unknown,
    }
}

fn normalize_flat(kind: &str, map: &Map<String, Value>) -> BridgeEvent {
    match kind {
        "widgetAction" => {
            let widget_id = map.get("widgetId").and_then(Value::as_str);
            let action = map
                .get("action")
                .and_then(Value::as_str)
                .and_then(Action::from_name);

            match (widget_id, action) {
                (Some(widget_id), Some(action)) => BridgeEvent::WidgetAction(WidgetEvent {
                    widget_id: widget_id.to_string(),
                    action,
                    value: map.get("value").and_then(EventValue::from_json),
                }),
                _ => BridgeEvent::Unknown,
            }
        }
        "windowResized" => window_resized(&Value::Object(map.clone())),
        "windowCloseRequested" => BridgeEvent::Window(WindowEvent::CloseRequested),
        "windowFocusChanged" => map
            .get("focused")
            .and_then(Value::as_bool)
            .map(|focused| BridgeEvent::Window(WindowEvent::FocusChanged(focused)))
            .unwrap_or(BridgeEvent::Unknown),
        _ => BridgeEvent::Unknown,
    }
}

fn native_action(action: &Value) -> Option<(Action, Option<EventValue>)> {
    match action {
        Value::String(name) => Action::from_name(name).map(|action| (action, None)),
        Value::Object(map) if map.len() == 1 => {
            let (name, payload) = map.iter().next()?;
            let action = Action::from_name(name)?;
            Some((action, EventValue::from_json(payload)))
        }
        _ => None,
    }
}

fn window_resized(body: &Value) -> BridgeEvent {
    let width = body.get("width").and_then(Value::as_u64);
    let height = body.get("height").and_then(Value::as_u64);

    match (width, height) {
        (Some(width), Some(height)) => BridgeEvent::Window(WindowEvent::Resized {
            width: width as u32,
            height: height as u32,
        }),
        _ => BridgeEvent::Unknown,
    }
}
