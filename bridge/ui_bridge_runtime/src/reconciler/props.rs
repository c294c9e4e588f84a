//! How a prop name is applied to a host element.

use crate::host::HandlerKey;
use crate::protocol::Action;

/// Names carried to the renderer as typed widget parameters rather than style.
pub const PARAMS: &[&str] = &[
    "placeholder",
    "min",
    "max",
    "minValue",
    "maxValue",
    "step",
    "progress",
    "svgData",
    "objectFit",
    "src",
    "autoplay",
    "loop",
    "muted",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropTarget {
    Id,
    Text,
    Visible,
    Value,
    Checked,
    Data,
    Style,
    Param,
    StyleProperty,
    Children,
    Event,
}

pub fn classify(name: &str) -> PropTarget {
    match name {
        "id" => PropTarget::Id,
        "text" => PropTarget::Text,
        "visible" => PropTarget::Visible,
        "value" => PropTarget::Value,
        "checked" => PropTarget::Checked,
        "data" => PropTarget::Data,
        "style" => PropTarget::Style,
        "children" => PropTarget::Children,
        _ if is_event_name(name) => PropTarget::Event,
        _ if PARAMS.contains(&name) => PropTarget::Param,
        _ => PropTarget::StyleProperty,
    }
}

/// `on` followed by an uppercase letter, e.g. `onClick`.
pub fn is_event_name(name: &str) -> bool {
    name.strip_prefix("on")
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_uppercase)
}

pub fn event_key(name: &str) -> Option<HandlerKey> {
    let action = match name {
        "onClick" | "onPress" => Action::Click,
        "onDoubleClick" => Action::DoubleClick,
        "onChange" | "onValueChanged" => Action::ValueChanged,
        "onInput" | "onTextChanged" => Action::TextChanged,
        "onHover" => Action::Hover,
        "onCustom" => Action::Custom,
        "onAction" => return Some(HandlerKey::Any),
        _ => return None,
    };
    Some(HandlerKey::Action(action))
}
