//! Virtual-node tags to renderer widget kinds.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub kind: &'static str,
    /// Flex direction implied by structural aliases such as `row`.
    pub direction: Option<&'static str>,
}

impl KindSpec {
    const fn plain(kind: &'static str) -> Self {
        Self {
            kind,
            direction: None,
        }
    }

    const fn flex(direction: &'static str) -> Self {
        Self {
            kind: "flex",
            direction: Some(direction),
        }
    }

    pub fn implied_style(&self) -> Map<String, Value> {
        let mut style = Map::new();
        if let Some(direction) = self.direction {
            style.insert("direction".to_string(), Value::from(direction));
        }
        style
    }
}

pub fn classify(tag: &str) -> Option<KindSpec> {
    let spec = match tag {
        "row" | "hstack" => KindSpec::flex("row"),
        "column" | "col" | "vstack" => KindSpec::flex("column"),
        "flex" | "Flex" => KindSpec::plain("flex"),
        "view" | "div" | "container" | "Container" => KindSpec::plain("container"),
        "box" | "sizedBox" | "sized_box" | "SizedBox" => KindSpec::plain("sizedBox"),
        "text" | "span" | "p" | "label" | "Label" => KindSpec::plain("label"),
        "button" | "iconButton" | "icon_button" | "Button" => KindSpec::plain("button"),
        "svg" | "svgIcon" | "icon" | "Svg" => KindSpec::plain("svg"),
        "input" | "textInput" | "text_input" | "TextInput" => KindSpec::plain("textInput"),
        "textarea" | "textArea" | "text_area" | "TextArea" => KindSpec::plain("textArea"),
        "checkbox" | "Checkbox" => KindSpec::plain("checkbox"),
        "progress" | "progressBar" | "progress_bar" | "ProgressBar" => {
            KindSpec::plain("progressBar")
        }
        "spinner" | "loading" | "Spinner" => KindSpec::plain("spinner"),
        "slider" | "range" | "Slider" => KindSpec::plain("slider"),
        "image" | "img" | "Image" => KindSpec::plain("image"),
        "video" | "Video" => KindSpec::plain("video"),
        "prose" | "Prose" => KindSpec::plain("prose"),
        "grid" | "Grid" => KindSpec::plain("grid"),
        "stack" | "zstack" | "z_stack" | "ZStack" => KindSpec::plain("zstack"),
        "scroll" | "portal" | "Portal" => KindSpec::plain("portal"),
        "hoverable" | "Hoverable" => KindSpec::plain("hoverable"),
        _ => return None,
    };
    Some(spec)
}

/// Prop a widget kind cannot be created without.
pub fn required_prop(kind: &str) -> Option<&'static str> {
    match kind {
        "image" => Some("data"),
        "video" => Some("src"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_aliases_imply_direction() {
        let row = classify("row").expect("row is known");
        assert_eq!(row.kind, "flex");
        assert_eq!(
            row.implied_style().get("direction"),
            Some(&Value::from("row"))
        );

        let column = classify("col").expect("col is known");
        assert_eq!(column.direction, Some("column"));

        assert!(classify("flex").expect("flex").implied_style().is_empty());
    }

    #[test]
    fn aliases_share_a_kind() {
        for (tag, kind) in [
            ("text", "label"),
            ("view", "container"),
            ("img", "image"),
            ("range", "slider"),
            ("loading", "spinner"),
            ("scroll", "portal"),
            ("input", "textInput"),
        ] {
            assert_eq!(classify(tag).map(|spec| spec.kind), Some(kind), "tag {tag}");
        }
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(classify("marquee").is_none());
        assert!(classify("").is_none());
    }

    #[test]
    fn media_kinds_have_required_props() {
        assert_eq!(required_prop("image"), Some("data"));
        assert_eq!(required_prop("video"), Some("src"));
        assert_eq!(required_prop("button"), None);
    }
}
