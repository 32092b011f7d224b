use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::models::{SessionKind, SessionUpdate, Tool, ToolChoiceMode};

pub const PALETTE_TOOL_NAME: &str = "display_color_palette";

const TOOL_DESCRIPTION: &str = "Call this function when a user asks for a color palette.";

/// How long to wait after rendering a palette before asking the model to
/// request feedback.
pub const FOLLOW_UP_DELAY: Duration = Duration::from_millis(500);

/// Scripted follow-up instruction sent after a palette has been rendered.
pub const FEEDBACK_INSTRUCTIONS: &str = "ask for feedback about the color palette - don't \
     repeat the colors, just ask if they like the colors.";

const COLOR_COUNT: usize = 5;

/// Arguments of a `display_color_palette` invocation as declared to the model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PaletteArgs {
    /// Description of the theme for the color scheme.
    pub theme: String,
    /// Array of five hex color codes based on the theme.
    pub colors: Vec<String>,
}

/// A validated palette, ready for the UI to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorPalette {
    pub theme: String,
    pub colors: Vec<String>,
}

/// Parse and validate the raw `arguments` text of a `function_call` output.
///
/// # Errors
/// Returns [`Error::MalformedToolInvocation`] if the text is not a JSON
/// object with a `theme` string and exactly five hex color strings.
#[allow(clippy::result_large_err)]
pub fn parse_arguments(raw: &str) -> Result<ColorPalette> {
    let args: PaletteArgs = serde_json::from_str(raw)
        .map_err(|e| Error::MalformedToolInvocation(format!("invalid arguments JSON: {e}")))?;

    if args.colors.len() != COLOR_COUNT {
        return Err(Error::MalformedToolInvocation(format!(
            "expected {COLOR_COUNT} colors, got {}",
            args.colors.len()
        )));
    }
    for color in &args.colors {
        if !is_hex_color(color) {
            return Err(Error::MalformedToolInvocation(format!(
                "not a hex color code: {color}"
            )));
        }
    }

    Ok(ColorPalette {
        theme: args.theme,
        colors: args.colors,
    })
}

fn is_hex_color(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6) && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The `session.update` payload that registers the palette tool for a freshly
/// created session.
#[must_use]
pub fn registration_update() -> SessionUpdate {
    SessionUpdate {
        kind: Some(SessionKind::Realtime),
        tools: Some(vec![Tool::Function {
            name: PALETTE_TOOL_NAME.to_string(),
            description: Some(TOOL_DESCRIPTION.to_string()),
            parameters: parameters_schema(),
        }]),
        tool_choice: Some(ToolChoiceMode::Auto),
        ..SessionUpdate::default()
    }
}

/// Parameter schema for the registration contract: derived from
/// [`PaletteArgs`], then tightened to the strict five-color shape the model
/// is held to.
fn parameters_schema() -> Value {
    let schema = schemars::schema_for!(PaletteArgs);
    let mut value = serde_json::to_value(schema.schema).unwrap_or_else(|_| Value::Null);

    if let Some(obj) = value.as_object_mut() {
        obj.remove("title");
        obj.insert("strict".to_string(), Value::Bool(true));
        if let Some(colors) = obj
            .get_mut("properties")
            .and_then(|p| p.get_mut("colors"))
            .and_then(Value::as_object_mut)
        {
            colors.insert("minItems".to_string(), Value::from(COLOR_COUNT));
            colors.insert("maxItems".to_string(), Value::from(COLOR_COUNT));
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_arguments() {
        let raw = r##"{"theme":"ocean","colors":["#001","#002","#003","#004","#005"]}"##;
        let palette = parse_arguments(raw).expect("valid arguments");
        assert_eq!(palette.theme, "ocean");
        assert_eq!(palette.colors.len(), 5);
        assert_eq!(palette.colors[0], "#001");
    }

    #[test]
    fn parses_six_digit_colors() {
        let raw = r##"{"theme":"forest","colors":["#0a1b2c","#ffffff","#000000","#AbCdEf","#123456"]}"##;
        assert!(parse_arguments(raw).is_ok());
    }

    #[test]
    fn rejects_unparseable_json() {
        let err = parse_arguments("{not json").expect_err("must fail");
        assert!(matches!(err, Error::MalformedToolInvocation(_)));
    }

    #[test]
    fn rejects_missing_fields() {
        let err = parse_arguments(r#"{"theme":"ocean"}"#).expect_err("must fail");
        assert!(matches!(err, Error::MalformedToolInvocation(_)));
    }

    #[test]
    fn rejects_wrong_color_count() {
        let raw = r##"{"theme":"ocean","colors":["#001","#002"]}"##;
        let err = parse_arguments(raw).expect_err("must fail");
        assert!(matches!(err, Error::MalformedToolInvocation(_)));
    }

    #[test]
    fn rejects_non_hex_colors() {
        let raw = r#"{"theme":"ocean","colors":["blue","red","green","cyan","teal"]}"#;
        let err = parse_arguments(raw).expect_err("must fail");
        assert!(matches!(err, Error::MalformedToolInvocation(_)));
    }

    #[test]
    fn registration_update_declares_the_tool() {
        let update = registration_update();
        assert_eq!(update.kind, Some(SessionKind::Realtime));
        assert_eq!(update.tool_choice, Some(ToolChoiceMode::Auto));

        let tools = update.tools.expect("tools present");
        assert_eq!(tools.len(), 1);
        let Tool::Function { name, parameters, .. } = &tools[0];
        assert_eq!(name, PALETTE_TOOL_NAME);
        assert_eq!(parameters["strict"], Value::Bool(true));
        let required = parameters["required"].as_array().expect("required list");
        assert!(required.iter().any(|v| v == "theme"));
        assert!(required.iter().any(|v| v == "colors"));
        assert_eq!(parameters["properties"]["colors"]["maxItems"], Value::from(5));
    }
}
