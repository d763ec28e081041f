//! Rule actions: a closed set, each with typed arguments.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Color given to tags a rule creates without saying otherwise.
pub const DEFAULT_RULE_TAG_COLOR: &str = "#2196F3";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddTag {
        name: String,
        color: Option<String>,
        confidence: f64,
    },
    RemoveTag {
        name: String,
    },
    SetPrimaryType {
        primary_type: String,
    },
    MoveFile {
        path: String,
    },
    CopyFile {
        path: String,
    },
    DeleteFile,
    GeneratePreview,
    ExtractMetadata,
    SendNotification {
        message: Option<String>,
    },
}

pub const ACTION_NAMES: [&str; 9] = [
    "add_tag",
    "remove_tag",
    "set_primary_type",
    "move_file",
    "copy_file",
    "delete_file",
    "generate_preview",
    "extract_metadata",
    "send_notification",
];

/// Wire shape of one action: `{"action": "add_tag", "args": {"name": "big"}}`.
#[derive(Debug, Deserialize, Serialize)]
struct ActionDoc {
    action: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AddTagArgs {
    name: String,
    color: Option<String>,
    confidence: Option<f64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NameArgs {
    name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeArgs {
    #[serde(rename = "type")]
    primary_type: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NotificationArgs {
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

impl Action {
    /// Parse one action object, describing every problem in the error.
    pub fn parse(value: &Value) -> Result<Self, String> {
        let doc: ActionDoc = serde_json::from_value(value.clone())
            .map_err(|e| format!("action must be {{\"action\": name, \"args\": {{...}}}}: {}", e))?;

        let action = match doc.action.as_str() {
            "add_tag" => {
                let args: AddTagArgs = args_for(&doc)?;
                let confidence = args.confidence.unwrap_or(1.0);
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(format!("add_tag: confidence {} is outside 0..=1", confidence));
                }
                Action::AddTag {
                    name: non_empty(&doc.action, "name", args.name)?,
                    color: args.color,
                    confidence,
                }
            }
            "remove_tag" => {
                let args: NameArgs = args_for(&doc)?;
                Action::RemoveTag {
                    name: non_empty(&doc.action, "name", args.name)?,
                }
            }
            "set_primary_type" => {
                let args: TypeArgs = args_for(&doc)?;
                Action::SetPrimaryType {
                    primary_type: non_empty(&doc.action, "type", args.primary_type)?,
                }
            }
            "move_file" => {
                let args: PathArgs = args_for(&doc)?;
                Action::MoveFile {
                    path: non_empty(&doc.action, "path", args.path)?,
                }
            }
            "copy_file" => {
                let args: PathArgs = args_for(&doc)?;
                Action::CopyFile {
                    path: non_empty(&doc.action, "path", args.path)?,
                }
            }
            "delete_file" => {
                args_for::<NoArgs>(&doc)?;
                Action::DeleteFile
            }
            "generate_preview" => {
                args_for::<NoArgs>(&doc)?;
                Action::GeneratePreview
            }
            "extract_metadata" => {
                args_for::<NoArgs>(&doc)?;
                Action::ExtractMetadata
            }
            "send_notification" => {
                let args: NotificationArgs = args_for(&doc)?;
                Action::SendNotification {
                    message: args.message,
                }
            }
            other => {
                return Err(format!(
                    "unknown action '{}' (expected one of: {})",
                    other,
                    ACTION_NAMES.join(", ")
                ))
            }
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::AddTag { .. } => "add_tag",
            Action::RemoveTag { .. } => "remove_tag",
            Action::SetPrimaryType { .. } => "set_primary_type",
            Action::MoveFile { .. } => "move_file",
            Action::CopyFile { .. } => "copy_file",
            Action::DeleteFile => "delete_file",
            Action::GeneratePreview => "generate_preview",
            Action::ExtractMetadata => "extract_metadata",
            Action::SendNotification { .. } => "send_notification",
        }
    }
}

fn args_for<T: DeserializeOwned>(doc: &ActionDoc) -> Result<T, String> {
    let args = match &doc.args {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(args).map_err(|e| format!("{}: invalid args: {}", doc.action, e))
}

fn non_empty(action: &str, arg: &str, value: String) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{}: '{}' must not be empty", action, arg));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typed_args() {
        let action = Action::parse(&json!({"action": "add_tag", "args": {"name": "big"}})).unwrap();
        assert_eq!(
            action,
            Action::AddTag {
                name: "big".into(),
                color: None,
                confidence: 1.0
            }
        );

        let action =
            Action::parse(&json!({"action": "set_primary_type", "args": {"type": "video"}})).unwrap();
        assert_eq!(
            action,
            Action::SetPrimaryType {
                primary_type: "video".into()
            }
        );
    }

    #[test]
    fn args_may_be_omitted_when_none_are_required() {
        assert_eq!(
            Action::parse(&json!({"action": "delete_file"})).unwrap(),
            Action::DeleteFile
        );
        assert_eq!(
            Action::parse(&json!({"action": "send_notification"})).unwrap(),
            Action::SendNotification { message: None }
        );
    }

    #[test]
    fn rejects_unknown_action_and_bad_args() {
        let err = Action::parse(&json!({"action": "explode"})).unwrap_err();
        assert!(err.contains("unknown action 'explode'"));

        let err = Action::parse(&json!({"action": "move_file", "args": {}})).unwrap_err();
        assert!(err.starts_with("move_file: invalid args"));

        let err = Action::parse(&json!({"action": "add_tag", "args": {"name": " "}})).unwrap_err();
        assert!(err.contains("must not be empty"));

        let err = Action::parse(&json!({"action": "delete_file", "args": {"force": true}})).unwrap_err();
        assert!(err.starts_with("delete_file: invalid args"));
    }
}
