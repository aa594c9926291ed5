//! Declarative option validators.
//!
//! Each validated option has one row in [`OPTION_RULES`]: a predicate and the
//! error kind built when the predicate rejects the value. Absent or `null`
//! values are always accepted (the default applies) and option names without
//! a rule are accepted as well.

use serde_json::Value;

use crate::config::{cast_array, PluginConfig};
use crate::error::{ErrorKind, ReleaseError};

/// One row of the validation table.
pub struct OptionRule {
    pub name: &'static str,
    pub is_valid: fn(&Value) -> bool,
    pub error: fn(Value) -> ErrorKind,
}

pub const OPTION_RULES: &[OptionRule] = &[
    OptionRule {
        name: "assets",
        is_valid: is_valid_assets,
        error: |assets| ErrorKind::InvalidAssets { assets },
    },
    OptionRule {
        name: "failTitle",
        is_valid: is_string_or_false,
        error: |fail_title| ErrorKind::InvalidFailTitle { fail_title },
    },
    OptionRule {
        name: "failComment",
        is_valid: is_string_or_false,
        error: |fail_comment| ErrorKind::InvalidFailComment { fail_comment },
    },
    OptionRule {
        name: "labels",
        is_valid: is_string_or_false,
        error: |labels| ErrorKind::InvalidLabels { labels },
    },
    OptionRule {
        name: "assignee",
        is_valid: is_non_empty_string,
        error: |assignee| ErrorKind::InvalidAssignee { assignee },
    },
];

/// Validate one option value by name.
pub fn validate_option(name: &str, value: Option<&Value>) -> bool {
    let value = match value {
        None | Some(Value::Null) => return true,
        Some(value) => value,
    };
    OPTION_RULES
        .iter()
        .find(|rule| rule.name == name)
        .map(|rule| (rule.is_valid)(value))
        .unwrap_or(true)
}

/// Validate every option that has a rule; errors come back in table order.
pub fn validate_options(config: &PluginConfig) -> Vec<ReleaseError> {
    OPTION_RULES
        .iter()
        .filter_map(|rule| {
            let value = config.option(rule.name)?;
            if validate_option(rule.name, Some(value)) {
                None
            } else {
                Some(ReleaseError::new((rule.error)(value.clone())))
            }
        })
        .collect()
}

fn is_non_empty_string(value: &Value) -> bool {
    value.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

fn is_string_or_false(value: &Value) -> bool {
    value == &Value::Bool(false) || is_non_empty_string(value)
}

fn is_string_array(value: &Value) -> bool {
    value
        .as_array()
        .map(|items| items.iter().all(is_non_empty_string))
        .unwrap_or(false)
}

fn is_valid_asset(value: &Value) -> bool {
    if is_non_empty_string(value) || is_string_array(value) {
        return true;
    }
    match value.as_object() {
        Some(object) => {
            let url = object.get("url").map(is_non_empty_string).unwrap_or(false);
            let path = object
                .get("path")
                .map(|p| is_non_empty_string(p) || is_string_array(p))
                .unwrap_or(false);
            url || path
        }
        None => false,
    }
}

fn is_valid_assets(value: &Value) -> bool {
    cast_array(value)
        .map(|assets| assets.iter().all(is_valid_asset))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_and_null_are_valid() {
        for rule in OPTION_RULES {
            assert!(validate_option(rule.name, None));
            assert!(validate_option(rule.name, Some(&Value::Null)));
        }
    }

    #[test]
    fn test_unknown_options_are_valid() {
        assert!(validate_option("unknownOption", Some(&json!(42))));
    }

    #[test]
    fn test_assets() {
        assert!(validate_option("assets", Some(&json!("dist/*.js"))));
        assert!(validate_option("assets", Some(&json!(["a.js", ["b/*", "!b/x"]]))));
        assert!(validate_option("assets", Some(&json!([{"path": "a.js"}, {"url": "https://x"}]))));
        assert!(validate_option("assets", Some(&json!([{"path": ["a/*", "b"]}]))));

        assert!(!validate_option("assets", Some(&json!(42))));
        assert!(!validate_option("assets", Some(&json!([{"label": "no path"}]))));
        assert!(!validate_option("assets", Some(&json!([{"path": ""}]))));
        assert!(!validate_option("assets", Some(&json!([""]))));
    }

    #[test]
    fn test_string_or_false_options() {
        for name in ["failTitle", "failComment", "labels"] {
            assert!(validate_option(name, Some(&json!(false))));
            assert!(validate_option(name, Some(&json!("value"))));
            assert!(!validate_option(name, Some(&json!(true))));
            assert!(!validate_option(name, Some(&json!("  "))));
            assert!(!validate_option(name, Some(&json!(7))));
        }
    }

    #[test]
    fn test_assignee() {
        assert!(validate_option("assignee", Some(&json!("bob"))));
        assert!(!validate_option("assignee", Some(&json!(false))));
        assert!(!validate_option("assignee", Some(&json!(""))));
    }

    #[test]
    fn test_validate_options_collects_all_in_table_order() {
        let config: PluginConfig = serde_json::from_value(json!({
            "assignee": 1,
            "labels": 1,
            "assets": 1,
            "failComment": "",
            "failTitle": false,
        }))
        .unwrap();
        let codes: Vec<_> = validate_options(&config).into_iter().map(|e| e.code).collect();
        assert_eq!(codes, vec!["EINVALIDASSETS", "EINVALIDFAILCOMMENT", "EINVALIDLABELS", "EINVALIDASSIGNEE"]);
    }
}
