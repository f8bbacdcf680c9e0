use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, CUSTOM_COMMAND, EDIT_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
    SINGLE_PATH_COMMANDS, WORD_ARG_COMMANDS,
};

const DEFAULT_CUSTOM_COUNT: u64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_words(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn words_value(words: Vec<String>) -> Value {
    Value::Array(words.into_iter().map(Value::String).collect())
}

/// `/custom 3 a knight on a horse` → count 3; a leading non-number is part
/// of the prompt.
fn parse_custom(arg: &str, raw: &str) -> Intent {
    let trimmed = arg.trim();
    let (count, prompt) = match trimmed.split_once(char::is_whitespace) {
        Some((head, tail)) if head.parse::<u64>().is_ok() => {
            (head.parse::<u64>().unwrap_or(DEFAULT_CUSTOM_COUNT), tail.trim())
        }
        _ => (DEFAULT_CUSTOM_COUNT, trimmed),
    };
    let mut intent = Intent::new(CUSTOM_COMMAND.action, raw)
        .with_arg("count", Value::Number(count.into()));
    intent.prompt = Some(prompt.to_string()).filter(|value| !value.is_empty());
    intent
}

/// `/edit "custom-0" make the jacket red` → identity + instruction.
fn parse_edit(arg: &str, raw: &str) -> Intent {
    let mut words = split_words(arg);
    let identity = if words.is_empty() {
        String::new()
    } else {
        words.remove(0)
    };
    let mut intent = Intent::new(EDIT_COMMAND.action, raw)
        .with_arg("identity", Value::String(identity));
    intent.prompt = Some(words.join(" ")).filter(|value| !value.is_empty());
    intent
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                return Intent::new(action, text).with_arg("value", Value::String(arg.to_string()));
            }

            if let Some(action) = find_action(&command, WORD_ARG_COMMANDS) {
                return Intent::new(action, text).with_arg("words", words_value(split_words(arg)));
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("path", Value::String(split_words(arg).join(" ")));
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == CUSTOM_COMMAND.command {
                return parse_custom(arg, text);
            }

            if command == EDIT_COMMAND.command {
                return parse_edit(arg, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    parse_custom(raw_trimmed, text)
}
