use serde::{ Deserialize, Serialize };
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::RwLock;
use log::{ info, warn };
use crate::models::chat::{ Role, Turn };
use crate::models::visit::Visit;

pub type SharedPrompts = Arc<RwLock<Arc<PromptConfig>>>;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Prompt JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown role label style '{0}' (expected 'upper' or 'title')")]
    InvalidRoleStyle(String),
}

const DEFAULT_PERSONA: &str =
    "You are a digital twin: an AI stand-in that answers on behalf of the person you represent. \
Speak in the first person, stay friendly and professional, and keep answers concise. \
If you do not know something about the person, say so instead of inventing details.";

const DEFAULT_CONSULTATION_SYSTEM: &str =
    "You are provided with notes written by a doctor from a patient's visit.
Your job is to summarize the visit for the doctor and provide an email.

Reply with exactly three sections with the headings:
### Summary of visit for the doctor's records
### Next steps for the doctor
### Draft of email to patient in patient-friendly language";

const DEFAULT_CONSULTATION_TEMPLATE: &str =
    "Create the summary, next steps and draft email for:

Patient Name: {patient_name}
Date of Visit: {date_of_visit}

Notes:
{notes}";

const DEFAULT_IDEA_PROMPT: &str =
    "Reply with a new business idea for AI Agents.

Format the response using:
- Clear headings
- Sub-headings
- Bullet points

Keep it concise and practical.";

const DEFAULT_INSTANT_PROMPT: &str =
    "You are on a website that has just been deployed to production for the first time! \
Please reply with an enthusiastic announcement to welcome visitors to the site, \
explaining that it is live on production for the first time!";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    pub persona: String,
    pub consultation_system: String,
    pub consultation_template: String,
    pub idea_prompt: String,
    pub instant_prompt: String,
    #[serde(skip)]
    pub last_loaded: Option<SystemTime>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            consultation_system: DEFAULT_CONSULTATION_SYSTEM.to_string(),
            consultation_template: DEFAULT_CONSULTATION_TEMPLATE.to_string(),
            idea_prompt: DEFAULT_IDEA_PROMPT.to_string(),
            instant_prompt: DEFAULT_INSTANT_PROMPT.to_string(),
            last_loaded: None,
        }
    }
}

pub fn load_prompts_from_str(json: &str) -> Result<PromptConfig, PromptError> {
    let mut config: PromptConfig = serde_json::from_str(json)?;
    config.last_loaded = Some(SystemTime::now());
    Ok(config)
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<PromptConfig, PromptError> {
    let file_content = fs::read_to_string(path)?;
    load_prompts_from_str(&file_content)
}

/// Loads the prompt file, falling back to the built-in prompts when it does not exist.
pub fn initialize_prompts(path: &str) -> Result<SharedPrompts, PromptError> {
    let config = match load_prompts(path) {
        Ok(config) => {
            info!("Loaded prompts from: {}", path);
            config
        }
        Err(PromptError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            warn!("Prompts file '{}' not found, using built-in prompts", path);
            PromptConfig::default()
        }
        Err(e) => {
            return Err(e);
        }
    };
    Ok(Arc::new(RwLock::new(Arc::new(config))))
}

pub fn reload_prompts_if_changed<P: AsRef<Path>>(
    path: P,
    current_config: &PromptConfig
) -> Result<Option<PromptConfig>, PromptError> {
    let metadata = fs::metadata(&path)?;

    if let Ok(modified) = metadata.modified() {
        let changed = match current_config.last_loaded {
            Some(last_loaded) => modified > last_loaded,
            None => true,
        };
        if changed {
            info!("Prompts file changed, reloading...");
            return load_prompts(path).map(Some);
        }
    }
    Ok(None)
}

/// Fills `{patient_name}`, `{date_of_visit}` and `{notes}` in a single pass, so
/// braces inside the visit fields are copied verbatim. Unknown `{...}` tokens are
/// left as written.
fn fill_template(template: &str, visit: &Visit) -> String {
    let mut out = String::with_capacity(template.len() + visit.notes.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find('}') else {
            rest = tail;
            break;
        };
        let value = match &tail[1..end] {
            "patient_name" => Some(visit.patient_name.as_str()),
            "date_of_visit" => Some(visit.date_of_visit.as_str()),
            "notes" => Some(visit.notes.as_str()),
            _ => None,
        };
        match value {
            Some(value) => {
                out.push_str(value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn get_consultation_prompt(config: &PromptConfig, visit: &Visit) -> String {
    let user_prompt = fill_template(&config.consultation_template, visit);
    format!("{}\n\n{}", config.consultation_system, user_prompt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleStyle {
    /// `USER:` / `ASSISTANT:`
    #[default]
    Upper,
    /// `User:` / `Assistant:`
    Title,
}

impl RoleStyle {
    pub fn label(&self, role: Role) -> &'static str {
        match (self, role) {
            (RoleStyle::Upper, Role::User) => "USER",
            (RoleStyle::Upper, Role::Assistant) => "ASSISTANT",
            (RoleStyle::Title, Role::User) => "User",
            (RoleStyle::Title, Role::Assistant) => "Assistant",
        }
    }
}

impl FromStr for RoleStyle {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upper" | "uppercase" => Ok(RoleStyle::Upper),
            "title" | "titlecase" => Ok(RoleStyle::Title),
            _ => Err(PromptError::InvalidRoleStyle(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatPromptOptions {
    pub role_style: RoleStyle,
    /// Most recent turns to include; 0 includes the whole transcript.
    pub history_limit: usize,
}

impl Default for ChatPromptOptions {
    fn default() -> Self {
        Self {
            role_style: RoleStyle::Upper,
            history_limit: 10,
        }
    }
}

/// Flattens persona, prior turns and the new message into a single text prompt.
pub fn get_chat_prompt(
    persona: &str,
    history: &[Turn],
    message: &str,
    options: &ChatPromptOptions
) -> String {
    let start = match options.history_limit {
        0 => 0,
        limit => history.len().saturating_sub(limit),
    };
    let style = options.role_style;

    let transcript: String = history[start..]
        .iter()
        .map(|turn| format!("{}: {}\n", style.label(turn.role), turn.content))
        .collect();

    format!(
        "{}\n\nConversation so far:\n{}\n{}:\n{}\n\n{}:\n",
        persona,
        transcript,
        style.label(Role::User),
        message,
        style.label(Role::Assistant)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(n: usize) -> Vec<Turn> {
        (0..n)
            .flat_map(|i| vec![Turn::user(format!("q{}", i)), Turn::assistant(format!("a{}", i))])
            .collect()
    }

    #[test]
    fn chat_prompt_has_expected_layout() {
        let history = vec![Turn::user("Hi"), Turn::assistant("Hello!")];
        let prompt = get_chat_prompt("PERSONA", &history, "How are you?", &ChatPromptOptions::default());

        assert_eq!(
            prompt,
            "PERSONA\n\nConversation so far:\nUSER: Hi\nASSISTANT: Hello!\n\nUSER:\nHow are you?\n\nASSISTANT:\n"
        );
    }

    #[test]
    fn chat_prompt_is_deterministic() {
        let history = exchange(3);
        let options = ChatPromptOptions::default();
        let first = get_chat_prompt("p", &history, "m", &options);
        let second = get_chat_prompt("p", &history.clone(), "m", &options);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn history_limit_keeps_most_recent_turns() {
        let history = exchange(8);
        let prompt = get_chat_prompt("p", &history, "m", &ChatPromptOptions::default());

        assert!(!prompt.contains("q2"));
        assert!(!prompt.contains("a2"));
        assert!(prompt.contains("USER: q3\n"));
        assert!(prompt.contains("ASSISTANT: a7\n"));
        assert_eq!(prompt.matches("USER: ").count(), 5);
    }

    #[test]
    fn zero_limit_keeps_everything_with_title_labels() {
        let options = ChatPromptOptions { role_style: RoleStyle::Title, history_limit: 0 };
        let prompt = get_chat_prompt("p", &exchange(8), "m", &options);

        assert!(prompt.contains("User: q0\n"));
        assert!(prompt.contains("Assistant: a7\n"));
        assert!(prompt.ends_with("User:\nm\n\nAssistant:\n"));
    }

    #[test]
    fn empty_history_still_has_transcript_header() {
        let prompt = get_chat_prompt("p", &[], "hello", &ChatPromptOptions::default());
        assert_eq!(prompt, "p\n\nConversation so far:\n\nUSER:\nhello\n\nASSISTANT:\n");
    }

    #[test]
    fn role_style_parses_case_insensitively() {
        assert_eq!("UPPER".parse::<RoleStyle>().unwrap(), RoleStyle::Upper);
        assert_eq!("Title".parse::<RoleStyle>().unwrap(), RoleStyle::Title);
        assert!("shout".parse::<RoleStyle>().is_err());
    }

    #[test]
    fn consultation_prompt_fills_visit_fields() {
        let visit = Visit {
            patient_name: "Jane Roe".into(),
            date_of_visit: "2025-01-31".into(),
            notes: "Mild fever, prescribed rest.".into(),
        };
        let prompt = get_consultation_prompt(&PromptConfig::default(), &visit);

        assert!(prompt.starts_with("You are provided with notes"));
        assert!(prompt.contains("Patient Name: Jane Roe\n"));
        assert!(prompt.contains("Date of Visit: 2025-01-31\n"));
        assert!(prompt.ends_with("Notes:\nMild fever, prescribed rest."));
    }

    #[test]
    fn placeholders_inside_visit_fields_are_not_expanded() {
        let visit = Visit {
            patient_name: "{notes}".into(),
            date_of_visit: "{patient_name} {unknown".into(),
            notes: "Private notes.".into(),
        };
        let prompt = get_consultation_prompt(&PromptConfig::default(), &visit);

        assert!(prompt.contains("Patient Name: {notes}\n"));
        assert!(prompt.contains("Date of Visit: {patient_name} {unknown\n"));
        assert_eq!(prompt.matches("Private notes.").count(), 1);
    }

    #[test]
    fn unknown_and_unclosed_tokens_stay_verbatim() {
        let mut config = PromptConfig::default();
        config.consultation_system = "sys".into();
        config.consultation_template = "{other} for {patient_name} {tail".into();
        let visit = Visit {
            patient_name: "Jane".into(),
            date_of_visit: "today".into(),
            notes: "n".into(),
        };
        assert_eq!(get_consultation_prompt(&config, &visit), "sys\n\n{other} for Jane {tail");
    }

    #[test]
    fn partial_prompt_file_keeps_defaults_for_missing_keys() {
        let config = load_prompts_from_str(r#"{"persona": "I am Sam."}"#).unwrap();
        assert_eq!(config.persona, "I am Sam.");
        assert_eq!(config.idea_prompt, PromptConfig::default().idea_prompt);
        assert!(config.last_loaded.is_some());
    }

    #[test]
    fn missing_prompt_file_falls_back_to_defaults() {
        let shared = initialize_prompts("/definitely/not/here/prompts.json").unwrap();
        let config = shared.try_read().unwrap();
        assert_eq!(config.persona, PromptConfig::default().persona);
    }

    #[test]
    fn reload_detects_newer_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"{"persona": "v2"}"#).unwrap();

        let stale = PromptConfig::default();
        let reloaded = reload_prompts_if_changed(&path, &stale).unwrap().unwrap();
        assert_eq!(reloaded.persona, "v2");

        let unchanged = reload_prompts_if_changed(&path, &reloaded).unwrap();
        assert!(unchanged.is_none());
    }
}
