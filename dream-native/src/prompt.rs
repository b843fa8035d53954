//! Persona prompt templates and reply clean-up for the Dream Assistant.

use std::fmt;

pub const PERSONA_PREAMBLE: &str = "Eres el Dream Assistant, la compañera perfecta para mi hermana emprendedora. \
Ella tiene dificultades del habla pero sueña con crear su plataforma digital. \
Responde de manera cariñosa, motivacional y práctica. \
Entiende que ella necesita apoyo emocional y técnico para lograr sus metas.";

const USER_LABEL: &str = "Usuario:";
const ASSISTANT_LABEL: &str = "Dream Assistant:";
const START_OF_TURN: &str = "<start_of_turn>";
const END_OF_TURN: &str = "<end_of_turn>";

// A reply longer than this that already contains a full stop is done.
const NATURAL_END_MIN_BYTES: usize = 50;

/// Canned replies shown to the user instead of raw errors.
pub mod replies {
    pub const NOT_INITIALIZED: &str = "Lo siento, el modelo no está inicializado. 😔";
    pub const WAKING_UP: &str = "El Dream Assistant está despertando... inténtalo de nuevo. ✨";
    pub const PROMPT_FAILED: &str = "Disculpa, tuve un problema procesando tu mensaje. 😅";
    pub const GREETING: &str = "¡Hola! Soy tu Dream Assistant. ¿En qué te puedo ayudar hoy? 😊";
    pub const GENERIC_ERROR: &str = "Ups, tuve un pequeño problema. ¡Pero estoy aquí para ti! 💪";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// `Usuario:` / `Dream Assistant:` transcript
    #[default]
    Plain,
    /// Gemma chat turns, as the fine-tuned GGUF was trained on
    Gemma,
}

impl PromptStyle {
    pub fn format(self, user_input: &str) -> String {
        match self {
            PromptStyle::Plain => create_prompt(user_input),
            PromptStyle::Gemma => create_gemma_prompt(user_input),
        }
    }

    /// Text that means the model has started writing the next turn.
    pub fn stop_markers(self) -> &'static [&'static str] {
        match self {
            PromptStyle::Plain => &[USER_LABEL, START_OF_TURN, END_OF_TURN],
            PromptStyle::Gemma => &[END_OF_TURN, START_OF_TURN, USER_LABEL],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "plain" => Some(PromptStyle::Plain),
            "gemma" => Some(PromptStyle::Gemma),
            _ => None,
        }
    }
}

impl fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PromptStyle::Plain => write!(f, "plain"),
            PromptStyle::Gemma => write!(f, "gemma"),
        }
    }
}

pub fn create_prompt(user_input: &str) -> String {
    format!(
        "{}\n\n{} {}\n{} ",
        PERSONA_PREAMBLE, USER_LABEL, user_input, ASSISTANT_LABEL
    )
}

/// Input that is already in turn format is passed through untouched.
pub fn create_gemma_prompt(user_input: &str) -> String {
    if user_input.contains(START_OF_TURN) {
        return user_input.to_string();
    }
    format!(
        "{}user\n{}\n\n{}{}\n{}model\n",
        START_OF_TURN,
        PERSONA_PREAMBLE,
        user_input.trim(),
        END_OF_TURN,
        START_OF_TURN
    )
}

pub fn should_stop(response: &str) -> bool {
    response.contains('.') && response.len() > NATURAL_END_MIN_BYTES
}

/// Position of the earliest marker, if any.
pub fn find_marker(text: &str, markers: &[&str]) -> Option<usize> {
    markers.iter().filter_map(|marker| text.find(marker)).min()
}

pub fn truncate_at_marker<'a>(text: &'a str, markers: &[&str]) -> &'a str {
    match find_marker(text, markers) {
        Some(pos) => &text[..pos],
        None => text,
    }
}

/// Trim a raw completion into something short enough to be spoken.
pub fn post_process(raw: &str, style: PromptStyle, max_chars: usize) -> String {
    let text = truncate_at_marker(raw, style.stop_markers()).trim();

    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let head = &text[..cut];

    // Prefer ending on a complete sentence.
    match head.rfind(['.', '!', '?']) {
        Some(pos) if pos > 0 => head[..=pos].trim_end().to_string(),
        _ => head.trim_end().to_string(),
    }
}
