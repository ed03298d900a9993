//! Macro tokenizer
//!
//! Splits snippet text into literal runs, key actions and explicit delays.
//! Tags look like `{ENTER}` or `{DELAY 250}` and are matched left to right;
//! tag names are case-insensitive. A bracketed run that is not a known tag
//! stays in the output as literal text, braces included. Braces cannot be
//! nested or escaped.

use std::sync::OnceLock;

use regex::Regex;

use crate::hotkey::{Key, Modifiers};

/// A single key chord produced by a macro tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAction {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyAction {
    fn key(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::empty(),
        }
    }

    fn ctrl(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::CONTROL,
        }
    }
}

/// One parsed unit of a macro snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal run, typed character by character
    Text(String),
    /// Key chord to press and release
    KeyAction(KeyAction),
    /// Explicit pause in milliseconds
    Delay(u64),
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\{[^}]+\}").expect("tag pattern is valid"))
}

/// Tokenize `text`. Never fails: anything unrecognized becomes `Text`.
pub fn parse(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last = 0;

    for tag in tag_pattern().find_iter(text) {
        push_text(&mut tokens, &text[last..tag.start()]);

        let raw = tag.as_str();
        match parse_tag(&raw[1..raw.len() - 1]) {
            Some(token) => tokens.push(token),
            None => push_text(&mut tokens, raw),
        }
        last = tag.end();
    }
    push_text(&mut tokens, &text[last..]);

    tokens
}

fn push_text(tokens: &mut Vec<Token>, text: &str) {
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
}

fn parse_tag(content: &str) -> Option<Token> {
    let tag = content.to_ascii_uppercase();

    if let Some(ms) = tag.strip_prefix("DELAY ") {
        if let Ok(ms) = ms.trim().parse::<u64>() {
            return Some(Token::Delay(ms));
        }
    }

    let action = match tag.as_str() {
        "ENTER" => KeyAction::key(Key::Enter),
        "TAB" => KeyAction::key(Key::Tab),
        "BS" | "BACKSPACE" => KeyAction::key(Key::Backspace),
        "ESC" | "ESCAPE" => KeyAction::key(Key::Escape),
        "CTRL+C" => KeyAction::ctrl(Key::C),
        "CTRL+V" => KeyAction::ctrl(Key::V),
        "CTRL+X" => KeyAction::ctrl(Key::X),
        "CTRL+A" => KeyAction::ctrl(Key::A),
        _ => return None,
    };
    Some(Token::KeyAction(action))
}

/// Number of characters a token contributes to session progress
pub fn text_len(token: &Token) -> usize {
    match token {
        Token::Text(text) => text.chars().count(),
        _ => 0,
    }
}
