//! Unified event handling system

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{KeybindingsConfig, SettingsChange};
use crate::core::state::Page;

/// All possible events in the system
#[derive(Debug, Clone)]
pub enum Event {
    // Input events
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(u16, u16),

    /// Render tick; also expires notifications
    Tick,

    /// A page loop published a new sample (coalesced)
    PageUpdated(Page),

    /// The settings store changed (file reload or in-app toggle)
    Settings(SettingsChange),
}

/// Result of handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    Continue,
    Quit,
}

pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
    pub fn new() -> (Self, mpsc::UnboundedSender<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }

    /// Start terminal input and the render tick
    pub fn spawn_sources(event_tx: mpsc::UnboundedSender<Event>) {
        tokio::spawn(Self::terminal_events(event_tx.clone()));
        tokio::spawn(Self::tick_events(
            event_tx,
            Duration::from_millis(250),
            Event::Tick,
        ));
    }

    /// Forward settings changes into the event loop
    pub fn spawn_settings(
        mut changes: tokio::sync::broadcast::Receiver<SettingsChange>,
        tx: mpsc::UnboundedSender<Event>,
    ) {
        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if tx.send(Event::Settings(change)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "settings receiver lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn terminal_events(tx: mpsc::UnboundedSender<Event>) {
        use crossterm::event::{self, Event as CrosstermEvent};
        use futures::StreamExt;

        let mut reader = event::EventStream::new();
        while let Some(event_result) = reader.next().await {
            let event = match event_result {
                Ok(CrosstermEvent::Key(key)) => Event::Key(key),
                Ok(CrosstermEvent::Mouse(mouse)) => Event::Mouse(mouse),
                Ok(CrosstermEvent::Resize(w, h)) => Event::Resize(w, h),
                _ => continue,
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    }

    async fn tick_events(tx: mpsc::UnboundedSender<Event>, interval: Duration, event: Event) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if tx.send(event.clone()).is_err() {
                break;
            }
        }
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Key binding helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyBinding {
    pub fn new(key: KeyCode) -> Self {
        Self {
            key,
            modifiers: KeyModifiers::NONE,
        }
    }

    pub fn ctrl(key: KeyCode) -> Self {
        Self {
            key,
            modifiers: KeyModifiers::CONTROL,
        }
    }

    /// Parse "q", "K", "?", "tab", "esc", "space", "ctrl+k" and similar.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some(rest) = spec
            .strip_prefix("ctrl+")
            .or_else(|| spec.strip_prefix("ctrl-"))
            .or_else(|| spec.strip_prefix("C-"))
        {
            return Self::parse(rest).map(|b| Self::ctrl(b.key));
        }
        let key = match spec.to_ascii_lowercase().as_str() {
            "tab" => KeyCode::Tab,
            "esc" | "escape" => KeyCode::Esc,
            "enter" | "return" => KeyCode::Enter,
            "space" => KeyCode::Char(' '),
            "backspace" => KeyCode::Backspace,
            "up" => KeyCode::Up,
            "down" => KeyCode::Down,
            "left" => KeyCode::Left,
            "right" => KeyCode::Right,
            _ => {
                let mut chars = spec.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => KeyCode::Char(c),
                    _ => return None,
                }
            }
        };
        Some(Self::new(key))
    }

    /// Characters match regardless of SHIFT, since terminals differ on
    /// whether they report it for uppercase and symbols.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        if event.code != self.key {
            return false;
        }
        match self.key {
            KeyCode::Char(_) => event.modifiers.difference(KeyModifiers::SHIFT) == self.modifiers,
            _ => event.modifiers == self.modifiers,
        }
    }
}

/// Configurable bindings plus fixed navigation keys
#[derive(Debug, Clone)]
pub struct KeyBindings {
    pub quit: KeyBinding,
    pub help: KeyBinding,
    pub search: KeyBinding,
    pub pin: KeyBinding,
    pub group: KeyBinding,
    pub kill: KeyBinding,
    pub page: KeyBinding,
}

impl KeyBindings {
    pub fn from_config(config: &KeybindingsConfig) -> Self {
        let defaults = KeybindingsConfig::default();
        let pick = |value: &str, fallback: &str| {
            KeyBinding::parse(value).unwrap_or_else(|| {
                tracing::warn!(binding = value, "unrecognised key binding, using default");
                KeyBinding::parse(fallback).unwrap_or_else(|| KeyBinding::new(KeyCode::Null))
            })
        };
        Self {
            quit: pick(&config.quit, &defaults.quit),
            help: pick(&config.help, &defaults.help),
            search: pick(&config.search, &defaults.search),
            pin: pick(&config.pin, &defaults.pin),
            group: pick(&config.group, &defaults.group),
            kill: pick(&config.kill, &defaults.kill),
            page: pick(&config.page, &defaults.page),
        }
    }

    pub fn quit_alt() -> KeyBinding {
        KeyBinding::ctrl(KeyCode::Char('c'))
    }

    /// Terminate the row and everything below it
    pub fn kill_tree() -> KeyBinding {
        KeyBinding::ctrl(KeyCode::Char('k'))
    }

    pub fn escape() -> KeyBinding {
        KeyBinding::new(KeyCode::Esc)
    }

    pub fn enter() -> KeyBinding {
        KeyBinding::new(KeyCode::Enter)
    }

    pub fn expand() -> KeyBinding {
        KeyBinding::new(KeyCode::Char(' '))
    }

    pub fn up() -> KeyBinding {
        KeyBinding::new(KeyCode::Up)
    }

    pub fn down() -> KeyBinding {
        KeyBinding::new(KeyCode::Down)
    }

    pub fn vim_up() -> KeyBinding {
        KeyBinding::new(KeyCode::Char('k'))
    }

    pub fn vim_down() -> KeyBinding {
        KeyBinding::new(KeyCode::Char('j'))
    }

    pub fn page_up() -> KeyBinding {
        KeyBinding::new(KeyCode::PageUp)
    }

    pub fn page_down() -> KeyBinding {
        KeyBinding::new(KeyCode::PageDown)
    }
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self::from_config(&KeybindingsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_parse_bindings() {
        assert_eq!(KeyBinding::parse("tab"), Some(KeyBinding::new(KeyCode::Tab)));
        assert_eq!(KeyBinding::parse("K"), Some(KeyBinding::new(KeyCode::Char('K'))));
        assert_eq!(
            KeyBinding::parse("ctrl+x"),
            Some(KeyBinding::ctrl(KeyCode::Char('x')))
        );
        assert_eq!(KeyBinding::parse("space"), Some(KeyBinding::new(KeyCode::Char(' '))));
        assert_eq!(KeyBinding::parse("nope"), None);
    }

    #[test]
    fn test_char_matches_ignore_shift() {
        let kill = KeyBinding::parse("K").unwrap();
        assert!(kill.matches(&key(KeyCode::Char('K'), KeyModifiers::SHIFT)));
        assert!(kill.matches(&key(KeyCode::Char('K'), KeyModifiers::NONE)));
        assert!(!kill.matches(&key(KeyCode::Char('K'), KeyModifiers::CONTROL)));
        assert!(KeyBindings::kill_tree().matches(&key(KeyCode::Char('k'), KeyModifiers::CONTROL)));
        assert!(!KeyBindings::vim_up().matches(&key(KeyCode::Char('k'), KeyModifiers::CONTROL)));
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let config = KeybindingsConfig {
            quit: "not-a-key".into(),
            ..Default::default()
        };
        let keys = KeyBindings::from_config(&config);
        assert_eq!(keys.quit, KeyBinding::new(KeyCode::Char('q')));
        assert_eq!(keys.page, KeyBinding::new(KeyCode::Tab));
    }
}
