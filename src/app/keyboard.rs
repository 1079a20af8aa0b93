use crate::error::{DoorcamError, Result};
use crate::events::{DoorcamEvent, EventBus};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Trigger,
    Quit,
}

pub fn key_action(code: KeyCode) -> Option<KeyAction> {
    match code {
        KeyCode::Char(' ') => Some(KeyAction::Trigger),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Event published for a key action
pub fn action_event(action: KeyAction) -> DoorcamEvent {
    let timestamp = SystemTime::now();
    match action {
        KeyAction::Trigger => DoorcamEvent::ManualTrigger {
            source: "keyboard".to_string(),
            timestamp,
        },
        KeyAction::Quit => DoorcamEvent::ShutdownRequested {
            timestamp,
            reason: "keyboard".to_string(),
        },
    }
}

/// Terminal trigger for bench testing: SPACE records, `q` or Esc quits
pub struct KeyboardInputHandler {
    event_bus: EventBus,
    stop: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            stop: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        enable_raw_mode()
            .map_err(|e| DoorcamError::component("keyboard", format!("raw mode: {}", e)))?;
        info!("Keyboard input active: SPACE triggers a recording, q or Esc quits");

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let event_bus = self.event_bus.clone();
        self.task = Some(tokio::task::spawn_blocking(move || {
            read_keys(&event_bus, &stop);
            if let Err(e) = disable_raw_mode() {
                error!("Failed to restore terminal mode: {}", e);
            }
            debug!("Keyboard reader exited");
        }));
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::SeqCst);
        task.await
            .map_err(|e| DoorcamError::component("keyboard", e.to_string()))?;
        info!("Keyboard input stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

fn read_keys(event_bus: &EventBus, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Keyboard poll failed: {}", e);
                continue;
            }
        }

        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => key,
            Ok(_) => continue,
            Err(e) => {
                warn!("Keyboard read failed: {}", e);
                continue;
            }
        };

        let Some(action) = key_action(key.code) else {
            debug!("Ignoring key {:?}", key.code);
            continue;
        };

        info!("Keyboard {:?}", action);
        event_bus.publish(action_event(action));
        if action == KeyAction::Quit {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(key_action(KeyCode::Char(' ')), Some(KeyAction::Trigger));
        assert_eq!(key_action(KeyCode::Char('q')), Some(KeyAction::Quit));
        assert_eq!(key_action(KeyCode::Esc), Some(KeyAction::Quit));
        assert_eq!(key_action(KeyCode::Char('x')), None);
        assert_eq!(key_action(KeyCode::Enter), None);
    }

    #[test]
    fn test_trigger_is_a_manual_trigger() {
        let event = action_event(KeyAction::Trigger);
        assert!(event.is_trigger());
        assert!(matches!(event, DoorcamEvent::ManualTrigger { ref source, .. } if source == "keyboard"));

        let quit = action_event(KeyAction::Quit);
        assert!(!quit.is_trigger());
        assert!(matches!(quit, DoorcamEvent::ShutdownRequested { .. }));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut handler = KeyboardInputHandler::new(EventBus::new(4));
        assert!(!handler.is_running());
        handler.stop().await.unwrap();
    }
}
