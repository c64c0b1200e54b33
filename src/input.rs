//! Keyboard shortcuts. A dedicated OS thread reads crossterm events in raw
//! mode and forwards mapped commands to the event loop over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ConfigError;

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    ToggleMute,
    Silence,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBindings {
    pub mute: KeyCode,
    pub silence: KeyCode,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            mute: KeyCode::Char(' '),
            silence: KeyCode::Esc,
        }
    }
}

/// Parse a key name such as "space", "escape", "enter", "f5" or a single character.
pub fn parse_key(name: &str) -> Result<KeyCode, ConfigError> {
    let lower = name.trim().to_ascii_lowercase();
    let code = match lower.as_str() {
        "space" | " " => KeyCode::Char(' '),
        "escape" | "esc" => KeyCode::Esc,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        s if s.len() > 1 && s.starts_with('f') => match s[1..].parse::<u8>() {
            Ok(n @ 1..=12) => KeyCode::F(n),
            _ => return Err(ConfigError::UnknownKey(name.to_string())),
        },
        s => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return Err(ConfigError::UnknownKey(name.to_string())),
            }
        }
    };
    Ok(code)
}

/// Map a key event to a command. Ctrl-C and `q` always quit (raw mode
/// swallows SIGINT); `m` is a fixed alternate for the mute toggle.
pub fn map_key(key: &KeyEvent, bindings: &KeyBindings) -> Option<UserCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(UserCommand::Quit),
            _ => None,
        };
    }
    let code = match key.code {
        KeyCode::Char(c) => KeyCode::Char(c.to_ascii_lowercase()),
        other => other,
    };
    if code == bindings.mute {
        Some(UserCommand::ToggleMute)
    } else if code == bindings.silence {
        Some(UserCommand::Silence)
    } else if code == KeyCode::Char('m') {
        Some(UserCommand::ToggleMute)
    } else if code == KeyCode::Char('q') {
        Some(UserCommand::Quit)
    } else {
        None
    }
}

/// Keeps the reader thread alive; restores the terminal on drop.
pub struct KeyboardHandle {
    stop_flag: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
}

impl KeyboardHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

impl Drop for KeyboardHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Enter raw mode and start forwarding shortcuts to `tx`.
pub fn spawn_keyboard_reader(
    bindings: KeyBindings,
    tx: mpsc::UnboundedSender<UserCommand>,
) -> std::io::Result<KeyboardHandle> {
    terminal::enable_raw_mode()?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_reader = Arc::clone(&stop_flag);
    let poll_every = Duration::from_millis(100);

    let spawned = std::thread::Builder::new()
        .name("keyboard".into())
        .spawn(move || {
            while !stop_reader.load(Ordering::Relaxed) {
                match event::poll(poll_every) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(error = %e, "keyboard poll failed, input disabled");
                        break;
                    }
                }
                let key = match event::read() {
                    Ok(Event::Key(key)) => key,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "keyboard read failed, input disabled");
                        break;
                    }
                };
                if let Some(cmd) = map_key(&key, &bindings) {
                    debug!(command = ?cmd, "user_command");
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
            }
            info!("keyboard reader exiting");
        });

    let reader_thread = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
    };

    Ok(KeyboardHandle {
        stop_flag,
        reader_thread: Some(reader_thread),
    })
}
