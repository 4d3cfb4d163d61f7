//! Minimal cancellable line prompt on the terminal.
//!
//! Uses crossterm raw mode so Esc and Ctrl-C cancel the prompt instead of
//! killing the process, and so secrets can be masked. Falls back to plain
//! line reads when stdin is not a terminal.

use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::StreamExt;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::OnceLock;
use tokio::sync::{Mutex, mpsc};

/// Result of one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInput {
    Line(String),
    Cancelled,
}

/// What a key press did to the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Text to write back to the terminal.
    Echo(String),
    Submit,
    Cancel,
    Ignore,
}

const ERASE: &str = "\u{8} \u{8}";

/// Editing state for a single line, independent of the terminal.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: String,
    masked: bool,
}

impl LineEditor {
    #[must_use]
    pub fn new(masked: bool) -> Self {
        Self {
            buffer: String::new(),
            masked,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome {
        if key.kind == KeyEventKind::Release {
            return KeyOutcome::Ignore;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Enter => KeyOutcome::Submit,
            KeyCode::Esc => KeyOutcome::Cancel,
            KeyCode::Char('c') if ctrl => KeyOutcome::Cancel,
            KeyCode::Char('d') if ctrl && self.buffer.is_empty() => KeyOutcome::Cancel,
            KeyCode::Char('u') if ctrl => {
                let count = self.buffer.chars().count();
                self.buffer.clear();
                if count == 0 {
                    KeyOutcome::Ignore
                } else {
                    KeyOutcome::Echo(ERASE.repeat(count))
                }
            }
            KeyCode::Backspace => match self.buffer.pop() {
                Some(_) => KeyOutcome::Echo(ERASE.to_string()),
                None => KeyOutcome::Ignore,
            },
            KeyCode::Char(c) if !ctrl => {
                self.buffer.push(c);
                let shown = if self.masked { '*' } else { c };
                KeyOutcome::Echo(shown.to_string())
            }
            _ => KeyOutcome::Ignore,
        }
    }

    #[must_use]
    pub fn line(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn into_line(self) -> String {
        self.buffer
    }
}

/// Restores cooked mode on drop, including when the prompt future is dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Prompt for one line on stderr.
pub async fn read_line(label: &str, masked: bool) -> io::Result<LineInput> {
    let mut stderr = io::stderr();
    write!(stderr, "{label}: ")?;
    stderr.flush()?;

    if io::stdin().is_terminal() {
        read_line_raw(masked).await
    } else {
        read_line_piped().await
    }
}

async fn read_line_raw(masked: bool) -> io::Result<LineInput> {
    let _guard = RawModeGuard::enable()?;
    let mut events = EventStream::new();
    let mut editor = LineEditor::new(masked);
    let mut stderr = io::stderr();

    while let Some(event) = events.next().await {
        let Event::Key(key) = event? else {
            continue;
        };
        match editor.handle_key(key) {
            KeyOutcome::Echo(text) => {
                write!(stderr, "{text}")?;
                stderr.flush()?;
            }
            KeyOutcome::Submit => {
                write!(stderr, "\r\n")?;
                return Ok(LineInput::Line(editor.into_line()));
            }
            KeyOutcome::Cancel => {
                write!(stderr, "\r\n")?;
                return Ok(LineInput::Cancelled);
            }
            KeyOutcome::Ignore => {}
        }
    }

    Ok(LineInput::Cancelled)
}

/// Lines read off a blocking reader by a detached thread.
///
/// The thread is never joined, so a prompt that is dropped mid-read does not
/// keep the runtime from shutting down. Unread lines stay queued for the
/// next prompt.
pub struct LineReader {
    lines: Mutex<mpsc::Receiver<io::Result<String>>>,
}

impl LineReader {
    pub fn spawn<R: BufRead + Send + 'static>(mut reader: R) -> Self {
        let (tx, rx) = mpsc::channel(1);
        std::thread::spawn(move || {
            loop {
                let mut line = String::new();
                let read = match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
                    Err(e) => Err(e),
                };
                let failed = read.is_err();
                if tx.blocking_send(read).is_err() || failed {
                    break;
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
        }
    }

    /// Next line; `Cancelled` at end of input. Cancel-safe.
    pub async fn next_line(&self) -> io::Result<LineInput> {
        match self.lines.lock().await.recv().await {
            Some(line) => line.map(LineInput::Line),
            None => Ok(LineInput::Cancelled),
        }
    }
}

fn piped_stdin() -> &'static LineReader {
    static STDIN: OnceLock<LineReader> = OnceLock::new();
    STDIN.get_or_init(|| LineReader::spawn(io::BufReader::new(io::stdin())))
}

async fn read_line_piped() -> io::Result<LineInput> {
    piped_stdin().next_line().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::time::Duration;

    /// Reader that blocks until the test feeds it bytes.
    struct Gated(std::sync::mpsc::Receiver<Vec<u8>>);

    impl Read for Gated {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Ok(chunk) = self.0.recv() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_line_reader_lines_then_eof() {
        let reader = LineReader::spawn(Cursor::new("123456\r\n\nlast"));
        assert_eq!(reader.next_line().await.unwrap(), LineInput::Line("123456".into()));
        assert_eq!(reader.next_line().await.unwrap(), LineInput::Line(String::new()));
        assert_eq!(reader.next_line().await.unwrap(), LineInput::Line("last".into()));
        assert_eq!(reader.next_line().await.unwrap(), LineInput::Cancelled);
    }

    #[test]
    fn test_abandoned_read_does_not_block_shutdown() {
        let (feed, gate) = std::sync::mpsc::channel::<Vec<u8>>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let reader = LineReader::spawn(io::BufReader::new(Gated(gate)));
        let pending = runtime.block_on(async {
            tokio::time::timeout(Duration::from_millis(50), reader.next_line()).await
        });
        assert!(pending.is_err());

        // Returns even though the reader thread is still blocked.
        drop(runtime);

        // The line typed later is still delivered to the next prompt.
        feed.send(b"42\n".to_vec()).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert_eq!(
            runtime.block_on(reader.next_line()).unwrap(),
            LineInput::Line("42".into())
        );
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn test_typing_and_submit() {
        let mut editor = LineEditor::new(false);
        assert_eq!(editor.handle_key(key(KeyCode::Char('1'))), KeyOutcome::Echo("1".into()));
        assert_eq!(editor.handle_key(key(KeyCode::Char('2'))), KeyOutcome::Echo("2".into()));
        assert_eq!(editor.handle_key(key(KeyCode::Enter)), KeyOutcome::Submit);
        assert_eq!(editor.into_line(), "12");
    }

    #[test]
    fn test_masked_echo() {
        let mut editor = LineEditor::new(true);
        assert_eq!(editor.handle_key(key(KeyCode::Char('s'))), KeyOutcome::Echo("*".into()));
        assert_eq!(editor.line(), "s");
    }

    #[test]
    fn test_backspace() {
        let mut editor = LineEditor::new(false);
        assert_eq!(editor.handle_key(key(KeyCode::Backspace)), KeyOutcome::Ignore);
        editor.handle_key(key(KeyCode::Char('a')));
        editor.handle_key(key(KeyCode::Char('b')));
        assert_eq!(editor.handle_key(key(KeyCode::Backspace)), KeyOutcome::Echo(ERASE.into()));
        assert_eq!(editor.line(), "a");
    }

    #[test]
    fn test_cancel_keys() {
        let mut editor = LineEditor::new(false);
        assert_eq!(editor.handle_key(key(KeyCode::Esc)), KeyOutcome::Cancel);
        assert_eq!(editor.handle_key(ctrl('c')), KeyOutcome::Cancel);
        assert_eq!(editor.handle_key(ctrl('d')), KeyOutcome::Cancel);
    }

    #[test]
    fn test_ctrl_d_only_cancels_empty_line() {
        let mut editor = LineEditor::new(false);
        editor.handle_key(key(KeyCode::Char('x')));
        assert_eq!(editor.handle_key(ctrl('d')), KeyOutcome::Ignore);
        assert_eq!(editor.line(), "x");
    }

    #[test]
    fn test_ctrl_u_clears_line() {
        let mut editor = LineEditor::new(true);
        editor.handle_key(key(KeyCode::Char('a')));
        editor.handle_key(key(KeyCode::Char('é')));
        assert_eq!(editor.handle_key(ctrl('u')), KeyOutcome::Echo(ERASE.repeat(2)));
        assert_eq!(editor.line(), "");
    }

    #[test]
    fn test_release_events_ignored() {
        let mut editor = LineEditor::new(false);
        let mut release = key(KeyCode::Char('a'));
        release.kind = KeyEventKind::Release;
        assert_eq!(editor.handle_key(release), KeyOutcome::Ignore);
        assert_eq!(editor.line(), "");
    }
}
