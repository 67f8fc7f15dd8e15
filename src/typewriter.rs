use std::io::{self, Write};
use std::time::Duration;

pub const CURSOR: &str = "▌";
const ERASE_CURSOR: &str = "\u{8} \u{8}";

/// Writes an already complete answer token by token behind a cursor.
#[derive(Debug, Clone)]
pub struct Typewriter {
    delay: Duration,
}

impl Typewriter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn play<W: Write>(&self, text: &str, out: &mut W) -> io::Result<()> {
        let mut cursor_shown = false;
        for token in text.split_whitespace() {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if cursor_shown {
                write!(out, "{}", ERASE_CURSOR)?;
            }
            write!(out, "{} {}", token, CURSOR)?;
            cursor_shown = true;
            out.flush()?;
        }

        if cursor_shown {
            write!(out, "{}", ERASE_CURSOR)?;
        }
        writeln!(out)?;
        out.flush()
    }
}
