//! Merging stdout and stderr into one text stream

use std::mem;

/// Longest line buffered before it is broken
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Pipe a chunk of output came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl OutputStream {
    fn index(self) -> usize {
        match self {
            OutputStream::Stdout => 0,
            OutputStream::Stderr => 1,
        }
    }
}

/// What a reader task sends to its handle
#[derive(Debug)]
pub(crate) enum ReaderEvent {
    Data(OutputStream, String),
    Closed(OutputStream),
}

/// Interleaves two streams without splicing a line of one into a line of
/// the other.
///
/// Complete lines pass through in arrival order. The unterminated tail of one
/// stream (a prompt, a progress fragment) is released early so a consumer
/// can react to it; until that line ends, complete lines of the other stream
/// are held back.
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    pending: [String; 2],
    /// Stream whose partial line has been released but not terminated
    open: Option<OutputStream>,
    held: String,
    ready: String,
}

impl LineAssembler {
    pub(crate) fn push(&mut self, stream: OutputStream, text: &str) {
        for ch in text.chars() {
            let pending = &mut self.pending[stream.index()];
            pending.push(ch);
            if matches!(ch, '\n' | '\r') {
                self.end_line(stream);
            } else if pending.len() >= MAX_LINE_LEN {
                pending.push('\n');
                self.end_line(stream);
            }
        }

        // an open line that never ends must not hold the other stream forever
        if self.held.len() >= MAX_LINE_LEN
            && let Some(open) = self.open
        {
            let rest = mem::take(&mut self.pending[open.index()]);
            self.ready.push_str(&rest);
            self.ready.push('\n');
            self.release();
        }
    }

    /// The stream reached end-of-file; its unterminated last line ends here
    pub(crate) fn close(&mut self, stream: OutputStream) {
        let pending = &mut self.pending[stream.index()];
        if !pending.is_empty() || self.open == Some(stream) {
            pending.push('\n');
            self.end_line(stream);
        }
    }

    /// Text that can be fed to a single-stream consumer as is
    pub(crate) fn take(&mut self) -> String {
        let partial = self.open.or_else(|| {
            [OutputStream::Stdout, OutputStream::Stderr]
                .into_iter()
                .find(|s| !self.pending[s.index()].is_empty())
        });
        if let Some(stream) = partial {
            let text = mem::take(&mut self.pending[stream.index()]);
            if !text.is_empty() {
                self.ready.push_str(&text);
                self.open = Some(stream);
            }
        }
        mem::take(&mut self.ready)
    }

    fn end_line(&mut self, stream: OutputStream) {
        let line = mem::take(&mut self.pending[stream.index()]);
        match self.open {
            Some(open) if open == stream => {
                self.ready.push_str(&line);
                self.release();
            }
            Some(_) => self.held.push_str(&line),
            None => self.ready.push_str(&line),
        }
    }

    fn release(&mut self) {
        self.open = None;
        let held = mem::take(&mut self.held);
        self.ready.push_str(&held);
    }
}
