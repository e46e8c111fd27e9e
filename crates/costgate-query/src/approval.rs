//! Approval gates consulted before billable execution.

use async_trait::async_trait;
use costgate_core::{ApprovalDecision, ApprovalGate, CoreError, CoreResult, CostSummary};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::Arc;
use tracing::debug;

/// Question printed under the cost summary.
pub const PROMPT: &str = "Proceed? [Y/n]";

/// Interpret one line typed by the operator.
///
/// The line is trimmed and upper-cased and only its first character counts,
/// so `yes` approves and ` n ` rejects. Anything else is `None`.
#[must_use]
pub fn parse_answer(line: &str) -> Option<ApprovalDecision> {
    match line.trim().to_uppercase().chars().next() {
        Some('Y') => Some(ApprovalDecision::Approved),
        Some('N') => Some(ApprovalDecision::Rejected),
        _ => None,
    }
}

/// Asks on a terminal, one line at a time, until the answer is Y or N.
///
/// Reading happens on tokio's blocking pool. End of input counts as a
/// rejection.
pub struct ConsoleApproval<R, W> {
    io: Arc<Mutex<(R, W)>>,
}

impl ConsoleApproval<BufReader<Stdin>, Stdout> {
    /// Prompt on stdout, read answers from stdin.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R, W> ConsoleApproval<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Arc::new(Mutex::new((reader, writer))),
        }
    }
}

fn ask<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    summary: &str,
) -> std::io::Result<ApprovalDecision> {
    writeln!(writer, "{summary}")?;

    loop {
        writeln!(writer, "{PROMPT}")?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            debug!("input closed while awaiting approval");
            return Ok(ApprovalDecision::Rejected);
        }

        if let Some(decision) = parse_answer(&line) {
            return Ok(decision);
        }
    }
}

#[async_trait]
impl<R, W> ApprovalGate for ConsoleApproval<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    async fn confirm(&self, summary: &CostSummary) -> CoreResult<ApprovalDecision> {
        let io = Arc::clone(&self.io);
        let summary = summary.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = io.lock();
            let (reader, writer) = &mut *guard;
            ask(reader, writer, &summary)
        })
        .await
        .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?
        .map_err(CoreError::from)
    }
}

/// Hands out pre-recorded decisions; rejects once they run out.
#[derive(Debug, Default)]
pub struct ScriptedApproval {
    answers: Mutex<VecDeque<ApprovalDecision>>,
    seen: Mutex<Vec<CostSummary>>,
}

impl ScriptedApproval {
    pub fn new(answers: impl IntoIterator<Item = ApprovalDecision>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn approving() -> Self {
        Self::new(std::iter::repeat(ApprovalDecision::Approved).take(64))
    }

    pub fn rejecting() -> Self {
        Self::new([ApprovalDecision::Rejected])
    }

    /// How many times the gate was consulted.
    #[must_use]
    pub fn prompts(&self) -> usize {
        self.seen.lock().len()
    }

    /// Summaries presented so far, oldest first.
    #[must_use]
    pub fn summaries(&self) -> Vec<CostSummary> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ApprovalGate for ScriptedApproval {
    async fn confirm(&self, summary: &CostSummary) -> CoreResult<ApprovalDecision> {
        self.seen.lock().push(*summary);
        Ok(self
            .answers
            .lock()
            .pop_front()
            .unwrap_or(ApprovalDecision::Rejected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costgate_core::PricingSettings;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn summary() -> CostSummary {
        CostSummary::new(1 << 30, &PricingSettings::default())
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y\n"), Some(ApprovalDecision::Approved));
        assert_eq!(parse_answer("  yes please"), Some(ApprovalDecision::Approved));
        assert_eq!(parse_answer("N"), Some(ApprovalDecision::Rejected));
        assert_eq!(parse_answer(" no\r\n"), Some(ApprovalDecision::Rejected));
        assert_eq!(parse_answer(""), None);
        assert_eq!(parse_answer("maybe"), None);
        assert_eq!(parse_answer("   \n"), None);
    }

    #[tokio::test]
    async fn test_console_reprompts_until_valid() {
        let out = SharedBuf::default();
        let gate = ConsoleApproval::new(Cursor::new(b"\nmaybe\ny\n".to_vec()), out.clone());

        let decision = gate.confirm(&summary()).await.unwrap();
        assert_eq!(decision, ApprovalDecision::Approved);

        let text = out.text();
        assert!(text.starts_with("This query will process 1.00 GiB (~$0.01)."));
        assert_eq!(text.matches(PROMPT).count(), 3);
    }

    #[tokio::test]
    async fn test_console_rejects() {
        let gate = ConsoleApproval::new(Cursor::new(b"n\n".to_vec()), SharedBuf::default());
        assert_eq!(
            gate.confirm(&summary()).await.unwrap(),
            ApprovalDecision::Rejected
        );
    }

    #[tokio::test]
    async fn test_console_eof_rejects() {
        let gate = ConsoleApproval::new(Cursor::new(b"what\n".to_vec()), SharedBuf::default());
        assert_eq!(
            gate.confirm(&summary()).await.unwrap(),
            ApprovalDecision::Rejected
        );
    }

    #[tokio::test]
    async fn test_console_reused_across_prompts() {
        let gate = ConsoleApproval::new(Cursor::new(b"y\nn\n".to_vec()), SharedBuf::default());
        assert_eq!(gate.confirm(&summary()).await.unwrap(), ApprovalDecision::Approved);
        assert_eq!(gate.confirm(&summary()).await.unwrap(), ApprovalDecision::Rejected);
    }

    #[tokio::test]
    async fn test_scripted_records_summaries() {
        let gate = ScriptedApproval::new([ApprovalDecision::Approved]);
        assert_eq!(gate.confirm(&summary()).await.unwrap(), ApprovalDecision::Approved);
        assert_eq!(gate.confirm(&summary()).await.unwrap(), ApprovalDecision::Rejected);
        assert_eq!(gate.prompts(), 2);
        assert_eq!(gate.summaries()[0].bytes, 1 << 30);
    }
}
