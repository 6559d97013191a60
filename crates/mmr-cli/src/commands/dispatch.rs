//! `mmr process` and `mmr replay`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use mmr_ledger::{DispatchOutcome, Dispatcher, EngineError, LedgerStore, Outcome};

use super::{build_dispatcher, load_message};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: u64,
    pub ignored: u64,
    pub duplicates: u64,
    pub failed: u64,
}

pub async fn process(config_paths: &[String], message_file: &str) -> Result<()> {
    let message = load_message(message_file)?;
    let dispatcher = build_dispatcher(config_paths).await?;
    let res = dispatcher.dispatch(&message).await;
    println!("{}", outcome_line(&res));
    match res {
        Err(e) if !e.is_duplicate() => Err(e.into()),
        _ => Ok(()),
    }
}

pub async fn replay_file(config_paths: &[String], input: &str, keep_going: bool) -> Result<()> {
    let file = File::open(input).with_context(|| format!("open input failed: {input}"))?;
    let dispatcher = build_dispatcher(config_paths).await?;
    let stdout = io::stdout();
    let summary = replay(
        &dispatcher,
        BufReader::new(file),
        keep_going,
        &mut stdout.lock(),
    )
    .await?;
    println!(
        "applied={} ignored={} duplicates={} failed={}",
        summary.applied, summary.ignored, summary.duplicates, summary.failed
    );
    if summary.failed > 0 {
        bail!("replay finished with {} failed message(s)", summary.failed);
    }
    Ok(())
}

/// Dispatch one JSON message per line, in order.
///
/// Blank lines are skipped. A duplicate counts as already applied. Stops at
/// the first failure unless `keep_going`.
pub async fn replay<S, R, W>(
    dispatcher: &Dispatcher<S>,
    input: R,
    keep_going: bool,
    out: &mut W,
) -> Result<ReplaySummary>
where
    S: LedgerStore,
    R: BufRead,
    W: Write,
{
    let mut summary = ReplaySummary::default();

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.context("read input line failed")?;
        let raw = line.trim().trim_start_matches('\u{feff}');
        if raw.is_empty() {
            continue;
        }

        let failed = match serde_json::from_str::<Value>(raw) {
            Err(e) => {
                writeln!(out, "line={line_no} outcome=error kind=PARSE error=\"{e}\"")?;
                true
            }
            Ok(message) => {
                let res = dispatcher.dispatch(&message).await;
                writeln!(out, "line={line_no} {}", outcome_line(&res))?;
                match res {
                    Ok(Outcome::Applied) => summary.applied += 1,
                    Ok(Outcome::Ignored(_)) => summary.ignored += 1,
                    Err(ref e) if e.is_duplicate() => summary.duplicates += 1,
                    Err(_) => {}
                }
                matches!(&res, Err(e) if !e.is_duplicate())
            }
        };

        if failed {
            summary.failed += 1;
            warn!(line = line_no, "replay line failed");
            if !keep_going {
                break;
            }
        }
    }

    info!(
        applied = summary.applied,
        ignored = summary.ignored,
        duplicates = summary.duplicates,
        failed = summary.failed,
        "replay done"
    );
    Ok(summary)
}

fn outcome_line(res: &Result<DispatchOutcome, EngineError>) -> String {
    match res {
        Ok(Outcome::Applied) => "outcome=applied".to_string(),
        Ok(Outcome::Ignored(reason)) => format!("outcome=ignored reason=\"{reason}\""),
        Err(e) if e.is_duplicate() => "outcome=already_applied".to_string(),
        Err(e) => format!("outcome=error kind={} error=\"{e}\"", e.kind().as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmr_testkit::{phase_end, registration, review, Harness, CHALLENGE_ID, ROUND_ID};

    fn jsonl(messages: &[Value]) -> String {
        messages
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn replay_counts_each_outcome() {
        let h = Harness::new().await;
        let input = format!(
            "{}\n\n{}\n{}\n",
            registration(CHALLENGE_ID, 101),
            registration(CHALLENGE_ID, 101),
            phase_end(CHALLENGE_ID, "Submission", "End"),
        );

        let mut out = Vec::new();
        let summary = replay(&h.dispatcher, input.as_bytes(), false, &mut out)
            .await
            .unwrap();

        assert_eq!(
            summary,
            ReplaySummary {
                applied: 1,
                ignored: 1,
                duplicates: 1,
                failed: 0
            }
        );
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("line=1 outcome=applied"));
        assert!(text.contains("line=3 outcome=already_applied"));
        assert!(text.contains("line=4 outcome=ignored"));
    }

    #[tokio::test]
    async fn replay_stops_at_first_failure_by_default() {
        let h = Harness::new().await;
        // Review before registration fails its precondition.
        h.add_submission("sub-7", 7, 50_007);
        let input = jsonl(&[
            review("sub-7", "review-type-1", 80.0),
            registration(CHALLENGE_ID, 7),
        ]);

        let mut out = Vec::new();
        let summary = replay(&h.dispatcher, input.as_bytes(), false, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.applied, 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("kind=PRECONDITION"));
        assert!(!text.contains("line=2"));
    }

    #[tokio::test]
    async fn keep_going_continues_past_bad_lines() {
        let h = Harness::new().await;
        let input = format!("not json\n{}\n", registration(CHALLENGE_ID, 9));

        let mut out = Vec::new();
        let summary = replay(&h.dispatcher, input.as_bytes(), true, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.applied, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("line=1 outcome=error kind=PARSE"));
        assert!(h
            .ledger
            .snapshot()
            .await
            .component_state(ROUND_ID, 9)
            .is_some());
    }
}
