//! Extraction of the final score line from a grading report.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Points awarded out of the points available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub awarded: f64,
    pub total: f64,
}

impl Score {
    /// `awarded / total`, or `None` when the total is zero.
    pub fn ratio(&self) -> Option<f64> {
        (self.total > 0.0).then(|| self.awarded / self.total)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.awarded, self.total)
    }
}

fn score_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)TOTAL\s+USER\s+SCORE\s*:\s*\**\s*(\d+(?:\.\d+)?)\s*/\s*(\d+(?:\.\d+)?)").ok()
    })
    .as_ref()
}

/// Parse the last `TOTAL USER SCORE: <n>/<n>` line of `report`.
pub fn parse_total_score(report: &str) -> Option<Score> {
    let caps = score_line()?.captures_iter(report).last()?;
    let awarded = caps.get(1)?.as_str().parse().ok()?;
    let total = caps.get(2)?.as_str().parse().ok()?;
    Some(Score { awarded, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_line() {
        let report = "Tests: 3/3 passing\n\nTOTAL USER SCORE: 8/10\n";
        assert_eq!(
            parse_total_score(report),
            Some(Score {
                awarded: 8.0,
                total: 10.0
            })
        );
    }

    #[test]
    fn test_parse_takes_last_match() {
        let report = "Example format: TOTAL USER SCORE: 0/0\n...\n**TOTAL USER SCORE: 7.5 / 12**";
        let score = parse_total_score(report).unwrap();
        assert_eq!(score.awarded, 7.5);
        assert_eq!(score.total, 12.0);
        assert_eq!(score.ratio(), Some(0.625));
    }

    #[test]
    fn test_parse_missing_line() {
        assert_eq!(parse_total_score("No evaluation report generated."), None);
    }

    #[test]
    fn test_zero_total_has_no_ratio() {
        let score = Score {
            awarded: 0.0,
            total: 0.0,
        };
        assert_eq!(score.ratio(), None);
        assert_eq!(score.to_string(), "0/0");
    }
}
