//! Extraction of array member counts from `/proc/mdstat` text.
//!
//! A stanza looks like:
//!
//! ```text
//! md0 : active raid5 nvme3n1[3] nvme2n1[1] nvme1n1[0]
//!       2093056 blocks super 1.2 level 5, 512k chunk, algorithm 2 [3/3] [UUU]
//! ```
//!
//! Parity levels carry a `[configured/working]` counter. Striped arrays do
//! not, so their members are counted from the `name[index]` tokens on the
//! header, skipping spares `(S)` and counting failed `(F)` as not active.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::scenario::RedundancyLevel;

/// Evidence source named in `UnparseableEvidence` errors.
pub(crate) const SOURCE: &str = "remote introspection";

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)/(\d+)\]").expect("counter regex is valid"))
}

fn member_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\w.-]+\[\d+\]((?:\([A-Z]\))*)$").expect("member regex is valid")
    })
}

/// Member counts reported by the kernel for one array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCounts {
    /// Personality printed on the header line (`raid5`), if any.
    pub personality: Option<String>,
    /// Working members.
    pub active: u32,
    /// Members the array is configured with.
    pub total: u32,
}

impl MemberCounts {
    pub fn is_complete(&self, expected: u32) -> bool {
        self.active == expected && self.total == expected
    }
}

/// Parse the member counts of `array` out of `text`.
///
/// Fails with `UnparseableEvidence` when the stanza or the substructure the
/// level requires is missing. Never guesses.
pub fn parse_member_counts(text: &str, array: &str, level: RedundancyLevel) -> Result<MemberCounts> {
    let stanza = find_stanza(text, array).ok_or_else(|| unparseable(format!(
        "no stanza for array {array}"
    )))?;

    let header = stanza[0];
    let (_, body) = header
        .split_once(':')
        .ok_or_else(|| unparseable(format!("malformed header for {array}: {header}")))?;
    let tokens: Vec<&str> = body.split_whitespace().collect();

    let personality = tokens
        .iter()
        .find(|t| t.starts_with("raid") || **t == "linear" || **t == "multipath")
        .map(|t| t.to_string());

    if let Some(caps) = stanza.iter().find_map(|line| counter_re().captures(line)) {
        let total = parse_count(&caps[1], array)?;
        let active = parse_count(&caps[2], array)?;
        return Ok(MemberCounts {
            personality,
            active,
            total,
        });
    }

    if level.reports_member_counter() {
        return Err(unparseable(format!(
            "array {array} has no [configured/working] counter"
        )));
    }

    let mut total = 0u32;
    let mut failed = 0u32;
    for token in &tokens {
        if let Some(caps) = member_re().captures(token) {
            let flags = caps.get(1).map_or("", |m| m.as_str());
            if flags.contains("(S)") {
                continue;
            }
            total += 1;
            if flags.contains("(F)") {
                failed += 1;
            }
        }
    }
    if total == 0 {
        return Err(unparseable(format!("array {array} lists no member devices")));
    }

    Ok(MemberCounts {
        personality,
        active: total - failed,
        total,
    })
}

/// Lines belonging to `array`: its header plus indented continuation lines.
fn find_stanza<'a>(text: &'a str, array: &str) -> Option<Vec<&'a str>> {
    let mut lines = text.lines();
    let header = lines.by_ref().find(|line| {
        line.split_once(':')
            .is_some_and(|(name, _)| name.trim() == array && !line.starts_with(char::is_whitespace))
    })?;

    let mut stanza = vec![header];
    stanza.extend(
        lines.take_while(|line| !line.trim().is_empty() && line.starts_with(char::is_whitespace)),
    );
    Some(stanza)
}

fn parse_count(raw: &str, array: &str) -> Result<u32> {
    raw.parse()
        .map_err(|_| unparseable(format!("counter value '{raw}' for {array} is not a number")))
}

fn unparseable(reason: String) -> FleetError {
    FleetError::UnparseableEvidence {
        source_name: SOURCE.to_string(),
        reason,
        discrepancies: Vec::new(),
    }
}
