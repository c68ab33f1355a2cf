//! Reading par2cmdline's console output
//!
//! Only the lines the engine acts on are recognised:
//!
//! ```text
//! Target: "show.mkv" - damaged. Found 95 of 100 data blocks.
//! Target: "show.nfo" - missing.
//! You have 195 out of 200 data blocks available.
//! You have 8 recovery blocks available.
//! Repair is possible.
//! All files are correct, repair is not required.
//! Repair complete.
//! ```

use super::traits::{RepairResult, VerifyResult};
use regex::Regex;
use std::sync::LazyLock;

// Patterns are literals; compilation cannot fail.
#[allow(clippy::expect_used)]
static TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^Target:\s*"(.+)"\s*-\s*(found|damaged|missing)"#).expect("valid regex")
});

#[allow(clippy::expect_used)]
static DATA_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)You have (\d+) out of (\d+) data blocks available").expect("valid regex")
});

#[allow(clippy::expect_used)]
static RECOVERY_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)You have (\d+) recovery blocks? available").expect("valid regex")
});

#[allow(clippy::expect_used)]
static BLOCKS_SHORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)You need (\d+) more recovery blocks?").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetState {
    Found,
    Damaged,
    Missing,
}

fn parse_target(line: &str) -> Option<(String, TargetState)> {
    let caps = TARGET.captures(line.trim())?;
    let state = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "found" => TargetState::Found,
        "damaged" => TargetState::Damaged,
        _ => TargetState::Missing,
    };
    Some((caps.get(1)?.as_str().to_string(), state))
}

fn capture_u32(re: &Regex, line: &str, group: usize) -> Option<u32> {
    re.captures(line)?.get(group)?.as_str().parse().ok()
}

fn combined(stdout: &[u8], stderr: &[u8]) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    )
}

/// Interpret the output of `par2 v`
pub fn parse_verify_output(stdout: &[u8], stderr: &[u8], success: bool) -> VerifyResult {
    let text = combined(stdout, stderr);
    let mut result = VerifyResult::default();
    let mut all_correct = false;
    let mut repair_possible = None;

    for line in text.lines() {
        let lower = line.to_ascii_lowercase();

        if let Some((name, state)) = parse_target(line) {
            match state {
                TargetState::Damaged => result.damaged_files.push(name),
                TargetState::Missing => result.missing_files.push(name),
                TargetState::Found => {}
            }
        } else if let (Some(have), Some(total)) = (
            capture_u32(&DATA_BLOCKS, line, 1),
            capture_u32(&DATA_BLOCKS, line, 2),
        ) {
            result.blocks_needed = total.saturating_sub(have);
        } else if let Some(count) = capture_u32(&RECOVERY_BLOCKS, line, 1) {
            result.recovery_blocks_available = count;
        } else if lower.contains("all files are correct") {
            all_correct = true;
        } else if lower.contains("repair is not possible") {
            repair_possible = Some(false);
        } else if lower.contains("repair is possible") {
            repair_possible = Some(true);
        } else if let Some(short) = capture_u32(&BLOCKS_SHORT, line, 1) {
            // par2 may stop before printing the data block summary
            let floor = result.recovery_blocks_available.saturating_add(short);
            result.blocks_needed = result.blocks_needed.max(floor);
            repair_possible = Some(false);
        }
    }

    result.is_complete = all_correct
        || (success
            && result.blocks_needed == 0
            && result.damaged_files.is_empty()
            && result.missing_files.is_empty());
    result.repairable = !result.is_complete
        && repair_possible
            .unwrap_or(result.recovery_blocks_available >= result.blocks_needed);
    result
}

/// Interpret the output of `par2 r`
pub fn parse_repair_output(stdout: &[u8], stderr: &[u8], success: bool) -> RepairResult {
    let text = combined(stdout, stderr);
    let mut result = RepairResult::default();
    let mut broken: Vec<String> = Vec::new();
    let mut verifying_repaired = false;
    let mut complete = false;
    let mut failure: Option<String> = None;

    for line in text.lines() {
        let lower = line.to_ascii_lowercase();

        if lower.contains("verifying repaired files") {
            verifying_repaired = true;
        } else if let Some((name, state)) = parse_target(line) {
            match (verifying_repaired, state) {
                (false, TargetState::Damaged | TargetState::Missing) => broken.push(name),
                (true, TargetState::Found) if broken.contains(&name) => {
                    result.repaired_files.push(name)
                }
                (true, TargetState::Damaged | TargetState::Missing) => {
                    result.failed_files.push(name)
                }
                _ => {}
            }
        } else if lower.contains("repair complete") || lower.contains("repair is not required") {
            complete = true;
        } else if lower.contains("repair failed")
            || lower.contains("repair is not possible")
            || lower.starts_with("error")
        {
            failure.get_or_insert_with(|| line.trim().to_string());
        }
    }

    result.success = success && complete && result.failed_files.is_empty();
    if !result.success {
        result.error = failure.or_else(|| {
            let stderr = String::from_utf8_lossy(stderr).trim().to_string();
            Some(if stderr.is_empty() {
                "par2 repair did not complete".to_string()
            } else {
                stderr
            })
        });
    }
    result
}
