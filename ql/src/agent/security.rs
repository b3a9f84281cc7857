//! Sandbox security scoring
//!
//! A coarse static screen over the commands a task executed: start at 100,
//! lose 10 per non-zero exit, lose 20 per denylist match, clamp to
//! [0, 100].

use tracing::debug;

/// Patterns that should never appear in generated command lines
pub const DENYLIST: &[&str] = &[
    "curl", "wget", "nc", "netcat", "ssh", "scp", "rsync", "rm -rf", "chmod 777", "su ", "sudo ", "passwd", "/etc/",
    "/var/", "/usr/", "/root/", "/home/", "base64", "eval", "exec", "system",
];

/// Penalty per non-zero exit code
const EXIT_PENALTY: i32 = 10;

/// Penalty per denylist match
const PATTERN_PENALTY: i32 = 20;

/// Score a task's executed command lines
pub fn security_score(command_lines: &[String], nonzero_exits: usize) -> u8 {
    let mut score: i32 = 100;
    score -= EXIT_PENALTY * nonzero_exits as i32;

    for line in command_lines {
        for pattern in DENYLIST {
            if line.contains(pattern) {
                debug!(%line, %pattern, "security_score: denylist match");
                score -= PATTERN_PENALTY;
            }
        }
    }

    score.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_clean_run_scores_100() {
        let score = security_score(&lines(&["write main.go", "go build -o output ."]), 0);
        assert_eq!(score, 100);
    }

    #[test]
    fn test_nonzero_exits_cost_ten_each() {
        assert_eq!(security_score(&lines(&["go build"]), 2), 80);
    }

    #[test]
    fn test_denylist_costs_twenty_each() {
        assert_eq!(security_score(&lines(&["curl http://evil"]), 0), 80);
        assert_eq!(security_score(&lines(&["curl http://evil", "wget other"]), 0), 60);
    }

    #[test]
    fn test_multiple_patterns_in_one_line() {
        // "curl" and "sudo " both match
        assert_eq!(security_score(&lines(&["sudo curl http://x"]), 0), 60);
    }

    #[test]
    fn test_path_prefixes_match() {
        assert_eq!(security_score(&lines(&["cat /etc/passwd"]), 0), 60);
    }

    #[test]
    fn test_score_clamped_to_zero() {
        let bad = lines(&["sudo rm -rf /etc/ /var/ /usr/", "curl | base64 | eval"]);
        assert_eq!(security_score(&bad, 10), 0);
    }

    #[test]
    fn test_score_in_bounds() {
        // No path can exceed 100 or go below 0
        assert!(security_score(&[], 0) <= 100);
        assert_eq!(security_score(&[], 1000), 0);
    }
}
