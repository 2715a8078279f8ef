//! Command table and command-line parsing.

use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Report,
    CheckReports,
    Teleport,
    DeleteReports,
    HandleReports,
    ReloadSettings,
    Reseed,
}

pub struct CommandSpec {
    pub command: Command,
    pub names: &'static [&'static str],
    pub capability: &'static str,
    /// Whether the server console may run it.
    pub allow_console: bool,
    pub help: &'static [&'static str],
}

pub const CAP_REPORT: &str = "reports.report";
pub const CAP_CHECK: &str = "reports.report.check";
pub const CAP_TELEPORT: &str = "reports.report.teleport";
pub const CAP_DELETE: &str = "reports.report.delete";
pub const CAP_HANDLE: &str = "reports.report.handle";
pub const CAP_RELOAD: &str = "reports.reload";
pub const CAP_RESEED: &str = "reports.admin.reseed";

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: Command::Report,
        names: &["report"],
        capability: CAP_REPORT,
        allow_console: false,
        help: &[
            "Create an admin-viewable report for a player",
            "Usage: /report <player> [reason]",
        ],
    },
    CommandSpec {
        command: Command::CheckReports,
        names: &["creport", "creports", "checkreports"],
        capability: CAP_CHECK,
        allow_console: true,
        help: &[
            "View any reports filed by players",
            "Usage: /creports [search|id|page <number>]",
        ],
    },
    CommandSpec {
        command: Command::Teleport,
        names: &["rtp", "rteleport"],
        capability: CAP_TELEPORT,
        allow_console: false,
        help: &[
            "Teleports you to the location your last read report was created at",
            "Usage: /rtp",
        ],
    },
    CommandSpec {
        command: Command::DeleteReports,
        names: &["dreport", "dreports", "deletereports"],
        capability: CAP_DELETE,
        allow_console: true,
        help: &[
            "Deletes a report, or a range of reports",
            "Usage: /dreports id",
            "Usage: /dreports id id2 id3 ... idn",
        ],
    },
    CommandSpec {
        command: Command::HandleReports,
        names: &["hreport", "hreports", "handle"],
        capability: CAP_HANDLE,
        allow_console: true,
        help: &[
            "Set a handled state on a single report, or range of reports.",
            "This means that they will not be displayed as new reports.",
        ],
    },
    CommandSpec {
        command: Command::ReloadSettings,
        names: &["rsettings"],
        capability: CAP_RELOAD,
        allow_console: true,
        help: &["Reloads Reports.json and ReportSettings.txt"],
    },
    CommandSpec {
        command: Command::Reseed,
        names: &["reseed"],
        capability: CAP_RESEED,
        allow_console: true,
        help: &[
            "Reseeds the auto-increment value of the reports database.",
            "You should only use this if you know what the above sentence means.",
            "Your reports database must be empty for this command to work.",
        ],
    },
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.names.iter().any(|n| n.eq_ignore_ascii_case(name)))
}

/// `true` if `granted` holds `wanted`, `*`, or a wildcard such as `reports.*`
/// covering it.
pub fn has_capability(granted: &HashSet<String>, wanted: &str) -> bool {
    if granted.contains(wanted) || granted.contains("*") {
        return true;
    }
    let mut prefix = wanted;
    while let Some((head, _)) = prefix.rsplit_once('.') {
        if granted.contains(&format!("{head}.*")) {
            return true;
        }
        prefix = head;
    }
    false
}

/// Splits a command line into its name and arguments.
///
/// A leading `/` is optional. Double quotes group words and `\` escapes the
/// next character. Returns `None` for a blank line.
pub fn parse_line(line: &str) -> Option<(String, Vec<String>)> {
    let line = line.trim();
    let line = line.strip_prefix('/').unwrap_or(line);

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut had_quotes = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                quoted = !quoted;
                had_quotes = true;
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() || had_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
                had_quotes = false;
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() || had_quotes {
        tokens.push(current);
    }

    let mut tokens = tokens.into_iter();
    let name = tokens.next()?;
    if name.is_empty() {
        return None;
    }
    Some((name, tokens.collect()))
}
