//! Rendering dialects reported by outputs and used by content evaluators.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const CRITICAL_COLOUR: &str = "#c00000";
pub const HIGH_COLOUR: &str = "#e0443d";
pub const MEDIUM_COLOUR: &str = "#f79421";
pub const LOW_COLOUR: &str = "#e1c930";
pub const NEGLIGIBLE_COLOUR: &str = "green";

/// Markup dialect an output understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Html,
    /// Slack mrkdwn.
    Slack,
    /// Jira wiki markup.
    Jira,
    Markdown,
    Plain,
}

impl Layout {
    pub fn name(&self) -> &'static str {
        match self {
            Layout::Html => "html",
            Layout::Slack => "slack",
            Layout::Jira => "jira",
            Layout::Markdown => "markdown",
            Layout::Plain => "plain",
        }
    }

    pub fn title_h2(&self, text: &str) -> String {
        match self {
            Layout::Html => format!("<h2>{text}</h2>\n"),
            Layout::Slack => format!("*{text}*\n"),
            Layout::Jira => format!("h2. {text}\n"),
            Layout::Markdown => format!("## {text}\n\n"),
            Layout::Plain => format!("{text}\n"),
        }
    }

    pub fn title_h3(&self, text: &str) -> String {
        match self {
            Layout::Html => format!("<h3>{text}</h3>\n"),
            Layout::Slack => format!("_{text}_\n"),
            Layout::Jira => format!("h3. {text}\n"),
            Layout::Markdown => format!("### {text}\n\n"),
            Layout::Plain => format!("{text}\n"),
        }
    }

    pub fn p(&self, text: &str) -> String {
        match self {
            Layout::Html => format!("<p>{text}</p>\n"),
            Layout::Markdown => format!("{text}\n\n"),
            Layout::Slack | Layout::Jira | Layout::Plain => format!("{text}\n"),
        }
    }

    pub fn colour_text(&self, text: &str, colour: &str) -> String {
        match self {
            Layout::Html => format!("<span style='color:{colour}'>{text}</span>"),
            Layout::Jira => format!("{{color:{colour}}}{text}{{color}}"),
            Layout::Slack | Layout::Markdown | Layout::Plain => text.to_string(),
        }
    }

    /// Render rows as a table; the first row is the header.
    pub fn table(&self, rows: &[Vec<String>]) -> String {
        let Some((header, body)) = rows.split_first() else {
            return String::new();
        };
        let mut out = String::new();
        match self {
            Layout::Html => {
                out.push_str("<TABLE border='1' style='width: 100%; border-collapse: collapse;'>\n");
                out.push_str("<TR>");
                for cell in header {
                    out.push_str(&format!("<TH style='padding: 5px;'>{cell}</TH>"));
                }
                out.push_str("</TR>\n");
                for row in body {
                    out.push_str("<TR>");
                    for cell in row {
                        out.push_str(&format!("<TD style='padding: 5px;'>{cell}</TD>"));
                    }
                    out.push_str("</TR>\n");
                }
                out.push_str("</TABLE>\n");
            }
            Layout::Jira => {
                out.push_str(&format!("||{}||\n", header.join("||")));
                for row in body {
                    out.push_str(&format!("|{}|\n", row.join("|")));
                }
            }
            Layout::Markdown => {
                out.push_str(&format!("| {} |\n", header.join(" | ")));
                let rule: Vec<&str> = header.iter().map(|_| "---").collect();
                out.push_str(&format!("| {} |\n", rule.join(" | ")));
                for row in body {
                    out.push_str(&format!("| {} |\n", row.join(" | ")));
                }
                out.push('\n');
            }
            Layout::Slack => {
                let bold: Vec<String> = header.iter().map(|h| format!("*{h}*")).collect();
                out.push_str(&format!("{}\n", bold.join(" | ")));
                for row in body {
                    out.push_str(&format!("{}\n", row.join(" | ")));
                }
            }
            Layout::Plain => {
                for row in rows {
                    out.push_str(&format!("{}\n", row.join(" | ")));
                }
            }
        }
        out
    }
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Layout::Html),
            "slack" | "mrkdwn" => Ok(Layout::Slack),
            "jira" => Ok(Layout::Jira),
            "markdown" | "md" => Ok(Layout::Markdown),
            "plain" | "text" => Ok(Layout::Plain),
            other => Err(format!("unknown layout: {other}")),
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Vec<String>> {
        vec![
            vec!["A".to_string(), "B".to_string()],
            vec!["1".to_string(), "2".to_string()],
        ]
    }

    #[test]
    fn jira_table_uses_double_pipes_for_header() {
        assert_eq!(Layout::Jira.table(&rows()), "||A||B||\n|1|2|\n");
    }

    #[test]
    fn markdown_table_has_rule_line() {
        let t = Layout::Markdown.table(&rows());
        assert!(t.starts_with("| A | B |\n| --- | --- |\n| 1 | 2 |\n"));
    }

    #[test]
    fn html_table_wraps_cells() {
        let t = Layout::Html.table(&rows());
        assert!(t.contains("<TH style='padding: 5px;'>A</TH>"));
        assert!(t.contains("<TD style='padding: 5px;'>2</TD>"));
        assert!(t.ends_with("</TABLE>\n"));
    }

    #[test]
    fn empty_table_renders_nothing() {
        assert_eq!(Layout::Html.table(&[]), "");
    }

    #[test]
    fn colour_only_where_supported() {
        assert_eq!(Layout::Jira.colour_text("3", CRITICAL_COLOUR), "{color:#c00000}3{color}");
        assert_eq!(Layout::Slack.colour_text("3", CRITICAL_COLOUR), "3");
    }

    #[test]
    fn parses_names() {
        assert_eq!("HTML".parse::<Layout>().unwrap(), Layout::Html);
        assert_eq!("mrkdwn".parse::<Layout>().unwrap(), Layout::Slack);
        assert!("xml".parse::<Layout>().is_err());
    }
}
