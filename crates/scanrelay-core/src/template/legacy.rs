//! Built-in renderer producing the classic scan report.

use std::str::FromStr;

use serde_json::Value;

use super::{ContentEvaluator, RenderContext};
use crate::domain::content::{DESCRIPTION, TITLE, URL};
use crate::domain::{Content, RenderError, Resource, ScanRecord};
use crate::layout::{
    Layout, CRITICAL_COLOUR, HIGH_COLOUR, LOW_COLOUR, MEDIUM_COLOUR, NEGLIGIBLE_COLOUR,
};

const EMPTY_CELL: &str = "none";

/// Legacy scan renderer. `Auto` follows the layout of the output it renders for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyScanRenderer {
    Auto,
    Fixed(Layout),
}

impl LegacyScanRenderer {
    pub fn from_name(name: &str) -> Result<Self, String> {
        match name.trim() {
            "" | "auto" => Ok(Self::Auto),
            other => Layout::from_str(other).map(Self::Fixed),
        }
    }

    fn layout(&self, ctx: &RenderContext<'_>) -> Layout {
        match self {
            Self::Auto => ctx.layout,
            Self::Fixed(layout) => *layout,
        }
    }
}

impl ContentEvaluator for LegacyScanRenderer {
    fn describe(&self) -> String {
        match self {
            Self::Auto => "legacy:auto".to_string(),
            Self::Fixed(layout) => format!("legacy:{layout}"),
        }
    }

    fn eval(&self, event: &Value, ctx: &RenderContext<'_>) -> Result<Content, RenderError> {
        let scan = ScanRecord::from_value(event).map_err(|e| RenderError::Render(e.to_string()))?;
        let previous = match ctx.previous {
            Some(prev) => Some(
                ScanRecord::from_value(prev).map_err(|e| RenderError::Render(e.to_string()))?,
            ),
            None => None,
        };
        let layout = self.layout(ctx);

        let mut content = Content::new();
        content.insert(TITLE.to_string(), format!("{} vulnerability scan report", scan.image));
        content.insert(
            DESCRIPTION.to_string(),
            description(layout, &scan, previous.as_ref()),
        );
        content.insert(URL.to_string(), image_url(ctx.server_url, &scan));
        Ok(content)
    }

    fn is_aggregation_supported(&self) -> bool {
        true
    }

    fn build_aggregated_content(
        &self,
        items: &[Content],
        ctx: &RenderContext<'_>,
    ) -> Result<Content, RenderError> {
        let layout = self.layout(ctx);
        let mut description = String::new();
        let mut urls = Vec::new();
        for item in items {
            let title = item.get(TITLE).map(String::as_str).unwrap_or_default();
            description.push_str(&layout.title_h2(title));
            if let Some(d) = item.get(DESCRIPTION) {
                description.push_str(d);
            }
            if let Some(url) = item.get(URL).filter(|u| !u.is_empty()) {
                urls.push(url.as_str());
            }
        }

        let mut content = Content::new();
        content.insert(
            TITLE.to_string(),
            format!("{} vulnerability scan reports", items.len()),
        );
        content.insert(DESCRIPTION.to_string(), description);
        content.insert(URL.to_string(), urls.join(","));
        Ok(content)
    }
}

/// `<server_url><registry>/<image>` with `/` escaped inside the image path.
fn image_url(server_url: &str, scan: &ScanRecord) -> String {
    if server_url.is_empty() {
        return String::new();
    }
    format!("{server_url}{}/{}", scan.registry, scan.image.replace('/', "%2F"))
}

fn description(layout: Layout, scan: &ScanRecord, previous: Option<&ScanRecord>) -> String {
    let mut out = String::new();
    out.push_str(&layout.p(&format!("Image name: {}", scan.image)));
    out.push_str(&layout.p(&format!("Registry: {}", scan.registry)));
    out.push_str(&layout.p(if scan.is_disallowed() {
        "Image is non-compliant"
    } else {
        "Image is compliant"
    }));

    let summary = &scan.vulnerability_summary;
    if scan.scan_options.scan_malware {
        out.push_str(&layout.p(&format!("Malware found: {}", yes_no(summary.malware > 0))));
    }
    if scan.scan_options.scan_sensitive_data {
        out.push_str(&layout.p(&format!(
            "Sensitive data found: {}",
            yes_no(summary.sensitive > 0)
        )));
    }

    out.push_str(&layout.table(&[
        cells(&["CRITICAL", "HIGH", "MEDIUM", "LOW", "NEGLIGIBLE"]),
        vec![
            layout.colour_text(&summary.critical.to_string(), CRITICAL_COLOUR),
            layout.colour_text(&summary.high.to_string(), HIGH_COLOUR),
            layout.colour_text(&summary.medium.to_string(), MEDIUM_COLOUR),
            layout.colour_text(&summary.low.to_string(), LOW_COLOUR),
            layout.colour_text(&summary.negligible.to_string(), NEGLIGIBLE_COLOUR),
        ],
    ]));

    let checks = &scan.image_assurance_results.checks_performed;
    if !checks.is_empty() {
        out.push_str(&layout.title_h2("Assurance controls"));
        let mut rows = vec![cells(&["#", "Control", "Policy Name", "Status"])];
        for (i, check) in checks.iter().enumerate() {
            rows.push(vec![
                (i + 1).to_string(),
                check.control.clone(),
                check.policy_name.clone(),
                if check.failed { "FAIL" } else { "PASS" }.to_string(),
            ]);
        }
        out.push_str(&layout.table(&rows));
    }

    if !scan.resources.is_empty() {
        out.push_str(&layout.title_h2("Found vulnerabilities"));
        render_resources(layout, &scan.resources, &mut out);
    }

    if let Some(prev) = previous.filter(|p| !p.resources.is_empty()) {
        out.push('\n');
        out.push_str(&layout.title_h2("Discovered vulnerabilities from last scan"));
        render_resources(layout, &prev.resources, &mut out);
    }
    out
}

fn render_resources(layout: Layout, resources: &[Resource], out: &mut String) {
    for resource in resources {
        let heading = format!(
            "Resource name: {}, version: {}",
            or_none(&resource.resource.name),
            or_none(&resource.resource.version)
        );
        out.push_str(&layout.title_h3(&heading));
        let mut rows = vec![cells(&["#", "Name", "Severity", "Version", "Fix version"])];
        for (i, v) in resource.vulnerabilities.iter().enumerate() {
            rows.push(vec![
                (i + 1).to_string(),
                or_none(&v.name),
                or_none(&v.aqua_severity),
                or_none(&v.version),
                or_none(&v.fix_version),
            ]);
        }
        out.push_str(&layout.table(&rows));
    }
}

fn cells(headers: &[&str]) -> Vec<String> {
    headers.iter().map(|h| h.to_string()).collect()
}

fn or_none(value: &str) -> String {
    if value.trim().is_empty() {
        EMPTY_CELL.to_string()
    } else {
        value.to_string()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(layout: Layout) -> RenderContext<'static> {
        RenderContext {
            server_url: "https://demolab.example.com/#/images/",
            layout,
            previous: None,
        }
    }

    fn scan() -> Value {
        json!({
            "image": "alpine:3.18",
            "registry": "docker.io",
            "vulnerability_summary": { "critical": 0, "high": 0, "medium": 2, "low": 1 },
            "image_assurance_results": {
                "disallowed": false,
                "checks_performed": [
                    { "control": "max_severity", "policy_name": "Default", "failed": false }
                ]
            },
            "resources": [{
                "resource": { "name": "openssl", "version": "3.0.1" },
                "vulnerabilities": [
                    { "name": "CVE-2023-0001", "version": "3.0.1", "fix_version": "3.0.8", "aqua_severity": "medium" },
                    { "name": "CVE-2023-0002", "version": "3.0.1", "aqua_severity": "medium" }
                ]
            }]
        })
    }

    #[test]
    fn renders_title_url_and_counts() {
        let content = LegacyScanRenderer::Auto
            .eval(&scan(), &ctx(Layout::Markdown))
            .unwrap();
        assert_eq!(content[TITLE], "alpine:3.18 vulnerability scan report");
        assert_eq!(
            content[URL],
            "https://demolab.example.com/#/images/docker.io/alpine:3.18"
        );
        let d = &content[DESCRIPTION];
        assert!(d.contains("Image name: alpine:3.18"));
        assert!(d.contains("Image is compliant"));
        assert!(d.contains("| CRITICAL | HIGH | MEDIUM | LOW | NEGLIGIBLE |"));
        assert!(d.contains("| 0 | 0 | 2 | 1 | 0 |"));
        assert!(d.contains("## Assurance controls"));
        assert!(d.contains("| 1 | max_severity | Default | PASS |"));
        assert!(d.contains("### Resource name: openssl, version: 3.0.1"));
        assert!(d.contains("| 2 | CVE-2023-0002 | medium | 3.0.1 | none |"));
        assert!(!d.contains("Malware found"));
    }

    #[test]
    fn fixed_layout_ignores_output_layout() {
        let renderer = LegacyScanRenderer::from_name("jira").unwrap();
        let content = renderer.eval(&scan(), &ctx(Layout::Html)).unwrap();
        assert!(content[DESCRIPTION].contains("||CRITICAL||HIGH||MEDIUM||LOW||NEGLIGIBLE||"));
        assert!(content[DESCRIPTION].contains("{color:#f79421}2{color}"));
    }

    #[test]
    fn malware_and_previous_scan_sections() {
        let mut event = scan();
        event["scan_options"] = json!({ "scan_malware": true });
        event["vulnerability_summary"]["malware"] = json!(1);
        let previous = json!({
            "image": "alpine:3.18",
            "resources": [{ "resource": { "name": "zlib" }, "vulnerabilities": [] }]
        });
        let context = RenderContext {
            previous: Some(&previous),
            ..ctx(Layout::Plain)
        };
        let content = LegacyScanRenderer::Auto.eval(&event, &context).unwrap();
        let d = &content[DESCRIPTION];
        assert!(d.contains("Malware found: Yes"));
        assert!(d.contains("Discovered vulnerabilities from last scan"));
        assert!(d.contains("Resource name: zlib, version: none"));
    }

    #[test]
    fn only_image_slashes_are_escaped_in_link() {
        let mut event = scan();
        event["image"] = json!("library/alpine:3.18");
        let content = LegacyScanRenderer::Auto
            .eval(&event, &ctx(Layout::Plain))
            .unwrap();
        assert_eq!(
            content[URL],
            "https://demolab.example.com/#/images/docker.io/library%2Falpine:3.18"
        );
    }

    #[test]
    fn empty_server_url_yields_empty_link() {
        let context = RenderContext {
            server_url: "",
            ..ctx(Layout::Plain)
        };
        let content = LegacyScanRenderer::Auto.eval(&scan(), &context).unwrap();
        assert_eq!(content[URL], "");
    }

    #[test]
    fn aggregates_items_under_h2_titles() {
        let renderer = LegacyScanRenderer::Auto;
        let c = ctx(Layout::Html);
        let a = renderer.eval(&scan(), &c).unwrap();
        let mut other = scan();
        other["image"] = json!("nginx:1.25");
        let b = renderer.eval(&other, &c).unwrap();

        let merged = renderer.build_aggregated_content(&[a, b], &c).unwrap();
        assert_eq!(merged[TITLE], "2 vulnerability scan reports");
        assert!(merged[DESCRIPTION].contains("<h2>alpine:3.18 vulnerability scan report</h2>"));
        assert!(merged[DESCRIPTION].contains("<h2>nginx:1.25 vulnerability scan report</h2>"));
        assert_eq!(merged[URL].split(',').count(), 2);
    }

    #[test]
    fn rejects_unknown_layout() {
        assert!(LegacyScanRenderer::from_name("xml").is_err());
        assert_eq!(LegacyScanRenderer::from_name("auto").unwrap(), LegacyScanRenderer::Auto);
    }
}
