use crate::error::{Result, ScanError};
use crate::loader::RenderedPage;
use crate::result::{Impact, Violation};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

/// What an analyzer reports for one page.
#[derive(Debug, Clone, Default)]
pub struct PageAnalysis {
    pub violations: Vec<Violation>,
    /// Raw hrefs as found on the page; the engine resolves and filters them.
    pub links: Vec<String>,
}

/// Evaluates accessibility rules against a loaded page.
#[async_trait]
pub trait PageAnalyzer: Send + Sync {
    async fn analyze(&self, page: &RenderedPage) -> Result<PageAnalysis>;
}

/// Structural HTML checks that need no browser.
#[derive(Debug, Default, Clone)]
pub struct HtmlAnalyzer;

#[async_trait]
impl PageAnalyzer for HtmlAnalyzer {
    async fn analyze(&self, page: &RenderedPage) -> Result<PageAnalysis> {
        analyze_html(&page.body)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScanError::AnalyzerError(format!("bad selector {css}: {e}")))
}

fn snippet(element: &ElementRef) -> String {
    let mut html = element.html();
    if html.len() > 120 {
        let mut cut = 120;
        while !html.is_char_boundary(cut) {
            cut -= 1;
        }
        html.truncate(cut);
        html.push('…');
    }
    html
}

fn has_text(element: &ElementRef) -> bool {
    element.text().any(|t| !t.trim().is_empty())
}

fn has_attr(element: &ElementRef, name: &str) -> bool {
    element
        .value()
        .attr(name)
        .is_some_and(|v| !v.trim().is_empty())
}

pub fn analyze_html(body: &str) -> Result<PageAnalysis> {
    let document = Html::parse_document(body);
    let mut analysis = PageAnalysis::default();

    let link_selector = selector("a[href]")?;
    for element in document.select(&link_selector) {
        if let Some(href) = element.value().attr("href") {
            analysis.links.push(href.to_string());
        }
    }

    // html-has-lang
    let html_selector = selector("html")?;
    let has_lang = document
        .select(&html_selector)
        .next()
        .is_some_and(|html| has_attr(&html, "lang"));
    if !has_lang {
        analysis.violations.push(
            Violation::new(
                "html-has-lang",
                Impact::Serious,
                "The <html> element does not declare a lang attribute",
            )
            .with_help("Add a lang attribute such as lang=\"en\" to the <html> element"),
        );
    }

    // document-title
    let title_selector = selector("title")?;
    let has_title = document.select(&title_selector).any(|t| has_text(&t));
    if !has_title {
        analysis.violations.push(
            Violation::new(
                "document-title",
                Impact::Serious,
                "The document has no non-empty <title> element",
            )
            .with_help("Give every page a unique, descriptive <title>"),
        );
    }

    // image-alt
    let img_selector = selector("img")?;
    let missing_alt: Vec<String> = document
        .select(&img_selector)
        .filter(|img| img.value().attr("alt").is_none() && img.value().attr("role") != Some("presentation"))
        .map(|img| snippet(&img))
        .collect();
    if !missing_alt.is_empty() {
        let mut violation = Violation::new(
            "image-alt",
            Impact::Critical,
            "Images must have alternate text",
        )
        .with_help("Add an alt attribute; use alt=\"\" for decorative images");
        violation.targets = missing_alt;
        analysis.violations.push(violation);
    }

    // link-name
    let img_in_link = selector("img[alt]")?;
    let unnamed_links: Vec<String> = document
        .select(&link_selector)
        .filter(|a| {
            !has_text(a)
                && !has_attr(a, "aria-label")
                && !has_attr(a, "title")
                && !a.select(&img_in_link).any(|img| has_attr(&img, "alt"))
        })
        .map(|a| snippet(&a))
        .collect();
    if !unnamed_links.is_empty() {
        let mut violation = Violation::new(
            "link-name",
            Impact::Serious,
            "Links must have discernible text",
        );
        violation.targets = unnamed_links;
        analysis.violations.push(violation);
    }

    // label
    let label_selector = selector("label[for]")?;
    let labelled: HashSet<&str> = document
        .select(&label_selector)
        .filter_map(|l| l.value().attr("for"))
        .collect();
    let input_selector = selector("input, select, textarea")?;
    let unlabelled: Vec<String> = document
        .select(&input_selector)
        .filter(|input| {
            let kind = input.value().attr("type").unwrap_or("text");
            !matches!(kind, "hidden" | "submit" | "button" | "image" | "reset")
        })
        .filter(|input| {
            let by_for = input.value().attr("id").is_some_and(|id| labelled.contains(id));
            let wrapped = input
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| a.value().name() == "label");
            !by_for
                && !wrapped
                && !has_attr(input, "aria-label")
                && !has_attr(input, "aria-labelledby")
        })
        .map(|input| snippet(&input))
        .collect();
    if !unlabelled.is_empty() {
        let mut violation = Violation::new(
            "label",
            Impact::Critical,
            "Form elements must have labels",
        );
        violation.targets = unlabelled;
        analysis.violations.push(violation);
    }

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_ids(analysis: &PageAnalysis) -> Vec<&str> {
        analysis.violations.iter().map(|v| v.rule_id.as_str()).collect()
    }

    #[test]
    fn test_clean_page_has_no_violations() {
        let html = r#"<html lang="en"><head><title>Home</title></head><body>
            <a href="/about">About us</a>
            <img src="logo.png" alt="Company logo">
            <label for="q">Search</label><input id="q" type="text">
        </body></html>"#;
        let analysis = analyze_html(html).unwrap();
        assert!(analysis.violations.is_empty(), "{:?}", analysis.violations);
        assert_eq!(analysis.links, vec!["/about"]);
    }

    #[test]
    fn test_reports_structural_violations() {
        let html = r#"<html><body>
            <a href="/x"></a>
            <img src="a.png">
            <input type="email">
        </body></html>"#;
        let analysis = analyze_html(html).unwrap();
        let ids = rule_ids(&analysis);
        for expected in ["html-has-lang", "document-title", "image-alt", "link-name", "label"] {
            assert!(ids.contains(&expected), "missing {expected} in {ids:?}");
        }
        let image = analysis
            .violations
            .iter()
            .find(|v| v.rule_id == "image-alt")
            .unwrap();
        assert_eq!(image.targets.len(), 1);
        assert_eq!(image.impact, Impact::Critical);
    }

    #[test]
    fn test_wrapped_label_and_image_link_are_accepted() {
        let html = r#"<html lang="en"><head><title>T</title></head><body>
            <label>Name <input type="text"></label>
            <a href="/home"><img src="h.png" alt="Home"></a>
            <input type="hidden" name="csrf">
        </body></html>"#;
        let analysis = analyze_html(html).unwrap();
        assert!(analysis.violations.is_empty(), "{:?}", analysis.violations);
    }

    #[test]
    fn test_collects_all_hrefs_in_order() {
        let html = r##"<a href="/a">A</a><a href="#top">Top</a><a href="https://other.com/">O</a>"##;
        let analysis = analyze_html(html).unwrap();
        assert_eq!(analysis.links, vec!["/a", "#top", "https://other.com/"]);
    }
}
