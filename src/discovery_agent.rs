use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::airlines::{AirlineModel, ScrapeSourceUrl, SourceType};
use crate::airlines_repo::AirlinesRepository;
use crate::extractor::{ExtractOptions, Extractor};
use crate::page_loader::PageLoader;

/// Budget for HTML handed to the extractor.
const HTML_EXCERPT_BYTES: usize = 8 * 1024;

/// Generic fleet-database URL templates, tried after the airline's own
/// sources. `{slug}` is the lower-cased, hyphenated airline name.
const FLEET_DATABASE_TEMPLATES: &[&str] = &[
    "https://www.planespotters.net/airline/{slug}",
    "https://www.airfleets.net/flottecie/{slug}.htm",
    "https://www.flightradar24.com/data/airlines/{slug}",
];

static REGISTRATION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9-]+$").expect("registration token pattern must compile"));

/// How the winning fleet list was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Official,
    Database,
    Tracker,
    None,
}

impl From<SourceType> for DiscoveryMethod {
    fn from(source_type: SourceType) -> Self {
        match source_type {
            SourceType::Official => DiscoveryMethod::Official,
            SourceType::Database => DiscoveryMethod::Database,
            SourceType::Tracker => DiscoveryMethod::Tracker,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub airline_code: String,
    pub registrations: Vec<String>,
    pub source_urls: Vec<String>,
    pub confidence: f64,
    pub method: DiscoveryMethod,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    pub sources_override: Option<Vec<ScrapeSourceUrl>>,
    /// Advisory: prefer a fresh crawl over any cached page.
    pub force_full_scrape: bool,
}

#[derive(Deserialize)]
struct RegistrationsPayload {
    #[serde(default)]
    registrations: Vec<String>,
}

/// Build the ranked source list for an airline: stored source URLs first,
/// then the airline website, then the generic fleet databases.
pub fn build_source_list(airline: &AirlineModel) -> Vec<ScrapeSourceUrl> {
    let mut sources = airline.source_urls();

    if let Some(website) = &airline.website_url {
        sources.push(ScrapeSourceUrl {
            url: website.clone(),
            source_type: SourceType::Official,
            priority: 2,
        });
    }

    let slug = airline_name_slug(&airline.name);
    for template in FLEET_DATABASE_TEMPLATES {
        sources.push(ScrapeSourceUrl {
            url: template.replace("{slug}", &slug),
            source_type: SourceType::Database,
            priority: 3,
        });
    }

    sources.sort_by_key(|s| s.priority);
    sources
}

fn airline_name_slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Cut an HTML document down to the extractor budget, preferring `<table>`
/// regions since fleet listings are almost always tabular.
pub fn truncate_html(html: &str, max_bytes: usize) -> String {
    if html.len() <= max_bytes {
        return html.to_string();
    }

    // ASCII lowercasing keeps byte offsets aligned with the original
    let lower = html.to_ascii_lowercase();
    let mut excerpt = String::new();
    let mut cursor = 0usize;
    while let Some(start) = lower[cursor..].find("<table") {
        let start = cursor + start;
        let end = match lower[start..].find("</table>") {
            Some(offset) => start + offset + "</table>".len(),
            None => lower.len(),
        };
        let budget = max_bytes.saturating_sub(excerpt.len());
        if budget == 0 {
            break;
        }
        let table = &html[start..end];
        if table.len() <= budget {
            excerpt.push_str(table);
            excerpt.push('\n');
        } else {
            excerpt.push_str(truncate_at_char_boundary(table, budget));
            break;
        }
        cursor = end;
    }

    if excerpt.is_empty() {
        truncate_at_char_boundary(html, max_bytes).to_string()
    } else {
        excerpt
    }
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// Keep plausible tail numbers: 4-10 characters of [A-Z0-9-], upper-cased,
/// deduplicated in order.
pub fn filter_registrations(raw: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for candidate in raw {
        let candidate = candidate.trim().to_uppercase();
        if (4..=10).contains(&candidate.len())
            && REGISTRATION_TOKEN.is_match(&candidate)
            && !seen.contains(&candidate)
        {
            seen.push(candidate);
        }
    }
    seen
}

/// Confidence in a discovery outcome: base 0.5 for any hit, bumped by source
/// trust and fleet size.
pub fn discovery_confidence(source_type: SourceType, registration_count: usize) -> f64 {
    let mut confidence: f64 = 0.5;
    confidence += match source_type {
        SourceType::Official => 0.3,
        SourceType::Database => 0.2,
        SourceType::Tracker => 0.0,
    };
    if registration_count >= 10 {
        confidence += 0.1;
    }
    if registration_count >= 50 {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

/// Discovers the set of registrations an airline operates by walking its
/// ranked source list until one yields a fleet.
#[derive(Clone)]
pub struct DiscoveryAgent {
    airlines: AirlinesRepository,
    page_loader: Arc<dyn PageLoader>,
    extractor: Arc<dyn Extractor>,
}

impl DiscoveryAgent {
    pub fn new(
        airlines: AirlinesRepository,
        page_loader: Arc<dyn PageLoader>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            airlines,
            page_loader,
            extractor,
        }
    }

    #[tracing::instrument(skip(self, request), fields(%airline_code))]
    pub async fn discover(
        &self,
        airline_code: &str,
        request: &DiscoveryRequest,
    ) -> Result<DiscoveryResult> {
        let airline = self.airlines.get_by_code(airline_code).await?;
        let sources = match &request.sources_override {
            Some(overridden) => {
                let mut sources = overridden.clone();
                sources.sort_by_key(|s| s.priority);
                sources
            }
            None => build_source_list(&airline),
        };
        if request.force_full_scrape {
            debug!("Force-full-scrape requested for {}", airline.iata_code);
        }

        for source in &sources {
            match self.scrape_source(&airline, source).await {
                Ok(registrations) if !registrations.is_empty() => {
                    let confidence =
                        discovery_confidence(source.source_type, registrations.len());
                    info!(
                        "Discovered {} registrations for {} from {} source {}",
                        registrations.len(),
                        airline.iata_code,
                        source.source_type,
                        source.url
                    );
                    return Ok(DiscoveryResult {
                        airline_code: airline.iata_code.clone(),
                        registrations,
                        source_urls: vec![source.url.clone()],
                        confidence,
                        method: source.source_type.into(),
                        discovered_at: Utc::now(),
                    });
                }
                Ok(_) => {
                    debug!("Source {} yielded no registrations", source.url);
                }
                Err(e) => {
                    warn!("Source {} failed: {:#}", source.url, e);
                }
            }
        }

        info!("No source yielded a fleet for {}", airline.iata_code);
        Ok(DiscoveryResult {
            airline_code: airline.iata_code,
            registrations: Vec::new(),
            source_urls: Vec::new(),
            confidence: 0.0,
            method: DiscoveryMethod::None,
            discovered_at: Utc::now(),
        })
    }

    async fn scrape_source(
        &self,
        airline: &AirlineModel,
        source: &ScrapeSourceUrl,
    ) -> Result<Vec<String>> {
        let page = self.page_loader.fetch(&source.url).await?;
        let excerpt = truncate_html(&page.html, HTML_EXCERPT_BYTES);

        let prompt = format!(
            "The following HTML is from a page that may list the aircraft fleet of {} \
             ({}). Extract every aircraft registration (tail number) you can find and \
             respond with only JSON of the form {{\"registrations\": [\"...\"]}}. If the \
             page lists no registrations, respond with {{\"registrations\": []}}.\n\n{}",
            airline.name, airline.iata_code, excerpt
        );
        let payload = self
            .extractor
            .extract_json(&prompt, &ExtractOptions::default())
            .await?;
        let parsed: RegistrationsPayload = serde_json::from_value(payload)?;
        Ok(filter_registrations(parsed.registrations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_plausible_tail_numbers() {
        let raw = vec![
            "N123AB".to_string(),
            "n1zz".to_string(),
            "G-ABCD".to_string(),
            "x".to_string(),
            "THIS-IS-WAY-TOO-LONG".to_string(),
            "BAD REG".to_string(),
            "N123AB".to_string(),
        ];
        assert_eq!(filter_registrations(raw), vec!["N123AB", "N1ZZ", "G-ABCD"]);
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn confidence_rewards_official_sources_and_fleet_size() {
        assert_close(discovery_confidence(SourceType::Official, 2), 0.8);
        assert_close(discovery_confidence(SourceType::Database, 2), 0.7);
        assert_close(discovery_confidence(SourceType::Official, 10), 0.9);
        assert_close(discovery_confidence(SourceType::Official, 50), 1.0);
        assert!(discovery_confidence(SourceType::Database, 100) <= 1.0);
    }

    #[test]
    fn truncation_prefers_tables() {
        let filler = "x".repeat(10_000);
        let html = format!(
            "<html><body><p>{}</p><table><tr><td>N1ZZ</td></tr></table><p>tail</p></body></html>",
            filler
        );
        let excerpt = truncate_html(&html, 1024);
        assert!(excerpt.contains("N1ZZ"));
        assert!(excerpt.len() <= 1025);
    }

    #[test]
    fn truncation_falls_back_to_prefix_without_tables() {
        let html = "y".repeat(10_000);
        let excerpt = truncate_html(&html, 512);
        assert_eq!(excerpt.len(), 512);
    }

    #[test]
    fn short_documents_pass_through() {
        let html = "<table><tr><td>N1</td></tr></table>";
        assert_eq!(truncate_html(html, 8192), html);
    }

    #[test]
    fn slug_flattens_punctuation() {
        assert_eq!(airline_name_slug("Zenith Zephyr Air"), "zenith-zephyr-air");
        assert_eq!(airline_name_slug("  Brussels  Airlines "), "brussels-airlines");
        assert_eq!(airline_name_slug("LATAM (Brasil)"), "latam-brasil");
    }
}
