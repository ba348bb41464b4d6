//! Search parameters and CAPES search URL construction.
//!
//! Raw CLI values go into [`SearchParams`], are checked by
//! [`SearchParams::validate`], and only a [`ValidatedParams`] can be turned
//! into a URL by [`CapesUrlBuilder`].

use crate::error::{CapesError, Result};
use chrono::Datelike;
use std::fmt;
use tracing::debug;

/// CAPES periodicals search endpoint
pub const SEARCH_ENDPOINT: &str = "https://www.periodicos.capes.gov.br/index.php/acervo/buscador.html";

/// Raw search filters as given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    /// Free-text query (required)
    pub search_term: String,
    /// Open access filter: "sim", "nao" or "" for any
    pub access_type: String,
    /// Publication type, e.g. "Artigo"
    pub publication_type: String,
    /// Minimum publication year, 0 for unset
    pub year_min: i32,
    /// Maximum publication year, 0 for unset
    pub year_max: i32,
    /// Peer-review filter: "sim", "nao" or "" for any
    pub peer_reviewed: String,
    pub languages: Vec<String>,
}

/// Search filters that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedParams {
    pub search_term: String,
    pub open_access: Option<bool>,
    pub publication_type: Option<String>,
    pub year_min: Option<i32>,
    /// Upper year bound; the current year when only a minimum was given
    pub year_max: Option<i32>,
    pub peer_reviewed: Option<bool>,
    pub languages: Vec<String>,
}

/// Split a "Português/Inglês" style flag into trimmed language names
pub fn parse_languages(raw: &str) -> Vec<String> {
    raw.split('/')
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_toggle(field: &str, value: &str) -> Result<Option<bool>> {
    match value.trim() {
        "" => Ok(None),
        "sim" => Ok(Some(true)),
        "nao" => Ok(Some(false)),
        other => Err(CapesError::config(format!(
            "invalid {} value: {} (must be 'sim' or 'nao')",
            field, other
        ))),
    }
}

impl SearchParams {
    pub fn new(search_term: impl Into<String>) -> Self {
        Self {
            search_term: search_term.into(),
            ..Default::default()
        }
    }

    /// Validate against the current calendar year
    pub fn validate(self) -> Result<ValidatedParams> {
        self.validate_at(chrono::Local::now().year())
    }

    /// Validate, resolving a lone minimum year against `current_year`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty term, an unknown toggle
    /// value, a negative year, or a minimum above the effective maximum.
    pub fn validate_at(self, current_year: i32) -> Result<ValidatedParams> {
        let search_term = self.search_term.trim().to_string();
        if search_term.is_empty() {
            return Err(CapesError::config("search term is required"));
        }

        let open_access = parse_toggle("access type", &self.access_type)?;
        let peer_reviewed = parse_toggle("peer review", &self.peer_reviewed)?;

        if self.year_min < 0 {
            return Err(CapesError::config(format!(
                "invalid minimum year: {} (must be positive)",
                self.year_min
            )));
        }
        if self.year_max < 0 {
            return Err(CapesError::config(format!(
                "invalid maximum year: {} (must be positive)",
                self.year_max
            )));
        }

        let year_min = (self.year_min > 0).then_some(self.year_min);
        let year_max = match (year_min, self.year_max) {
            (Some(_), 0) => Some(current_year),
            (_, 0) => None,
            (_, max) => Some(max),
        };

        if let (Some(min), Some(max)) = (year_min, year_max) {
            if min > max {
                return Err(CapesError::config(format!(
                    "minimum year ({}) cannot be greater than maximum year ({})",
                    min, max
                )));
            }
        }

        let publication_type = Some(self.publication_type.trim().to_string()).filter(|t| !t.is_empty());
        let languages = self
            .languages
            .iter()
            .map(|lang| lang.trim())
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ValidatedParams {
            search_term,
            open_access,
            publication_type,
            year_min,
            year_max,
            peer_reviewed,
            languages,
        })
    }
}

fn toggle_label(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "sim",
        Some(false) => "nao",
        None => "qualquer",
    }
}

impl fmt::Display for ValidatedParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(40);
        writeln!(f, "{}", rule)?;
        writeln!(f, " RELATÓRIO DA BUSCA")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Termos de busca:    {}", self.search_term)?;
        writeln!(f, "Acesso aberto:      {}", toggle_label(self.open_access))?;
        writeln!(
            f,
            "Tipo de publicação: {}",
            self.publication_type.as_deref().unwrap_or("qualquer")
        )?;

        let years = if self.year_min.is_none() && self.year_max.is_none() {
            "qualquer".to_string()
        } else {
            let show = |year: Option<i32>| {
                year.map(|y| y.to_string())
                    .unwrap_or_else(|| "não especificado".to_string())
            };
            format!("{} até {}", show(self.year_min), show(self.year_max))
        };
        writeln!(f, "Anos de publicação: {}", years)?;
        writeln!(f, "Revisão por pares:  {}", toggle_label(self.peer_reviewed))?;

        let languages = if self.languages.is_empty() {
            "qualquer".to_string()
        } else {
            self.languages.join(", ")
        };
        writeln!(f, "Idiomas:            {}", languages)?;
        write!(f, "{}", rule)
    }
}

/// Builds CAPES search URLs in the portal's parameter layout
#[derive(Debug, Clone)]
pub struct CapesUrlBuilder {
    base_url: String,
}

impl Default for CapesUrlBuilder {
    fn default() -> Self {
        Self::new(SEARCH_ENDPOINT)
    }
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

impl CapesUrlBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Search URL for `params`.
    ///
    /// Parameters appear in a fixed order: term, empty source, then the
    /// optional filters, one `language[]` entry per language.
    pub fn build(&self, params: &ValidatedParams) -> String {
        let mut query = vec![format!("q={}", encode(&params.search_term)), "source=".to_string()];

        if let Some(open) = params.open_access {
            query.push(format!("open_access%5B%5D=open_access%3D%3D{}", flag(open)));
        }
        if let Some(kind) = &params.publication_type {
            query.push(format!("type%5B%5D={}", encode(&format!("type=={}", kind))));
        }
        if let Some(min) = params.year_min {
            query.push(format!("publishyear_min%5B%5D={}", min));
        }
        if let Some(max) = params.year_max {
            query.push(format!("publishyear_max%5B%5D={}", max));
        }
        if let Some(reviewed) = params.peer_reviewed {
            query.push(format!("peer_reviewed%5B%5D=peer_reviewed%3D%3D{}", flag(reviewed)));
        }
        for lang in &params.languages {
            query.push(format!("language%5B%5D=language%3D%3D{}", encode(lang)));
        }

        let url = format!("{}?{}", self.base_url, query.join("&"));
        debug!(url = %url, "Built search URL");
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_url() {
        let params = SearchParams::new("vacinas covid").validate_at(2025).expect("valid");
        assert_eq!(
            CapesUrlBuilder::default().build(&params),
            format!("{}?q=vacinas+covid&source=", SEARCH_ENDPOINT)
        );
    }

    #[test]
    fn test_full_url_layout() {
        let params = SearchParams {
            search_term: "saúde mental".to_string(),
            access_type: "sim".to_string(),
            publication_type: "Artigo".to_string(),
            year_min: 2018,
            year_max: 2022,
            peer_reviewed: "nao".to_string(),
            languages: parse_languages("Português / Inglês"),
        }
        .validate_at(2025)
        .expect("valid");

        let url = CapesUrlBuilder::new("https://x.org/b").build(&params);
        assert_eq!(
            url,
            "https://x.org/b?q=sa%C3%BAde+mental&source=\
             &open_access%5B%5D=open_access%3D%3D1\
             &type%5B%5D=type%3D%3DArtigo\
             &publishyear_min%5B%5D=2018\
             &publishyear_max%5B%5D=2022\
             &peer_reviewed%5B%5D=peer_reviewed%3D%3D0\
             &language%5B%5D=language%3D%3DPortugu%C3%AAs\
             &language%5B%5D=language%3D%3DIngl%C3%AAs"
        );
    }

    #[test]
    fn test_lone_minimum_year_uses_current_year() {
        let params = SearchParams {
            year_min: 2020,
            ..SearchParams::new("x")
        }
        .validate_at(2025)
        .expect("valid");
        assert_eq!(params.year_min, Some(2020));
        assert_eq!(params.year_max, Some(2025));
    }

    #[test]
    fn test_validation_errors() {
        let cases = vec![
            SearchParams::new("   "),
            SearchParams {
                access_type: "talvez".to_string(),
                ..SearchParams::new("x")
            },
            SearchParams {
                peer_reviewed: "yes".to_string(),
                ..SearchParams::new("x")
            },
            SearchParams {
                year_min: -1,
                ..SearchParams::new("x")
            },
            SearchParams {
                year_min: 2024,
                year_max: 2020,
                ..SearchParams::new("x")
            },
            SearchParams {
                year_min: 2030,
                ..SearchParams::new("x")
            },
        ];

        for params in cases {
            let err = params.clone().validate_at(2025).expect_err("should be rejected");
            assert_eq!(err.kind(), crate::error::ErrorKind::Configuration, "{:?}", params);
        }
    }

    #[test]
    fn test_parse_languages() {
        assert_eq!(parse_languages(" Português/ Inglês /"), vec!["Português", "Inglês"]);
        assert!(parse_languages("").is_empty());
    }

    #[test]
    fn test_report_mentions_filters() {
        let params = SearchParams {
            year_max: 2020,
            ..SearchParams::new("vacinas")
        }
        .validate_at(2025)
        .expect("valid");
        let report = params.to_string();
        assert!(report.contains("Termos de busca:    vacinas"));
        assert!(report.contains("Anos de publicação: não especificado até 2020"));
        assert!(report.contains("Idiomas:            qualquer"));
    }
}
